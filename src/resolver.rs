//! Output location resolution
//!
//! Precedence, highest first: explicit call-site override, session default,
//! the configuration's own stored directory. Resolution is recomputed on every
//! request and never writes back into the configuration.

use std::path::{Path, PathBuf};

/// Resolve a recorder's output directory against its configuration default
pub fn resolve(explicit_override: Option<&Path>, configuration_default: &Path) -> PathBuf {
    explicit_override
        .unwrap_or(configuration_default)
        .to_path_buf()
}

/// Resolve through the full precedence chain.
///
/// Returns `None` when no level provides a directory; file-producing recorders
/// then keep their output in memory.
pub fn resolve_chain(
    explicit_override: Option<&Path>,
    session_default: Option<&Path>,
    configuration_default: Option<&Path>,
) -> Option<PathBuf> {
    explicit_override
        .or(session_default)
        .or(configuration_default)
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_prefers_override() {
        let default = PathBuf::from("/a");

        assert_eq!(resolve(None, &default), PathBuf::from("/a"));
        assert_eq!(resolve(Some(Path::new("/b")), &default), PathBuf::from("/b"));
        // Default untouched by the previous override
        assert_eq!(resolve(None, &default), PathBuf::from("/a"));
        assert_eq!(default, PathBuf::from("/a"));
    }

    #[test]
    fn test_resolve_chain_precedence() {
        let explicit = Path::new("/explicit");
        let session = Path::new("/session");
        let config = Path::new("/config");

        assert_eq!(
            resolve_chain(Some(explicit), Some(session), Some(config)),
            Some(explicit.to_path_buf())
        );
        assert_eq!(
            resolve_chain(None, Some(session), Some(config)),
            Some(session.to_path_buf())
        );
        assert_eq!(
            resolve_chain(None, None, Some(config)),
            Some(config.to_path_buf())
        );
        assert_eq!(resolve_chain(None, None, None), None);
    }
}
