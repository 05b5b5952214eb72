//! Session library roster lookup.

use std::path::PathBuf;

/// The session library's own view of which codes still have a session
/// registered. Cross-referenced with the supervisor's live mirror when
/// computing the online flag for listings.
pub trait SessionIndex: Send + Sync {
    fn has_active_session(&self, code: &str) -> bool;
}

/// Filesystem-backed index: a session counts as registered while its
/// credential directory exists and holds at least one entry.
pub struct FsSessionIndex {
    base: PathBuf,
}

impl FsSessionIndex {
    pub const fn new(base: PathBuf) -> Self {
        Self { base }
    }
}

impl SessionIndex for FsSessionIndex {
    fn has_active_session(&self, code: &str) -> bool {
        std::fs::read_dir(self.base.join(code))
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_inactive() {
        let tmp = tempfile::tempdir().unwrap();
        let index = FsSessionIndex::new(tmp.path().to_path_buf());
        assert!(!index.has_active_session("SB-1"));
    }

    #[test]
    fn empty_directory_is_inactive() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("SB-1")).unwrap();
        let index = FsSessionIndex::new(tmp.path().to_path_buf());
        assert!(!index.has_active_session("SB-1"));
    }

    #[test]
    fn populated_directory_is_active() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("SB-1");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("creds.json"), b"{}").unwrap();
        let index = FsSessionIndex::new(tmp.path().to_path_buf());
        assert!(index.has_active_session("SB-1"));
    }
}
