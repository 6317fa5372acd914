//! Stable file identities from the filesystem.
//!
//! The identity a path is classified under is derived from its device and
//! inode numbers, so it survives renames and path aliasing. A path that
//! cannot be stat'ed has no identity and is never matched.

use std::path::Path;

use sensor_core::FileIdentity;

/// Stat `path` and derive its identity. `None` when the file is gone or
/// inaccessible.
pub fn file_identity(path: &Path) -> Option<FileIdentity> {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;

        let bytes = path.as_os_str().as_bytes();
        let cpath = std::ffi::CString::new(bytes).ok()?;
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::stat(cpath.as_ptr(), &mut st) };
        if ret != 0 {
            return None;
        }
        Some(FileIdentity::from_dev_ino(st.st_dev as u64, st.st_ino))
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn identity_follows_the_inode_across_a_rename() {
        let dir = tempfile::tempdir().expect("tempdir");
        let before = dir.path().join("tool");
        let after = dir.path().join("tool-renamed");
        std::fs::write(&before, b"#!/bin/sh\n").expect("write");

        let original = file_identity(&before).expect("identity");
        std::fs::rename(&before, &after).expect("rename");
        assert_eq!(file_identity(&after), Some(original));
    }

    #[test]
    fn missing_path_has_no_identity() {
        assert!(file_identity(Path::new("/nonexistent/cairn-test-path")).is_none());
    }
}
