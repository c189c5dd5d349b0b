//! Atomic file replacement shared by the durable stores.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Write `bytes` to a uniquely named temporary file in `dir`, then rename it
/// over `target`. Concurrent writers to the same target never share a
/// temporary file, and readers observe either the old or the new document.
pub async fn write_atomic(dir: &Path, target: &Path, bytes: Vec<u8>) -> io::Result<()> {
    let dir = dir.to_path_buf();
    let target: PathBuf = target.to_path_buf();
    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&dir)?;
        file.write_all(&bytes)?;
        file.flush()?;
        file.persist(&target).map_err(|err| err.error)?;
        Ok(())
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replaces_target_and_leaves_no_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("doc.json");
        write_atomic(dir.path(), &target, b"first".to_vec()).await.unwrap();
        write_atomic(dir.path(), &target, b"second".to_vec()).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"second");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("doc.json")]);
    }
}
