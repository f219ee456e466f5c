use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::error::ExchangeError;

/// Directory-backed blob store: one file per stored name, no manifest.
///
/// There is no per-file locking. Concurrent writers to the same name race and
/// the last writer wins; a reader running alongside a writer may see a
/// partially written file.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open the store, creating the directory if it does not exist yet.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open `name` for writing, truncating any previous content.
    ///
    /// The file is written in place while an upload streams in, so a reader
    /// running at the same time can see a partial file.
    pub async fn create(&self, name: &str) -> Result<File, ExchangeError> {
        let path = self.path_for(name)?;
        File::create(&path).await.map_err(ExchangeError::Storage)
    }

    /// Save `bytes` under `name` in one go, replacing any previous content.
    pub async fn put(&self, name: &str, bytes: &[u8]) -> Result<(), ExchangeError> {
        let mut file = self.create(name).await?;
        file.write_all(bytes).await.map_err(ExchangeError::Storage)?;
        file.flush().await.map_err(ExchangeError::Storage)
    }

    /// Read the bytes stored under `name`, or `None` if there is no such file.
    pub async fn get(&self, name: &str) -> Result<Option<Bytes>, ExchangeError> {
        let path = self.path_for(name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ExchangeError::Storage(e)),
        }
    }

    /// Names of all stored files, sorted.
    pub async fn list(&self) -> Result<Vec<String>, ExchangeError> {
        let mut entries = fs::read_dir(&self.root).await.map_err(ExchangeError::Storage)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(ExchangeError::Storage)? {
            let file_type = entry.file_type().await.map_err(ExchangeError::Storage)?;
            if !file_type.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, ExchangeError> {
        if !is_valid_name(name) {
            return Err(ExchangeError::InvalidFileName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

/// A name must be a single path component inside the storage directory.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_get_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.put("a.txt", b"first").await.unwrap();
        assert_eq!(store.get("a.txt").await.unwrap().unwrap(), &b"first"[..]);

        store.put("a.txt", b"second").await.unwrap();
        assert_eq!(store.get("a.txt").await.unwrap().unwrap(), &b"second"[..]);
    }

    #[tokio::test]
    async fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        assert!(store.get("nope.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_sorted_and_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());

        store.put("b.txt", b"b").await.unwrap();
        store.put("a.txt", b"a").await.unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn open_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("storage");
        let store = FileStore::open(&nested).await.unwrap();
        assert!(store.root().is_dir());
    }

    #[tokio::test]
    async fn names_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        for bad in ["", ".", "..", "../x", "a/b", "a\\b"] {
            let err = store.create(bad).await.unwrap_err();
            assert!(matches!(err, ExchangeError::InvalidFileName(_)), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn directory_in_the_way_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        std::fs::create_dir(dir.path().join("clash")).unwrap();
        let err = store.create("clash").await.unwrap_err();
        assert!(matches!(err, ExchangeError::Storage(_)));
        assert!(!err.is_fatal());
    }
}
