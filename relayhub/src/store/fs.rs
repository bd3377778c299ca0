//! File-backed shared store.
//!
//! Layout: `<root>/<namespace>/<key>.json`, with namespace and key
//! percent-encoded. Workers on the same host share the root; each only
//! touches its own namespace directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{SharedStore, StoreError};

const EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(encode_name(namespace))
    }

    fn key_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}.{}", encode_name(key), EXTENSION))
    }
}

/// Map a key to a file name; reversed by [`decode_name`].
fn encode_name(name: &str) -> String {
    urlencoding::encode(name).into_owned()
}

fn decode_name(file_stem: &str) -> Option<String> {
    urlencoding::decode(file_stem).ok().map(|name| name.into_owned())
}

#[async_trait]
impl SharedStore for FsStore {
    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(self.namespace_dir(namespace)).await?;
        let path = self.key_path(namespace, key);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&value)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StoreError> {
        match tokio::fs::read(self.key_path(namespace, key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.key_path(namespace, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(self.namespace_dir(namespace)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION)
                && let Some(key) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(decode_name)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn clean(&self, namespace: &str) -> Result<usize, StoreError> {
        let removed = self.keys(namespace).await?.len();
        match tokio::fs::remove_dir_all(self.namespace_dir(namespace)).await {
            Ok(()) => {
                debug!("Removed store namespace {} ({} records)", namespace, removed);
                Ok(removed)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}
