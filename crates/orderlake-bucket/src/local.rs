use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::{BucketError, BucketStore, ObjectLocation};

/// Store backed by a directory tree: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalBucketStore {
    root: PathBuf,
}

impl LocalBucketStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, location: &ObjectLocation) -> Result<PathBuf, BucketError> {
        let relative = Path::new(location.bucket()).join(location.key());
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if escapes {
            return Err(BucketError::InvalidLocation {
                location: location.to_string(),
                reason: "path segments must not be absolute or contain '..'".into(),
            });
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> BucketError {
    BucketError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl BucketStore for LocalBucketStore {
    async fn put_object(
        &self,
        location: &ObjectLocation,
        bytes: Bytes,
        _content_type: &str,
    ) -> Result<(), BucketError> {
        let path = self.resolve(location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| io_error(parent, err))?;
        }
        debug!(path = %path.display(), size = bytes.len(), "writing local object");
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|err| io_error(&path, err))
    }

    async fn get_object(&self, location: &ObjectLocation) -> Result<Bytes, BucketError> {
        let path = self.resolve(location)?;
        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(Bytes::from(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(BucketError::NotFound(location.to_string()))
            }
            Err(err) => Err(io_error(&path, err)),
        }
    }

    async fn list_prefix(&self, location: &ObjectLocation) -> Result<Vec<String>, BucketError> {
        let bucket_root = self.resolve(&location.with_key(""))?;
        let mut keys = Vec::new();
        let mut pending = vec![bucket_root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(io_error(&dir, err)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| io_error(&dir, err))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|err| io_error(&path, err))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&bucket_root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(location.key()) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn copy_object(&self, from: &ObjectLocation, to: &ObjectLocation) -> Result<(), BucketError> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| io_error(parent, err))?;
        }
        match tokio::fs::copy(&source, &target).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(BucketError::NotFound(from.to_string()))
            }
            Err(err) => Err(io_error(&source, err)),
        }
    }

    async fn delete_object(&self, location: &ObjectLocation) -> Result<(), BucketError> {
        let path = self.resolve(location)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(&path, err)),
        }
    }
}
