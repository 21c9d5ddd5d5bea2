use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("duplicate")]
    Duplicate,
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

/// Content-addressed blob store for post images. Keys are sha256 hex
/// digests supplied by the upload handler.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, hash: &str, bytes: &[u8]) -> Result<(), ImageStoreError>;
    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError>;
    async fn delete(&self, hash: &str) -> Result<(), ImageStoreError>;
}

/// A valid key is exactly a sha256 hex digest. Anything else — in
/// particular path separators smuggled through a URL segment — must be
/// rejected before the filesystem is touched.
pub fn is_content_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Filesystem backend. Blobs fan out into two-character prefix
/// directories to keep any single directory small.
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new() -> Self {
        let mut root = std::env::var("MURMUR_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));
        root.push("images");
        Self { root }
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        let mut p = self.root.clone();
        p.push(&hash[0..2]);
        p.push(hash);
        p
    }
}

impl Default for FsImageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save(&self, hash: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        if !is_content_hash(hash) {
            return Err(ImageStoreError::Other(format!("invalid hash '{hash}'")));
        }
        let path = self.path_for(hash);
        if path.exists() {
            return Err(ImageStoreError::Duplicate);
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| ImageStoreError::Other(e.to_string()))?;
        }
        std::fs::write(&path, bytes).map_err(|e| ImageStoreError::Other(e.to_string()))
    }

    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        if !is_content_hash(hash) {
            return Err(ImageStoreError::NotFound);
        }
        let path = self.path_for(hash);
        let bytes = std::fs::read(&path).map_err(|_| ImageStoreError::NotFound)?;
        // content type is not stored; sniff it on the way out
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        Ok((bytes, mime))
    }

    async fn delete(&self, hash: &str) -> Result<(), ImageStoreError> {
        // best-effort: a missing blob counts as deleted
        if is_content_hash(hash) {
            let _ = std::fs::remove_file(self.path_for(hash));
        }
        Ok(())
    }
}

pub fn build_image_store() -> Arc<dyn ImageStore> {
    Arc::new(FsImageStore::new())
}
