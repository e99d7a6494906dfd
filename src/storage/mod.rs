//! Object storage for listing photos and avatars
//!
//! Objects live in named buckets under `{owner}/{millis}-{suffix}.{ext}` and
//! are addressed by a public URL once uploaded.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Storage buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Items,
    Avatars,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Items => "items",
            Bucket::Avatars => "avatars",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "items" => Some(Bucket::Items),
            "avatars" => Some(Bucket::Avatars),
            _ => None,
        }
    }
}

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Empty upload")]
    Empty,

    #[error("Upload too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Unsupported content type: {0}")]
    UnsupportedType(String),

    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Bucketed blob storage with public URLs
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        bucket: Bucket,
        path: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<(), UploadError>;

    fn public_url(&self, bucket: Bucket, path: &str) -> String;
}

/// Random object name under the uploader's prefix
pub fn object_path(owner: Uuid, ext: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("{}/{}-{}.{}", owner, Utc::now().timestamp_millis(), suffix, ext)
}

/// Raster image types accepted for upload, with the extensions each may carry.
/// The first extension is used when the file name has none of them.
const IMAGE_TYPES: &[(&str, &[&str])] = &[
    ("image/png", &["png"]),
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/webp", &["webp"]),
    ("image/gif", &["gif"]),
];

/// File extension for an accepted image type, or `None` if the type is not accepted.
///
/// Uploads are served from the API origin, so the stored extension must never
/// let a static file server infer an active type such as `svg` or `html`.
pub fn extension_for(filename: Option<&str>, content_type: &str) -> Option<&'static str> {
    let content_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let (_, extensions) = IMAGE_TYPES.iter().find(|(ty, _)| *ty == content_type)?;

    let from_name = filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    extensions
        .iter()
        .find(|ext| from_name.as_deref() == Some(**ext))
        .or_else(|| extensions.first())
        .copied()
}

/// Validate and store an image, returning its public URL
pub async fn upload_image(
    store: &dyn ObjectStore,
    bucket: Bucket,
    owner: Uuid,
    filename: Option<&str>,
    content_type: &str,
    data: &[u8],
    max_bytes: usize,
) -> Result<String, UploadError> {
    let ext = extension_for(filename, content_type)
        .ok_or_else(|| UploadError::UnsupportedType(content_type.to_string()))?;
    if data.is_empty() {
        return Err(UploadError::Empty);
    }
    if data.len() > max_bytes {
        return Err(UploadError::TooLarge {
            size: data.len(),
            max: max_bytes,
        });
    }

    let path = object_path(owner, ext);
    store.upload(bucket, &path, content_type, data).await?;

    tracing::info!(
        bucket = bucket.as_str(),
        path = %path,
        size = data.len(),
        "Stored object"
    );
    Ok(store.public_url(bucket, &path))
}

/// Resolve `relative` under `base`, refusing anything that climbs out of it
fn ensure_within(base: &Path, relative: &str) -> Result<PathBuf, UploadError> {
    let mut resolved = base.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::CurDir => {}
            _ => return Err(UploadError::InvalidPath(relative.to_string())),
        }
    }
    if resolved == base || !resolved.starts_with(base) {
        return Err(UploadError::InvalidPath(relative.to_string()));
    }
    Ok(resolved)
}

/// Filesystem object store, served statically under `public_base`
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    public_base: String,
}

impl LocalObjectStore {
    pub async fn new(root: PathBuf, public_base: impl Into<String>) -> Result<Self, UploadError> {
        fs::create_dir_all(&root).await.map_err(|e| {
            UploadError::Storage(format!(
                "Failed to create storage directory '{}': {}",
                root.display(),
                e
            ))
        })?;

        tracing::info!(path = %root.display(), "Object store initialized");

        Ok(Self {
            root,
            public_base: public_base.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(
        &self,
        bucket: Bucket,
        path: &str,
        _content_type: &str,
        data: &[u8],
    ) -> Result<(), UploadError> {
        let target = ensure_within(&self.root.join(bucket.as_str()), path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| UploadError::Storage(e.to_string()))?;
        }
        fs::write(&target, data)
            .await
            .map_err(|e| UploadError::Storage(format!("Failed to write {}: {}", path, e)))?;
        Ok(())
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!("{}/{}/{}", self.public_base, bucket.as_str(), path)
    }
}

/// Object store held in memory
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(Bucket, String), (String, Vec<u8>)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content type and bytes of a stored object
    pub async fn get(&self, bucket: Bucket, path: &str) -> Option<(String, Vec<u8>)> {
        self.objects
            .read()
            .await
            .get(&(bucket, path.to_string()))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        bucket: Bucket,
        path: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<(), UploadError> {
        ensure_within(Path::new("/"), path)?;
        self.objects.write().await.insert(
            (bucket, path.to_string()),
            (content_type.to_string(), data.to_vec()),
        );
        Ok(())
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!("memory://{}/{}", bucket.as_str(), path)
    }
}
