use common::config::S3Settings;
use common::{Error, Result};
use dashmap::DashMap;
use datafusion::execution::context::SessionContext;
use object_store::ObjectStore;
use object_store::aws::{AmazonS3, AmazonS3Builder, S3ConditionalPut};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// A table root on some object store, plus the URL prefix DataFusion uses to
/// address objects in that store.
#[derive(Debug, Clone)]
pub struct TableLocation {
    uri: String,
    store_url: Url,
    root: Path,
    store: Arc<dyn ObjectStore>,
}

impl TableLocation {
    pub fn new(uri: &str, store_url: Url, root: Path, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            uri: uri.to_string(),
            store_url,
            root,
            store,
        }
    }

    /// A location backed by a fresh in-memory store.
    pub fn in_memory(root: &str) -> Result<Self> {
        Ok(Self::new(
            &format!("memory:///{}", root),
            Url::parse("memory:///")?,
            Path::from(root),
            Arc::new(InMemory::new()),
        ))
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Resolves a `/`-separated path relative to the table root.
    pub fn join(&self, relative: &str) -> Path {
        relative
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.child(part))
    }

    /// Full URL of an object in this location's store.
    pub fn object_url(&self, path: &Path) -> String {
        format!("{}{}", self.store_url, path)
    }
}

/// Resolves table URIs to object stores, caching one S3 client per bucket.
#[derive(Clone)]
pub struct StoreManager {
    s3: Option<S3Settings>,
    s3_cache: Arc<DashMap<String, Arc<AmazonS3>>>,
    local: Arc<LocalFileSystem>,
}

impl StoreManager {
    pub fn new(s3: Option<S3Settings>) -> Self {
        Self {
            s3,
            s3_cache: Arc::new(DashMap::new()),
            local: Arc::new(LocalFileSystem::new()),
        }
    }

    /// Resolves `s3://bucket/prefix` or a local directory (created if missing).
    pub async fn resolve(&self, uri: &str) -> Result<TableLocation> {
        if uri.starts_with("s3://") {
            let url = Url::parse(uri)?;
            let bucket = bucket_name(&url)?;
            let store = self.s3_store(&bucket)?;
            let store_url = Url::parse(&format!("s3://{}/", bucket))?;
            let root = Path::from(url.path().trim_matches('/'));

            debug!(uri, bucket = %bucket, root = %root, "Resolved S3 table location");
            return Ok(TableLocation::new(uri, store_url, root, store));
        }

        let local_path = uri.strip_prefix("file://").unwrap_or(uri);
        tokio::fs::create_dir_all(local_path).await?;
        let canonical = tokio::fs::canonicalize(local_path).await?;
        let root = Path::from_absolute_path(&canonical).map_err(object_store::Error::from)?;

        debug!(uri, root = %root, "Resolved local table location");
        Ok(TableLocation::new(
            uri,
            Url::parse("file:///")?,
            root,
            self.local.clone(),
        ))
    }

    pub fn s3_store(&self, bucket: &str) -> Result<Arc<AmazonS3>> {
        if let Some(store) = self.s3_cache.get(bucket) {
            return Ok(store.clone());
        }

        let settings = self.s3.as_ref().ok_or_else(|| {
            Error::InvalidConfiguration(format!(
                "bucket '{}' requires an [s3] configuration section",
                bucket
            ))
        })?;

        let s3 = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&settings.region)
            .with_access_key_id(&settings.access_key)
            .with_secret_access_key(&settings.secret_key)
            .with_endpoint(&settings.endpoint)
            .with_allow_http(settings.allow_http)
            .with_conditional_put(S3ConditionalPut::ETagMatch)
            .build()?;

        let store = Arc::new(s3);
        self.s3_cache.insert(bucket.to_string(), store.clone());
        Ok(store)
    }

    /// Makes an S3 bucket readable through `ctx`. Local paths need nothing.
    pub fn register_object_store(&self, ctx: &SessionContext, uri: &str) -> Result<()> {
        if !uri.starts_with("s3://") {
            return Ok(());
        }

        let bucket = bucket_name(&Url::parse(uri)?)?;
        let store = self.s3_store(&bucket)?;
        let url = Url::parse(&format!("s3://{}", bucket))?;
        ctx.register_object_store(&url, store);
        Ok(())
    }
}

fn bucket_name(url: &Url) -> Result<String> {
    url.host_str()
        .filter(|host| !host.is_empty())
        .map(|host| host.to_string())
        .ok_or_else(|| Error::InvalidInput(format!("'{}' has no bucket name", url)))
}
