//! Object storage abstraction.
//!
//! Provides a unified interface over S3-compatible object stores and the
//! local filesystem. All paths handed to and returned from a
//! [`StorageProvider`] are relative to the location it was created for.

mod local;
mod s3;

use bytes::Bytes;
use futures::{Stream, StreamExt, future::ready};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use regex::{Captures, Regex};
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::debug;

use crate::emit;
use crate::error::{InvalidUrlSnafu, IoSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

pub use local::LocalConfig;
pub use s3::S3Config;

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Storage provider that abstracts over the supported backends.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

// URL patterns for the supported backends
const S3_PATH: &str =
    r"^https://s3\.(?P<region>[\w\-]+)\.amazonaws\.com/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_VIRTUAL: &str =
    r"^https://(?P<bucket>[a-z0-9\-\.]+)\.s3\.(?P<region>[\w\-]+)\.amazonaws\.com(/(?P<key>.+))?$";
const S3_URL: &str = r"^[sS]3[aAnN]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_ENDPOINT_URL: &str = r"^[sS]3[aA]?::(?<protocol>https?)://(?P<endpoint>[^:/]+):(?<port>\d+)/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_URL: &str = r"^file:(?P<path>.*)$";
const FILE_PATH: &str = r"^/(?P<path>.*)$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    S3,
    Local,
}

static MATCHERS: LazyLock<Vec<(Backend, Vec<Regex>)>> = LazyLock::new(|| {
    let compile = |patterns: &[&str]| -> Vec<Regex> {
        patterns
            .iter()
            .map(|p| Regex::new(p).expect("Invalid storage URL pattern"))
            .collect()
    };
    vec![
        (
            Backend::S3,
            compile(&[S3_PATH, S3_VIRTUAL, S3_ENDPOINT_URL, S3_URL]),
        ),
        (Backend::Local, compile(&[FILE_URI, FILE_URL, FILE_PATH])),
    ]
});

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse a URL (or a local path) into a backend configuration.
    ///
    /// Trailing slashes are ignored, so `s3a://bucket/` and `s3a://bucket`
    /// describe the same location. Paths without a scheme that do not start
    /// with `/` are resolved against the current directory.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        let trimmed = match url.trim_end_matches('/') {
            "" if url.starts_with('/') => "/",
            other => other,
        };

        for (backend, patterns) in MATCHERS.iter() {
            if let Some(matches) = patterns.iter().find_map(|r| r.captures(trimmed)) {
                return match backend {
                    Backend::S3 => Self::parse_s3(&matches),
                    Backend::Local => Self::parse_local(&matches),
                };
            }
        }

        if !trimmed.is_empty() && !trimmed.contains("://") {
            let cwd = std::env::current_dir().context(IoSnafu)?;
            let absolute = cwd.join(trimmed);
            return Ok(BackendConfig::Local(LocalConfig {
                path: absolute.to_string_lossy().into_owned(),
            }));
        }

        InvalidUrlSnafu {
            url: url.to_string(),
        }
        .fail()
    }

    fn parse_s3(matches: &Captures) -> Result<Self, StorageError> {
        let bucket = matches
            .name("bucket")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let region = std::env::var("AWS_DEFAULT_REGION")
            .ok()
            .or_else(|| matches.name("region").map(|m| m.as_str().to_string()));

        let endpoint = std::env::var("AWS_ENDPOINT").ok().or_else(|| {
            matches.name("endpoint").map(|endpoint| {
                let port = matches
                    .name("port")
                    .and_then(|p| p.as_str().parse::<u16>().ok())
                    .unwrap_or(443);
                let protocol = matches
                    .name("protocol")
                    .map(|p| p.as_str())
                    .unwrap_or("https");
                format!("{}://{}:{}", protocol, endpoint.as_str(), port)
            })
        });

        let key = matches.name("key").map(|m| m.as_str().into());

        Ok(BackendConfig::S3(S3Config {
            endpoint,
            region,
            bucket,
            key,
        }))
    }

    fn parse_local(matches: &Captures) -> Result<Self, StorageError> {
        let path = matches.name("path").map(|m| m.as_str()).unwrap_or_default();
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Ok(BackendConfig::Local(LocalConfig { path }))
    }

    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(s3) => s3.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }
}

impl StorageProvider {
    /// Create a storage provider for an existing location.
    ///
    /// A local directory that does not exist is an error.
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        Self::construct(url, options, false).await
    }

    /// Create a storage provider for a location that is written to,
    /// creating a missing local directory first.
    pub async fn for_output_url(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        Self::construct(url, options, true).await
    }

    async fn construct(
        url: &str,
        options: HashMap<String, String>,
        create_root: bool,
    ) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::S3(config) => Self::construct_s3(config, options).await,
            BackendConfig::Local(config) => Self::construct_local(config, create_root).await,
        }
    }

    /// Canonical URL of the location this provider points at.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// List every object under `prefix` (relative to the provider root),
    /// recursing into sub-directories.
    ///
    /// Returned paths are relative to the provider root.
    pub async fn list_with_prefix(
        &self,
        prefix: &str,
    ) -> Result<impl Stream<Item = Result<Path, object_store::Error>> + '_, StorageError> {
        emit!(StorageRequest {
            operation: StorageOperation::List,
            status: RequestStatus::Success,
        });

        let relative = Path::from(prefix);
        let full_prefix = self.qualify_path(&relative).into_owned();
        let key_part_count = self
            .config
            .key()
            .map(|key| key.parts().count())
            .unwrap_or_default();

        let list = self
            .object_store
            .list(Some(&full_prefix))
            .filter_map(move |meta| {
                let result = match meta {
                    Ok(metadata) => {
                        let relative_path: Path =
                            metadata.location.parts().skip(key_part_count).collect();
                        Some(Ok(relative_path))
                    }
                    Err(err) => Some(Err(err)),
                };
                ready(result)
            });

        Ok(list)
    }

    /// Get the contents of a file.
    pub async fn get(&self, path: impl Into<Path>) -> Result<Bytes, StorageError> {
        let path = path.into();
        let start = Instant::now();
        let result = self.object_store.get(&self.qualify_path(&path)).await;
        record_request(StorageOperation::Get, result.is_ok(), start);

        let bytes = result
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)?;
        Ok(bytes)
    }

    /// Put a payload to a path.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        let path = self.qualify_path(path);
        let start = Instant::now();
        let result = self.object_store.put(&path, payload).await;
        record_request(StorageOperation::Put, result.is_ok(), start);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Check whether any object exists under `prefix`.
    pub async fn has_objects(&self, prefix: &str) -> Result<bool, StorageError> {
        let mut stream = self.list_with_prefix(prefix).await?;
        match stream.next().await {
            Some(Ok(_)) => Ok(true),
            Some(Err(object_store::Error::NotFound { .. })) | None => Ok(false),
            Some(Err(source)) => Err(StorageError::ObjectStore { source }),
        }
    }

    /// Delete every object under `prefix`, returning how many were removed.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let mut paths = Vec::new();
        let mut stream = self.list_with_prefix(prefix).await?;
        while let Some(result) = stream.next().await {
            match result {
                Ok(path) => paths.push(path),
                Err(object_store::Error::NotFound { .. }) => {}
                Err(source) => return Err(StorageError::ObjectStore { source }),
            }
        }

        for path in &paths {
            let qualified = self.qualify_path(path);
            let start = Instant::now();
            let result = self.object_store.delete(&qualified).await;
            record_request(StorageOperation::Delete, result.is_ok(), start);
            match result {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(source) => return Err(StorageError::ObjectStore { source }),
            }
        }

        debug!("Deleted {} objects under {}", paths.len(), prefix);
        Ok(paths.len())
    }
}

fn record_request(operation: StorageOperation, ok: bool, start: Instant) {
    let status = if ok {
        RequestStatus::Success
    } else {
        RequestStatus::Error
    };
    emit!(StorageRequest { operation, status });
    emit!(StorageRequestDuration {
        operation,
        duration: start.elapsed(),
    });
}

/// List files under `prefix` whose name ends with `extension`.
///
/// Results are relative to the provider root and sorted so that the order
/// in which records are ingested is reproducible.
pub async fn list_files(
    storage: &StorageProvider,
    prefix: &str,
    extension: &str,
) -> Result<Vec<String>, StorageError> {
    let mut files = Vec::new();
    let mut stream = storage.list_with_prefix(prefix).await?;
    let mut total_listed = 0;

    while let Some(result) = stream.next().await {
        let path = match result {
            Ok(path) => path,
            Err(object_store::Error::NotFound { .. }) => continue,
            Err(source) => return Err(StorageError::ObjectStore { source }),
        };
        total_listed += 1;

        if path.as_ref().ends_with(extension) {
            files.push(path.to_string());
        }
    }

    debug!(
        "Listed {} total files under {}, {} end with {}",
        total_listed,
        prefix,
        files.len(),
        extension
    );

    files.sort();
    Ok(files)
}
