//! Bundle service: upload validation, conditional download, version read.
//!
//! A bundle is a gzip-wrapped POSIX tar archive carrying the file set a
//! node (or this instance's own lighthouse) needs to materialize its
//! Nebula-style configuration: `config.yml`, the cluster CA cert, CRL, and
//! this node's host cert/key.

use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;

use fabric_core::models::{ConfigBundle, MAX_BUNDLE_BYTES, REQUIRED_BUNDLE_FILES};
use fabric_store::error::StoreError;
use fabric_store::Store;
use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("bundle exceeds the {MAX_BUNDLE_BYTES}-byte limit")]
    TooLarge,

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    #[error("archive is missing required files: {0}")]
    MissingFiles(String),

    #[error("config.yml is not valid yaml: {0}")]
    InvalidYaml(String),
}

/// The outcome of a conditional download request.
pub enum DownloadOutcome {
    /// The client's known version already matches; no body to send.
    NotModified { version: i64 },
    /// The client is behind (or has no prior version); here is the latest.
    Body(ConfigBundle),
}

pub struct BundleService {
    store: Arc<Store>,
}

impl BundleService {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Validate and store a newly uploaded bundle.
    ///
    /// # Errors
    ///
    /// [`BundleError::UnsupportedContentType`] if `content_type` isn't gzip,
    /// [`BundleError::TooLarge`] if the body exceeds [`MAX_BUNDLE_BYTES`],
    /// [`BundleError::MalformedArchive`]/[`MissingFiles`](BundleError::MissingFiles)/[`InvalidYaml`](BundleError::InvalidYaml)
    /// on a structurally invalid archive.
    pub async fn upload(
        &self,
        cluster_id: Uuid,
        tenant_id: Uuid,
        content_type: &str,
        body: &[u8],
        created_by: Option<Uuid>,
    ) -> Result<ConfigBundle, BundleError> {
        if !content_type.to_lowercase().contains("gzip") {
            return Err(BundleError::UnsupportedContentType(content_type.to_owned()));
        }
        if body.len() > MAX_BUNDLE_BYTES {
            return Err(BundleError::TooLarge);
        }

        validate_archive(body)?;

        Ok(self.store.upload_bundle(cluster_id, tenant_id, body, created_by).await?)
    }

    /// Resolve a conditional download. `current_version` is the client's
    /// `?current_version=N` query value; `if_none_match` is the raw
    /// `If-None-Match` header value (`"v<N>"`). The larger of the two is
    /// taken as the client's effective known version.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] (via [`BundleError::Store`]) if the cluster
    /// or its bundle doesn't exist.
    pub async fn download(
        &self,
        cluster_id: Uuid,
        current_version: Option<i64>,
        if_none_match: Option<&str>,
    ) -> Result<DownloadOutcome, BundleError> {
        let cluster = self.store.get_cluster(cluster_id).await?;

        let from_header = if_none_match.and_then(parse_etag_version);
        let known = match (current_version, from_header) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };

        if let Some(known) = known {
            if known > 0 && known == cluster.config_version {
                return Ok(DownloadOutcome::NotModified { version: cluster.config_version });
            }
        }

        let bundle = self.store.latest_bundle(cluster_id).await?;
        Ok(DownloadOutcome::Body(bundle))
    }

    /// Read-only, idempotent: `{version: cluster.config_version}`.
    pub async fn version(&self, cluster_id: Uuid) -> Result<i64, BundleError> {
        Ok(self.store.get_cluster(cluster_id).await?.config_version)
    }
}

/// Parse `"v<N>"` into `N`. Anything else yields `None` rather than an
/// error — a malformed `If-None-Match` just means "no prior version known".
fn parse_etag_version(raw: &str) -> Option<i64> {
    raw.trim_matches('"').strip_prefix('v')?.parse().ok()
}

/// Decompress and inspect the archive: every file in
/// [`REQUIRED_BUNDLE_FILES`] must be present, and `config.yml` must parse
/// as YAML.
fn validate_archive(body: &[u8]) -> Result<(), BundleError> {
    let decoder = GzDecoder::new(body);
    let mut archive = Archive::new(decoder);
    let entries = archive
        .entries()
        .map_err(|e| BundleError::MalformedArchive(e.to_string()))?;

    let mut seen = HashSet::new();
    let mut config_yml = None;

    for entry in entries {
        let mut entry = entry.map_err(|e| BundleError::MalformedArchive(e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| BundleError::MalformedArchive(e.to_string()))?
            .to_string_lossy()
            .into_owned();

        if REQUIRED_BUNDLE_FILES.contains(&path.as_str()) {
            seen.insert(path.clone());
            if path == "config.yml" {
                let mut buf = Vec::new();
                entry
                    .read_to_end(&mut buf)
                    .map_err(|e| BundleError::MalformedArchive(e.to_string()))?;
                config_yml = Some(buf);
            }
        }
    }

    let missing: Vec<&str> = REQUIRED_BUNDLE_FILES
        .iter()
        .filter(|f| !seen.contains(**f))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(BundleError::MissingFiles(missing.join(", ")));
    }

    let Some(config_yml) = config_yml else {
        return Err(BundleError::MissingFiles("config.yml".to_owned()));
    };

    serde_yaml::from_slice::<serde_yaml::Value>(&config_yml)
        .map_err(|e| BundleError::InvalidYaml(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn build_valid_archive() -> Vec<u8> {
        let mut tar_bytes = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tar_bytes);
            for (name, content) in [
                ("config.yml", b"lighthouse:\n  am_lighthouse: true\n".as_slice()),
                ("ca.crt", b"ca-cert-bytes"),
                ("crl.pem", b"crl-bytes"),
                ("host.crt", b"host-cert-bytes"),
                ("host.key", b"host-key-bytes"),
            ] {
                let mut header = tar::Header::new_gnu();
                header.set_size(content.len() as u64);
                header.set_cksum();
                builder.append_data(&mut header, name, content).unwrap();
            }
            builder.finish().unwrap();
        }

        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    async fn service() -> (BundleService, NamedTempFile) {
        let db = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::connect(db.path().to_str().unwrap()).await.unwrap());
        (BundleService::new(store), db)
    }

    #[tokio::test]
    async fn upload_rejects_non_gzip_content_type() {
        let (svc, _db) = service().await;
        let err = svc
            .upload(Uuid::new_v4(), Uuid::new_v4(), "application/json", b"{}", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::UnsupportedContentType(_)));
    }

    #[tokio::test]
    async fn upload_rejects_oversize_body() {
        let (svc, _db) = service().await;
        let oversize = vec![0u8; MAX_BUNDLE_BYTES + 1];
        let err = svc
            .upload(Uuid::new_v4(), Uuid::new_v4(), "application/gzip", &oversize, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::TooLarge));
    }

    #[tokio::test]
    async fn upload_rejects_archive_missing_files() {
        let (svc, _db) = service().await;
        let mut tar_bytes = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tar_bytes);
            let content = b"only-this-file";
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_cksum();
            builder.append_data(&mut header, "config.yml", content.as_slice()).unwrap();
            builder.finish().unwrap();
        }
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        let gz = encoder.finish().unwrap();

        let err = svc
            .upload(Uuid::new_v4(), Uuid::new_v4(), "application/gzip", &gz, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::MissingFiles(_)));
    }

    #[tokio::test]
    async fn valid_archive_uploads_and_downloads_conditionally() {
        let (svc, _db) = service().await;
        let tenant = svc.store.create_tenant("Acme").await.unwrap();
        let cluster = svc
            .store
            .create_cluster(tenant.id, "prod", "chash", false, None)
            .await
            .unwrap();

        let archive = build_valid_archive();
        let bundle = svc
            .upload(cluster.id, tenant.id, "application/gzip", &archive, None)
            .await
            .unwrap();
        assert_eq!(bundle.version, 2);

        match svc.download(cluster.id, Some(2), None).await.unwrap() {
            DownloadOutcome::NotModified { version } => assert_eq!(version, 2),
            DownloadOutcome::Body(_) => panic!("expected 304"),
        }

        match svc.download(cluster.id, Some(1), None).await.unwrap() {
            DownloadOutcome::Body(b) => assert_eq!(b.version, 2),
            DownloadOutcome::NotModified { .. } => panic!("expected full body"),
        }
    }
}
