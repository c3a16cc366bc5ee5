//! S3-compatible remote artifact storage.
//!
//! Uploads use path-style addressing and AWS Signature Version 4 with an
//! unsigned payload, which works against AWS S3 as well as MinIO-style
//! compatible endpoints. Serving artifacts is not supported; the bucket is
//! assumed to be hosted externally.

use crate::config::S3StorageConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use super::{ArtifactReader, ArtifactStore};

type HmacSha256 = Hmac<Sha256>;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

/// Artifact storage backed by an S3-compatible object store
pub struct S3Storage {
    config: S3StorageConfig,
    client: reqwest::Client,
}

/// Headers produced by request signing
struct Signature {
    amz_date: String,
    authorization: String,
}

impl S3Storage {
    /// Create a store for the configured endpoint and bucket
    pub fn new(config: S3StorageConfig) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { config, client })
    }

    /// Object key for an artifact path, honoring the configured prefix
    fn object_key(&self, path: &str) -> String {
        let prefix = self.config.prefix.trim_matches('/');
        if prefix.is_empty() {
            path.to_string()
        } else {
            format!("{prefix}/{path}")
        }
    }

    /// Path-style request URL for an object key
    fn object_url(&self, key: &str) -> String {
        let endpoint = self.config.endpoint_url.trim_end_matches('/');
        format!("{endpoint}/{}/{}", self.config.bucket, uri_encode(key, true))
    }

    /// Canonical URI of the request (path-style: bucket then key)
    fn canonical_uri(&self, key: &str) -> String {
        format!("/{}/{}", self.config.bucket, uri_encode(key, true))
    }

    /// Host header value derived from the endpoint URL
    fn host(&self) -> Result<String> {
        let url = reqwest::Url::parse(&self.config.endpoint_url).map_err(|e| Error::Config {
            message: format!("invalid s3 endpoint URL: {e}"),
            key: Some("storage.s3.endpoint_url".into()),
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Config {
                message: "s3 endpoint URL has no host".into(),
                key: Some("storage.s3.endpoint_url".into()),
            })?
            .to_string();
        Ok(match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        })
    }

    /// Compute SigV4 headers for a request with an unsigned payload
    fn sign(&self, method: &str, canonical_uri: &str, now: DateTime<Utc>) -> Result<Signature> {
        let host = self.host()?;
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let datestamp = now.format("%Y%m%d").to_string();

        let canonical_headers = format!(
            "host:{host}\nx-amz-content-sha256:{UNSIGNED_PAYLOAD}\nx-amz-date:{amz_date}\n"
        );
        let canonical_request = format!(
            "{method}\n{canonical_uri}\n\n{canonical_headers}\n{SIGNED_HEADERS}\n{UNSIGNED_PAYLOAD}"
        );

        let scope = format!("{datestamp}/{}/s3/aws4_request", self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex(&Sha256::digest(canonical_request.as_bytes()))
        );

        let mut key = hmac_sha256(
            format!("AWS4{}", self.config.secret_key).as_bytes(),
            datestamp.as_bytes(),
        )?;
        for part in [self.config.region.as_bytes(), b"s3", b"aws4_request"] {
            key = hmac_sha256(&key, part)?;
        }
        let signature = hex(&hmac_sha256(&key, string_to_sign.as_bytes())?);

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
            self.config.access_key
        );

        Ok(Signature {
            amz_date,
            authorization,
        })
    }

    fn request(
        &self,
        method: reqwest::Method,
        key: &str,
    ) -> Result<reqwest::RequestBuilder> {
        let signature = self.sign(method.as_str(), &self.canonical_uri(key), Utc::now())?;
        Ok(self
            .client
            .request(method, self.object_url(key))
            .header("x-amz-date", signature.amz_date)
            .header("x-amz-content-sha256", UNSIGNED_PAYLOAD)
            .header("authorization", signature.authorization))
    }
}

#[async_trait]
impl ArtifactStore for S3Storage {
    async fn create(&self, path: &str, mut reader: ArtifactReader) -> Result<u64> {
        // Spool to a scratch file first so the upload carries an exact
        // Content-Length; S3 rejects unsized chunked uploads.
        let spool = tempfile::NamedTempFile::new()?;
        let spool_path = spool.path().to_path_buf();

        let mut file = tokio::fs::File::create(&spool_path).await?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        drop(file);

        let key = self.object_key(path);
        let body_file = tokio::fs::File::open(&spool_path).await?;
        let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(body_file));

        let response = self
            .request(reqwest::Method::PUT, &key)?
            .header(reqwest::header::CONTENT_LENGTH, written)
            .body(body)
            .send()
            .await?;
        response.error_for_status()?;

        tracing::debug!(path, written, "artifact uploaded");
        Ok(written)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        // S3 DELETE succeeds for missing keys; probe first so callers get
        // the distinguishable NotExist the contract promises.
        self.size(path).await?;

        let key = self.object_key(path);
        let response = self.request(reqwest::Method::DELETE, &key)?.send().await?;
        response.error_for_status()?;
        Ok(())
    }

    async fn size(&self, path: &str) -> Result<u64> {
        let key = self.object_key(path);
        let response = self.request(reqwest::Method::HEAD, &key)?.send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotExist(path.to_string()));
        }
        let response = response.error_for_status()?;

        let length = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(length)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::InvalidInput(format!("hmac key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// RFC 3986 percent-encoding as required by SigV4 canonical URIs.
///
/// With `keep_slashes`, path separators are left intact so object keys keep
/// their hierarchy.
fn uri_encode(input: &str, keep_slashes: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            b'/' if keep_slashes => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
