use super::credential::SessionCredential;
use super::signer::{amz_timestamp, RequestSigner};
use super::transport::{decode_body, JimengHttpClient};
use super::{DEFAULT_ASSISTANT_ID, FILE_MAX_SIZE};
use crate::error::ErrorKind;
use crate::models::{ApplyImageUploadResponse, UploadAddress, UploadToken};
use crate::{Error, Result};
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const NONCE_ALPHABET: &[u8] = b"zyxwvutsrqponmlkjihgfedcba0123456789";
const UPLOAD_SERVICE_ID: &str = "tb4s082cfz";
const UPLOAD_API_VERSION: &str = "2018-08-01";
const UPLOAD_TOKEN_DA_VERSION: &str = "3.1.5";

/// CRC32 of `bytes` as lowercase hex without zero padding.
pub fn crc32_hex(bytes: &[u8]) -> String {
    format!("{:x}", crc32fast::hash(bytes))
}

/// `n` distinct characters drawn from the nonce alphabet.
pub fn random_nonce(n: usize) -> String {
    NONCE_ALPHABET
        .choose_multiple(&mut rand::thread_rng(), n)
        .map(|&b| b as char)
        .collect()
}

/// Image bytes with a checksum computed once at load time.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    path: PathBuf,
    content: Vec<u8>,
    checksum: String,
    content_type: String,
}

impl ImageAsset {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let size = tokio::fs::metadata(path).await?.len();
        if size > FILE_MAX_SIZE as u64 {
            return Err(oversized(path, size));
        }
        let content = tokio::fs::read(path).await?;
        Self::from_bytes(path, content)
    }

    pub fn from_bytes(path: impl Into<PathBuf>, content: Vec<u8>) -> Result<Self> {
        let path = path.into();
        if content.is_empty() {
            return Err(Error::api(
                ErrorKind::RequestParamsInvalid,
                format!("image file is empty: {}", path.display()),
            ));
        }
        if content.len() > FILE_MAX_SIZE {
            return Err(oversized(&path, content.len() as u64));
        }

        let checksum = crc32_hex(&content);
        Ok(Self {
            path,
            content,
            checksum,
            content_type: "application/octet-stream".to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

fn oversized(path: &Path, size: u64) -> Error {
    Error::api(
        ErrorKind::FileExceedsSize,
        format!("{} is {} bytes", path.display(), size),
    )
}

#[derive(Debug, Deserialize)]
struct UploadTokenResponse {
    #[serde(default)]
    errmsg: Option<String>,
    #[serde(default)]
    data: Option<UploadToken>,
}

/// Token → signed `ApplyImageUpload` → PUT. Nothing is retried.
pub struct ImageUploader<'a> {
    http: &'a JimengHttpClient,
    signer: RequestSigner,
}

impl<'a> ImageUploader<'a> {
    pub fn new(http: &'a JimengHttpClient) -> Self {
        Self {
            http,
            signer: RequestSigner::default(),
        }
    }

    pub async fn upload(
        &self,
        credential: &SessionCredential,
        asset: &ImageAsset,
    ) -> Result<UploadAddress> {
        let token = self.get_upload_token(credential).await?;
        let address = self.get_upload_address(&token).await?;
        self.put_content(&address, asset).await?;
        tracing::info!(
            uri = %address.uri,
            bytes = asset.len(),
            "Uploaded reference image {}",
            asset.path().display()
        );
        Ok(address)
    }

    /// Unsigned POST; only the session cookie authenticates it.
    pub async fn get_upload_token(&self, credential: &SessionCredential) -> Result<UploadToken> {
        let url = format!("{}/mweb/v1/get_upload_token", self.http.endpoints.jimeng);
        let response = self
            .http
            .client
            .post(&url)
            .query(&[
                ("aid", DEFAULT_ASSISTANT_ID.to_string()),
                ("da_version", UPLOAD_TOKEN_DA_VERSION.to_string()),
            ])
            .header("cookie", credential.cookie())
            .send()
            .await?;

        let status = response.status();
        let encoding = response
            .headers()
            .get(reqwest::header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);
        let bytes = response.bytes().await?;

        if status != reqwest::StatusCode::OK {
            tracing::error!(
                "Upload token request failed (status {}): {}",
                status,
                String::from_utf8_lossy(&bytes)
            );
            return Err(Error::UploadTokenUnavailable(format!("status {}", status)));
        }

        let body: UploadTokenResponse = serde_json::from_value(decode_body(encoding.as_deref(), &bytes)?)
            .map_err(|e| Error::UploadTokenUnavailable(format!("unexpected payload: {}", e)))?;

        match (body.errmsg.as_deref(), body.data) {
            (Some("success"), Some(token)) => Ok(token),
            (errmsg, _) => {
                tracing::error!("Upload token rejected: {:?}", errmsg);
                Err(Error::UploadTokenUnavailable(
                    errmsg.unwrap_or("missing token data").to_string(),
                ))
            }
        }
    }

    /// Signed GET requesting an `ApplyImageUpload` slot.
    pub async fn get_upload_address(&self, token: &UploadToken) -> Result<UploadAddress> {
        let timestamp = amz_timestamp(chrono::Utc::now());
        let params = BTreeMap::from([
            ("Action".to_string(), "ApplyImageUpload".to_string()),
            ("Version".to_string(), UPLOAD_API_VERSION.to_string()),
            ("ServiceId".to_string(), UPLOAD_SERVICE_ID.to_string()),
            ("s".to_string(), random_nonce(11)),
        ]);
        let authorization = self
            .signer
            .authorization(token, &timestamp, "GET", "/", &params);

        let url = format!("{}/", self.http.endpoints.imagex.trim_end_matches('/'));
        let response = self
            .http
            .client
            .get(&url)
            .query(&params)
            .header("authorization", authorization)
            .header("x-amz-date", &timestamp)
            .header("x-amz-security-token", &token.session_token)
            .send()
            .await?;

        let body = response.text().await?;
        let parsed: ApplyImageUploadResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::error!("Failed to parse upload address response: {}\nBody: {}", e, body);
            Error::UploadAddressUnavailable(format!("unparseable response: {}", e))
        })?;

        let result = parsed
            .result
            .ok_or_else(|| Error::UploadAddressUnavailable("missing Result".to_string()))?;
        let raw = result.upload_address;
        let host = raw
            .upload_hosts
            .into_iter()
            .next()
            .ok_or_else(|| Error::UploadAddressUnavailable("no upload host".to_string()))?;
        let store = raw
            .store_infos
            .into_iter()
            .next()
            .ok_or_else(|| Error::UploadAddressUnavailable("no store info".to_string()))?;

        Ok(UploadAddress {
            host,
            uri: store.store_uri,
            auth: store.auth,
        })
    }

    pub async fn put_content(&self, address: &UploadAddress, asset: &ImageAsset) -> Result<()> {
        let url = address.upload_url(&self.http.endpoints.upload_scheme);
        let response = self
            .http
            .client
            .put(&url)
            .header("authorization", &address.auth)
            .header("content-length", asset.len().to_string())
            .header("content-type", asset.content_type())
            .header("content-crc32", asset.checksum())
            .body(asset.content().to_vec())
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Image upload rejected (status {}): {}", status, body);
            return Err(Error::UploadRejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
