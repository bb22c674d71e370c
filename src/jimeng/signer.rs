//! AWS4-HMAC-SHA256 signing for the ImageX upload-address endpoint.
//!
//! Only the subset the endpoint checks is implemented: the body is always
//! empty and exactly two headers are signed (`x-amz-date` and
//! `x-amz-security-token`). The signing key is rederived on every call.

use crate::models::UploadToken;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const SIGNED_HEADERS: &str = "x-amz-date;x-amz-security-token";
pub const DEFAULT_REGION: &str = "cn-north-1";
pub const DEFAULT_SERVICE: &str = "imagex";

type HmacSha256 = Hmac<Sha256>;

/// ISO-8601 basic UTC timestamp (`YYYYMMDDTHHMMSSZ`).
pub fn amz_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

fn hmac_sha256(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Stateless signer bound to a region and service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSigner {
    region: String,
    service: String,
}

impl Default for RequestSigner {
    fn default() -> Self {
        Self::new(DEFAULT_REGION, DEFAULT_SERVICE)
    }
}

impl RequestSigner {
    pub fn new(region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            service: service.into(),
        }
    }

    /// `k=v` pairs sorted by key and joined with `&`. Values are not escaped.
    pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn canonical_request(
        &self,
        token: &UploadToken,
        timestamp: &str,
        method: &str,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> String {
        let canonical_headers = format!(
            "x-amz-date:{}\nx-amz-security-token:{}\n",
            timestamp, token.session_token
        );
        [
            method.to_uppercase(),
            path.to_string(),
            Self::canonical_query(params),
            canonical_headers,
            SIGNED_HEADERS.to_string(),
            sha256_hex(""),
        ]
        .join("\n")
    }

    pub fn credential_scope(&self, timestamp: &str) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            date_stamp(timestamp),
            self.region,
            self.service
        )
    }

    pub fn string_to_sign(&self, timestamp: &str, canonical_request: &str) -> String {
        [
            ALGORITHM.to_string(),
            timestamp.to_string(),
            self.credential_scope(timestamp),
            sha256_hex(canonical_request),
        ]
        .join("\n")
    }

    /// `"AWS4" + secret` chained through date stamp, region, service and `aws4_request`.
    pub fn signing_key(&self, secret_access_key: &str, date_stamp: &str) -> Vec<u8> {
        let k_date = hmac_sha256(format!("AWS4{}", secret_access_key).as_bytes(), date_stamp);
        let k_region = hmac_sha256(&k_date, &self.region);
        let k_service = hmac_sha256(&k_region, &self.service);
        hmac_sha256(&k_service, "aws4_request")
    }

    pub fn signature(
        &self,
        token: &UploadToken,
        timestamp: &str,
        method: &str,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> String {
        let canonical = self.canonical_request(token, timestamp, method, path, params);
        let to_sign = self.string_to_sign(timestamp, &canonical);
        let key = self.signing_key(&token.secret_access_key, date_stamp(timestamp));
        hex::encode(hmac_sha256(&key, &to_sign))
    }

    /// Value for the `authorization` header.
    pub fn authorization(
        &self,
        token: &UploadToken,
        timestamp: &str,
        method: &str,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> String {
        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            token.access_key_id,
            self.credential_scope(timestamp),
            SIGNED_HEADERS,
            self.signature(token, timestamp, method, path, params)
        )
    }
}

/// First eight characters of the timestamp (`YYYYMMDD`).
fn date_stamp(timestamp: &str) -> &str {
    timestamp.get(..8).unwrap_or(timestamp)
}
