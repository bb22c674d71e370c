//! MD5 "device sign" attached to draft submission and polling calls.
//!
//! Unrelated to the AWS4 scheme in [`super::signer`]: the web API only checks
//! that `Sign` matches a salted digest of the URI tail and the device time.

use super::{PLATFORM_CODE, VERSION_CODE};
use md5::{Digest, Md5};

pub const SIGN_VERSION: &str = "1";

/// Per-request signature headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSign {
    pub device_time: i64,
    pub sign: String,
}

impl DeviceSign {
    pub fn new(uri: &str, device_time: i64) -> Self {
        let payload = format!(
            "9e2c|{}|{}|{}|{}||11ac",
            uri_tail(uri),
            PLATFORM_CODE,
            VERSION_CODE,
            device_time
        );
        Self {
            device_time,
            sign: hex::encode(Md5::digest(payload.as_bytes())),
        }
    }

    pub fn now(uri: &str) -> Self {
        Self::new(uri, chrono::Utc::now().timestamp())
    }

    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            ("Device-Time", self.device_time.to_string()),
            ("Sign", self.sign.clone()),
            ("Sign-Ver", SIGN_VERSION.to_string()),
        ]
    }
}

/// Last seven characters of the URI.
fn uri_tail(uri: &str) -> &str {
    let count = uri.chars().count();
    if count <= 7 {
        return uri;
    }
    let start = uri
        .char_indices()
        .nth(count - 7)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &uri[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_tail() {
        assert_eq!(uri_tail("/mweb/v1/aigc_draft/generate"), "enerate");
        assert_eq!(uri_tail("/mweb/v1/get_history_by_ids"), "_by_ids");
        assert_eq!(uri_tail("/short"), "/short");
    }

    #[test]
    fn test_sign_matches_independent_digest() {
        let sign = DeviceSign::new("/mweb/v1/get_history_by_ids", 1_700_000_000);
        let expected = hex::encode(Md5::digest(
            "9e2c|_by_ids|7|5.8.0|1700000000||11ac".as_bytes(),
        ));
        assert_eq!(sign.sign, expected);
        assert_eq!(sign.sign.len(), 32);
    }

    #[test]
    fn test_sign_depends_on_device_time() {
        let a = DeviceSign::new("/mweb/v1/aigc_draft/generate", 1);
        let b = DeviceSign::new("/mweb/v1/aigc_draft/generate", 2);
        assert_ne!(a.sign, b.sign);
    }

    #[test]
    fn test_headers_shape() {
        let headers = DeviceSign::new("/x", 42).headers();
        assert_eq!(headers[0], ("Device-Time", "42".to_string()));
        assert_eq!(headers[2], ("Sign-Ver", "1".to_string()));
    }
}
