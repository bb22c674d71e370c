//! Data models and structures
//!
//! Runtime configuration, caller-facing generation parameters, and the wire
//! shapes returned by the upload and history endpoints.

use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "jimeng-2.1";
pub const DEFAULT_JIMENG_BASE_URL: &str = "https://jimeng.jianying.com";
pub const DEFAULT_IMAGEX_BASE_URL: &str = "https://imagex.bytedanceapi.com";

/// Base URLs of the two remote subsystems plus the scheme used for upload hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub jimeng: String,
    pub imagex: String,
    pub upload_scheme: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            jimeng: DEFAULT_JIMENG_BASE_URL.to_string(),
            imagex: DEFAULT_IMAGEX_BASE_URL.to_string(),
            upload_scheme: "https".to_string(),
        }
    }
}

/// Parameters for a single generation job.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub sample_strength: f64,
}

impl GenerationParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            prompt: String::new(),
            negative_prompt: String::new(),
            width: 1024,
            height: 1024,
            sample_strength: 0.5,
        }
    }
}

/// Temporary storage credentials from `get_upload_token`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UploadToken {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

/// Single-use destination for one image upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadAddress {
    pub host: String,
    pub uri: String,
    pub auth: String,
}

impl UploadAddress {
    pub fn upload_url(&self, scheme: &str) -> String {
        format!("{}://{}/{}", scheme, self.host, self.uri)
    }
}

#[derive(Debug, Deserialize)]
pub struct ApplyImageUploadResponse {
    #[serde(rename = "Result")]
    pub result: Option<ApplyImageUploadResult>,
}

#[derive(Debug, Deserialize)]
pub struct ApplyImageUploadResult {
    #[serde(rename = "UploadAddress")]
    pub upload_address: RawUploadAddress,
}

#[derive(Debug, Deserialize)]
pub struct RawUploadAddress {
    #[serde(rename = "UploadHosts", default)]
    pub upload_hosts: Vec<String>,
    #[serde(rename = "StoreInfos", default)]
    pub store_infos: Vec<StoreInfo>,
}

#[derive(Debug, Deserialize)]
pub struct StoreInfo {
    #[serde(rename = "StoreUri")]
    pub store_uri: String,
    #[serde(rename = "Auth")]
    pub auth: String,
}

/// Server-side job status as returned by `get_history_by_ids`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskRecord {
    #[serde(default)]
    pub status: i64,
    #[serde(default, deserialize_with = "lenient_code")]
    pub fail_code: Option<String>,
    #[serde(default)]
    pub item_list: Vec<Option<GeneratedItem>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneratedItem {
    #[serde(default)]
    pub image: Option<ItemImage>,
    #[serde(default)]
    pub common_attr: Option<CommonAttr>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemImage {
    #[serde(default)]
    pub large_images: Vec<LargeImage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LargeImage {
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommonAttr {
    #[serde(default)]
    pub cover_url: Option<String>,
}

impl GeneratedItem {
    /// The large image URL, falling back to the cover URL.
    pub fn url(&self) -> Option<&str> {
        let large = self
            .image
            .as_ref()
            .and_then(|image| image.large_images.first())
            .and_then(|large| large.image_url.as_deref())
            .filter(|url| !url.is_empty());

        large.or_else(|| {
            self.common_attr
                .as_ref()
                .and_then(|attr| attr.cover_url.as_deref())
                .filter(|url| !url.is_empty())
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreditBalance {
    #[serde(default)]
    pub gift_credit: i64,
    #[serde(default)]
    pub purchase_credit: i64,
    #[serde(default)]
    pub vip_credit: i64,
}

impl CreditBalance {
    pub fn total(&self) -> i64 {
        self.gift_credit + self.purchase_credit + self.vip_credit
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreditResponse {
    #[serde(default)]
    pub credit: CreditBalance,
}

#[derive(Debug, Default, Deserialize)]
pub struct DraftSubmitResponse {
    #[serde(default)]
    pub aigc_data: Option<AigcData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AigcData {
    #[serde(default, deserialize_with = "lenient_code")]
    pub history_record_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpCommonInfo {
    pub aid: u32,
}

/// Accepts a code sent either as a JSON string or a number.
pub fn lenient_code<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| code_to_string(&v)))
}

pub(crate) fn code_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub session_tokens: Vec<String>,
    pub model: String,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub request_timeout: Duration,
    pub endpoints: Endpoints,
}

impl Config {
    pub fn from_env() -> crate::Result<Self> {
        load_env_file(None)?;
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_session = lookup("JIMENG_SESSION_ID")
            .ok_or_else(|| crate::Error::Config("JIMENG_SESSION_ID not set".to_string()))?;
        let session_tokens = crate::jimeng::SessionCredential::split(&raw_session)
            .into_iter()
            .map(|c| c.as_str().to_string())
            .collect::<Vec<_>>();
        if session_tokens.is_empty() {
            return Err(crate::Error::Config(
                "JIMENG_SESSION_ID contains no tokens".to_string(),
            ));
        }

        let parse_u64 = |key: &str, default: u64| -> crate::Result<u64> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| crate::Error::Config(format!("{} must be an integer", key))),
                None => Ok(default),
            }
        };

        let parse_positive = |key: &str, default: u64| -> crate::Result<u64> {
            match parse_u64(key, default)? {
                0 => Err(crate::Error::Config(format!("{} must be greater than zero", key))),
                value => Ok(value),
            }
        };

        let defaults = Endpoints::default();

        Ok(Self {
            session_tokens,
            model: lookup("JIMENG_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            poll_interval: Duration::from_millis(parse_positive("JIMENG_POLL_INTERVAL_MS", 1000)?),
            poll_timeout: Duration::from_secs(parse_positive("JIMENG_POLL_TIMEOUT_SECS", 600)?),
            request_timeout: Duration::from_secs(parse_u64("JIMENG_REQUEST_TIMEOUT_SECS", 15)?),
            endpoints: Endpoints {
                jimeng: lookup("JIMENG_BASE_URL").unwrap_or(defaults.jimeng),
                imagex: lookup("JIMENG_IMAGEX_URL").unwrap_or(defaults.imagex),
                upload_scheme: defaults.upload_scheme,
            },
        })
    }
}

/// Load a `.env` file (the default lookup when `path` is `None`). A missing
/// file is fine; an unreadable or malformed one is an error.
pub(crate) fn load_env_file(path: Option<&std::path::Path>) -> crate::Result<()> {
    let loaded = match path {
        Some(path) => dotenvy::from_path(path),
        None => dotenvy::dotenv().map(|_| ()),
    };
    match loaded {
        Err(e) if !e.not_found() => Err(e.into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_vars(lookup_from(&[("JIMENG_SESSION_ID", "abc")])).unwrap();
        assert_eq!(config.session_tokens, vec!["abc".to_string()]);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.poll_timeout, Duration::from_secs(600));
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.endpoints, Endpoints::default());
    }

    #[test]
    fn test_config_requires_session() {
        let err = Config::from_vars(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_config_rejects_non_numeric_interval() {
        let err = Config::from_vars(lookup_from(&[
            ("JIMENG_SESSION_ID", "abc"),
            ("JIMENG_POLL_INTERVAL_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("JIMENG_POLL_INTERVAL_MS"));
    }

    #[test]
    fn test_config_rejects_zero_poll_interval() {
        let err = Config::from_vars(lookup_from(&[
            ("JIMENG_SESSION_ID", "abc"),
            ("JIMENG_POLL_INTERVAL_MS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, crate::Error::Config(ref m) if m.contains("JIMENG_POLL_INTERVAL_MS")));
    }

    #[test]
    fn test_config_rejects_zero_poll_timeout() {
        let err = Config::from_vars(lookup_from(&[
            ("JIMENG_SESSION_ID", "abc"),
            ("JIMENG_POLL_TIMEOUT_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, crate::Error::Config(ref m) if m.contains("JIMENG_POLL_TIMEOUT_SECS")));
    }

    #[test]
    fn test_missing_env_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_env_file(Some(&dir.path().join(".env"))).is_ok());
    }

    #[test]
    fn test_malformed_env_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(".env");
        std::fs::write(&file, "JIMENG TEST 'unterminated\n").unwrap();

        let err = load_env_file(Some(&file)).unwrap_err();
        assert!(matches!(err, crate::Error::EnvVar(_)));
    }

    #[test]
    fn test_config_splits_multiple_tokens() {
        let config = Config::from_vars(lookup_from(&[(
            "JIMENG_SESSION_ID",
            "Bearer one, two",
        )]))
        .unwrap();
        assert_eq!(config.session_tokens, vec!["one", "two"]);
    }

    #[test]
    fn test_item_url_prefers_large_image() {
        let item: GeneratedItem = serde_json::from_value(serde_json::json!({
            "image": { "large_images": [{ "image_url": "https://img/large.webp" }] },
            "common_attr": { "cover_url": "https://img/cover.webp" }
        }))
        .unwrap();
        assert_eq!(item.url(), Some("https://img/large.webp"));
    }

    #[test]
    fn test_item_url_falls_back_to_cover() {
        let item: GeneratedItem = serde_json::from_value(serde_json::json!({
            "image": { "large_images": [] },
            "common_attr": { "cover_url": "https://img/cover.webp" }
        }))
        .unwrap();
        assert_eq!(item.url(), Some("https://img/cover.webp"));
    }

    #[test]
    fn test_item_without_urls_has_none() {
        let item: GeneratedItem = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(item.url(), None);
    }

    #[test]
    fn test_task_record_accepts_numeric_fail_code() {
        let record: TaskRecord = serde_json::from_value(serde_json::json!({
            "status": 30,
            "fail_code": 2038
        }))
        .unwrap();
        assert_eq!(record.fail_code.as_deref(), Some("2038"));
        assert!(record.item_list.is_empty());
    }

    #[test]
    fn test_credit_total() {
        let response: CreditResponse = serde_json::from_value(serde_json::json!({
            "credit": { "gift_credit": 3, "purchase_credit": 0, "vip_credit": 2 }
        }))
        .unwrap();
        assert_eq!(response.credit.total(), 5);
    }
}
