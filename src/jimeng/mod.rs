//! Jimeng image-generation client
//!
//! Uploads a reference image, submits a generation draft, and polls the job
//! until it reaches a terminal state. Upload-address requests are signed with
//! AWS4-HMAC-SHA256 ([`signer`]); every other call carries the MD5 device
//! sign ([`device_sign`]).

pub mod client;
pub mod credential;
pub mod device_sign;
pub mod draft;
pub mod mock;
pub mod poller;
pub mod signer;
pub mod transport;
pub mod upload;

pub use client::JimengClient;
pub use credential::SessionCredential;
pub use mock::MockImageGenerationClient;
pub use poller::{PollConfig, TaskPoller};
pub use signer::RequestSigner;
pub use transport::{JimengHttpClient, ServiceRequest};
pub use upload::{ImageAsset, ImageUploader};

use crate::models::GenerationParams;
use crate::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_ASSISTANT_ID: u32 = 513695;
pub const VERSION_CODE: &str = "5.8.0";
pub const PLATFORM_CODE: &str = "7";
pub const DRAFT_VERSION: &str = "3.0.2";
/// Largest reference image the service accepts.
pub const FILE_MAX_SIZE: usize = 100 * 1024 * 1024;

/// Fixed browser fingerprint sent with every device-signed call.
pub(crate) const FAKE_HEADERS: &[(&str, &str)] = &[
    ("Accept", "application/json, text/plain, */*"),
    ("Accept-Encoding", "gzip, deflate, br"),
    ("Accept-language", "zh-CN,zh;q=0.9"),
    ("Cache-control", "no-cache"),
    ("Last-event-id", "undefined"),
    ("Appid", "513695"),
    ("Appvr", VERSION_CODE),
    ("Origin", "https://jimeng.jianying.com"),
    ("Pragma", "no-cache"),
    ("Priority", "u=1, i"),
    ("Referer", "https://jimeng.jianying.com"),
    ("Pf", PLATFORM_CODE),
    (
        "Sec-Ch-Ua",
        "\"Google Chrome\";v=\"131\", \"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\"",
    ),
    ("Sec-Ch-Ua-Mobile", "?0"),
    ("Sec-Ch-Ua-Platform", "\"Windows\""),
    ("Sec-Fetch-Dest", "empty"),
    ("Sec-Fetch-Mode", "cors"),
    ("Sec-Fetch-Site", "same-origin"),
    (
        "User-Agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    ),
];

/// A generation job as seen by callers.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub credential: SessionCredential,
    pub params: GenerationParams,
    /// Reference image already uploaded to the service.
    pub image_uri: Option<String>,
}

#[async_trait]
pub trait ImageGenerationService: Send + Sync {
    /// Run a job to completion and return the generated image URLs in order.
    async fn generate(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<String>>;
}
