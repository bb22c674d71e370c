//! Poll a generation job until it leaves the running state.
//!
//! Status 20 is the only non-terminal value. 30 is a failure (fail code
//! `2038` means the content was filtered); anything else is success. The loop
//! sleeps a fixed interval before every poll and is bounded by both a
//! timeout and the caller's cancellation token.

use super::credential::SessionCredential;
use super::transport::{JimengHttpClient, ServiceRequest};
use super::DEFAULT_ASSISTANT_ID;
use crate::error::{ApiError, ErrorKind};
use crate::models::{GeneratedItem, HttpCommonInfo, TaskRecord};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const HISTORY_URI: &str = "/mweb/v1/get_history_by_ids";
pub const STATUS_RUNNING: i64 = 20;
pub const STATUS_FAILED: i64 = 30;
pub const FAIL_CODE_CONTENT_FILTERED: &str = "2038";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Failed,
    Finished(i64),
}

impl From<i64> for TaskStatus {
    fn from(status: i64) -> Self {
        match status {
            STATUS_RUNNING => TaskStatus::Running,
            STATUS_FAILED => TaskStatus::Failed,
            other => TaskStatus::Finished(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ImageScene {
    scene: &'static str,
    width: u32,
    height: u32,
    uniq_key: &'static str,
    format: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct ImageInfo {
    width: u32,
    height: u32,
    format: &'static str,
    image_scene_list: Vec<ImageScene>,
}

#[derive(Debug, Serialize)]
struct HistoryRequest<'a> {
    history_ids: [&'a str; 1],
    image_info: ImageInfo,
    http_common_info: HttpCommonInfo,
}

const SCENES: [(&str, u32, u32, &str); 12] = [
    ("smart_crop", 360, 360, "smart_crop-w:360-h:360"),
    ("smart_crop", 480, 480, "smart_crop-w:480-h:480"),
    ("smart_crop", 720, 720, "smart_crop-w:720-h:720"),
    ("smart_crop", 720, 480, "smart_crop-w:720-h:480"),
    ("smart_crop", 360, 240, "smart_crop-w:360-h:240"),
    ("smart_crop", 240, 320, "smart_crop-w:240-h:320"),
    ("smart_crop", 480, 640, "smart_crop-w:480-h:640"),
    ("normal", 2400, 2400, "2400"),
    ("normal", 1080, 1080, "1080"),
    ("normal", 720, 720, "720"),
    ("normal", 480, 480, "480"),
    ("normal", 360, 360, "360"),
];

fn image_info() -> ImageInfo {
    ImageInfo {
        width: 2048,
        height: 2048,
        format: "webp",
        image_scene_list: SCENES
            .iter()
            .map(|&(scene, width, height, uniq_key)| ImageScene {
                scene,
                width,
                height,
                uniq_key,
                format: "webp",
            })
            .collect(),
    }
}

/// Image URLs in item order; items with neither a large image nor a cover are dropped.
pub fn extract_image_urls(items: &[Option<GeneratedItem>]) -> Vec<String> {
    items
        .iter()
        .flatten()
        .filter_map(|item| item.url().map(str::to_string))
        .collect()
}

pub struct TaskPoller<'a> {
    http: &'a JimengHttpClient,
    config: PollConfig,
}

impl<'a> TaskPoller<'a> {
    pub fn new(http: &'a JimengHttpClient, config: PollConfig) -> Self {
        Self { http, config }
    }

    /// Fetch the record for `history_id` once.
    pub async fn fetch(
        &self,
        credential: &SessionCredential,
        history_id: &str,
    ) -> Result<TaskRecord> {
        let request = ServiceRequest::post(HISTORY_URI).json(&HistoryRequest {
            history_ids: [history_id],
            image_info: image_info(),
            http_common_info: HttpCommonInfo {
                aid: DEFAULT_ASSISTANT_ID,
            },
        })?;
        let mut result = self.http.call(credential, request).await?;

        let record = match result.get_mut(history_id).map(Value::take) {
            Some(Value::Null) | None => None,
            Some(Value::Object(map)) if map.is_empty() => None,
            Some(record) => Some(record),
        }
        .ok_or_else(|| Error::api(ErrorKind::ImageGenerationFailed, "记录不存在"))?;

        serde_json::from_value(record).map_err(|e| {
            tracing::error!("Unexpected history record for {}: {}", history_id, e);
            Error::api(ErrorKind::RequestFailed, "malformed response")
        })
    }

    /// Poll until terminal, the timeout elapses, or `cancel` fires.
    pub async fn wait(
        &self,
        credential: &SessionCredential,
        history_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Polling for {} cancelled", history_id);
                Err(Error::Cancelled)
            }
            outcome = tokio::time::timeout(self.config.timeout, self.poll_loop(credential, history_id)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!("Polling for {} timed out after {:?}", history_id, self.config.timeout);
                        Err(Error::PollTimeout(self.config.timeout))
                    }
                }
            }
        }
    }

    async fn poll_loop(&self, credential: &SessionCredential, history_id: &str) -> Result<Vec<String>> {
        let mut polls = 0u32;
        loop {
            tokio::time::sleep(self.config.interval).await;
            polls += 1;

            let record = self.fetch(credential, history_id).await?;
            match TaskStatus::from(record.status) {
                TaskStatus::Running => {
                    tracing::debug!(polls, "Generation {} still running", history_id);
                }
                TaskStatus::Failed => {
                    tracing::error!(
                        fail_code = ?record.fail_code,
                        "Generation {} failed after {} polls",
                        history_id,
                        polls
                    );
                    let kind = match record.fail_code.as_deref() {
                        Some(FAIL_CODE_CONTENT_FILTERED) => ErrorKind::ContentFiltered,
                        _ => ErrorKind::ImageGenerationFailed,
                    };
                    return Err(Error::Api(ApiError::new(kind)));
                }
                TaskStatus::Finished(status) => {
                    let urls = extract_image_urls(&record.item_list);
                    tracing::info!(
                        status,
                        polls,
                        images = urls.len(),
                        "Generation {} finished",
                        history_id
                    );
                    return Ok(urls);
                }
            }
        }
    }
}
