use super::credential::SessionCredential;
use super::draft::DraftSubmitter;
use super::poller::{PollConfig, TaskPoller};
use super::transport::JimengHttpClient;
use super::upload::{ImageAsset, ImageUploader};
use super::{GenerationRequest, ImageGenerationService};
use crate::models::{Config, GenerationParams, UploadAddress};
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Upload → submit → poll, one job at a time per call.
///
/// Holds no per-job state, so one client can serve concurrent jobs for any
/// number of credentials.
pub struct JimengClient {
    http: JimengHttpClient,
    poll: PollConfig,
}

impl JimengClient {
    pub fn new(http: JimengHttpClient, poll: PollConfig) -> Self {
        Self { http, poll }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let http = JimengHttpClient::new(config.request_timeout)?
            .with_endpoints(config.endpoints.clone());
        Ok(Self::new(
            http,
            PollConfig {
                interval: config.poll_interval,
                timeout: config.poll_timeout,
            },
        ))
    }

    pub fn http(&self) -> &JimengHttpClient {
        &self.http
    }

    /// Load `path` and upload it, returning the store address.
    pub async fn upload_image(
        &self,
        credential: &SessionCredential,
        path: impl AsRef<Path>,
    ) -> Result<UploadAddress> {
        let asset = ImageAsset::load(path).await?;
        ImageUploader::new(&self.http).upload(credential, &asset).await
    }

    /// Submit a draft and return its history id.
    pub async fn submit_draft(
        &self,
        credential: &SessionCredential,
        params: &GenerationParams,
        image_uri: Option<&str>,
    ) -> Result<String> {
        DraftSubmitter::new(&self.http)
            .submit(credential, params, image_uri)
            .await
    }

    pub async fn wait_for_images(
        &self,
        credential: &SessionCredential,
        history_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        TaskPoller::new(&self.http, self.poll)
            .wait(credential, history_id, cancel)
            .await
    }

    pub async fn generate_images(
        &self,
        credential: &SessionCredential,
        params: &GenerationParams,
        image_uri: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let history_id = self.submit_draft(credential, params, image_uri).await?;
        tracing::info!("Draft accepted as history record {}", history_id);
        self.wait_for_images(credential, &history_id, cancel).await
    }

    /// Upload a reference image and generate variations of it.
    pub async fn image_to_images(
        &self,
        credential: &SessionCredential,
        image_path: impl AsRef<Path>,
        params: &GenerationParams,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let address = self.upload_image(credential, image_path).await?;
        self.generate_images(credential, params, Some(&address.uri), cancel)
            .await
    }
}

#[async_trait]
impl ImageGenerationService for JimengClient {
    async fn generate(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<String>> {
        self.generate_images(
            &request.credential,
            &request.params,
            request.image_uri.as_deref(),
            &cancel,
        )
        .await
    }
}
