use super::{GenerationRequest, ImageGenerationService};
use crate::error::{ApiError, ErrorKind};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Scripted stand-in for callers that depend on [`ImageGenerationService`].
pub struct MockImageGenerationClient {
    responses: Arc<Mutex<Vec<std::result::Result<Vec<String>, ErrorKind>>>>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl MockImageGenerationClient {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_urls(self, urls: Vec<String>) -> Self {
        self.responses.lock().unwrap().push(Ok(urls));
        self
    }

    pub fn with_failure(self, kind: ErrorKind) -> Self {
        self.responses.lock().unwrap().push(Err(kind));
        self
    }

    pub fn get_call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn get_requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockImageGenerationClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageGenerationService for MockImageGenerationClient {
    async fn generate(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<String>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let count = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };

        let responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Ok(vec![format!("https://mock.jimeng.test/image/{}.webp", count)]);
        }
        match &responses[(count - 1) % responses.len()] {
            Ok(urls) => Ok(urls.clone()),
            Err(kind) => Err(Error::Api(ApiError::new(*kind))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jimeng::SessionCredential;
    use crate::models::GenerationParams;

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            credential: SessionCredential::new("tok"),
            params: GenerationParams::new(prompt),
            image_uri: None,
        }
    }

    #[tokio::test]
    async fn test_mock_default_url() {
        let client = MockImageGenerationClient::new();
        let urls = client
            .generate(request("a"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(urls, vec!["https://mock.jimeng.test/image/1.webp".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_cycles_scripted_responses() {
        let client = MockImageGenerationClient::new()
            .with_urls(vec!["https://a".to_string()])
            .with_failure(ErrorKind::ContentFiltered);

        assert!(client
            .generate(request("a"), CancellationToken::new())
            .await
            .is_ok());
        let err = client
            .generate(request("b"), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.api_kind(), Some(ErrorKind::ContentFiltered));
        assert_eq!(client.get_call_count(), 2);
        assert_eq!(client.get_requests()[1].params.prompt, "b");
    }

    #[tokio::test]
    async fn test_mock_honours_cancellation() {
        let client = MockImageGenerationClient::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client.generate(request("a"), cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(client.get_call_count(), 0);
    }
}
