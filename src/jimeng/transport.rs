use super::credential::SessionCredential;
use super::device_sign::DeviceSign;
use super::{DEFAULT_ASSISTANT_ID, FAKE_HEADERS};
use crate::error::{ApiError, ErrorKind};
use crate::models::{code_to_string, Endpoints};
use crate::{Error, Result};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::io::Read;
use std::time::Duration;

/// Identifiers a browser session would carry, generated once per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub web_id: u64,
}

impl DeviceIdentity {
    pub fn generate() -> Self {
        Self {
            web_id: rand::thread_rng()
                .gen_range(7_000_000_000_000_000_000..7_999_999_999_999_999_999),
        }
    }
}

/// One call against the Jimeng web API.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    method: Method,
    uri: String,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Value>,
}

impl ServiceRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            params: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(Method::POST, uri)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// HTTP client shared by the uploader, draft submitter and poller.
pub struct JimengHttpClient {
    pub(crate) client: Client,
    pub(crate) endpoints: Endpoints,
    identity: DeviceIdentity,
}

impl JimengHttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::new_with_client(client))
    }

    pub fn new_with_client(client: Client) -> Self {
        Self {
            client,
            endpoints: Endpoints::default(),
            identity: DeviceIdentity::generate(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    /// Send a device-signed request and unwrap the `{ret, errmsg, data}` envelope.
    pub async fn call(&self, credential: &SessionCredential, request: ServiceRequest) -> Result<Value> {
        let sign = DeviceSign::now(&request.uri);
        let url = format!("{}{}", self.endpoints.jimeng, request.uri);

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .query(&[
                ("aid", DEFAULT_ASSISTANT_ID.to_string()),
                ("device_platform", "web".to_string()),
                ("region", "CN".to_string()),
                ("web_id", self.identity.web_id.to_string()),
            ])
            .query(&request.params);

        let mut headers = HeaderMap::new();
        for (name, value) in FAKE_HEADERS {
            insert_header(&mut headers, name, value)?;
        }
        insert_header(&mut headers, "Cookie", &credential.cookie())?;
        for (name, value) in sign.headers() {
            insert_header(&mut headers, name, &value)?;
        }
        // Later inserts replace the fingerprint defaults (e.g. Referer).
        for (name, value) in &request.headers {
            insert_header(&mut headers, name, value)?;
        }
        builder = builder.headers(headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!("Failed to send request to Jimeng {}: {}", request.uri, e);
            e
        })?;

        let status = response.status();
        let encoding = response
            .headers()
            .get(reqwest::header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);
        let bytes = response.bytes().await?;
        tracing::debug!(uri = %request.uri, %status, "Jimeng response received");

        let decoded = decode_body(encoding.as_deref(), &bytes)?;
        Ok(unwrap_envelope(decoded)?)
    }

    /// [`Self::call`] followed by typed decoding of the unwrapped payload.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        credential: &SessionCredential,
        request: ServiceRequest,
    ) -> Result<T> {
        let uri = request.uri.clone();
        let value = self.call(credential, request).await?;
        serde_json::from_value(value).map_err(|e| {
            tracing::error!("Unexpected payload from Jimeng {}: {}", uri, e);
            Error::Api(malformed())
        })
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
        Error::api(
            ErrorKind::RequestParamsInvalid,
            format!("invalid header name {}: {}", name, e),
        )
    })?;
    let header_value = HeaderValue::from_str(value).map_err(|e| {
        Error::api(
            ErrorKind::RequestParamsInvalid,
            format!("invalid value for header {}: {}", name, e),
        )
    })?;
    headers.insert(header_name, header_value);
    Ok(())
}

fn malformed() -> ApiError {
    ApiError::with_detail(ErrorKind::RequestFailed, "malformed response")
}

/// Inflate according to `Content-Encoding`; unknown or absent encodings pass through.
pub fn decompress(encoding: Option<&str>, bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    match encoding {
        Some("gzip") => {
            flate2::read::GzDecoder::new(bytes).read_to_end(&mut out)?;
        }
        Some("deflate") => {
            flate2::read::ZlibDecoder::new(bytes).read_to_end(&mut out)?;
        }
        Some("br") => {
            brotli::Decompressor::new(bytes, 4096).read_to_end(&mut out)?;
        }
        _ => out.extend_from_slice(bytes),
    }
    Ok(out)
}

/// Decompress and JSON-decode a body; any failure is a malformed response.
pub fn decode_body(encoding: Option<&str>, bytes: &[u8]) -> std::result::Result<Value, ApiError> {
    let raw = decompress(encoding, bytes).map_err(|e| {
        tracing::debug!("Failed to decompress {:?} body: {}", encoding, e);
        malformed()
    })?;
    serde_json::from_slice(&raw).map_err(|e| {
        tracing::debug!(
            "Failed to parse Jimeng body: {}\nBody: {}",
            e,
            String::from_utf8_lossy(&raw)
        );
        malformed()
    })
}

/// Apply the `{ret, errmsg, data}` convention.
pub fn unwrap_envelope(body: Value) -> std::result::Result<Value, ApiError> {
    let ret = match body.get("ret").and_then(code_to_string) {
        Some(ret) => ret,
        None => return Ok(body),
    };
    let errmsg = body
        .get("errmsg")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match ret.as_str() {
        "0" => Ok(match body {
            Value::Object(mut map) => map
                .remove("data")
                .filter(|d| !d.is_null())
                .unwrap_or_else(|| Value::Object(Default::default())),
            _ => Value::Object(Default::default()),
        }),
        "5000" => {
            tracing::warn!("Jimeng reports insufficient credits: {}", errmsg);
            Err(ApiError::with_detail(ErrorKind::InsufficientCredits, errmsg))
        }
        _ => {
            tracing::error!("Jimeng request failed (ret {}): {}", ret, errmsg);
            Err(ApiError::with_detail(ErrorKind::RequestFailed, errmsg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;
    use wiremock::matchers::{header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn brotli_compress(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
            writer.write_all(data).unwrap();
        }
        out
    }

    fn make_client(server: &MockServer) -> JimengHttpClient {
        JimengHttpClient::new(Duration::from_secs(5))
            .unwrap()
            .with_endpoints(Endpoints {
                jimeng: server.uri(),
                ..Endpoints::default()
            })
            .with_identity(DeviceIdentity {
                web_id: 7_123_456_789_000_000_000,
            })
    }

    #[test]
    fn test_envelope_success_returns_data() {
        let data = unwrap_envelope(json!({"ret": "0", "data": {"x": 1}})).unwrap();
        assert_eq!(data, json!({"x": 1}));
    }

    #[test]
    fn test_envelope_numeric_ret() {
        let data = unwrap_envelope(json!({"ret": 0, "data": {"y": 2}})).unwrap();
        assert_eq!(data, json!({"y": 2}));
    }

    #[test]
    fn test_envelope_success_without_data() {
        let data = unwrap_envelope(json!({"ret": "0"})).unwrap();
        assert_eq!(data, json!({}));
    }

    #[test]
    fn test_envelope_insufficient_credits() {
        let err = unwrap_envelope(json!({"ret": "5000", "errmsg": "low credit"})).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InsufficientCredits);
        assert_eq!(err.message(), "low credit");
    }

    #[test]
    fn test_envelope_other_ret_fails() {
        let err = unwrap_envelope(json!({"ret": "1014", "errmsg": "denied"})).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RequestFailed);
        assert_eq!(err.message(), "denied");
    }

    #[test]
    fn test_envelope_absent_ret_passes_through() {
        let body = json!({"Result": {"ok": true}});
        assert_eq!(unwrap_envelope(body.clone()).unwrap(), body);
    }

    #[test]
    fn test_decode_gzip_and_brotli() {
        let payload = br#"{"ret":"0","data":{"z":3}}"#;
        let expected: Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(decode_body(Some("gzip"), &gzip(payload)).unwrap(), expected);
        assert_eq!(
            decode_body(Some("br"), &brotli_compress(payload)).unwrap(),
            expected
        );
        assert_eq!(decode_body(None, payload).unwrap(), expected);
        assert_eq!(decode_body(Some("identity"), payload).unwrap(), expected);
    }

    #[test]
    fn test_decode_deflate() {
        let payload = br#"{"ret":"0","data":{"v":1}}"#;
        let expected: Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(decode_body(Some("deflate"), &zlib(payload)).unwrap(), expected);
    }

    #[test]
    fn test_advertised_encodings_are_decodable() {
        let (_, accepted) = FAKE_HEADERS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("accept-encoding"))
            .unwrap();
        let payload = br#"{"ok":true}"#;
        for encoding in accepted.split(',').map(str::trim) {
            let encoded = match encoding {
                "gzip" => gzip(payload),
                "deflate" => zlib(payload),
                "br" => brotli_compress(payload),
                other => panic!("advertised encoding {} has no decoder", other),
            };
            assert_eq!(decode_body(Some(encoding), &encoded).unwrap(), json!({"ok": true}));
        }
    }

    #[tokio::test]
    async fn test_call_inflates_deflate_response() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/mweb/v1/deflated"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-encoding", "deflate")
                    .set_body_raw(zlib(br#"{"ret":"0","data":{"v":1}}"#), "application/json"),
            )
            .mount(&server)
            .await;

        let client = make_client(&server);
        let data = client
            .call(
                &SessionCredential::new("tok"),
                ServiceRequest::post("/mweb/v1/deflated"),
            )
            .await
            .unwrap();
        assert_eq!(data, json!({"v": 1}));
    }

    #[test]
    fn test_decode_failures_are_malformed() {
        let err = decode_body(Some("gzip"), b"not gzip").unwrap_err();
        assert_eq!(err.kind, ErrorKind::RequestFailed);
        assert_eq!(err.message(), "malformed response");

        let err = decode_body(None, b"<html>").unwrap_err();
        assert_eq!(err.message(), "malformed response");
    }

    #[tokio::test]
    async fn test_call_sends_signed_headers_and_common_params() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/mweb/v1/get_history_by_ids"))
            .and(query_param("aid", "513695"))
            .and(query_param("device_platform", "web"))
            .and(query_param("region", "CN"))
            .and(query_param("web_id", "7123456789000000000"))
            .and(header("Appid", "513695"))
            .and(header("Pf", "7"))
            .and(header("Sign-Ver", "1"))
            .and(header_exists("Sign"))
            .and(header_exists("Device-Time"))
            .and(header(
                "Cookie",
                "sessionid=tok; sessionid_ss=tok; sid_tt=tok; uid_tt=tok; uid_tt_ss=tok",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ret": "0",
                "data": {"ok": true}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_client(&server);
        let data = client
            .call(
                &SessionCredential::new("tok"),
                ServiceRequest::post("/mweb/v1/get_history_by_ids")
                    .json(&json!({"history_ids": ["1"]}))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(data, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_call_decompresses_gzip_response() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Encoding", "gzip")
                    .set_body_bytes(gzip(br#"{"ret":"0","data":{"v":"gz"}}"#)),
            )
            .mount(&server)
            .await;

        let client = make_client(&server);
        let data = client
            .call(&SessionCredential::new("tok"), ServiceRequest::post("/api"))
            .await
            .unwrap();
        assert_eq!(data, json!({"v": "gz"}));
    }

    #[tokio::test]
    async fn test_call_maps_credit_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ret": "5000",
                "errmsg": "low credit"
            })))
            .mount(&server)
            .await;

        let client = make_client(&server);
        let err = client
            .call(&SessionCredential::new("tok"), ServiceRequest::post("/api"))
            .await
            .unwrap_err();
        assert_eq!(err.api_kind(), Some(ErrorKind::InsufficientCredits));
    }

    #[tokio::test]
    async fn test_call_as_rejects_unexpected_shape() {
        #[derive(Debug, serde::Deserialize)]
        struct Expected {
            #[allow(dead_code)]
            count: u32,
        }

        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ret": "0",
                "data": {"count": "many"}
            })))
            .mount(&server)
            .await;

        let client = make_client(&server);
        let err = client
            .call_as::<Expected>(&SessionCredential::new("tok"), ServiceRequest::post("/api"))
            .await
            .unwrap_err();
        assert_eq!(err.api_kind(), Some(ErrorKind::RequestFailed));
    }
}
