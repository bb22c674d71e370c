//! Draft payload construction and submission.
//!
//! A draft wraps exactly one `image_base_component`. Its `abilities` block
//! takes a `generate` shape for text-to-image and a `blend` shape when a
//! reference image URI is supplied.

use super::credential::SessionCredential;
use super::transport::{JimengHttpClient, ServiceRequest};
use super::{DEFAULT_ASSISTANT_ID, DRAFT_VERSION};
use crate::error::ErrorKind;
use crate::models::{
    CreditResponse, DraftSubmitResponse, GenerationParams, HttpCommonInfo, DEFAULT_MODEL,
};
use crate::{Error, Result};
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

pub const GENERATE_URI: &str = "/mweb/v1/aigc_draft/generate";
pub const USER_CREDIT_URI: &str = "/commerce/v1/benefits/user_credit";
pub const CREDIT_RECEIVE_URI: &str = "/commerce/v1/benefits/credit_receive";
const CREDIT_REFERER: &str = "https://jimeng.jianying.com/ai-tool/image/generate";

const MODEL_MAP: &[(&str, &str)] = &[
    ("jimeng-2.1", "high_aes_general_v21_L:general_v2.1_L"),
    ("jimeng-2.0-pro", "high_aes_general_v20_L:general_v2.0_L"),
    ("jimeng-2.0", "high_aes_general_v20:general_v2.0"),
    ("jimeng-1.4", "high_aes_general_v14:general_v1.4"),
    ("jimeng-xl-pro", "text2img_xl_sft"),
];

/// Map a public model name to the service's internal key; unknown names get the default.
pub fn resolve_model(name: &str) -> &'static str {
    let lookup = |key: &str| MODEL_MAP.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);
    lookup(name)
        .or_else(|| lookup(DEFAULT_MODEL))
        .unwrap_or(MODEL_MAP[0].1)
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// The `{type: "", id}` header every node in the draft tree carries.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
}

impl Node {
    fn new() -> Self {
        Self::typed("")
    }

    fn typed(kind: &'static str) -> Self {
        Self { kind, id: new_id() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerateType {
    Generate,
    Blend,
}

#[derive(Debug, Clone, Serialize)]
pub struct LargeImageInfo {
    #[serde(flatten)]
    node: Node,
    pub height: u32,
    pub width: u32,
    pub resolution_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoreParam {
    #[serde(flatten)]
    node: Node,
    pub model: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub seed: u64,
    pub sample_strength: f64,
    pub image_ratio: u32,
    pub large_image_info: LargeImageInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateAbility {
    #[serde(flatten)]
    node: Node,
    pub core_param: CoreParam,
    pub history_option: Node,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferenceImage {
    #[serde(flatten)]
    node: Node,
    pub source_from: &'static str,
    pub platform_type: u32,
    pub name: &'static str,
    pub image_uri: String,
    pub width: u32,
    pub height: u32,
    pub format: &'static str,
    pub uri: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlendAbilityItem {
    #[serde(flatten)]
    node: Node,
    pub name: &'static str,
    pub image_uri_list: Vec<String>,
    pub image_list: Vec<ReferenceImage>,
    pub strength: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptPlaceholder {
    #[serde(flatten)]
    node: Node,
    pub ability_index: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PosteditParam {
    #[serde(flatten)]
    node: Node,
    pub generate_type: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlendAbility {
    #[serde(flatten)]
    node: Node,
    pub min_features: Vec<String>,
    pub core_param: CoreParam,
    pub ability_list: Vec<BlendAbilityItem>,
    pub history_option: Node,
    pub prompt_placeholder_info_list: Vec<PromptPlaceholder>,
    pub postedit_param: PosteditParam,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AbilityMode {
    Generate(GenerateAbility),
    Blend(BlendAbility),
}

#[derive(Debug, Clone, Serialize)]
pub struct Abilities {
    #[serde(flatten)]
    node: Node,
    #[serde(flatten)]
    pub mode: AbilityMode,
}

impl Abilities {
    pub fn build(model: &str, params: &GenerationParams, image_uri: Option<&str>) -> Self {
        let core_param = CoreParam {
            node: Node::new(),
            model: model.to_string(),
            prompt: params.prompt.clone(),
            negative_prompt: params.negative_prompt.clone(),
            seed: rand::thread_rng().gen_range(2_500_000_000..2_600_000_000),
            sample_strength: params.sample_strength,
            image_ratio: 1,
            large_image_info: LargeImageInfo {
                node: Node::new(),
                height: params.height,
                width: params.width,
                resolution_type: "1k",
            },
        };

        let mode = match image_uri {
            None => AbilityMode::Generate(GenerateAbility {
                node: Node::new(),
                core_param,
                history_option: Node::new(),
            }),
            Some(uri) => AbilityMode::Blend(BlendAbility {
                node: Node::new(),
                min_features: Vec::new(),
                core_param,
                ability_list: vec![BlendAbilityItem {
                    node: Node::new(),
                    name: "byte_edit",
                    image_uri_list: vec![uri.to_string()],
                    image_list: vec![ReferenceImage {
                        node: Node::typed("image"),
                        source_from: "upload",
                        platform_type: 1,
                        name: "",
                        image_uri: uri.to_string(),
                        width: 0,
                        height: 0,
                        format: "",
                        uri: uri.to_string(),
                    }],
                    strength: params.sample_strength,
                }],
                history_option: Node::new(),
                prompt_placeholder_info_list: vec![PromptPlaceholder {
                    node: Node::new(),
                    ability_index: 0,
                }],
                postedit_param: PosteditParam {
                    node: Node::new(),
                    generate_type: 0,
                },
            }),
        };

        Self {
            node: Node::new(),
            mode,
        }
    }
}

/// The single component a draft carries.
#[derive(Debug, Clone, Serialize)]
pub struct DraftComponent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub min_version: &'static str,
    pub generate_type: GenerateType,
    pub aigc_mode: &'static str,
    pub abilities: Abilities,
}

impl DraftComponent {
    pub fn new(model: &str, params: &GenerationParams, image_uri: Option<&str>) -> Self {
        let generate_type = if image_uri.is_some() {
            GenerateType::Blend
        } else {
            GenerateType::Generate
        };
        Self {
            kind: "image_base_component",
            id: new_id(),
            min_version: DRAFT_VERSION,
            generate_type,
            aigc_mode: "workbench",
            abilities: Abilities::build(model, params, image_uri),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Draft {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub min_version: &'static str,
    pub is_from_tsn: bool,
    pub version: &'static str,
    pub main_component_id: String,
    pub component_list: Vec<DraftComponent>,
}

impl Draft {
    pub fn new(component: DraftComponent) -> Self {
        Self {
            kind: "draft",
            id: new_id(),
            min_version: DRAFT_VERSION,
            is_from_tsn: true,
            version: DRAFT_VERSION,
            main_component_id: component.id.clone(),
            component_list: vec![component],
        }
    }

    pub fn component(&self) -> &DraftComponent {
        &self.component_list[0]
    }
}

#[derive(Debug, Serialize)]
struct Extend {
    root_model: String,
    template_id: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsExtra {
    template_id: &'static str,
    generate_count: u32,
    prompt_source: &'static str,
    template_source: &'static str,
    last_request_id: &'static str,
    origin_request_id: &'static str,
}

#[derive(Debug, Serialize)]
struct BabiParam {
    scenario: &'static str,
    feature_key: &'static str,
    feature_entrance: &'static str,
    feature_entrance_detail: String,
}

#[derive(Debug, Serialize)]
struct SubmitBody {
    extend: Extend,
    submit_id: String,
    metrics_extra: String,
    draft_content: String,
    http_common_info: HttpCommonInfo,
}

/// Everything sent for one submission, kept for inspection and logging.
#[derive(Debug, Clone)]
pub struct DraftSubmission {
    pub submit_id: String,
    pub model: &'static str,
    pub draft: Draft,
}

impl DraftSubmission {
    pub fn new(params: &GenerationParams, image_uri: Option<&str>) -> Result<Self> {
        if params.prompt.trim().is_empty() {
            return Err(Error::api(
                ErrorKind::RequestParamsInvalid,
                "prompt must be a non-empty string",
            ));
        }
        let model = resolve_model(&params.model);
        Ok(Self {
            submit_id: new_id(),
            model,
            draft: Draft::new(DraftComponent::new(model, params, image_uri)),
        })
    }

    fn request(&self) -> Result<ServiceRequest> {
        let babi = serde_json::to_string(&BabiParam {
            scenario: "image_video_generation",
            feature_key: "to_image_referenceimage_generate",
            feature_entrance: "to_image",
            feature_entrance_detail: format!("to_image-{}", self.model),
        })?;
        let metrics = serde_json::to_string(&MetricsExtra {
            template_id: "",
            generate_count: 1,
            prompt_source: "custom",
            template_source: "",
            last_request_id: "",
            origin_request_id: "",
        })?;

        let body = SubmitBody {
            extend: Extend {
                root_model: self.model.to_string(),
                template_id: "",
            },
            submit_id: self.submit_id.clone(),
            metrics_extra: metrics,
            draft_content: serde_json::to_string(&self.draft)?,
            http_common_info: HttpCommonInfo {
                aid: DEFAULT_ASSISTANT_ID,
            },
        };

        // The web app percent-encodes this value before the query string is encoded again.
        let encoded: String = url::form_urlencoded::byte_serialize(babi.as_bytes()).collect();
        ServiceRequest::post(GENERATE_URI)
            .query("babi_param", encoded)
            .json(&body)
    }
}

#[derive(Debug, Default, serde::Deserialize)]
struct CreditReceiveResponse {
    #[serde(default)]
    cur_total_credits: Option<i64>,
    #[serde(default)]
    receive_quota: Option<i64>,
}

/// Credit check plus draft submission over the device-signed transport.
pub struct DraftSubmitter<'a> {
    http: &'a JimengHttpClient,
}

impl<'a> DraftSubmitter<'a> {
    pub fn new(http: &'a JimengHttpClient) -> Self {
        Self { http }
    }

    pub async fn credit_balance(&self, credential: &SessionCredential) -> Result<i64> {
        let response: CreditResponse = self
            .http
            .call_as(
                credential,
                ServiceRequest::post(USER_CREDIT_URI)
                    .header("Referer", CREDIT_REFERER)
                    .json(&serde_json::json!({}))?,
            )
            .await?;
        let total = response.credit.total();
        tracing::debug!(
            gift = response.credit.gift_credit,
            purchase = response.credit.purchase_credit,
            vip = response.credit.vip_credit,
            "Credit balance: {}",
            total
        );
        Ok(total)
    }

    pub async fn receive_credit(&self, credential: &SessionCredential) -> Result<()> {
        let response: CreditReceiveResponse = self
            .http
            .call_as(
                credential,
                ServiceRequest::post(CREDIT_RECEIVE_URI)
                    .header("Referer", CREDIT_REFERER)
                    .json(&serde_json::json!({ "time_zone": "Asia/Shanghai" }))?,
            )
            .await?;
        tracing::info!(
            "Received daily credit: quota {:?}, total now {:?}",
            response.receive_quota,
            response.cur_total_credits
        );
        Ok(())
    }

    /// Top up when the balance is zero; the top-up itself never fails the caller.
    pub async fn ensure_credit(&self, credential: &SessionCredential) -> Result<()> {
        if self.credit_balance(credential).await? <= 0 {
            if let Err(e) = self.receive_credit(credential).await {
                tracing::warn!("Could not receive free credit: {}", e);
            }
        }
        Ok(())
    }

    /// Submit a draft and return its history record id.
    pub async fn submit(
        &self,
        credential: &SessionCredential,
        params: &GenerationParams,
        image_uri: Option<&str>,
    ) -> Result<String> {
        let submission = DraftSubmission::new(params, image_uri)?;
        self.ensure_credit(credential).await?;

        tracing::info!(
            model = submission.model,
            generate_type = ?submission.draft.component().generate_type,
            "Submitting draft {}",
            submission.submit_id
        );

        let response: DraftSubmitResponse = self
            .http
            .call_as(credential, submission.request()?)
            .await?;

        response
            .aigc_data
            .and_then(|data| data.history_record_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::api(ErrorKind::ImageGenerationFailed, "记录ID不存在"))
    }
}
