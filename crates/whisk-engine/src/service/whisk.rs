use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use reqwest::header::{AUTHORIZATION, COOKIE, ORIGIN, REFERER, USER_AGENT};
use serde::{Deserialize, Serialize};
use whisk_contracts::credentials::Credentials;
use whisk_contracts::references::ResolvedReference;
use whisk_contracts::settings::ImageModelSettings;

use super::{GenerateRequest, GeneratedImage, ImageService, ImageUpload, UploadedMedia};
use crate::error::{error_chain_text, truncate_text, EngineError, GenerationFailure, Result};

pub const DEFAULT_LABS_API_BASE: &str = "https://labs.google/fx";
pub const DEFAULT_SANDBOX_API_BASE: &str = "https://aisandbox-pa.googleapis.com/v1";

pub(crate) const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const LABS_ORIGIN: &str = "https://labs.google";
const WHISK_REFERER: &str = "https://labs.google/fx/tools/whisk";
const BOARD_MEDIA_CATEGORY: &str = "MEDIA_CATEGORY_BOARD";
const RECIPE_TOOL: &str = "BACKBONE";
const CAPTION_TIMEOUT_S: u64 = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoints {
    pub labs_api_base: String,
    pub sandbox_api_base: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            labs_api_base: DEFAULT_LABS_API_BASE.to_string(),
            sandbox_api_base: DEFAULT_SANDBOX_API_BASE.to_string(),
        }
    }
}

impl ApiEndpoints {
    pub fn session(&self) -> String {
        format!("{}/api/auth/session", self.labs_api_base)
    }

    fn caption(&self) -> String {
        format!("{}/api/trpc/backbone.captionImage", self.labs_api_base)
    }

    fn upload(&self) -> String {
        format!("{}/api/trpc/backbone.uploadImage", self.labs_api_base)
    }

    fn recipe(&self) -> String {
        format!("{}/whisk:runImageRecipe", self.sandbox_api_base)
    }

    fn generate(&self) -> String {
        format!("{}/whisk:generateImage", self.sandbox_api_base)
    }
}

// Request records.

#[derive(Debug, Serialize)]
struct TrpcEnvelope<T> {
    json: T,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct ClientContext {
    workflow_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool: Option<&'static str>,
    session_id: String,
}

impl ClientContext {
    fn labs(session_id: &str) -> Self {
        Self {
            workflow_id: String::new(),
            tool: None,
            session_id: session_id.to_string(),
        }
    }

    fn generation(session_id: &str) -> Self {
        Self {
            tool: Some(RECIPE_TOOL),
            ..Self::labs(session_id)
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RawMediaInput {
    media_category: &'static str,
    raw_bytes: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CaptionInput {
    candidates_count: u32,
    media_input: RawMediaInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CaptionBody {
    client_context: ClientContext,
    caption_input: CaptionInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadBody {
    client_context: ClientContext,
    upload_media_input: RawMediaInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecipeMediaReference {
    media_category: &'static str,
    media_generation_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecipeMediaInput {
    caption: String,
    media_input: RecipeMediaReference,
}

impl From<&ResolvedReference> for RecipeMediaInput {
    fn from(reference: &ResolvedReference) -> Self {
        Self {
            caption: reference.caption.clone(),
            media_input: RecipeMediaReference {
                media_category: reference.category.media_category(),
                media_generation_id: reference.media_id.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecipeBody {
    client_context: ClientContext,
    image_model_settings: ImageModelSettings,
    user_instruction: String,
    recipe_media_inputs: Vec<RecipeMediaInput>,
    seed: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateImageBody {
    client_context: ClientContext,
    image_model_settings: ImageModelSettings,
    prompt: String,
    media_category: &'static str,
    seed: u32,
}

// Response records. Every level defaults so a missing field reads as "no data".

#[derive(Debug, Default, Deserialize)]
#[serde(default, bound(deserialize = "T: Deserialize<'de> + Default"))]
struct TrpcResponse<T> {
    result: TrpcData<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, bound(deserialize = "T: Deserialize<'de> + Default"))]
struct TrpcData<T> {
    data: TrpcJson<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, bound(deserialize = "T: Deserialize<'de> + Default"))]
struct TrpcJson<T> {
    json: TrpcResult<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, bound(deserialize = "T: Deserialize<'de> + Default"))]
struct TrpcResult<T> {
    result: T,
}

impl<T> TrpcResponse<T> {
    fn into_inner(self) -> T {
        self.result.data.json.result
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CaptionResult {
    candidates: Vec<CaptionCandidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CaptionCandidate {
    output: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct UploadResult {
    upload_media_generation_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GenerationResponse {
    image_panels: Vec<ImagePanel>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ImagePanel {
    generated_images: Vec<EncodedImage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct EncodedImage {
    encoded_image: String,
}

fn caption_body(upload: &ImageUpload<'_>, session_id: &str) -> TrpcEnvelope<CaptionBody> {
    TrpcEnvelope {
        json: CaptionBody {
            client_context: ClientContext::labs(session_id),
            caption_input: CaptionInput {
                candidates_count: 1,
                media_input: RawMediaInput {
                    media_category: upload.category.media_category(),
                    raw_bytes: upload.data_uri(),
                },
            },
        },
    }
}

fn upload_body(upload: &ImageUpload<'_>, session_id: &str) -> TrpcEnvelope<UploadBody> {
    TrpcEnvelope {
        json: UploadBody {
            client_context: ClientContext::labs(session_id),
            upload_media_input: RawMediaInput {
                media_category: upload.category.media_category(),
                raw_bytes: upload.data_uri(),
            },
        },
    }
}

fn recipe_body(request: &GenerateRequest, session_id: &str) -> RecipeBody {
    RecipeBody {
        client_context: ClientContext::generation(session_id),
        image_model_settings: request.settings,
        user_instruction: request.prompt.clone(),
        recipe_media_inputs: request.references.iter().map(RecipeMediaInput::from).collect(),
        seed: request.seed,
    }
}

fn generate_image_body(request: &GenerateRequest, session_id: &str) -> GenerateImageBody {
    GenerateImageBody {
        client_context: ClientContext::generation(session_id),
        image_model_settings: request.settings,
        prompt: request.prompt.clone(),
        media_category: BOARD_MEDIA_CATEGORY,
        seed: request.seed,
    }
}

fn parse_caption(body: &str) -> Option<String> {
    let parsed: TrpcResponse<CaptionResult> = serde_json::from_str(body).ok()?;
    parsed
        .into_inner()
        .candidates
        .into_iter()
        .next()
        .map(|candidate| candidate.output)
}

fn parse_upload(body: &str) -> Result<UploadedMedia> {
    let parsed: TrpcResponse<UploadResult> = serde_json::from_str(body)
        .map_err(|err| EngineError::Upload(format!("invalid JSON payload ({err})")))?;
    parsed
        .into_inner()
        .upload_media_generation_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(|media_id| UploadedMedia { media_id })
        .ok_or_else(|| EngineError::Upload("No media ID".to_string()))
}

fn parse_generated_image(body: &str) -> std::result::Result<GeneratedImage, GenerationFailure> {
    let parsed: GenerationResponse =
        serde_json::from_str(body).map_err(|_| GenerationFailure::NoImageData)?;
    let encoded = parsed
        .image_panels
        .into_iter()
        .next()
        .and_then(|panel| panel.generated_images.into_iter().next())
        .map(|image| image.encoded_image)
        .filter(|value| !value.trim().is_empty())
        .ok_or(GenerationFailure::NoImageData)?;
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|_| GenerationFailure::NoImageData)?;
    Ok(GeneratedImage { bytes })
}

fn session_id() -> String {
    format!(";{}", chrono::Utc::now().timestamp_millis())
}

/// HTTP client for the Whisk endpoints of labs.google and the AI sandbox.
pub struct WhiskService {
    endpoints: ApiEndpoints,
    credentials: Credentials,
    request_timeout: Duration,
    http: HttpClient,
}

impl WhiskService {
    pub fn new(endpoints: ApiEndpoints, credentials: Credentials, request_timeout: Duration) -> Self {
        Self {
            endpoints,
            credentials,
            request_timeout,
            http: HttpClient::new(),
        }
    }

    fn post(&self, endpoint: &str, timeout: Duration) -> RequestBuilder {
        self.http
            .post(endpoint)
            .timeout(timeout)
            .header(AUTHORIZATION, format!("Bearer {}", self.credentials.access_token))
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(ORIGIN, LABS_ORIGIN)
            .header(REFERER, WHISK_REFERER)
            .header(COOKIE, &self.credentials.cookie_header)
    }

    fn read_body(endpoint: &str, response: HttpResponse) -> Result<(u16, String)> {
        let code = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| EngineError::transport(endpoint, err))?;
        Ok((code, body))
    }
}

impl ImageService for WhiskService {
    fn name(&self) -> &str {
        "whisk"
    }

    fn caption(&self, upload: &ImageUpload<'_>) -> Result<String> {
        let endpoint = self.endpoints.caption();
        let response = self
            .post(&endpoint, Duration::from_secs(CAPTION_TIMEOUT_S))
            .json(&caption_body(upload, &session_id()))
            .send()
            .map_err(|err| EngineError::transport(&endpoint, err))?;
        let (code, body) = Self::read_body(&endpoint, response)?;
        if !(200..300).contains(&code) {
            return Err(EngineError::Caption(format!(
                "HTTP {code}: {}",
                truncate_text(&body, 512)
            )));
        }
        Ok(parse_caption(&body).unwrap_or_default())
    }

    fn upload(&self, upload: &ImageUpload<'_>) -> Result<UploadedMedia> {
        let endpoint = self.endpoints.upload();
        let response = self
            .post(&endpoint, self.request_timeout)
            .json(&upload_body(upload, &session_id()))
            .send()
            .map_err(|err| EngineError::transport(&endpoint, err))?;
        let (code, body) = Self::read_body(&endpoint, response)?;
        if !(200..300).contains(&code) {
            tracing::warn!(
                code,
                file = %upload.source.display(),
                body = %truncate_text(&body, 512),
                "reference upload rejected"
            );
            return Err(EngineError::Upload(format!("HTTP {code}")));
        }
        parse_upload(&body)
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage> {
        let session_id = session_id();
        let (endpoint, sent) = if request.references.is_empty() {
            let endpoint = self.endpoints.generate();
            let sent = self
                .post(&endpoint, self.request_timeout)
                .json(&generate_image_body(request, &session_id))
                .send();
            (endpoint, sent)
        } else {
            let endpoint = self.endpoints.recipe();
            let sent = self
                .post(&endpoint, self.request_timeout)
                .json(&recipe_body(request, &session_id))
                .send();
            (endpoint, sent)
        };

        let response = sent.map_err(|err| {
            GenerationFailure::Transport(error_chain_text(&err, 512))
        })?;
        let code = response.status().as_u16();
        if !(200..300).contains(&code) {
            tracing::warn!(code, endpoint = %endpoint, "generation request rejected");
            return Err(GenerationFailure::HttpStatus(code).into());
        }
        let body = response
            .text()
            .map_err(|err| GenerationFailure::Transport(error_chain_text(&err, 512)))?;
        Ok(parse_generated_image(&body)?)
    }
}
