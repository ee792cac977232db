use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use crate::config::Config;
use crate::generator::GenerationError;

const IMAGE_SIZE: &str = "1024x1024";
const IMAGE_QUALITY: &str = "standard";

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Option<Vec<ImageData>>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

/// What the images endpoint handed back for the single requested image.
#[derive(Debug, Clone, PartialEq)]
pub enum ImagePayload {
    Url(Url),
    Base64(String),
}

/// Thin client for an OpenAI-compatible `/images/generations` endpoint.
/// No timeout and no retry: whatever the transport does is what the caller gets.
#[derive(Clone, Debug)]
pub struct ImageApiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ImageApiClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            model,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
            config.openai_model.clone(),
        )
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub async fn generate(&self, prompt: &str) -> Result<ImagePayload, GenerationError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "size": IMAGE_SIZE,
            "quality": IMAGE_QUALITY,
            "n": 1,
        });
        debug!(model = %self.model, "Requesting image generation");

        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = assert_ok_response(response).await?;
        let payload: ImagesResponse = response.json().await?;

        if let Some(message) = payload.error.and_then(|err| err.message) {
            return Err(GenerationError::Api {
                status: 200,
                message,
            });
        }
        let image = payload
            .data
            .and_then(|data| data.into_iter().next())
            .ok_or_else(|| GenerationError::InvalidResponse("no image in response".to_string()))?;

        match (image.url, image.b64_json) {
            (Some(raw), _) => {
                let url = validate_image_url(&raw)?;
                info!(url = %url, "Image generated");
                Ok(ImagePayload::Url(url))
            }
            (None, Some(encoded)) => {
                info!("Image generated inline");
                Ok(ImagePayload::Base64(encoded))
            }
            (None, None) => Err(GenerationError::InvalidResponse(
                "image has neither url nor b64_json".to_string(),
            )),
        }
    }

    pub async fn download(&self, url: &Url) -> Result<Vec<u8>, GenerationError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Download(format!("HTTP {status} from {url}")));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

async fn assert_ok_response(
    response: reqwest::Response,
) -> Result<reqwest::Response, GenerationError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&text)
        .ok()
        .and_then(|envelope| envelope.error)
        .and_then(|err| err.message)
        .unwrap_or(text);
    Err(GenerationError::Api {
        status: status.as_u16(),
        message,
    })
}

fn validate_image_url(raw: &str) -> Result<Url, GenerationError> {
    let parsed = Url::parse(raw.trim())
        .map_err(|err| GenerationError::InvalidResponse(format!("bad image url: {err}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(GenerationError::InvalidResponse(format!(
            "unsupported image url scheme: {scheme}"
        ))),
    }
}
