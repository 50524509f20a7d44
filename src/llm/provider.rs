use anyhow::{anyhow, bail, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::config::ApiConfig;

/// Longest edge, in pixels, of the image sent to the vision API.
pub const MAX_IMAGE_DIMENSION: u32 = 1024;

const JPEG_QUALITY: u8 = 85;

/// Trait for vision services that can describe images
pub trait DescriptionProvider: Send + Sync {
    /// Describe the image at `image_path`. Blank output counts as failure.
    fn describe_image(&self, image_path: &Path) -> Result<String>;

    /// Get the provider name for display
    fn provider_name(&self) -> &'static str;
}

// ============================================================================
// OpenAI-compatible chat-completions provider (Moonshot by default)
// ============================================================================

pub struct ChatCompletionsProvider {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsProvider {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            endpoint: config.effective_endpoint().to_string(),
            model: config.model.clone(),
            api_key: config.api_key().map(str::to_string),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request(&self, data_url: String) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                    ContentPart::Text {
                        text: image_prompt().to_string(),
                    },
                ],
            }],
            max_tokens: 500,
            temperature: 0.3,
        }
    }
}

impl DescriptionProvider for ChatCompletionsProvider {
    fn describe_image(&self, image_path: &Path) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("No API key configured");
        };

        let (base64_image, mime_type) = load_and_encode_image(image_path, MAX_IMAGE_DIMENSION)?;
        let data_url = format!("data:{};base64,{}", mime_type, base64_image);
        let request = self.build_request(data_url);

        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();

        debug!(endpoint = %self.endpoint, model = %self.model, path = %image_path.display(), "Requesting description");
        let response = agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .set("Authorization", &format!("Bearer {}", api_key))
            .send_json(&request)
            .map_err(|e| anyhow!("Vision API request failed: {}", e))?;

        let chat_response: ChatResponse = response
            .into_json()
            .map_err(|e| anyhow!("Failed to parse vision API response: {}", e))?;

        extract_description(chat_response)
    }

    fn provider_name(&self) -> &'static str {
        "Chat completions"
    }
}

fn extract_description(response: ChatResponse) -> Result<String> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| anyhow!("No description in vision API response"))?;

    let content = content.trim();
    if content.is_empty() {
        bail!("Vision API returned an empty description");
    }
    Ok(content.to_string())
}

/// Load an image, downscale it to `max_dimension` on the long edge and
/// re-encode it as base64 JPEG.
fn load_and_encode_image(image_path: &Path, max_dimension: u32) -> Result<(String, &'static str)> {
    let img = image::open(image_path)
        .map_err(|e| anyhow!("Failed to open image {}: {}", image_path.display(), e))?;

    let (width, height) = img.dimensions();
    let img = if width > max_dimension || height > max_dimension {
        img.resize(
            max_dimension,
            max_dimension,
            image::imageops::FilterType::Triangle,
        )
    } else {
        img
    };

    // JPEG has no alpha channel
    let img = image::DynamicImage::ImageRgb8(img.to_rgb8());

    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    img.write_with_encoder(encoder)
        .map_err(|e| anyhow!("Failed to encode image as JPEG: {}", e))?;

    let base64_image = BASE64.encode(buf.into_inner());
    Ok((base64_image, "image/jpeg"))
}

fn image_prompt() -> &'static str {
    "Describe this photo in a few sentences. Mention the main subject, the setting, \
     notable objects or people, and the overall mood. Reply with the description only."
}

/// Create the configured description provider.
pub fn create_provider(config: &ApiConfig) -> Box<dyn DescriptionProvider> {
    Box::new(ChatCompletionsProvider::new(config))
}
