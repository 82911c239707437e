mod client;
pub(crate) mod schema;
pub(crate) mod types;

pub use schema::StructuredOutput;

use std::time::Duration;

use tracing::debug;

use crate::error::AiError;
use crate::util::strip_code_blocks;
use client::{OpenAiClient, OPENAI_API_URL};

// =============================================================================
// OpenAi
// =============================================================================

/// Client for any endpoint that speaks the OpenAI chat completions protocol
/// (OpenAI itself, SiliconFlow, vLLM, ...).
#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    model: String,
    base_url: String,
    temperature: Option<f32>,
    http: reqwest::Client,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_API_URL.to_string(),
            temperature: Some(0.0),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// `None` omits the field, for models that reject an explicit temperature.
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Apply a whole-request deadline to every call made through this client.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, AiError> {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn client(&self) -> OpenAiClient {
        OpenAiClient::new(&self.api_key, &self.base_url, self.http.clone())
    }

    pub(crate) fn structured_request<T: StructuredOutput>(
        &self,
        system_prompt: String,
        user_prompt: String,
    ) -> types::StructuredRequest {
        types::StructuredRequest {
            model: self.model.clone(),
            messages: vec![
                types::WireMessage::system(system_prompt),
                types::WireMessage::user(user_prompt),
            ],
            temperature: self.temperature,
            response_format: types::ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: types::JsonSchemaFormat {
                    name: T::type_name(),
                    strict: true,
                    schema: T::openai_schema(),
                },
            },
        }
    }

    /// Type-safe structured output extraction.
    ///
    /// The reply is expected to be a JSON document matching `T`'s schema; a
    /// surrounding markdown fence is tolerated.
    pub async fn extract<T: StructuredOutput>(
        &self,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Result<T, AiError> {
        let request = self.structured_request::<T>(system_prompt.into(), user_prompt.into());

        let content = self.client().structured_output(&request).await?;
        let json_str = strip_code_blocks(&content);

        debug!(model = %self.model, bytes = json_str.len(), "structured output received");

        serde_json::from_str(json_str)
            .map_err(|e| AiError::Parse(format!("failed to deserialize response: {e}")))
    }
}
