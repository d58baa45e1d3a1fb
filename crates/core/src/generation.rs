use crate::error::ModelError;
use crate::models::GenerationOptions;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ModelError>;
}

pub struct OpenAiChatModel {
    client: Client,
    endpoint: Url,
    api_key: String,
    options: GenerationOptions,
}

impl OpenAiChatModel {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/";

    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        options: GenerationOptions,
    ) -> Result<Self, ModelError> {
        let endpoint = Url::parse(base_url)?.join("v1/chat/completions")?;
        Ok(Self {
            client: Client::new(),
            endpoint,
            api_key: api_key.into(),
            options,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

fn first_answer(response: ChatResponse) -> Result<String, ModelError> {
    response
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .ok_or_else(|| ModelError::InvalidResponse {
            service: "chat completions".to_string(),
            details: "no choice carried message content".to_string(),
        })
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ModelError> {
        let body = ChatRequest {
            model: &self.options.model,
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.api_key.trim())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ModelError::Status {
                service: "chat completions".to_string(),
                status,
                body,
            });
        }

        first_answer(response.json().await?)
    }
}
