use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;

use concierge_core::config::{EmbeddingConfig, LlmConfig};

use crate::llm::{
    Completion, CompletionProvider, CompletionRequest, EmbeddingProvider, ProviderError,
    TokenUsage,
};

/// Client for any `/v1/chat/completions` + `/v1/embeddings` server
/// (OpenAI itself, Ollama, vLLM, ...).
#[derive(Clone, Debug)]
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    base_url: String,
    chat_model: String,
    embedding_model: String,
    dimensions: usize,
    timeout_secs: u64,
}

impl OpenAiCompatibleClient {
    pub fn from_config(llm: &LlmConfig, embedding: &EmbeddingConfig) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &llm.api_key {
            let bearer = format!("Bearer {}", api_key.expose_secret().trim());
            let mut value = HeaderValue::from_str(&bearer).map_err(|e| {
                ProviderError::InvalidResponse(format!("invalid API key header: {e}"))
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(llm.timeout_secs.max(1)))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("could not build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: llm.resolved_base_url(),
            chat_model: llm.model.clone(),
            embedding_model: embedding.model.clone(),
            dimensions: embedding.dimensions,
            timeout_secs: llm.timeout_secs,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!("{path} returned HTTP {status}")));
        }

        response.json::<T>().await.map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    fn transport_error(&self, error: reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout(self.timeout_secs)
        } else {
            ProviderError::Unavailable(error.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

fn into_completion(response: ChatCompletionResponse) -> Result<Completion, ProviderError> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ProviderError::InvalidResponse("completion had no content".to_string()))?;

    Ok(Completion {
        text: text.trim().to_string(),
        usage: response.usage.map(|usage| TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        }),
        model: response.model,
    })
}

fn into_embedding(response: EmbeddingResponse, dimensions: usize) -> Result<Vec<f32>, ProviderError> {
    let embedding = response
        .data
        .into_iter()
        .next()
        .map(|datum| datum.embedding)
        .ok_or_else(|| ProviderError::InvalidResponse("embedding response was empty".to_string()))?;

    if embedding.len() != dimensions {
        return Err(ProviderError::InvalidResponse(format!(
            "expected {dimensions} dimensions, received {}",
            embedding.len()
        )));
    }
    Ok(embedding)
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(json!({ "role": "system", "content": request.system_prompt }));
        messages.extend(
            request
                .messages
                .iter()
                .map(|message| json!({ "role": message.role.as_str(), "content": message.content })),
        );

        let body = json!({
            "model": self.chat_model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let response: ChatCompletionResponse = self.post("chat/completions", body).await?;
        into_completion(response)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatibleClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = json!({ "model": self.embedding_model, "input": text });
        let response: EmbeddingResponse = self.post("embeddings", body).await?;
        into_embedding(response, self.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
