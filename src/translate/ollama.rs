use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::config::TranslatorConfig;
use crate::error::{Result, StageError, SubflowError};
use super::Translator;
use super::common::{TranslationRequest, TranslationResponse, build_translation_prompt, clean_translation_response};

/// Translates one line per request against Ollama's `/api/generate`
pub struct OllamaTranslator {
    client: Client,
    config: TranslatorConfig,
}

impl OllamaTranslator {
    pub fn new(config: TranslatorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }
}

fn classify_request_error(err: reqwest::Error) -> StageError {
    if err.is_timeout() || err.is_connect() {
        StageError::transient(format!("Translation service unavailable: {}", err))
    } else {
        StageError::logic(format!("HTTP request failed: {}", err))
    }
}

fn classify_status(status: StatusCode, body: &str) -> StageError {
    let message = format!("Ollama API error {}: {}", status, body);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        StageError::transient(message)
    } else if status == StatusCode::NOT_FOUND {
        // Model not pulled
        StageError::resource(message)
    } else {
        StageError::logic(message)
    }
}

#[async_trait]
impl Translator for OllamaTranslator {
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
        context: &str,
    ) -> std::result::Result<String, StageError> {
        let request = TranslationRequest {
            model: self.config.model.clone(),
            prompt: build_translation_prompt(text, source_language, target_language, context),
            stream: false,
            format: "json".to_string(),
        };

        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));
        debug!("Sending translation request to: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(classify_request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text));
        }

        let translation_response: TranslationResponse = response
            .json()
            .await
            .map_err(|e| StageError::transient(format!("Failed to parse response: {}", e)))?;

        let raw_response = translation_response.response.trim();
        debug!("Raw Ollama response: {}", raw_response);

        if raw_response.is_empty() {
            return Err(StageError::transient("Empty translation received"));
        }

        Ok(clean_translation_response(raw_response))
    }

    async fn check_availability(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.config.endpoint.trim_end_matches('/'));
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(SubflowError::Config(format!(
                "Ollama is not available at {}",
                self.config.endpoint
            )));
        }

        let body: serde_json::Value = response.json().await?;
        let has_model = body["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str())
                    .any(|name| name == self.config.model || name.starts_with(&format!("{}:", self.config.model)))
            })
            .unwrap_or(false);

        if has_model {
            Ok(())
        } else {
            Err(SubflowError::Config(format!(
                "Model '{}' not found in Ollama. Pull it with: ollama pull {}",
                self.config.model, self.config.model
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").kind, ErrorKind::Transient);
        assert_eq!(classify_status(StatusCode::NOT_FOUND, "model").kind, ErrorKind::Resource);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST, "").kind, ErrorKind::Logic);
    }
}
