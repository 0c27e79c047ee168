use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

use crate::core::config::TranslationConfig;
use crate::core::errors::{TranslationError, TranslationResult};

/// External translation capability: one string in, one string out
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(&self, text: &str, source: &str, target: &str)
        -> TranslationResult<String>;
}

/// Client for Google's public `translate_a/single` endpoint
pub struct GoogleTranslateClient {
    http_client: reqwest::Client,
    endpoint: String,
}

impl GoogleTranslateClient {
    pub fn new(config: &TranslationConfig) -> Result<Self> {
        // Create HTTP client with timeout and connection pooling
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
        })
    }
}

/// Language code as the provider expects it
pub fn provider_code(code: &str) -> &str {
    match code {
        "zh" => "zh-CN",
        other => other,
    }
}

/// Concatenate the translated segments of a gtx response.
///
/// The body is a nested array whose first element lists segments as
/// `[translated, original, ...]`.
pub fn parse_response(body: &Value) -> TranslationResult<String> {
    let segments = body
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| TranslationError::InvalidResponse("missing segment list".to_string()))?;

    let translated: String = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect();

    if translated.is_empty() {
        return Err(TranslationError::InvalidResponse(
            "no translated segments".to_string(),
        ));
    }
    Ok(translated)
}

#[async_trait]
impl TranslationProvider for GoogleTranslateClient {
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> TranslationResult<String> {
        let start = Instant::now();

        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&[
                ("client", "gtx"),
                ("sl", provider_code(source)),
                ("tl", provider_code(target)),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslationError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TranslationError::InvalidResponse(e.to_string()))?;
        let translated = parse_response(&body)?;

        debug!(
            "Translated {} → {} in {:.2}ms",
            source,
            target,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_response_concatenates_segments() {
        let body = json!([
            [
                ["Tizón de la hoja. ", "Leaf Blight. ", null, null, 10],
                ["Sano", "Healthy", null, null, 10]
            ],
            null,
            "en"
        ]);
        assert_eq!(parse_response(&body).unwrap(), "Tizón de la hoja. Sano");
    }

    #[test]
    fn test_parse_response_rejects_unexpected_shapes() {
        assert!(matches!(
            parse_response(&json!({"error": "quota"})),
            Err(TranslationError::InvalidResponse(_))
        ));
        assert!(parse_response(&json!([[]])).is_err());
        assert!(parse_response(&json!(null)).is_err());
    }

    #[test]
    fn test_provider_code() {
        assert_eq!(provider_code("zh"), "zh-CN");
        assert_eq!(provider_code("es"), "es");
    }
}
