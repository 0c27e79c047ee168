// Translation service: applies label translation to prediction results, never failing the request

use anyhow::Result;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::api_client::{GoogleTranslateClient, TranslationProvider};
use super::cache::TranslationCache;
use super::catalog;
use crate::core::config::TranslationConfig;
use crate::core::errors::{TranslationError, TranslationResult};
use crate::core::types::{PredictionItem, PredictionResult};
use crate::utils::Metrics;

pub struct TranslationService {
    provider: Option<Arc<dyn TranslationProvider>>,
    cache: TranslationCache,
    default_language: String,
    metrics: Metrics,
}

impl TranslationService {
    pub fn new(
        provider: Option<Arc<dyn TranslationProvider>>,
        cache: TranslationCache,
        default_language: impl Into<String>,
        metrics: Metrics,
    ) -> Self {
        Self {
            provider,
            cache,
            default_language: default_language.into(),
            metrics,
        }
    }

    /// Build the service from configuration; a disabled provider still yields a usable service
    pub fn from_config(config: &TranslationConfig, metrics: Metrics) -> Result<Self> {
        let provider: Option<Arc<dyn TranslationProvider>> = if config.enabled {
            info!("✓ Translation enabled via {}", config.endpoint);
            Some(Arc::new(GoogleTranslateClient::new(config)?))
        } else {
            info!("Translation disabled, labels are returned untranslated");
            None
        };

        let cache = TranslationCache::new(config.cache_size, Some(metrics.clone()));
        Ok(Self::new(
            provider,
            cache,
            config.default_language.clone(),
            metrics,
        ))
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Static catalog, never touches the provider
    pub fn supported_languages(&self) -> &'static BTreeMap<&'static str, &'static str> {
        catalog::languages()
    }

    /// Translate one string, surfacing provider errors
    pub async fn try_translate(
        &self,
        text: &str,
        target: &str,
        source: &str,
    ) -> TranslationResult<String> {
        // Labels are authored in the default language, so it is never a translation target
        if target == source || target == self.default_language || text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let provider = self.provider.as_ref().ok_or(TranslationError::Disabled)?;

        let key = TranslationCache::generate_key(source, target, text);
        if let Some(cached) = self.cache.get(key) {
            return Ok(cached);
        }

        if !catalog::is_supported(target) {
            debug!("Target language '{}' is not in the catalog, asking provider anyway", target);
        }

        let result = provider.translate(text, source, target).await;
        self.metrics.record_translation(result.is_ok());

        let translated = result?;
        self.cache.put(key, translated.clone());
        Ok(translated)
    }

    /// Translate one string; on any failure, log and return the original
    pub async fn translate_text(&self, text: &str, target: &str, source: &str) -> String {
        match self.try_translate(text, target, source).await {
            Ok(translated) => translated,
            Err(TranslationError::Disabled) => {
                debug!("Translation disabled, keeping '{}'", text);
                text.to_string()
            }
            Err(e) => {
                warn!("Translation of '{}' to {} failed, keeping original: {}", text, target, e);
                text.to_string()
            }
        }
    }

    /// Translate `disease` and every prediction's class name.
    ///
    /// Returns `result` unchanged when `target_lang` is the default language.
    /// Each distinct label is translated once; failures keep that label's original text.
    #[instrument(skip(self, result), fields(predictions = result.all_predictions.len()))]
    pub async fn translate_response(
        &self,
        result: PredictionResult,
        target_lang: &str,
    ) -> PredictionResult {
        let source = self.default_language.as_str();
        if target_lang == source {
            return result;
        }

        let mut labels: Vec<String> = Vec::with_capacity(result.all_predictions.len() + 1);
        for label in std::iter::once(&result.disease)
            .chain(result.all_predictions.iter().map(|p| &p.class_name))
        {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }

        let translated = join_all(
            labels
                .iter()
                .map(|label| self.translate_text(label, target_lang, source)),
        )
        .await;
        let lookup: HashMap<String, String> = labels.into_iter().zip(translated).collect();
        let translate = |label: &String| lookup.get(label).cloned().unwrap_or_else(|| label.clone());

        PredictionResult {
            disease: translate(&result.disease),
            confidence: result.confidence,
            all_predictions: result
                .all_predictions
                .iter()
                .map(|item| PredictionItem {
                    class_name: translate(&item.class_name),
                    confidence: item.confidence,
                })
                .collect(),
            annotated_image: result.annotated_image,
        }
    }
}
