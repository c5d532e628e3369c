//! Text translation with a process-wide LRU memoization table

use crate::error::{PerceptionError, Result};
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use reqwest::Client;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Black-box text translator
#[async_trait]
pub trait Translator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;
}

/// Client for the public `translate_a/single` endpoint
pub struct GoogleTranslator {
    client: Client,
    base_url: String,
}

impl GoogleTranslator {
    pub const DEFAULT_BASE_URL: &'static str = "https://translate.googleapis.com";

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn request_url(&self, text: &str, source_lang: &str, target_lang: &str) -> String {
        format!(
            "{}/translate_a/single?client=gtx&sl={}&tl={}&dt=t&q={}",
            self.base_url,
            urlencoding::encode(source_lang),
            urlencoding::encode(target_lang),
            urlencoding::encode(text)
        )
    }

    /// Concatenates the translated segments found at `[0][i][0]`
    fn parse_response(json: &serde_json::Value) -> Result<String> {
        let segments = json
            .get(0)
            .and_then(|s| s.as_array())
            .ok_or_else(|| PerceptionError::Translation("unexpected response shape".to_string()))?;

        Ok(segments
            .iter()
            .filter_map(|segment| segment.get(0).and_then(|s| s.as_str()))
            .collect())
    }
}

#[async_trait]
impl Translator for GoogleTranslator {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        if !self.base_url.starts_with("https://") && !self.base_url.starts_with("http://") {
            return Err(PerceptionError::Translation("invalid base URL".to_string()));
        }

        let response = self
            .client
            .get(self.request_url(text, source_lang, target_lang))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PerceptionError::Translation(format!("HTTP {}: {}", status, body)));
        }

        let json: serde_json::Value = response.json().await?;
        Self::parse_response(&json)
    }
}

/// Memoizing front for a `Translator`, keyed by `(text, target_lang)`.
///
/// Two tasks missing on the same key at once may both call the translator;
/// the later result wins.
pub struct TranslationCache {
    translator: Arc<dyn Translator>,
    default_language: String,
    entries: Mutex<LruCache<(String, String), String>>,
}

impl TranslationCache {
    pub fn new(translator: Arc<dyn Translator>, default_language: impl Into<String>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            translator,
            default_language: default_language.into(),
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Translate, falling back to `text` on any failure
    pub async fn translate(&self, text: &str, target_lang: &str) -> String {
        match self.try_translate(text, target_lang).await {
            Ok(translated) => translated,
            Err(e) => {
                warn!("Translation to '{}' failed, using original text: {}", target_lang, e);
                text.to_string()
            }
        }
    }

    /// Translate and surface translator failures. Failures are not cached.
    pub async fn try_translate(&self, text: &str, target_lang: &str) -> Result<String> {
        let target = target_lang.trim();
        if text.is_empty() || target.is_empty() || target == self.default_language {
            return Ok(text.to_string());
        }

        let key = (text.to_string(), target.to_string());
        let cached = self.entries.lock().get(&key).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }

        debug!("Translation cache miss for '{}' -> {}", text, target);
        let translated = self
            .translator
            .translate(text, &self.default_language, target)
            .await?;
        let translated = if translated.trim().is_empty() {
            text.to_string()
        } else {
            translated
        };

        self.entries.lock().put(key, translated.clone());
        Ok(translated)
    }
}
