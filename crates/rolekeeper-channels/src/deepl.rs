//! DeepL translation client.
//!
//! Translation is best effort: the client never surfaces an error to the
//! caller, it substitutes the configured notice text instead. Before each
//! translation the remaining quota is checked so the bot degrades cleanly
//! when the plan is exhausted.

use async_trait::async_trait;
use serde::Deserialize;

use rolekeeper_core::config::TranslateConfig;
use rolekeeper_core::error::{Result, RolekeeperError};
use rolekeeper_core::traits::Translator;

pub struct DeepLClient {
    http: reqwest::Client,
    usage_url: String,
    translate_url: String,
    auth: String,
    source_lang: String,
    target_lang: String,
    message_error: String,
    message_limit: String,
}

#[derive(Debug, Deserialize)]
struct DeepLUsage {
    character_count: u64,
    character_limit: u64,
}

#[derive(Debug, Deserialize)]
struct DeepLTranslations {
    translations: Vec<DeepLTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeepLTranslation {
    text: String,
}

impl DeepLClient {
    pub fn new(config: &TranslateConfig) -> Self {
        let base = config.api_url.trim_end_matches('/');
        Self {
            http: reqwest::Client::new(),
            usage_url: format!("{base}/v2/usage"),
            translate_url: format!("{base}/v2/translate"),
            auth: format!("DeepL-Auth-Key {}", config.token),
            source_lang: config.source_lang.clone(),
            target_lang: config.target_lang.clone(),
            message_error: config.message_error.clone(),
            message_limit: config.message_limit.clone(),
        }
    }

    /// Remaining characters on the current plan.
    async fn remaining_quota(&self) -> Result<u64> {
        let usage: DeepLUsage = self
            .http
            .get(&self.usage_url)
            .header("Authorization", &self.auth)
            .send()
            .await
            .map_err(|e| RolekeeperError::Translate(format!("Usage request failed: {e}")))?
            .json()
            .await
            .map_err(|e| RolekeeperError::Translate(format!("Invalid usage response: {e}")))?;
        Ok(usage.character_limit.saturating_sub(usage.character_count))
    }

    async fn request_translation(&self, text: &str) -> Result<String> {
        let response = self
            .http
            .post(&self.translate_url)
            .header("Authorization", &self.auth)
            .json(&serde_json::json!({
                "text": [text],
                "source_lang": self.source_lang,
                "target_lang": self.target_lang,
            }))
            .send()
            .await
            .map_err(|e| RolekeeperError::Translate(format!("Translate request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RolekeeperError::Translate(format!(
                "Translate request: HTTP {status}"
            )));
        }
        let body: DeepLTranslations = response
            .json()
            .await
            .map_err(|e| RolekeeperError::Translate(format!("Invalid translate response: {e}")))?;
        body.translations
            .into_iter()
            .next()
            .map(|t| t.text)
            .ok_or_else(|| RolekeeperError::Translate("Empty translation list".into()))
    }
}

#[async_trait]
impl Translator for DeepLClient {
    async fn translate(&self, text: &str) -> String {
        match self.remaining_quota().await {
            Ok(remaining) if (text.len() as u64) > remaining => {
                tracing::warn!("Translation quota exhausted ({remaining} characters left)");
                return self.message_limit.clone();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Translation usage check failed: {e}");
                return self.message_error.clone();
            }
        }
        match self.request_translation(text).await {
            Ok(translated) => translated,
            Err(e) => {
                tracing::warn!("Translation failed: {e}");
                self.message_error.clone()
            }
        }
    }
}
