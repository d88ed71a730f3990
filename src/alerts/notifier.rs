//! Delivery of rendered alerts

use std::collections::HashMap;

use super::config::NotifyTarget;

/// Notifier for sending alert notifications
pub struct Notifier {
    client: reqwest::Client,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Send to every target. Failures are collected, not retried.
    pub async fn notify(
        &self,
        targets: &[NotifyTarget],
        title: &str,
        message: &str,
    ) -> Result<(), NotifierError> {
        let mut errors = Vec::new();

        for target in targets {
            if let Err(e) = self.notify_target(target, title, message).await {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(NotifierError::Multiple(errors))
        }
    }

    async fn notify_target(
        &self,
        target: &NotifyTarget,
        title: &str,
        message: &str,
    ) -> Result<(), NotifierError> {
        match target {
            NotifyTarget::Log => {
                tracing::warn!(title = %title, "Alert triggered:\n{}", message);
                Ok(())
            }
            NotifyTarget::Webhook { url, headers } => {
                self.send_webhook(url, headers, title, message).await
            }
        }
    }

    async fn send_webhook(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        title: &str,
        message: &str,
    ) -> Result<(), NotifierError> {
        let payload = serde_json::json!({
            "title": title,
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let mut request = self.client.post(url).json(&payload);

        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            NotifierError::Webhook(format!("Failed to send webhook: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(NotifierError::Webhook(format!(
                "Webhook returned status {}",
                response.status()
            )));
        }

        tracing::debug!(url = %url, "Webhook notification sent");

        Ok(())
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Multiple notification failures: {0:?}")]
    Multiple(Vec<NotifierError>),
}
