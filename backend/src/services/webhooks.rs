use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Event emitted after the dispatcher has written a switch state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
    pub rule_id: i32,
    pub switch_name: String,
    pub state: String,
    pub occurred_at: NaiveDateTime,
}

impl WebhookEvent {
    pub fn rule_triggered(
        rule_id: i32,
        switch_name: &str,
        state: &str,
        occurred_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: "rule_triggered".to_string(),
            rule_id,
            switch_name: switch_name.to_string(),
            state: state.to_string(),
            occurred_at,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WebhookError {
    DeliveryFailed(String),
}

impl std::fmt::Display for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookError::DeliveryFailed(msg) => write!(f, "Webhook delivery failed: {}", msg),
        }
    }
}

impl std::error::Error for WebhookError {}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn notify(&self, event: &WebhookEvent) -> Result<(), WebhookError>;
}

/// Posts events to a single configured endpoint with an optional bearer
/// token.
pub struct HttpWebhookSender {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new(endpoint: String, token: Option<String>) -> Self {
        Self {
            endpoint,
            token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn notify(&self, event: &WebhookEvent) -> Result<(), WebhookError> {
        let mut request = self.client.post(&self.endpoint).json(event);

        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        request
            .send()
            .await
            .map_err(|e| WebhookError::DeliveryFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| WebhookError::DeliveryFailed(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn event() -> WebhookEvent {
        WebhookEvent::rule_triggered(
            4,
            "lamp1",
            "ON",
            NaiveDate::from_ymd_opt(2026, 1, 15)
                .unwrap()
                .and_hms_opt(18, 0, 0)
                .unwrap(),
        )
    }

    #[test]
    fn test_event_serializes_with_all_fields() {
        let json = serde_json::to_value(event()).unwrap();
        assert_eq!(json["event_type"], "rule_triggered");
        assert_eq!(json["rule_id"], 4);
        assert_eq!(json["switch_name"], "lamp1");
        assert_eq!(json["state"], "ON");
        assert!(!json["id"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_events_get_unique_ids() {
        assert_ne!(event().id, event().id);
    }

    #[test]
    fn test_webhook_error_display() {
        let err = WebhookError::DeliveryFailed("connection refused".to_string());
        assert!(err.to_string().contains("delivery failed"));
    }
}
