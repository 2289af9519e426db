//! Slack notification hook, fired after a `request_submitted` event is
//! published. Failure here must never roll back the publish -- the event is
//! already durably recorded by the time this runs.

use crate::config::SlackConfig;
use outbox_core::models::OutboxEvent;
use serde_json::{json, Value};

const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

fn format_message(event: &OutboxEvent, channel: &str) -> Value {
    let payload: Value = serde_json::from_str(&event.payload).unwrap_or(Value::Null);
    let title = payload.get("title").and_then(Value::as_str).unwrap_or("New Request");
    let requester = payload.get("requester").and_then(Value::as_str).unwrap_or("Unknown");
    let description = payload.get("description").and_then(Value::as_str).unwrap_or("");

    let mut blocks = vec![
        json!({
            "type": "header",
            "text": { "type": "plain_text", "text": format!("New Request Submitted: {title}") },
        }),
        json!({
            "type": "section",
            "fields": [
                { "type": "mrkdwn", "text": format!("*Requester:*\n{requester}") },
                { "type": "mrkdwn", "text": format!("*Event ID:*\n{}", event.id) },
            ],
        }),
    ];

    if !description.is_empty() {
        blocks.push(json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": format!("*Description:*\n{description}") },
        }));
    }

    json!({
        "channel": channel,
        "text": format!("New request submitted: {title}"),
        "blocks": blocks,
    })
}

/// Send a Slack notification for a `request_submitted` event. Returns
/// `false` (and logs) on any failure rather than propagating an error,
/// since the caller must not treat this as publish failure.
pub async fn send_slack_notification(event: &OutboxEvent, config: &SlackConfig, client: &reqwest::Client) -> bool {
    if config.bot_token.is_empty() {
        tracing::warn!("slack_bot_token_not_configured");
        return false;
    }

    let message = format_message(event, &config.default_channel);

    let response = client
        .post(SLACK_POST_MESSAGE_URL)
        .bearer_auth(&config.bot_token)
        .header("Content-Type", "application/json")
        .json(&message)
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await;

    match response {
        Ok(resp) => match resp.json::<Value>().await {
            Ok(body) if body.get("ok").and_then(Value::as_bool).unwrap_or(false) => {
                tracing::info!(event_id = %event.id, channel = %config.default_channel, "slack_notification_sent");
                true
            }
            Ok(body) => {
                tracing::error!(event_id = %event.id, error = ?body.get("error"), "slack_api_error");
                false
            }
            Err(err) => {
                tracing::error!(event_id = %event.id, error = %err, "slack_response_decode_error");
                false
            }
        },
        Err(err) => {
            tracing::error!(event_id = %event.id, error = %err, "slack_request_error");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_core::models::EventType;
    use serde_json::json;

    #[test]
    fn format_message_falls_back_to_defaults_on_missing_fields() {
        let event = OutboxEvent {
            id: uuid::Uuid::new_v4(),
            event_type: EventType::RequestSubmitted,
            payload: "{}".to_string(),
            created_at: chrono::Utc::now(),
        };
        let msg = format_message(&event, "#integrations");
        assert_eq!(msg["channel"], json!("#integrations"));
        assert_eq!(msg["text"], json!("New request submitted: New Request"));
    }

    #[test]
    fn format_message_includes_description_block_when_present() {
        let event = OutboxEvent {
            id: uuid::Uuid::new_v4(),
            event_type: EventType::RequestSubmitted,
            payload: r#"{"title":"Laptop","requester":"alice","description":"needs a new one"}"#.to_string(),
            created_at: chrono::Utc::now(),
        };
        let msg = format_message(&event, "#integrations");
        let blocks = msg["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 3);
    }
}
