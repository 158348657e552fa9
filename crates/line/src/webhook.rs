use linesheet_core::UserId;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineEnvelope {
    pub event_id: String,
    pub event: LineEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineEvent {
    TextMessage(TextMessageEvent),
    Unsupported { event_type: String },
}

impl LineEvent {
    pub fn event_type(&self) -> LineEventType {
        match self {
            Self::TextMessage(_) => LineEventType::TextMessage,
            Self::Unsupported { .. } => LineEventType::Unsupported,
        }
    }

    pub fn reply_token(&self) -> Option<&str> {
        match self {
            Self::TextMessage(event) => Some(&event.reply_token),
            Self::Unsupported { .. } => None,
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::TextMessage(event) => Some(&event.user_id),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LineEventType {
    TextMessage,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextMessageEvent {
    pub user_id: UserId,
    pub reply_token: String,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum WebhookParseError {
    #[error("webhook body is not a valid event batch: {0}")]
    Body(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    events: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    webhook_event_id: Option<String>,
    reply_token: Option<String>,
    source: Option<RawSource>,
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSource {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    message_type: String,
    text: Option<String>,
}

/// Parses a webhook body into envelopes, one per event, in body order.
///
/// Only the outer shape (`{"events": [...]}`) is strict. An individual event
/// that does not match the expected fields is kept as `Unsupported` so it is
/// ignored without failing its siblings.
pub fn parse_webhook(body: &[u8]) -> Result<Vec<LineEnvelope>, WebhookParseError> {
    let body: WebhookBody = serde_json::from_slice(body)?;

    Ok(body
        .events
        .into_iter()
        .enumerate()
        .map(|(index, raw)| classify(index, raw))
        .collect())
}

fn classify(index: usize, raw: Value) -> LineEnvelope {
    let fallback_id = format!("event-{index}");
    let raw = match serde_json::from_value::<RawEvent>(raw) {
        Ok(raw) => raw,
        Err(_) => {
            return LineEnvelope {
                event_id: fallback_id,
                event: LineEvent::Unsupported { event_type: "malformed".to_owned() },
            }
        }
    };

    let event_id = raw.webhook_event_id.clone().unwrap_or(fallback_id);
    LineEnvelope { event_id, event: text_message(raw) }
}

fn text_message(raw: RawEvent) -> LineEvent {
    let unsupported = |event_type: String| LineEvent::Unsupported { event_type };

    if raw.event_type != "message" {
        return unsupported(raw.event_type);
    }
    let Some(message) = raw.message else {
        return unsupported("message".to_owned());
    };
    if message.message_type != "text" {
        return unsupported(format!("message:{}", message.message_type));
    }

    let user_id = raw.source.and_then(|source| source.user_id).filter(|id| !id.is_empty());
    let reply_token = raw.reply_token.filter(|token| !token.is_empty());
    match (user_id, reply_token, message.text) {
        (Some(user_id), Some(reply_token), Some(text)) => {
            LineEvent::TextMessage(TextMessageEvent {
                user_id: UserId::new(user_id),
                reply_token,
                text,
            })
        }
        _ => unsupported("message:text:incomplete".to_owned()),
    }
}
