use serde::Serialize;

/// Message object accepted by the reply API. Only text is ever sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text { text: String },
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest<'a> {
    pub reply_token: &'a str,
    pub messages: &'a [OutboundMessage],
}

pub fn nothing_to_save_message() -> OutboundMessage {
    OutboundMessage::text("目前沒有訊息可以儲存！")
}

pub fn saved_message(count: usize) -> OutboundMessage {
    OutboundMessage::text(format!("已成功儲存 {count} 則訊息到 Google Sheets！"))
}

pub fn save_failed_message() -> OutboundMessage {
    OutboundMessage::text("儲存失敗，請稍後再試！")
}

pub fn accumulated_message(count: usize, save_command: &str) -> OutboundMessage {
    OutboundMessage::text(format!(
        "訊息已累積 ({count})\n輸入 {save_command} 來儲存到 Google Sheets"
    ))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{accumulated_message, saved_message, OutboundMessage, ReplyRequest};

    #[test]
    fn accumulated_message_names_count_and_configured_command() {
        assert_eq!(
            accumulated_message(2, "/save").as_text(),
            "訊息已累積 (2)\n輸入 /save 來儲存到 Google Sheets"
        );
        assert!(accumulated_message(1, "!store").as_text().contains("輸入 !store 來儲存"));
    }

    #[test]
    fn saved_message_reports_count() {
        assert_eq!(saved_message(3).as_text(), "已成功儲存 3 則訊息到 Google Sheets！");
    }

    #[test]
    fn reply_request_serializes_to_reply_api_shape() {
        let messages = [OutboundMessage::text("hi")];
        let request = ReplyRequest { reply_token: "r1", messages: &messages };

        assert_eq!(
            serde_json::to_value(&request).expect("json"),
            json!({ "replyToken": "r1", "messages": [{ "type": "text", "text": "hi" }] })
        );
    }
}
