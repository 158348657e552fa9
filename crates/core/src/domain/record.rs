use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use serde::Serialize;

use crate::domain::user::UserId;
use crate::errors::DomainError;

pub const HEADER_TIME: &str = "Time";
pub const HEADER_USER_ID: &str = "User ID";
pub const HEADER_MESSAGES: &str = "Messages";

/// Column headers written to an empty sheet, in row order.
pub const SHEET_HEADER: [&str; 3] = [HEADER_TIME, HEADER_USER_ID, HEADER_MESSAGES];

/// One flush of a user's buffered messages, built at save time and dropped once
/// the sink returns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SaveRecord {
    pub saved_at: DateTime<FixedOffset>,
    pub user_id: UserId,
    messages: Vec<String>,
}

impl SaveRecord {
    pub fn new(
        user_id: UserId,
        messages: Vec<String>,
        saved_at: DateTime<FixedOffset>,
    ) -> Result<Self, DomainError> {
        if messages.is_empty() {
            return Err(DomainError::EmptySaveRecord { user_id: user_id.0 });
        }

        Ok(Self { saved_at, user_id, messages })
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn joined_text(&self) -> String {
        self.messages.join("\n")
    }

    pub fn timestamp_label(&self) -> String {
        locale_timestamp(&self.saved_at)
    }

    /// Cell values in `SHEET_HEADER` order.
    pub fn row(&self) -> [String; 3] {
        [self.timestamp_label(), self.user_id.0.clone(), self.joined_text()]
    }
}

pub fn fixed_offset(minutes: i32) -> Result<FixedOffset, DomainError> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or(DomainError::InvalidUtcOffset { minutes })
}

pub fn now_in(offset: FixedOffset) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&offset)
}

/// Renders `at` the way the zh-TW locale prints a date-time:
/// `2024/1/5 下午3:04:05`.
pub fn locale_timestamp(at: &DateTime<FixedOffset>) -> String {
    let (is_pm, hour) = at.hour12();
    let period = if is_pm { "下午" } else { "上午" };

    format!(
        "{}/{}/{} {period}{hour}:{:02}:{:02}",
        at.year(),
        at.month(),
        at.day(),
        at.minute(),
        at.second()
    )
}
