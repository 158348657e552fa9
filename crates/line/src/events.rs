use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::FixedOffset;
use linesheet_core::domain::record::now_in;
use linesheet_core::{DomainError, MessageBuffer, SaveRecord, SpreadsheetSink};
use thiserror::Error;
use tracing::{info, warn};

use crate::messages::{
    accumulated_message, nothing_to_save_message, save_failed_message, saved_message,
    OutboundMessage,
};
use crate::webhook::{LineEnvelope, LineEvent, LineEventType, TextMessageEvent};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(OutboundMessage),
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Domain(#[from] DomainError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> LineEventType;
    async fn handle(
        &self,
        envelope: &LineEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

/// Routes each envelope to the handler registered for its event type. Event
/// types nobody registered for come back as `Ignored`.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<LineEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &LineEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

pub fn default_dispatcher(
    buffer: Arc<MessageBuffer>,
    sink: Arc<dyn SpreadsheetSink>,
    save_command: impl Into<String>,
    utc_offset: FixedOffset,
) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(TextMessageHandler::new(buffer, sink, save_command, utc_offset));
    dispatcher
}

/// Accumulates text messages per user and flushes them to the sink when the
/// user sends the save command.
pub struct TextMessageHandler {
    buffer: Arc<MessageBuffer>,
    sink: Arc<dyn SpreadsheetSink>,
    save_command: String,
    utc_offset: FixedOffset,
}

impl TextMessageHandler {
    pub fn new(
        buffer: Arc<MessageBuffer>,
        sink: Arc<dyn SpreadsheetSink>,
        save_command: impl Into<String>,
        utc_offset: FixedOffset,
    ) -> Self {
        Self { buffer, sink, save_command: save_command.into(), utc_offset }
    }

    /// Exact, case-sensitive comparison; surrounding whitespace is significant.
    pub fn is_save_command(&self, text: &str) -> bool {
        text == self.save_command
    }

    async fn accumulate(&self, event: &TextMessageEvent, ctx: &EventContext) -> HandlerResult {
        let count = self.buffer.append(&event.user_id, event.text.as_str()).await;
        info!(
            event_name = "dispatch.message.accumulated",
            correlation_id = %ctx.correlation_id,
            user_id = %event.user_id,
            pending = count,
            "buffered text message"
        );
        HandlerResult::Responded(accumulated_message(count, &self.save_command))
    }

    async fn save(
        &self,
        event: &TextMessageEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let messages = self.buffer.drain(&event.user_id).await;
        if messages.is_empty() {
            info!(
                event_name = "dispatch.save.empty",
                correlation_id = %ctx.correlation_id,
                user_id = %event.user_id,
                "save requested with nothing buffered"
            );
            return Ok(HandlerResult::Responded(nothing_to_save_message()));
        }

        let record = SaveRecord::new(event.user_id.clone(), messages, now_in(self.utc_offset))?;
        let count = record.message_count();
        match self.sink.save(&record).await {
            Ok(()) => {
                self.buffer.clear(&event.user_id).await;
                info!(
                    event_name = "dispatch.save.completed",
                    correlation_id = %ctx.correlation_id,
                    user_id = %event.user_id,
                    message_count = count,
                    "saved buffered messages"
                );
                Ok(HandlerResult::Responded(saved_message(count)))
            }
            Err(error) => {
                warn!(
                    event_name = "dispatch.save.failed",
                    correlation_id = %ctx.correlation_id,
                    user_id = %event.user_id,
                    message_count = count,
                    stage = error.stage.as_str(),
                    error = %error,
                    "save failed; buffered messages kept for retry"
                );
                Ok(HandlerResult::Responded(save_failed_message()))
            }
        }
    }
}

#[async_trait]
impl EventHandler for TextMessageHandler {
    fn event_type(&self) -> LineEventType {
        LineEventType::TextMessage
    }

    async fn handle(
        &self,
        envelope: &LineEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let LineEvent::TextMessage(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        // Held across the sink call so an event for the same user from another
        // webhook request cannot append between drain and clear.
        let _guard = self.buffer.lock_user(&event.user_id).await;
        if self.is_save_command(&event.text) {
            self.save(event, ctx).await
        } else {
            Ok(self.accumulate(event, ctx).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::FixedOffset;
    use linesheet_core::sink::{MemorySink, SinkError, SinkStage, SpreadsheetSink};
    use linesheet_core::{MessageBuffer, SaveRecord, UserId};
    use tokio::sync::Notify;

    use super::{
        default_dispatcher, EventContext, EventDispatcher, HandlerResult, TextMessageHandler,
    };
    use crate::webhook::{LineEnvelope, LineEvent, TextMessageEvent};

    fn taipei() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).expect("offset")
    }

    fn text(user: &str, body: &str) -> LineEnvelope {
        LineEnvelope {
            event_id: format!("evt-{user}-{body}"),
            event: LineEvent::TextMessage(TextMessageEvent {
                user_id: UserId::new(user),
                reply_token: format!("r-{user}"),
                text: body.to_owned(),
            }),
        }
    }

    fn reply(result: HandlerResult) -> String {
        match result {
            HandlerResult::Responded(message) => message.as_text().to_owned(),
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    struct Fixture {
        buffer: Arc<MessageBuffer>,
        sink: Arc<MemorySink>,
        dispatcher: EventDispatcher,
    }

    fn fixture() -> Fixture {
        let buffer = Arc::new(MessageBuffer::new());
        let sink = Arc::new(MemorySink::new());
        let dispatcher = default_dispatcher(Arc::clone(&buffer), sink.clone(), "/save", taipei());
        Fixture { buffer, sink, dispatcher }
    }

    async fn send(fixture: &Fixture, envelope: LineEnvelope) -> HandlerResult {
        fixture.dispatcher.dispatch(&envelope, &EventContext::default()).await.expect("dispatch")
    }

    #[tokio::test]
    async fn accumulate_then_save_writes_one_joined_row_and_clears() {
        let fixture = fixture();

        assert_eq!(
            reply(send(&fixture, text("U1", "a")).await),
            "訊息已累積 (1)\n輸入 /save 來儲存到 Google Sheets"
        );
        assert_eq!(
            reply(send(&fixture, text("U1", "b")).await),
            "訊息已累積 (2)\n輸入 /save 來儲存到 Google Sheets"
        );
        assert_eq!(
            reply(send(&fixture, text("U1", "/save")).await),
            "已成功儲存 2 則訊息到 Google Sheets！"
        );

        let saved = fixture.sink.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].user_id, UserId::new("U1"));
        assert_eq!(saved[0].joined_text(), "a\nb");
        assert!(fixture.buffer.is_empty(&UserId::new("U1")).await);
    }

    #[tokio::test]
    async fn save_with_empty_buffer_never_calls_sink() {
        let fixture = fixture();

        assert_eq!(reply(send(&fixture, text("U1", "/save")).await), "目前沒有訊息可以儲存！");
        assert_eq!(fixture.sink.attempts(), 0);
    }

    #[tokio::test]
    async fn failed_save_keeps_buffer_and_next_save_retries_everything() {
        let fixture = fixture();
        fixture.sink.set_failure(Some(SinkError::new(SinkStage::AppendRow, "503")));

        send(&fixture, text("U1", "a")).await;
        assert_eq!(reply(send(&fixture, text("U1", "/save")).await), "儲存失敗，請稍後再試！");
        assert_eq!(fixture.buffer.drain(&UserId::new("U1")).await, vec!["a"]);

        fixture.sink.set_failure(None);
        assert_eq!(
            reply(send(&fixture, text("U1", "b")).await),
            "訊息已累積 (2)\n輸入 /save 來儲存到 Google Sheets"
        );
        assert_eq!(
            reply(send(&fixture, text("U1", "/save")).await),
            "已成功儲存 2 則訊息到 Google Sheets！"
        );
        assert_eq!(fixture.sink.saved()[0].joined_text(), "a\nb");
        assert_eq!(fixture.sink.attempts(), 2);
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let fixture = fixture();

        send(&fixture, text("U1", "x")).await;
        send(&fixture, text("U2", "y")).await;
        send(&fixture, text("U1", "/save")).await;

        assert_eq!(fixture.sink.saved()[0].joined_text(), "x");
        assert_eq!(fixture.buffer.drain(&UserId::new("U2")).await, vec!["y"]);
    }

    #[tokio::test]
    async fn save_command_match_is_exact_and_case_sensitive() {
        let fixture = fixture();

        for near_miss in ["/SAVE", " /save", "/save ", "/save now"] {
            reply(send(&fixture, text("U1", near_miss)).await);
        }

        assert_eq!(fixture.sink.attempts(), 0);
        assert_eq!(fixture.buffer.pending(&UserId::new("U1")).await, 4);
    }

    #[tokio::test]
    async fn configured_save_command_is_used_in_replies_and_matching() {
        let buffer = Arc::new(MessageBuffer::new());
        let sink = Arc::new(MemorySink::new());
        let dispatcher = default_dispatcher(Arc::clone(&buffer), sink.clone(), "!store", taipei());
        let ctx = EventContext::default();

        let accumulated = dispatcher.dispatch(&text("U1", "/save"), &ctx).await.expect("dispatch");
        assert!(reply(accumulated).contains("輸入 !store 來儲存"));

        dispatcher.dispatch(&text("U1", "!store"), &ctx).await.expect("dispatch");
        assert_eq!(sink.saved()[0].joined_text(), "/save");
    }

    #[tokio::test]
    async fn unsupported_events_are_ignored_without_mutation() {
        let fixture = fixture();
        let envelope = LineEnvelope {
            event_id: "evt-follow".to_owned(),
            event: LineEvent::Unsupported { event_type: "follow".to_owned() },
        };

        assert_eq!(send(&fixture, envelope).await, HandlerResult::Ignored);
        assert!(fixture.buffer.snapshot().await.is_empty());
        assert_eq!(fixture.sink.attempts(), 0);
    }

    #[test]
    fn empty_dispatcher_has_no_handlers() {
        assert_eq!(EventDispatcher::new().handler_count(), 0);
        assert_eq!(fixture().dispatcher.handler_count(), 1);
    }

    #[test]
    fn save_command_comparison_is_exact() {
        let handler = TextMessageHandler::new(
            Arc::new(MessageBuffer::new()),
            Arc::new(MemorySink::new()),
            "/save",
            taipei(),
        );

        assert!(handler.is_save_command("/save"));
        assert!(!handler.is_save_command("/Save"));
    }

    /// Blocks every save until released, so a test can race another event
    /// against an in-flight save.
    struct GatedSink {
        entered: Notify,
        release: Notify,
        inner: MemorySink,
    }

    #[async_trait]
    impl SpreadsheetSink for GatedSink {
        async fn save(&self, record: &SaveRecord) -> Result<(), SinkError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.save(record).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn message_arriving_during_save_is_not_lost() {
        let buffer = Arc::new(MessageBuffer::new());
        let sink = Arc::new(GatedSink {
            entered: Notify::new(),
            release: Notify::new(),
            inner: MemorySink::new(),
        });
        let dispatcher =
            Arc::new(default_dispatcher(Arc::clone(&buffer), sink.clone(), "/save", taipei()));
        let ctx = EventContext::default();
        dispatcher.dispatch(&text("U1", "first"), &ctx).await.expect("dispatch");

        let saving = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                dispatcher.dispatch(&text("U1", "/save"), &EventContext::default()).await
            })
        };
        sink.entered.notified().await;
        let late = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                dispatcher.dispatch(&text("U1", "late"), &EventContext::default()).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!late.is_finished(), "same-user event must wait for the in-flight save");

        sink.release.notify_one();
        let saved = saving.await.expect("save task").expect("dispatch");
        let late = late.await.expect("late task").expect("dispatch");

        assert_eq!(reply(saved), "已成功儲存 1 則訊息到 Google Sheets！");
        assert!(reply(late).starts_with("訊息已累積 (1)"));
        assert_eq!(sink.inner.saved()[0].joined_text(), "first");
        assert_eq!(buffer.drain(&UserId::new("U1")).await, vec!["late"]);
    }
}
