//! LINE Messaging API integration
//!
//! - **Webhook** (`webhook`) - request body model and event classification
//! - **Signature** (`signature`) - `x-line-signature` verification
//! - **Events** (`events`) - accumulate / save dispatcher over the message buffer
//! - **Processor** (`processor`) - one task per event, replies delivered, ordered outcomes
//! - **Reply** (`reply`) - reply API transport
//! - **Messages** (`messages`) - outbound reply texts
//!
//! # Architecture
//!
//! ```text
//! POST /webhook → SignatureVerifier → parse_webhook → BatchProcessor
//!                                                         ↓ (task per event)
//!                                    EventDispatcher → TextMessageHandler
//!                                         ↓                   ↓
//!                                  ReplyTransport      MessageBuffer / SpreadsheetSink
//! ```

pub mod events;
pub mod messages;
pub mod processor;
pub mod reply;
pub mod signature;
pub mod webhook;

pub use events::{default_dispatcher, EventContext, EventDispatcher, HandlerResult};
pub use messages::OutboundMessage;
pub use processor::{BatchError, BatchProcessor, EventOutcome, EventResult};
pub use reply::{LineReplyClient, RecordingReplyTransport, ReplyError, ReplyTransport, SentReply};
pub use signature::{SignatureError, SignatureVerifier, SIGNATURE_HEADER};
pub use webhook::{
    parse_webhook, LineEnvelope, LineEvent, LineEventType, TextMessageEvent, WebhookParseError,
};
