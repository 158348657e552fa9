pub mod buffer;
pub mod config;
pub mod domain;
pub mod errors;
pub mod sink;

pub use buffer::{MessageBuffer, UserGuard};
pub use domain::record::{SaveRecord, SHEET_HEADER};
pub use domain::user::UserId;
pub use errors::{DomainError, InterfaceError};
pub use sink::{MemorySink, SinkError, SinkStage, SpreadsheetSink};
