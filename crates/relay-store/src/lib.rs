pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::Store;
pub use types::{
    AttachmentRef, Balance, Message, Thread, TokenUsage, ToolCallRecord, UserFile,
};
