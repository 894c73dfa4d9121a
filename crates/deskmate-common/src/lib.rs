pub mod error;
pub mod message;
pub mod nudge;

pub use error::{Error, Result};
pub use message::{ImageAttachment, Message, MessageKind, ToolAction, ToolCall};
pub use nudge::Nudge;
