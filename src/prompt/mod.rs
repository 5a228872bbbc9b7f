//! Prompt construction.
//!
//! - [`message`]: Role-tagged chat messages
//! - [`template`]: Placeholder templates rendered into message sequences

pub mod message;
pub mod template;

pub use message::{Message, Role};
pub use template::{FormatError, MessageTemplate, PromptTemplate};
