mod conversation;
mod event;
mod message;
mod source;

pub use conversation::*;
pub use event::*;
pub use message::*;
pub use source::*;
