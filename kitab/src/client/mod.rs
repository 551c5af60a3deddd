//! Web-client side of the chat protocol: session state, event-stream
//! decoding and citation handling. Used by `kitab chat` and mirrored by the
//! embedded page.

pub mod citation;
mod remote;
mod session;
mod sse;

pub use remote::{run_repl, RemoteChat};
pub use session::{ChatSession, ChatStatus, ToolStatus};
pub use sse::{parse_payload, SsePayload};
