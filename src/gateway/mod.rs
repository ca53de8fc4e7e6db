//! Remote agent boundary
//!
//! - `webhook`: submits finalized utterances as multipart form posts
//! - `messages`: unwraps webhook bodies and decodes call instructions

mod messages;
mod webhook;

pub use messages::{extract_reply_content, RemoteResponse, ReplyShape, Signal};
pub use webhook::{TransmissionGateway, WebhookGateway};
