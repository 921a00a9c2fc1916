//! Request routing and response plumbing for stream delivery.

mod format;
mod router;
mod sink;

pub use format::{SourceClass, classify, content_type};
pub use router::{Delivery, StreamRouter, X_ESTIMATED_CONTENT_LENGTH};
pub use sink::{ResponseSink, ResponseSource, response_pipe};
