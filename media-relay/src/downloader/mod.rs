//! Upstream byte delivery.
//!
//! [`AcceleratedDownloader`] fetches a resource with parallel ranged requests
//! when the origin allows it and degrades to a single streamed connection
//! otherwise.

mod accelerated;
mod chunks;
mod progress;

pub use accelerated::{AcceleratedDownloader, ProbeResult, copy_response_body};
pub use chunks::{
    AcceleratorConfig, ByteRange, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_PARALLELISM, plan_chunks,
};
pub use progress::{DownloadProgress, ProgressReporter};
