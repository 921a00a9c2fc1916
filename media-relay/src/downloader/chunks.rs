//! Chunk planning for ranged downloads.

/// Smallest chunk worth a separate request (2 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Default limit of concurrent chunk requests per download.
pub const DEFAULT_MAX_PARALLELISM: usize = 8;

/// Tuning of the parallel download path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceleratorConfig {
    pub max_parallelism: usize,
    pub min_chunk_size: u64,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            min_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl AcceleratorConfig {
    /// Chunk size for a resource of `content_length` bytes.
    ///
    /// Aims for about two chunks per connection so a slow chunk does not
    /// leave the other connections idle, without going below the minimum.
    pub fn chunk_size(&self, content_length: u64) -> u64 {
        let parallelism = self.max_parallelism.max(1) as u64;
        self.min_chunk_size
            .max(content_length / (2 * parallelism))
            .max(1)
    }
}

/// Inclusive byte range, as used by the HTTP `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Split `[0, content_length)` into ordered, contiguous ranges.
pub fn plan_chunks(content_length: u64, config: &AcceleratorConfig) -> Vec<ByteRange> {
    let chunk_size = config.chunk_size(content_length);
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < content_length {
        let end = (start + chunk_size).min(content_length) - 1;
        ranges.push(ByteRange { start, end });
        start = end + 1;
    }
    ranges
}
