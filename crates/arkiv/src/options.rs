use encoding_rs::{Encoding, UTF_8};

/// Knobs shared by every handle and stream opened within a batch.
#[derive(Clone, Debug)]
pub struct BatchOptions {
    pub buffer_size: usize,
    pub spool_threshold: usize,
    pub line_terminator: String,
    pub encoding: &'static Encoding,
    pub line_batch: usize,
    pub compression_level: Option<u32>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            spool_threshold: 4 * 1024 * 1024,
            line_terminator: "\n".to_string(),
            encoding: UTF_8,
            line_batch: 256,
            compression_level: None,
        }
    }
}

impl BatchOptions {
    /// Size of read blocks and of the byte writer's internal buffer.
    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes.max(1);
        self
    }

    /// Staged payloads stay in memory up to this size, then spill to disk.
    pub fn spool_threshold(mut self, bytes: usize) -> Self {
        self.spool_threshold = bytes;
        self
    }

    pub fn line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    pub fn encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Number of lines the text writer collects before encoding them.
    pub fn line_batch(mut self, lines: usize) -> Self {
        self.line_batch = lines.max(1);
        self
    }

    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = Some(level);
        self
    }
}

/// Host-side extraction settings.
#[derive(Clone, Debug, Default)]
pub struct ExtractOptions {
    pub overwrite: bool,
    pub strip_components: usize,
}

impl ExtractOptions {
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn strip_components(mut self, n: usize) -> Self {
        self.strip_components = n;
        self
    }
}
