use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use super::types::{SourceCapabilities, SourceEvent};

/// A stream of fixed-size I/Q blocks.
///
/// Sequence numbers must increase by one per block. When samples are lost the
/// source skips the numbers it could not deliver and sets `gap_flag` on the
/// next block. An `Err` from `next_block` is a transient I/O failure (e.g. a
/// short read); permanent loss is reported as `SourceEvent::Disconnected`.
#[async_trait]
pub trait SampleSource: Send {
    /// Kind, tuning and sample format
    fn capabilities(&self) -> SourceCapabilities;

    /// Acquire the underlying link; may be called again after `close`
    async fn open(&mut self) -> Result<()>;

    /// Wait at most `timeout` for the next block
    async fn next_block(&mut self, timeout: Duration) -> Result<SourceEvent>;

    /// Release the link. Must be safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}
