use super::traits::SampleSource;
use super::types::{SourceCapabilities, SourceEvent, SourceState};
use anyhow::{anyhow, Result};
use std::time::Duration;

/// Wraps a SampleSource with state tracking and sequence continuity checks.
///
/// Blocks whose sequence does not follow the previous one, or that arrive after
/// a timeout or transient read error, are handed on with `gap_flag` set even if
/// the source itself did not flag them.
pub struct ManagedSource {
    inner: Box<dyn SampleSource>,
    state: SourceState,
    last_sequence: Option<u64>,
    interrupted: bool,
    gaps_detected: u64,
}

impl ManagedSource {
    pub fn new(source: Box<dyn SampleSource>) -> Self {
        Self {
            inner: source,
            state: SourceState::Unopened,
            last_sequence: None,
            interrupted: false,
            gaps_detected: 0,
        }
    }

    pub fn capabilities(&self) -> SourceCapabilities {
        self.inner.capabilities()
    }

    pub async fn open(&mut self) -> Result<()> {
        if self.state == SourceState::Open {
            return Err(anyhow!("Source is already open"));
        }
        if let Err(e) = self.inner.open().await {
            self.state = SourceState::Error(e.to_string());
            return Err(e);
        }
        self.state = SourceState::Open;
        self.last_sequence = None;
        self.interrupted = false;
        Ok(())
    }

    pub async fn next_block(&mut self, timeout: Duration) -> Result<SourceEvent> {
        if self.state != SourceState::Open {
            return Err(anyhow!("Cannot read from source in state {:?}", self.state));
        }

        let event = match self.inner.next_block(timeout).await {
            Ok(event) => event,
            Err(e) => {
                self.interrupted = true;
                return Err(e);
            }
        };

        match event {
            SourceEvent::Block(mut block) => {
                let discontinuous = match self.last_sequence {
                    Some(last) if block.sequence <= last => {
                        log::warn!(
                            "Source sequence went backwards ({} after {})",
                            block.sequence,
                            last
                        );
                        true
                    }
                    Some(last) => block.sequence != last + 1,
                    None => false,
                };

                // Samples went missing; a block that only follows a timeout or
                // read error is degraded without counting as a gap
                let lost_samples = discontinuous || block.gap_flag;
                if lost_samples {
                    self.gaps_detected += 1;
                }
                block.gap_flag = lost_samples || self.interrupted;
                self.interrupted = false;
                self.last_sequence = Some(block.sequence);
                Ok(SourceEvent::Block(block))
            }
            SourceEvent::Empty => {
                self.interrupted = true;
                Ok(SourceEvent::Empty)
            }
            SourceEvent::Disconnected(reason) => {
                self.state = SourceState::Error(reason.clone());
                Ok(SourceEvent::Disconnected(reason))
            }
            SourceEvent::EndOfStream => Ok(SourceEvent::EndOfStream),
        }
    }

    /// Release the source. Safe to call from any state.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == SourceState::Closed || self.state == SourceState::Unopened {
            return Ok(());
        }
        let result = self.inner.close().await;
        self.state = SourceState::Closed;
        result
    }

    pub fn state(&self) -> &SourceState {
        &self.state
    }

    /// Blocks delivered after lost samples (sequence jump, backwards sequence
    /// or flagged by the source) since creation
    pub fn gaps_detected(&self) -> u64 {
        self.gaps_detected
    }

    pub fn into_inner(self) -> Box<dyn SampleSource> {
        self.inner
    }
}
