use crate::core::{sample_block::block_timestamp_us, SampleBlock};
use crate::hal::format_converter::bytes_to_iq;
use crate::hal::traits::SampleSource;
use crate::hal::types::{
    IqFormat, SourceCapabilities, SourceConfig, SourceEvent, SourceKind, SourceState,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Replays a raw interleaved I/Q recording through a read-only memory map.
///
/// A trailing partial block is never delivered. Without looping the source
/// reports `EndOfStream` once the last whole block has been read.
pub struct FileReplay {
    path: PathBuf,
    format: IqFormat,
    config: SourceConfig,
    looping: bool,
    realtime: bool,
    mmap: Option<Mmap>,
    file_len: usize,
    offset: usize,
    sequence: u64,
    state: SourceState,
}

impl FileReplay {
    pub fn new(path: impl Into<PathBuf>, format: IqFormat, config: SourceConfig) -> Self {
        Self {
            path: path.into(),
            format,
            config,
            looping: false,
            realtime: false,
            mmap: None,
            file_len: 0,
            offset: 0,
            sequence: 0,
            state: SourceState::Unopened,
        }
    }

    /// Infer the sample format from the file extension
    pub fn from_path(path: impl AsRef<Path>, config: SourceConfig) -> Result<Self> {
        let path = path.as_ref();
        let format = IqFormat::from_path(path)
            .ok_or_else(|| anyhow!("Cannot infer I/Q format from {}", path.display()))?;
        Ok(Self::new(path, format, config))
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Pace delivery at the recording's sample rate instead of as fast as possible
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    fn bytes_per_block(&self) -> usize {
        self.config.block_size * self.format.bytes_per_sample()
    }

    /// Whole blocks in the recording
    pub fn blocks_available(&self) -> u64 {
        (self.file_len / self.bytes_per_block()) as u64
    }
}

#[async_trait]
impl SampleSource for FileReplay {
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities {
            kind: SourceKind::FileReplay,
            name: self.path.display().to_string(),
            config: self.config.clone(),
            format: Some(self.format),
        }
    }

    async fn open(&mut self) -> Result<()> {
        if self.state == SourceState::Open {
            return Err(anyhow!("Cannot open device in state {:?}", self.state));
        }

        let file = File::open(&self.path)
            .with_context(|| format!("opening recording {}", self.path.display()))?;
        let file_len = file.metadata()?.len() as usize;

        // Zero-length files cannot be mapped on every platform
        self.mmap = if file_len > 0 {
            // The recording is opened read-only and must not be truncated while mapped
            Some(unsafe { Mmap::map(&file)? })
        } else {
            None
        };
        self.file_len = file_len;
        self.offset = 0;
        self.sequence = 0;
        self.state = SourceState::Open;

        log::info!(
            "Replaying {} ({} blocks of {} {:?} samples)",
            self.path.display(),
            self.blocks_available(),
            self.config.block_size,
            self.format
        );
        Ok(())
    }

    async fn next_block(&mut self, _timeout: Duration) -> Result<SourceEvent> {
        if self.state != SourceState::Open {
            return Err(anyhow!("Device not open"));
        }

        let bytes_per_block = self.bytes_per_block();
        if self.offset + bytes_per_block > self.file_len {
            if self.looping && self.file_len >= bytes_per_block {
                log::debug!("Rewinding {}", self.path.display());
                self.offset = 0;
            } else {
                return Ok(SourceEvent::EndOfStream);
            }
        }

        let mmap = match &self.mmap {
            Some(mmap) => mmap,
            None => return Ok(SourceEvent::EndOfStream),
        };
        let raw = &mmap[self.offset..self.offset + bytes_per_block];
        let mut samples = Vec::with_capacity(self.config.block_size);
        bytes_to_iq(raw, self.format, &mut samples)?;

        let timestamp_us =
            block_timestamp_us(self.sequence, self.config.block_size, self.config.sample_rate_hz);
        let block = SampleBlock::new(self.sequence, timestamp_us, samples);
        self.sequence += 1;
        self.offset += bytes_per_block;

        if self.realtime {
            tokio::time::sleep(self.config.block_period()).await;
        }

        Ok(SourceEvent::Block(block))
    }

    async fn close(&mut self) -> Result<()> {
        self.mmap = None;
        self.state = SourceState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::IqSample;
    use crate::hal::format_converter::iq_to_bytes;
    use std::io::Write;

    fn config(block_size: usize) -> SourceConfig {
        SourceConfig {
            block_size,
            ..Default::default()
        }
    }

    fn recording(samples: usize, format: IqFormat) -> tempfile::NamedTempFile {
        let data: Vec<IqSample> = (0..samples)
            .map(|i| IqSample::new(i as f64 / samples as f64, -0.5))
            .collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&iq_to_bytes(&data, format)).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_replays_whole_blocks_then_ends() {
        // 2.5 blocks: the half block at the end is dropped
        let file = recording(20, IqFormat::Cs16);
        let mut replay = FileReplay::new(file.path(), IqFormat::Cs16, config(8));
        replay.open().await.unwrap();
        assert_eq!(replay.blocks_available(), 2);

        for expected in 0..2u64 {
            match replay.next_block(Duration::from_millis(10)).await.unwrap() {
                SourceEvent::Block(block) => {
                    assert_eq!(block.sequence, expected);
                    assert_eq!(block.len(), 8);
                    assert!((block.samples[0].im + 0.5).abs() < 1e-4);
                }
                other => panic!("expected block, got {:?}", other),
            }
        }
        assert!(matches!(
            replay.next_block(Duration::from_millis(10)).await.unwrap(),
            SourceEvent::EndOfStream
        ));
    }

    #[tokio::test]
    async fn test_looping_keeps_sequence_running() {
        let file = recording(8, IqFormat::Cf32);
        let mut replay =
            FileReplay::new(file.path(), IqFormat::Cf32, config(8)).with_looping(true);
        replay.open().await.unwrap();

        for expected in 0..3u64 {
            match replay.next_block(Duration::from_millis(10)).await.unwrap() {
                SourceEvent::Block(block) => {
                    assert_eq!(block.sequence, expected);
                    assert_eq!(block.samples[0], IqSample::new(0.0, -0.5));
                }
                other => panic!("expected block, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_empty_file_is_end_of_stream() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut replay = FileReplay::new(file.path(), IqFormat::Cu8, config(8));
        replay.open().await.unwrap();
        assert!(matches!(
            replay.next_block(Duration::from_millis(10)).await.unwrap(),
            SourceEvent::EndOfStream
        ));
    }

    #[tokio::test]
    async fn test_missing_file_fails_to_open() {
        let mut replay = FileReplay::new("/nonexistent/capture.cu8", IqFormat::Cu8, config(8));
        assert!(replay.open().await.is_err());
    }

    #[test]
    fn test_format_from_extension() {
        let replay = FileReplay::from_path("capture.cs8", config(8)).unwrap();
        assert_eq!(replay.capabilities().format, Some(IqFormat::Cs8));
        assert!(FileReplay::from_path("capture.wav", config(8)).is_err());
    }
}
