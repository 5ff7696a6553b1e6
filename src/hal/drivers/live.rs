use crate::core::{sample_block::block_timestamp_us, SampleBlock};
use crate::hal::format_converter::bytes_to_iq;
use crate::hal::traits::SampleSource;
use crate::hal::types::{
    IqFormat, SourceCapabilities, SourceConfig, SourceEvent, SourceKind, SourceState,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::io::{ErrorKind, Read};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

type ShutdownHook = Box<dyn FnOnce() + Send>;

/// Byte stream of a live receiver
pub struct Link {
    reader: Box<dyn Read + Send>,
    shutdown: Option<ShutdownHook>,
}

impl Link {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            shutdown: None,
        }
    }

    /// Hook run on close that must make a blocked read on this link return,
    /// e.g. by shutting the socket down
    pub fn with_shutdown(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.shutdown = Some(Box::new(hook));
        self
    }
}

/// Opens the link of a live receiver. Runs on the blocking thread pool.
pub type LinkConnector = Box<dyn FnMut() -> std::io::Result<Link> + Send>;

enum LinkMessage {
    Block(SampleBlock),
    Closed(String),
}

/// Live receiver streaming raw I/Q bytes.
///
/// A reader thread pulls whole blocks off the link and hands them over a
/// bounded queue. When the consumer falls behind the newest block is dropped,
/// its sequence number is skipped and the next delivered block is flagged as
/// following a gap.
pub struct LiveDevice {
    name: String,
    config: SourceConfig,
    format: IqFormat,
    queue_depth: usize,
    connector: Option<LinkConnector>,
    link_shutdown: Option<ShutdownHook>,
    filled_rx: Option<Receiver<LinkMessage>>,
    reader: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    state: SourceState,
}

impl LiveDevice {
    pub fn new(
        name: impl Into<String>,
        config: SourceConfig,
        format: IqFormat,
        connector: LinkConnector,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            format,
            queue_depth: 4,
            connector: Some(connector),
            link_shutdown: None,
            filled_rx: None,
            reader: None,
            stop: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            state: SourceState::Unopened,
        }
    }

    /// Raw I/Q over TCP, as served by `rtl_tcp`-style bridges once any
    /// handshake has been consumed
    pub fn tcp<A>(addr: A, config: SourceConfig, format: IqFormat) -> Self
    where
        A: ToSocketAddrs + Clone + Send + std::fmt::Debug + 'static,
    {
        let name = format!("tcp://{:?}", addr);
        let connector: LinkConnector = Box::new(move || {
            let stream = TcpStream::connect(addr.clone())?;
            stream.set_nodelay(true)?;
            let control = stream.try_clone()?;
            Ok(Link::new(stream).with_shutdown(move || {
                let _ = control.shutdown(Shutdown::Both);
            }))
        });
        Self::new(name, config, format, connector)
    }

    /// Blocks the reader may buffer ahead of the consumer
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Blocks discarded because the consumer was behind
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop the reader and interrupt its link. Returns the reader thread when
    /// joining it cannot block forever.
    fn signal_reader(&mut self) -> Option<JoinHandle<()>> {
        self.stop.store(true, Ordering::Relaxed);
        // Dropping the receiver unblocks a reader waiting to send
        self.filled_rx = None;
        let interrupted = match self.link_shutdown.take() {
            Some(shutdown) => {
                shutdown();
                true
            }
            None => false,
        };

        let handle = self.reader.take()?;
        if interrupted || handle.is_finished() {
            Some(handle)
        } else {
            log::warn!(
                "{}: link has no shutdown hook and the reader is blocked, detaching",
                self.name
            );
            None
        }
    }
}

fn reader_loop(
    mut link: Box<dyn Read + Send>,
    format: IqFormat,
    config: SourceConfig,
    filled_tx: Sender<LinkMessage>,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
) {
    let mut raw = vec![0u8; config.block_size * format.bytes_per_sample()];
    let mut sequence = 0u64;
    let mut pending_gap = false;

    while !stop.load(Ordering::Relaxed) {
        if let Err(e) = link.read_exact(&mut raw) {
            let reason = match e.kind() {
                ErrorKind::UnexpectedEof => "link closed by peer".to_string(),
                _ => e.to_string(),
            };
            let _ = filled_tx.send(LinkMessage::Closed(reason));
            return;
        }

        let mut samples = Vec::with_capacity(config.block_size);
        if let Err(e) = bytes_to_iq(&raw, format, &mut samples) {
            let _ = filled_tx.send(LinkMessage::Closed(e.to_string()));
            return;
        }

        let timestamp_us = block_timestamp_us(sequence, config.block_size, config.sample_rate_hz);
        let block = SampleBlock::new(sequence, timestamp_us, samples).with_gap(pending_gap);
        sequence += 1;

        match filled_tx.try_send(LinkMessage::Block(block)) {
            Ok(()) => pending_gap = false,
            Err(TrySendError::Full(_)) => {
                dropped.fetch_add(1, Ordering::Relaxed);
                pending_gap = true;
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

#[async_trait]
impl SampleSource for LiveDevice {
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities {
            kind: SourceKind::LiveDevice,
            name: self.name.clone(),
            config: self.config.clone(),
            format: Some(self.format),
        }
    }

    async fn open(&mut self) -> Result<()> {
        if self.state == SourceState::Open {
            return Err(anyhow!("Cannot open device in state {:?}", self.state));
        }
        // A link that ended in error without a close is still attached
        let _ = self.signal_reader();

        let mut connector = self
            .connector
            .take()
            .ok_or_else(|| anyhow!("{}: connector was lost by an earlier open", self.name))?;
        let (connector, connected) = tokio::task::spawn_blocking(move || {
            let connected = connector();
            (connector, connected)
        })
        .await?;
        self.connector = Some(connector);

        let Link { reader: link, shutdown } =
            connected.map_err(|e| anyhow!("{}: {}", self.name, e))?;
        let (filled_tx, filled_rx) = bounded(self.queue_depth);

        self.stop = Arc::new(AtomicBool::new(false));
        let stop = self.stop.clone();
        let dropped = self.dropped.clone();
        let format = self.format;
        let config = self.config.clone();

        let reader = std::thread::Builder::new()
            .name(format!("{}-reader", self.name))
            .spawn(move || reader_loop(link, format, config, filled_tx, stop, dropped))?;

        self.link_shutdown = shutdown;
        self.filled_rx = Some(filled_rx);
        self.reader = Some(reader);
        self.state = SourceState::Open;
        log::info!("{}: streaming {:?} at {} Hz", self.name, self.format, self.config.sample_rate_hz);
        Ok(())
    }

    async fn next_block(&mut self, timeout: Duration) -> Result<SourceEvent> {
        let filled_rx = self
            .filled_rx
            .clone()
            .ok_or_else(|| anyhow!("Device not open"))?;

        let received = tokio::task::spawn_blocking(move || filled_rx.recv_timeout(timeout)).await?;

        Ok(match received {
            Ok(LinkMessage::Block(block)) => SourceEvent::Block(block),
            Ok(LinkMessage::Closed(reason)) => {
                self.state = SourceState::Error(reason.clone());
                SourceEvent::Disconnected(reason)
            }
            Err(RecvTimeoutError::Timeout) => SourceEvent::Empty,
            Err(RecvTimeoutError::Disconnected) => {
                SourceEvent::Disconnected("reader thread exited".to_string())
            }
        })
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.signal_reader() {
            if tokio::task::spawn_blocking(move || handle.join()).await?.is_err() {
                log::warn!("{}: reader thread panicked", self.name);
            }
        }
        self.state = SourceState::Closed;
        Ok(())
    }
}

impl Drop for LiveDevice {
    fn drop(&mut self) {
        // Not joined here; an interrupted reader exits on its own
        let _ = self.signal_reader();
    }
}
