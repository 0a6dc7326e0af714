//! Sample source seam and TCP sensor bridge
//!
//! The capture loop only sees the `SampleSource` trait. The default wiring
//! feeds it from a TCP listener that accepts `SAMPLE <base64>` lines from
//! the sensor bridge process; tests push samples through the feed handle
//! directly.

use crate::domain::types::Sample;
use anyhow::anyhow;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Supplies raw biometric samples; blocks until one is available
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn acquire_sample(&self) -> anyhow::Result<Sample>;
}

/// Producer handle for a `ChannelSource`
#[derive(Clone)]
pub struct SampleFeed {
    tx: mpsc::Sender<Sample>,
}

impl SampleFeed {
    /// Push a sample without blocking; returns false if it was dropped
    pub fn push(&self, sample: Sample) -> bool {
        match self.tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Channel-backed sample source
///
/// The capture loop owns the receiving side; producers (TCP bridge, tests)
/// hold `SampleFeed` clones.
pub struct ChannelSource {
    rx: tokio::sync::Mutex<mpsc::Receiver<Sample>>,
}

impl ChannelSource {
    pub fn new(buffer: usize) -> (SampleFeed, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (SampleFeed { tx }, Self { rx: tokio::sync::Mutex::new(rx) })
    }
}

#[async_trait]
impl SampleSource for ChannelSource {
    async fn acquire_sample(&self) -> anyhow::Result<Sample> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or_else(|| anyhow!("sample feed closed"))
    }
}

/// Sensor bridge listener configuration
#[derive(Debug, Clone)]
pub struct SensorListenerConfig {
    pub port: u16,
    pub enabled: bool,
}

impl Default for SensorListenerConfig {
    fn default() -> Self {
        Self { port: 25901, enabled: true }
    }
}

/// Start the TCP sensor bridge
///
/// Accepts connections from the sensor bridge and pushes decoded samples
/// into the feed. Samples are pushed with try_send so a slow capture loop
/// never blocks the bridge; drops are logged (rate-limited).
pub async fn start_sensor_listener(
    config: SensorListenerConfig,
    feed: SampleFeed,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !config.enabled {
        info!("sensor_listener_disabled");
        return Ok(());
    }

    let addr = format!("127.0.0.1:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(port = %config.port, "sensor_listener_started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("sensor_listener_shutdown");
                    return Ok(());
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let feed = feed.clone();
                        tokio::spawn(async move {
                            handle_sensor_connection(socket, addr, feed).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "sensor_listener_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_sensor_connection(
    socket: tokio::net::TcpStream,
    addr: SocketAddr,
    feed: SampleFeed,
) {
    let peer = addr.to_string();
    debug!(peer = %peer, "sensor_connection_accepted");

    let reader = BufReader::new(socket);
    let mut lines = reader.lines();

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();

        if let Some(payload) = line.strip_prefix("SAMPLE ") {
            let payload = payload.trim();
            match STANDARD.decode(payload.as_bytes()) {
                Ok(bytes) => {
                    if !feed.push(Sample::new(bytes))
                        && last_drop_warn.elapsed() > Duration::from_secs(1)
                    {
                        warn!(peer = %peer, "sample_dropped: feed full or closed");
                        last_drop_warn = Instant::now();
                    }
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "sample_decode_failed");
                }
            }
        } else if !line.is_empty() {
            debug!(peer = %peer, line = %line, "sensor_unknown_message");
        }
    }

    debug!(peer = %peer, "sensor_connection_closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_source_delivers_in_order() {
        let (feed, source) = ChannelSource::new(4);
        assert!(feed.push(Sample::new(vec![1])));
        assert!(feed.push(Sample::new(vec![2])));

        assert_eq!(source.acquire_sample().await.unwrap(), Sample::new(vec![1]));
        assert_eq!(source.acquire_sample().await.unwrap(), Sample::new(vec![2]));
    }

    #[tokio::test]
    async fn test_push_reports_full_buffer() {
        let (feed, _source) = ChannelSource::new(1);
        assert!(feed.push(Sample::new(vec![1])));
        assert!(!feed.push(Sample::new(vec![2])));
    }

    #[tokio::test]
    async fn test_acquire_fails_when_feed_closed() {
        let (feed, source) = ChannelSource::new(1);
        drop(feed);
        assert!(source.acquire_sample().await.is_err());
    }
}
