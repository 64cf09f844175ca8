use std::fmt;
use std::io;
use std::net::SocketAddr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, Instant};

use crate::event::{EventFactory, Heartbeat, EVENT_SIZE_HINT};

/// Below this rate a batch would be empty.
pub const MIN_RATE: u64 = 10;
pub const MAX_BATCH_SIZE: u64 = 1000;
// A heartbeat goes out whenever the running total hits a multiple of
// `rate * HEARTBEAT_EVERY_SECS`. Batches that step over that multiple skip it.
const HEARTBEAT_EVERY_SECS: u64 = 15;

/// Events per socket write: a tenth of a second's worth, capped.
pub fn batch_size(rate: u64) -> u64 {
    (rate / 10).min(MAX_BATCH_SIZE)
}

/// The peer went away. Anything else is a real failure.
fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

/// Floods a single connection. Holds only immutable settings, so the listener
/// clones one per accepted client.
#[derive(Debug, Clone)]
pub struct Flooder {
    rate: u64,
    duration: Duration,
    factory: EventFactory,
}

impl Flooder {
    pub fn new(rate: u64, duration: Duration, factory: EventFactory) -> Self {
        debug_assert!(rate >= MIN_RATE, "rate {} is below {}", rate, MIN_RATE);
        Self {
            rate,
            duration,
            factory,
        }
    }

    pub fn batch_size(&self) -> u64 {
        batch_size(self.rate)
    }

    fn heartbeat_due(&self, events: u64) -> bool {
        events % (self.rate * HEARTBEAT_EVERY_SECS) == 0
    }

    // When `events` should have been sent if the stream were exactly on rate.
    fn expected_elapsed(&self, events: u64) -> Duration {
        let nanos = u128::from(events) * 1_000_000_000 / u128::from(self.rate);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Serves one accepted client until the duration runs out or the client
    /// hangs up, then closes the socket.
    pub async fn handle(self, mut stream: TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
        tracing::info!("Client connected [peer={}]", peer);
        let mut rng = StdRng::from_os_rng();
        match self.flood(&mut stream, &mut rng).await? {
            Outcome::Completed(summary) => {
                tracing::info!("{} [peer={}]", summary, peer);
                tracing::debug!(
                    "Run details [peer={}, batches={}, heartbeats={}]",
                    peer,
                    summary.batches,
                    summary.heartbeats
                );
                if let Err(err) = stream.shutdown().await {
                    tracing::debug!("Error shutting down [peer={}]: {}", peer, err);
                }
            }
            Outcome::Disconnected(summary) => {
                tracing::info!(
                    "Client disconnected [peer={}, events={}]",
                    peer,
                    summary.events
                );
            }
        }
        Ok(())
    }

    /// Writes the initial heartbeat and then paced batches of events to
    /// `writer` for the configured duration.
    pub async fn flood<W, R>(&self, writer: &mut W, rng: &mut R) -> anyhow::Result<Outcome>
    where
        W: AsyncWrite + Unpin,
        R: Rng + ?Sized,
    {
        let mut progress = Progress::new();
        match self.pump(writer, rng, &mut progress).await {
            Ok(()) => Ok(Outcome::Completed(progress.summary())),
            Err(err) if is_disconnect(&err) => Ok(Outcome::Disconnected(progress.summary())),
            Err(err) => Err(err.into()),
        }
    }

    async fn pump<W, R>(&self, writer: &mut W, rng: &mut R, progress: &mut Progress) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
        R: Rng + ?Sized,
    {
        writer.write_all(Heartbeat::LINE).await?;
        progress.heartbeats += 1;

        let batch_size = self.batch_size();
        let mut buffer = String::with_capacity(batch_size as usize * EVENT_SIZE_HINT);
        while progress.started.elapsed() < self.duration {
            buffer.clear();
            self.factory
                .render_batch(&mut buffer, &mut progress.call_counter, batch_size, rng);
            writer.write_all(buffer.as_bytes()).await?;
            progress.events += batch_size;
            progress.batches += 1;

            // No catching up after an overshoot, only slowing down.
            let elapsed = progress.started.elapsed();
            let expected = self.expected_elapsed(progress.events);
            if expected > elapsed {
                tracing::trace!(
                    "Ahead of schedule, sleeping [events={}, sleep={:?}]",
                    progress.events,
                    expected - elapsed
                );
                tokio::time::sleep(expected - elapsed).await;
            }

            if self.heartbeat_due(progress.events) {
                tracing::debug!("Sending heartbeat [events={}]", progress.events);
                writer.write_all(Heartbeat::LINE).await?;
                progress.heartbeats += 1;
            }
        }
        writer.flush().await
    }
}

#[derive(Debug)]
pub enum Outcome {
    /// Ran for the full duration.
    Completed(RunSummary),
    /// The client hung up first.
    Disconnected(RunSummary),
}

struct Progress {
    started: Instant,
    call_counter: u64,
    events: u64,
    batches: u64,
    heartbeats: u64,
}

impl Progress {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            call_counter: 0,
            events: 0,
            batches: 0,
            heartbeats: 0,
        }
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            events: self.events,
            batches: self.batches,
            heartbeats: self.heartbeats,
            elapsed: self.started.elapsed(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub events: u64,
    pub batches: u64,
    pub heartbeats: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn events_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.events as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sent {} events in {:.1}s ({:.0} events/sec)",
            self.events,
            self.elapsed.as_secs_f64(),
            self.events_per_sec()
        )
    }
}
