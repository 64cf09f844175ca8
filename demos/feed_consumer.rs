use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, LinesCodec};

// Connects to a running presence-flood server and reads the feed until the
// server closes the connection.
//
// cargo run --example feed_consumer -- [addr]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "localhost:9000".to_string());
    let stream = TcpStream::connect(&addr).await?;
    let mut lines = Framed::new(stream, LinesCodec::new());

    let start = Instant::now();
    let (mut heartbeats, mut events, mut bytes) = (0u64, 0u64, 0usize);
    while let Some(line) = lines.next().await {
        let line = line?;
        bytes += line.len() + 1;
        if line.starts_with("<Heartbeat>") {
            heartbeats += 1;
        } else if line.starts_with("<CallStateEvent>") {
            events += 1;
        } else {
            anyhow::bail!("Unexpected line: {}", line);
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "Received {} events and {} heartbeats ({} bytes) in {:.1}s ({:.0} events/sec)",
        events,
        heartbeats,
        bytes,
        elapsed,
        events as f64 / elapsed.max(f64::EPSILON)
    );
    Ok(())
}
