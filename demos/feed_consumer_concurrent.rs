use rand::Rng;
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, LinesCodec};

const CLIENTS: usize = 10;

// Opens several feeds at once. Every other client hangs up early after a
// random number of lines, the rest read until the server closes.
//
// cargo run --example feed_consumer_concurrent -- [addr]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "localhost:9000".to_string());

    let mut handles = Vec::with_capacity(CLIENTS);
    for client in 0..CLIENTS {
        let addr = addr.clone();
        let quit_after = if client % 2 == 0 {
            Some(rand::rng().random_range(1_000..100_000))
        } else {
            None
        };
        handles.push(tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut lines = Framed::new(stream, LinesCodec::new());
            let mut received = 0usize;
            while let Some(Ok(_)) = lines.next().await {
                received += 1;
                if quit_after == Some(received) {
                    break;
                }
            }
            println!("Client {} read {} lines", client, received);
            received
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await?;
    }
    println!("All clients done, {} lines in total", total);
    Ok(())
}
