// Minimal liveness probe. Hosting platforms only need a port that
// answers 200; anything richer belongs in the logs.

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

const RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK";

/// Bind the liveness listener and serve until the task is dropped.
pub async fn serve_health(port: u16) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "Health endpoint listening");
    serve_on(listener).await
}

async fn serve_on(listener: TcpListener) -> Result<()> {
    loop {
        let (mut socket, peer) = listener.accept().await?;
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            // Drain whatever request line arrived; the answer is always 200.
            let _ = socket.read(&mut buf).await;
            if let Err(e) = socket.write_all(RESPONSE).await {
                warn!(%peer, error = %e, "Failed to answer health probe");
            } else {
                debug!(%peer, "Answered health probe");
            }
        });
    }
}
