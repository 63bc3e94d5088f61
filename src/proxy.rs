//! Bidirectional TCP splicing
//!
//! A spliced pair owns both sockets: the first direction to terminate (clean
//! EOF or error) tears down the other direction as well, so closing either
//! half closes the whole pair.

use futures::future::{self, Either};
use tokio::net::TcpStream;
use tracing::debug;

/// Copy bytes between two sockets until either direction terminates.
///
/// Each direction runs as its own task. When one finishes, the other is
/// aborted, dropping its halves and closing both sockets.
pub async fn splice(a: TcpStream, b: TcpStream) {
    let (mut a_read, mut a_write) = a.into_split();
    let (mut b_read, mut b_write) = b.into_split();

    let forward = tokio::spawn(async move { tokio::io::copy(&mut a_read, &mut b_write).await });
    let backward = tokio::spawn(async move { tokio::io::copy(&mut b_read, &mut a_write).await });

    let (first, remaining) = match future::select(forward, backward).await {
        Either::Left((result, rest)) => (result, rest),
        Either::Right((result, rest)) => (result, rest),
    };

    match first {
        Ok(Ok(bytes)) => debug!(bytes, "copy direction finished"),
        Ok(Err(e)) => debug!(error = %e, "copy direction failed"),
        Err(_) => {}
    }

    remaining.abort();
    let _ = remaining.await;
}
