//! Response bodies streamed from async readers

use axum::body::{Body, Bytes};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

const CHUNK_SIZE: usize = 64 * 1024;

/// Stream `reader` as a response body in bounded chunks.
///
/// `guard` lives exactly as long as the body: it is released once the stream
/// completes, fails, or is dropped by a disconnecting client.
pub fn reader_body<R, G>(mut reader: R, guard: G) -> Body
where
    R: AsyncRead + Unpin + Send + 'static,
    G: Send + 'static,
{
    let stream = async_stream::stream! {
        let _guard = guard;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            match reader.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => yield Ok::<Bytes, std::io::Error>(Bytes::copy_from_slice(&buffer[..n])),
                Err(e) => {
                    warn!(error = %e, "Response body stream failed");
                    yield Err(e);
                    break;
                }
            }
        }
    };
    Body::from_stream(stream)
}
