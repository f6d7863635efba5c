//! Protocol stream bridge: chunked gRPC streams <-> continuous byte streams
//!
//! ```text
//! wire stream ──► pump task ──► bounded queue ──► BridgeReader (AsyncRead)
//! BridgeWriter (AsyncWrite) ──► duplex pipe ──► pump task ──► wire sender
//! ```
//!
//! Each direction runs one pump task. Both pipes are bounded, so a slow
//! consumer applies backpressure to the wire and memory stays proportional
//! to the chunk size, never to the file size. A wire error or a cancelled
//! request closes the read pipe with an error instead of a clean EOF, so a
//! truncated transfer can never be mistaken for a complete one.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::io;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default size of a binary chunk on the wire
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Number of chunks each pipe buffers before applying backpressure
const PIPE_DEPTH: usize = 8;

/// Read end of a wire-to-bytes bridge
pub type BridgeReader = StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>;

/// Write end of a bytes-to-wire bridge. Shut it down (or drop it) after the
/// last write to end the wire stream.
pub type BridgeWriter = DuplexStream;

/// Turn a stream of wire messages into an `AsyncRead`.
///
/// `extract` pulls the payload out of each message; returning an error from
/// it aborts the transfer with that error.
pub fn stream_to_reader<S, M, F>(stream: S, extract: F, cancel: CancellationToken) -> BridgeReader
where
    S: Stream<Item = Result<M, tonic::Status>> + Send + Unpin + 'static,
    M: Send + 'static,
    F: FnMut(M) -> io::Result<Bytes> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(PIPE_DEPTH);
    tokio::spawn(pump_from_wire(stream, extract, tx, cancel.clone()));

    // Once the queue drains, a cancelled transfer ends in an error, not EOF.
    let tail = futures::stream::once(async move { cancel.is_cancelled() }).filter_map(
        |cancelled| async move { cancelled.then(|| Err::<Bytes, _>(cancelled_error())) },
    );
    StreamReader::new(ReceiverStream::new(rx).chain(tail).boxed())
}

/// Turn a wire sender into an `AsyncWrite`.
///
/// Bytes written to the returned pipe are cut into `chunk_size` pieces (the
/// last one may be shorter), wrapped with `wrap` and sent in order.
pub fn writer_to_sink<T, F>(
    tx: mpsc::Sender<T>,
    chunk_size: usize,
    wrap: F,
    cancel: CancellationToken,
) -> BridgeWriter
where
    T: Send + 'static,
    F: FnMut(Bytes) -> T + Send + 'static,
{
    let chunk_size = chunk_size.max(1);
    let (writer, reader) = tokio::io::duplex(chunk_size * PIPE_DEPTH);
    tokio::spawn(pump_to_wire(reader, tx, chunk_size, wrap, cancel));
    writer
}

async fn pump_from_wire<S, M, F>(
    mut stream: S,
    mut extract: F,
    tx: mpsc::Sender<io::Result<Bytes>>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<M, tonic::Status>> + Unpin,
    F: FnMut(M) -> io::Result<Bytes>,
{
    // On cancel the pump returns at once; the reader reports the cancellation.
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tx.closed() => return,
            next = stream.next() => next,
        };

        let item = match next {
            // Clean end of stream: dropping `tx` closes the pipe with EOF.
            None => {
                debug!("wire stream finished");
                return;
            }
            Some(Ok(message)) => match extract(message) {
                Ok(bytes) if bytes.is_empty() => continue,
                other => other,
            },
            Some(Err(status)) => Err(io::Error::other(status)),
        };

        let terminal = item.is_err();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = tx.send(item) => {
                if sent.is_err() {
                    return;
                }
            }
        }
        if terminal {
            return;
        }
    }
}

async fn pump_to_wire<T, F>(
    mut reader: DuplexStream,
    tx: mpsc::Sender<T>,
    chunk_size: usize,
    mut wrap: F,
    cancel: CancellationToken,
) where
    F: FnMut(Bytes) -> T,
{
    let mut buf = vec![0u8; chunk_size];
    loop {
        let filled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tx.closed() => return,
            filled = fill_chunk(&mut reader, &mut buf) => filled,
        };

        let n = match filled {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "bridge pipe read failed");
                return;
            }
        };

        let message = wrap(Bytes::copy_from_slice(&buf[..n]));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = tx.send(message) => {
                if sent.is_err() {
                    return;
                }
            }
        }

        // A short chunk means the writer side hit EOF.
        if n < chunk_size {
            return;
        }
    }
}

/// Read until `buf` is full or the pipe reaches EOF; returns bytes read.
async fn fill_chunk(reader: &mut DuplexStream, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn cancelled_error() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "request cancelled")
}
