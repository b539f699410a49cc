//! Unix-socket protocol server.
//!
//! One connection per client, one task per connection, line-delimited JSON
//! framing. A request line that fails to parse produces a validation error
//! response on the same line slot; the connection stays open. The accept
//! loop exits when shutdown is requested.

use adbounty_core::error::ErrorClass;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::protocol::{dispatch, Request, Response};
use crate::state::SharedHandle;

/// Upper bound on one request line. Longer lines are answered with a
/// validation error and dropped without parsing.
pub const MAX_REQUEST_LINE_BYTES: usize = 64 * 1024;

/// Runs the accept loop until shutdown is requested.
///
/// # Errors
///
/// Returns the underlying IO error when the listener itself fails.
pub async fn serve(handle: SharedHandle, listener: UnixListener) -> std::io::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let handle = handle.clone();
                        tokio::spawn(async move {
                            handle_connection(handle, stream).await;
                        });
                    }
                    Err(error) => {
                        warn!(%error, "failed to accept connection");
                    }
                }
            }
            () = handle.shutdown_notified() => {
                info!("shutdown requested, closing listener");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(handle: SharedHandle, stream: UnixStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            () = handle.shutdown_notified() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(error) => {
                debug!(%error, "connection read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = if line.len() > MAX_REQUEST_LINE_BYTES {
            Response::Error {
                class: ErrorClass::Validation,
                message: format!("request exceeds {MAX_REQUEST_LINE_BYTES} bytes"),
            }
        } else {
            match serde_json::from_str::<Request>(&line) {
                Ok(request) => dispatch(&handle, request).await,
                Err(error) => Response::Error {
                    class: ErrorClass::Validation,
                    message: format!("malformed request: {error}"),
                },
            }
        };

        let mut payload = match serde_json::to_string(&response) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "failed to serialize response");
                break;
            }
        };
        payload.push('\n');
        if write_half.write_all(payload.as_bytes()).await.is_err() {
            break;
        }
    }
}
