//! Network surfaces: the JSON control API and the WebSocket metrics stream.
mod control;
mod http;
mod stream;


use tokio::net::TcpListener;
use tracing::info;

use crate::error::ServerError;

pub use control::serve_control;
pub use stream::serve_stream;

/// Bind a listener, naming the surface in the log line.
///
/// # Errors
///
/// Returns `ServerError::Bind` when the address cannot be bound.
pub async fn bind(addr: &str, surface: &'static str) -> Result<TcpListener, ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| ServerError::Bind {
            addr: addr.to_owned(),
            source: err,
        })?;
    let local = listener
        .local_addr()
        .map_err(|err| ServerError::Io {
            context: "read listener address",
            source: err,
        })?;
    info!("{} listening on {}", surface, local);
    Ok(listener)
}
