//! Listening socket setup.

use crate::error::ServerError;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Listen backlog handed to the kernel.
const BACKLOG: i32 = 1024;

/// Resolve `address` (`host:port`) and bind a listening socket to the first
/// address that works. No retries: failure is returned to the caller.
pub async fn bind(address: &str) -> Result<TcpListener, ServerError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(address)
        .await
        .map_err(|e| ServerError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        match create_listener(addr) {
            Ok(listener) => {
                return TcpListener::from_std(listener).map_err(|e| bind_error(address, e));
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(match last_err {
        Some(e) => bind_error(address, e),
        None => ServerError::InvalidAddress {
            address: address.to_string(),
            reason: "address resolved to nothing".to_string(),
        },
    })
}

fn bind_error(address: &str, source: io::Error) -> ServerError {
    ServerError::Bind {
        address: address.to_string(),
        source,
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR set.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
