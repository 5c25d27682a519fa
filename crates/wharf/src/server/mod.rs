//! Stream and datagram servers.
//!
//! Both server kinds share the same shape: a validated config, a background
//! task that pulls work off a socket, a receive pool that runs the caller's
//! processing logic, and a send pool that runs the caller's write logic.
//!
//! ## Submodules
//!
//! - `net`: Transport families and address resolution.
//! - `message`: [`Request`] and [`Response`] values.
//! - `pools`: Shared vs. owned receive/send pools.
//! - `stream`: Connection-oriented server.
//! - `datagram`: Packet-oriented server.

mod datagram;
mod message;
mod net;
mod pools;
mod stream;

pub use datagram::*;
pub use message::*;
pub use net::*;
pub use pools::*;
pub use stream::*;

use crate::pool::Stats;
use core::time::Duration;
use std::io;

/// Utilization snapshot for one server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Registered connections. Always zero for datagram servers.
    pub peers: usize,
    pub recv: Stats,
    pub send: Stats,
}

/// Pause after the process runs out of file descriptors, giving in-flight
/// connections a chance to close before `accept` is retried.
pub(crate) const EXHAUSTION_BACKOFF: Duration = Duration::from_millis(50);

/// Errors after which the socket is still usable and the loop should go on.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
    ) || is_exhaustion(err)
}

/// `ENFILE` / `EMFILE`.
#[cfg(unix)]
const EXHAUSTION_CODES: &[i32] = &[23, 24];
/// `WSAEMFILE`.
#[cfg(windows)]
const EXHAUSTION_CODES: &[i32] = &[10024];
#[cfg(not(any(unix, windows)))]
const EXHAUSTION_CODES: &[i32] = &[];

/// The process or system ran out of descriptors.
pub(crate) fn is_exhaustion(err: &io::Error) -> bool {
    err.raw_os_error()
        .is_some_and(|code| EXHAUSTION_CODES.contains(&code))
}

/// Read errors a connection survives. Anything else, including a reset,
/// ends the connection.
pub(crate) fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transport_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        for &code in EXHAUSTION_CODES {
            assert!(is_exhaustion(&io::Error::from_raw_os_error(code)));
            assert!(is_transient(&io::Error::from_raw_os_error(code)));
        }
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));

        assert!(is_retryable(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_retryable(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_retryable(&io::Error::from(io::ErrorKind::InvalidData)));
    }

    #[cfg(unix)]
    #[test]
    fn recognizes_descriptor_exhaustion_on_unix() {
        assert!(is_exhaustion(&io::Error::from_raw_os_error(24)));
        assert!(!is_exhaustion(&io::Error::from_raw_os_error(10024)));
    }

    #[cfg(windows)]
    #[test]
    fn recognizes_descriptor_exhaustion_on_windows() {
        assert!(is_exhaustion(&io::Error::from_raw_os_error(10024)));
        assert!(!is_exhaustion(&io::Error::from_raw_os_error(24)));
    }
}
