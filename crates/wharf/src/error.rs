//! Error types for the `wharf` server framework.
//!
//! This module defines the central [`Error`] enum shared by the worker pool and
//! both server kinds. Variants fall into a few families:
//!
//! ## Configuration
//! - `InvalidBounds`: a pool's sizing functions are missing or inconsistent.
//! - `InvalidNetType`: the transport type is missing or belongs to the other
//!   server kind.
//! - `InvalidBinder`, `InvalidReader`, `InvalidHandler`: a capability contract
//!   was not supplied.
//! - `InvalidPoolOptions`: shared pools and sizing functions were mixed, or
//!   only half of either style was given.
//!
//! ## Lifecycle
//! - `AlreadyStarted`, `AlreadyStopped`, `NotRunning`.
//!
//! ## Runtime
//! - `PeerDisconnected`, `PoolClosed`, `Cancelled`, `InvalidAddr`, `Io`.

use std::net::SocketAddr;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for pools and servers.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Pool sizing functions are missing, or `min > max`, or `max == 0`.
    #[error("Invalid pool bounds: {reason}")]
    InvalidBounds { reason: String },

    /// The transport type is missing or not valid for this server kind.
    #[error("Invalid network type: {reason}")]
    InvalidNetType { reason: String },

    /// No connection/socket bind contract was supplied.
    #[error("Missing bind contract")]
    InvalidBinder,

    /// No message read contract was supplied.
    #[error("Missing read contract")]
    InvalidReader,

    /// No process/write contract was supplied.
    #[error("Missing process/write contract")]
    InvalidHandler,

    /// Shared pools and sizing functions were combined inconsistently.
    #[error("Invalid pool options: {reason}")]
    InvalidPoolOptions { reason: String },

    /// The listen address did not resolve for the configured family.
    #[error("Invalid address {addr:?}: {reason}")]
    InvalidAddr { addr: String, reason: String },

    /// `start` was called on a server that is already running.
    #[error("Server already started")]
    AlreadyStarted,

    /// `stop` was called on a server that is not running.
    #[error("Server already stopped")]
    AlreadyStopped,

    /// A response was submitted while the server has no open socket.
    #[error("Server is not running")]
    NotRunning,

    /// The destination peer has no live connection.
    #[error("Peer {addr} is disconnected")]
    PeerDisconnected { addr: SocketAddr },

    /// Work was submitted to a pool that has been shut down.
    #[error("Pool {name:?} is shut down")]
    PoolClosed { name: String },

    /// The caller's cancellation token fired while waiting for pool capacity.
    #[error("Submission cancelled")]
    Cancelled,

    /// No Tokio runtime was available to spawn workers on.
    #[error("No Tokio runtime available: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
