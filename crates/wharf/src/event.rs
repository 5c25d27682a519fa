//! Event notification hook for server observability.
//!
//! Both servers accept an optional [`EventFn`] that is called with a category
//! (one of the constants below) and a human-readable detail string. The detail
//! is only formatted when a callback is installed, so leaving the hook unset
//! costs nothing.

use std::sync::Arc;

/// Callback invoked with `(category, detail)`.
pub type EventFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// The listening/bound socket was opened.
pub const START: &str = "start";
/// The server finished stopping.
pub const STOP: &str = "stop";
/// A stream connection was accepted and registered.
pub const ACCEPT: &str = "accept";
/// A stream connection arrived before the rate limit allowed it.
pub const REJECT: &str = "reject";
/// A stream connection was closed because drop-connections mode is on.
pub const DROP: &str = "drop";
/// A second connection claimed an address that is already registered.
pub const DUPLICATE: &str = "duplicate";
/// A stream connection ended and was deregistered.
pub const DISCONNECT: &str = "disconnect";
/// `accept` failed.
pub const ACCEPT_ERROR: &str = "accept_error";
/// Reading a message or packet failed.
pub const READ_ERROR: &str = "read_error";
/// Writing a response failed.
pub const WRITE_ERROR: &str = "write_error";
/// The bind contract rejected a transport.
pub const BIND_ERROR: &str = "bind_error";

#[derive(Clone, Default)]
pub(crate) struct Notifier(Option<EventFn>);

impl Notifier {
    pub(crate) fn new(callback: Option<EventFn>) -> Self {
        Self(callback)
    }

    pub(crate) fn emit(&self, category: &str, detail: impl FnOnce() -> String) {
        if let Some(callback) = &self.0 {
            callback(category, &detail());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn emits_only_when_installed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let notifier = Notifier::new(Some(Arc::new(move |category: &str, detail: &str| {
            sink.lock().push(format!("{category}:{detail}"));
        })));
        notifier.emit(ACCEPT, || "127.0.0.1:9000".to_string());
        assert_eq!(seen.lock().as_slice(), ["accept:127.0.0.1:9000"]);

        let silent = Notifier::default();
        silent.emit(ACCEPT, || unreachable!("detail must not be formatted"));
    }
}
