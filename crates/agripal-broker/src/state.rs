//! Connection state machine and the status handle shared with readers.

use tokio::sync::watch;

/// Lifecycle of the broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// No session and none being attempted.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// CONNACK received; subscriptions are active.
    Connected,
    /// The session failed; waiting out the retry interval.
    Reconnecting,
}

/// Inputs that drive [`LinkState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link starts its first connection attempt.
    Start,
    /// The broker accepted the session.
    ConnAck,
    /// A transport or protocol error, or the broker closed the session.
    Failure,
    /// The fixed retry interval has passed.
    RetryElapsed,
    /// The process is shutting down.
    Shutdown,
}

impl LinkState {
    /// Returns the state reached from `self` on `event`.
    ///
    /// Events that make no sense in the current state leave it unchanged.
    pub fn on(self, event: LinkEvent) -> LinkState {
        match (self, event) {
            (_, LinkEvent::Shutdown) => Self::Disconnected,
            (Self::Disconnected, LinkEvent::Start) => Self::Connecting,
            (Self::Connecting | Self::Connected, LinkEvent::ConnAck) => Self::Connected,
            (Self::Connecting | Self::Connected, LinkEvent::Failure) => Self::Reconnecting,
            (Self::Reconnecting, LinkEvent::RetryElapsed) => Self::Connecting,
            (state, _) => state,
        }
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the link's current state.
///
/// Cheap to clone; every clone observes the same link.
#[derive(Debug, Clone)]
pub struct LinkStatus {
    rx: watch::Receiver<LinkState>,
}

impl LinkStatus {
    /// A status handle pinned to `state`, detached from any link.
    pub fn fixed(state: LinkState) -> Self {
        let (_tx, rx) = watch::channel(state);
        Self { rx }
    }

    pub fn current(&self) -> LinkState {
        *self.rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.current().is_connected()
    }

    /// `"connected"` or `"disconnected"`, as reported by health checks.
    pub fn label(&self) -> &'static str {
        if self.is_connected() {
            "connected"
        } else {
            "disconnected"
        }
    }

    /// A receiver that is notified on every transition.
    pub fn watch(&self) -> watch::Receiver<LinkState> {
        self.rx.clone()
    }
}

/// Write side of the state machine, owned by the link task.
#[derive(Debug)]
pub(crate) struct StateMachine {
    tx: watch::Sender<LinkState>,
}

impl StateMachine {
    pub(crate) fn new() -> (Self, LinkStatus) {
        let (tx, rx) = watch::channel(LinkState::Disconnected);
        (Self { tx }, LinkStatus { rx })
    }

    pub(crate) fn state(&self) -> LinkState {
        *self.tx.borrow()
    }

    /// Applies `event`, publishing and logging any change.
    pub(crate) fn apply(&self, event: LinkEvent) -> LinkState {
        let from = self.state();
        let to = from.on(event);
        if from != to {
            self.tx.send_replace(to);
            tracing::info!(from = %from, to = %to, ?event, "broker link state changed");
        }
        to
    }
}
