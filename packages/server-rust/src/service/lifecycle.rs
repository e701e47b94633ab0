//! Per-request dispatch state machine.

use std::fmt;

use super::operation::ErrorKind;

/// Stage a request has reached inside the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    Routed,
    Authorized,
    Deserialized,
    Executed,
    Serialized,
    Completed,
    Error(ErrorKind),
}

impl DispatchState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error(_))
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Routed => "routed",
            Self::Authorized => "authorized",
            Self::Deserialized => "deserialized",
            Self::Executed => "executed",
            Self::Serialized => "serialized",
            Self::Completed => "completed",
            Self::Error(_) => "error",
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(kind) => write!(f, "error({kind})"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal dispatch transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: DispatchState,
    pub to: DispatchState,
}

/// Tracks one request through the states
/// `Received -> Routed -> Authorized -> Deserialized -> Executed -> Serialized -> Completed`.
///
/// One-way requests skip `Serialized` (`Executed -> Completed`). Any
/// non-terminal state may move to `Error`; terminal states accept nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchLifecycle {
    state: DispatchState,
}

impl Default for DispatchLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchLifecycle {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: DispatchState::Received,
        }
    }

    #[must_use]
    pub const fn state(&self) -> DispatchState {
        self.state
    }

    /// Moves to `to`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalTransition` (leaving the state unchanged) when `to` is
    /// not a legal successor of the current state.
    pub fn advance(&mut self, to: DispatchState) -> Result<(), IllegalTransition> {
        use DispatchState::{
            Authorized, Completed, Deserialized, Error, Executed, Received, Routed, Serialized,
        };

        let legal = match (self.state, to) {
            (from, Error(_)) => !from.is_terminal(),
            (Received, Routed)
            | (Routed, Authorized)
            | (Authorized, Deserialized)
            | (Deserialized, Executed)
            | (Executed, Serialized | Completed)
            | (Serialized, Completed) => true,
            _ => false,
        };

        if legal {
            self.state = to;
            Ok(())
        } else {
            Err(IllegalTransition {
                from: self.state,
                to,
            })
        }
    }

    /// Moves to `Error(kind)` unless already terminal.
    pub fn fail(&mut self, kind: ErrorKind) {
        let _ = self.advance(DispatchState::Error(kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_path_walks_every_state() {
        let mut lc = DispatchLifecycle::new();
        for next in [
            DispatchState::Routed,
            DispatchState::Authorized,
            DispatchState::Deserialized,
            DispatchState::Executed,
            DispatchState::Serialized,
            DispatchState::Completed,
        ] {
            lc.advance(next).unwrap();
        }
        assert!(lc.state().is_terminal());
    }

    #[test]
    fn one_way_path_skips_serialization() {
        let mut lc = DispatchLifecycle::new();
        lc.advance(DispatchState::Routed).unwrap();
        lc.advance(DispatchState::Authorized).unwrap();
        lc.advance(DispatchState::Deserialized).unwrap();
        lc.advance(DispatchState::Executed).unwrap();
        lc.advance(DispatchState::Completed).unwrap();
    }

    #[test]
    fn skipping_authorization_is_rejected() {
        let mut lc = DispatchLifecycle::new();
        lc.advance(DispatchState::Routed).unwrap();
        let err = lc.advance(DispatchState::Deserialized).unwrap_err();
        assert_eq!(err.from, DispatchState::Routed);
        assert_eq!(lc.state(), DispatchState::Routed);
    }

    #[test]
    fn error_is_terminal() {
        let mut lc = DispatchLifecycle::new();
        lc.fail(ErrorKind::RouteNotFound);
        assert_eq!(lc.state(), DispatchState::Error(ErrorKind::RouteNotFound));
        assert!(lc.advance(DispatchState::Routed).is_err());

        lc.fail(ErrorKind::HandlerFault);
        assert_eq!(lc.state(), DispatchState::Error(ErrorKind::RouteNotFound));
    }

    #[test]
    fn completed_cannot_fail() {
        let mut lc = DispatchLifecycle::new();
        for next in [
            DispatchState::Routed,
            DispatchState::Authorized,
            DispatchState::Deserialized,
            DispatchState::Executed,
            DispatchState::Completed,
        ] {
            lc.advance(next).unwrap();
        }
        assert!(lc.advance(DispatchState::Error(ErrorKind::TimedOut)).is_err());
    }
}
