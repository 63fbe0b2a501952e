//! Connection state machine states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one peer session
///
/// States only move forward, one stage at a time. `Closed` and `Failed` are
/// terminal and can be reached from any live stage, except that an `Open`
/// session only ever closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelState {
    /// Nothing started yet
    Idle,
    /// Credentials posted to the relay
    Authenticating,
    /// Local offer being created and posted
    OfferSent,
    /// Offer delivered, relay reply being checked for the answer
    AnswerPending,
    /// Answer applied, waiting for the engine to open the channel
    IceExchanging,
    /// Data channel ready
    Open,
    /// Closed locally or by the remote side
    Closed,
    /// Aborted by a fatal error
    Failed,
}

impl ChannelState {
    /// True for `Closed` and `Failed`
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    fn stage(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Authenticating => 1,
            Self::OfferSent => 2,
            Self::AnswerPending => 3,
            Self::IceExchanging => 4,
            Self::Open => 5,
            Self::Closed | Self::Failed => u8::MAX,
        }
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Closed => true,
            Self::Failed => !matches!(self, Self::Idle | Self::Open),
            _ => next.stage() == self.stage() + 1,
        }
    }

    /// True while `connect()` is still negotiating
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            Self::Authenticating | Self::OfferSent | Self::AnswerPending | Self::IceExchanging
        )
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::ChannelState::*;
    use super::*;

    const ALL: [ChannelState; 8] = [
        Idle,
        Authenticating,
        OfferSent,
        AnswerPending,
        IceExchanging,
        Open,
        Closed,
        Failed,
    ];

    #[test]
    fn test_happy_path_is_legal() {
        let path = [Idle, Authenticating, OfferSent, AnswerPending, IceExchanging, Open, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        assert!(!Idle.can_transition_to(OfferSent));
        assert!(!Authenticating.can_transition_to(IceExchanging));
        assert!(!AnswerPending.can_transition_to(Open));
        assert!(!Open.can_transition_to(IceExchanging));
        assert!(!OfferSent.can_transition_to(Authenticating));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for next in ALL {
            assert!(!Closed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_failure_only_while_negotiating() {
        for state in ALL {
            assert_eq!(state.can_transition_to(Failed), state.is_connecting(), "{}", state);
        }
    }

    #[test]
    fn test_close_from_any_live_state() {
        for state in ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(state.can_transition_to(Closed));
        }
    }
}
