//! Connection lifecycle state.
//!
//! The machine is advisory: it never rejects a packet by itself. It tells
//! the dispatcher whether the TLS upgrade is currently permitted and when
//! a login exchange has become terminal. State only ever advances along
//! the declared total order.

use tds_wire::PacketType;

/// Lifecycle of a connection, ordered from freshly attached to logged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Pipeline attached, nothing sent.
    Start,
    /// Initial prelogin has been written.
    SentPrelogin,
    /// The server's prelogin response arrived.
    ReceivedPreloginResponse,
    /// TLS handshake records are being exchanged.
    SslHandshakeStarted,
    /// TLS session established; packet framing moved above TLS.
    SslHandshakeComplete,
    /// LOGIN7 has been written.
    SentLogin,
    /// The server acknowledged the login.
    LoggedIn,
}

impl ConnectionState {
    /// State after writing a packet of the given type.
    #[must_use]
    pub fn after_outbound(self, packet_type: PacketType) -> Self {
        match (self, packet_type) {
            (Self::Start, PacketType::PreLogin) => Self::SentPrelogin,
            (state, PacketType::Tds7Login) if state >= Self::ReceivedPreloginResponse => {
                Self::SentLogin
            }
            (state, _) => state,
        }
    }

    /// State after receiving a packet of the given type.
    ///
    /// Real servers answer prelogin with a tabular-result-typed packet,
    /// test fixtures commonly echo the prelogin type; both count.
    #[must_use]
    pub fn after_inbound(self, packet_type: PacketType) -> Self {
        match (self, packet_type) {
            (Self::SentPrelogin, PacketType::PreLogin | PacketType::TabularResult) => {
                Self::ReceivedPreloginResponse
            }
            (Self::SentLogin, PacketType::TabularResult) => Self::LoggedIn,
            (state, _) => state,
        }
    }

    /// Advance to `next` if it is actually ahead of the current state.
    ///
    /// Returns whether the state changed; regressions are ignored, which
    /// keeps the order total and cycle-free.
    pub fn advance_to(&mut self, next: Self) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }

    /// Whether the dispatcher may install the TLS engine right now.
    #[must_use]
    pub fn may_negotiate_tls(self) -> bool {
        self == Self::ReceivedPreloginResponse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_totally_ordered() {
        use ConnectionState::*;
        let order = [
            Start,
            SentPrelogin,
            ReceivedPreloginResponse,
            SslHandshakeStarted,
            SslHandshakeComplete,
            SentLogin,
            LoggedIn,
        ];
        for window in order.windows(2) {
            assert!(window[0] < window[1]);
        }
    }

    #[test]
    fn advance_is_monotone() {
        let mut state = ConnectionState::ReceivedPreloginResponse;
        assert!(!state.advance_to(ConnectionState::SentPrelogin));
        assert_eq!(state, ConnectionState::ReceivedPreloginResponse);

        assert!(state.advance_to(ConnectionState::SslHandshakeStarted));
        assert_eq!(state, ConnectionState::SslHandshakeStarted);

        assert!(!state.advance_to(ConnectionState::SslHandshakeStarted));
    }

    #[test]
    fn prelogin_round_trip_transitions() {
        let mut state = ConnectionState::Start;
        state.advance_to(state.after_outbound(PacketType::PreLogin));
        assert_eq!(state, ConnectionState::SentPrelogin);

        state.advance_to(state.after_inbound(PacketType::PreLogin));
        assert_eq!(state, ConnectionState::ReceivedPreloginResponse);
        assert!(state.may_negotiate_tls());
    }

    #[test]
    fn login_is_permitted_after_prelogin_response_or_handshake() {
        let from_response = ConnectionState::ReceivedPreloginResponse;
        assert_eq!(
            from_response.after_outbound(PacketType::Tds7Login),
            ConnectionState::SentLogin
        );

        let from_handshake = ConnectionState::SslHandshakeComplete;
        assert_eq!(
            from_handshake.after_outbound(PacketType::Tds7Login),
            ConnectionState::SentLogin
        );

        // Too early: a login before the prelogin response changes nothing.
        let early = ConnectionState::SentPrelogin;
        assert_eq!(early.after_outbound(PacketType::Tds7Login), early);
    }

    #[test]
    fn login_response_is_terminal_only_after_login_sent() {
        let mut state = ConnectionState::SentLogin;
        state.advance_to(state.after_inbound(PacketType::TabularResult));
        assert_eq!(state, ConnectionState::LoggedIn);

        let mut idle = ConnectionState::LoggedIn;
        assert!(!idle.advance_to(idle.after_inbound(PacketType::TabularResult)));
    }

    #[test]
    fn unrelated_packets_leave_state_unchanged() {
        let state = ConnectionState::LoggedIn;
        assert_eq!(state.after_outbound(PacketType::SqlBatch), state);
        assert_eq!(state.after_inbound(PacketType::TabularResult), state);
        assert!(!state.may_negotiate_tls());
    }
}
