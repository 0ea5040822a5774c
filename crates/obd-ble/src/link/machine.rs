//! Link state machine
//!
//! A single synchronous transition function. Every scan result, connection
//! outcome and disconnect is routed through [`LinkStateMachine::handle`],
//! which updates the state and returns the transport work the caller must
//! perform. The outcome of that work is fed back as another [`LinkEvent`].

use tracing::debug;
use uuid::Uuid;

use super::LinkState;
use crate::transport::AdapterRecord;

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Begin discovery
    StartScan,
    /// An advertiser was reported by the scan
    AdapterFound(AdapterRecord),
    ConnectSucceeded,
    ConnectFailed(String),
    /// The command characteristic exists; `notify_enabled` is false when
    /// notifications could not be enabled on it
    CharacteristicFound { notify_enabled: bool },
    CharacteristicMissing,
    /// Local request to close the link
    CloseRequested,
    /// The connection is gone (remote drop, link loss or completed close)
    Disconnected,
    /// Unrecoverable failure of the current attempt
    FatalError(String),
}

/// Transport work requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    StartScan,
    StopScan,
    Connect(AdapterRecord),
    /// Discover the command characteristic and enable notifications
    Subscribe,
    Disconnect,
}

/// Result of handling one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: LinkState,
    pub to: LinkState,
    pub actions: Vec<LinkAction>,
}

impl Transition {
    fn stay(state: LinkState) -> Self {
        Self {
            from: state,
            to: state,
            actions: Vec::new(),
        }
    }

    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    pub fn entered(&self, state: LinkState) -> bool {
        self.changed() && self.to == state
    }

    pub fn left(&self, state: LinkState) -> bool {
        self.changed() && self.from == state
    }
}

/// Owner of the single [`LinkState`]
#[derive(Debug)]
pub struct LinkStateMachine {
    state: LinkState,
    service: Uuid,
}

impl LinkStateMachine {
    /// Create a machine that accepts advertisers of `service`
    pub fn new(service: Uuid) -> Self {
        Self {
            state: LinkState::Idle,
            service,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn service(&self) -> Uuid {
        self.service
    }

    pub fn handle(&mut self, event: LinkEvent) -> Transition {
        use LinkAction as A;
        use LinkState as S;

        let from = self.state;
        let (to, actions) = match (from, event) {
            (S::Idle, LinkEvent::StartScan) => (S::Scanning, vec![A::StartScan]),

            // First advertiser exposing the service wins
            (S::Scanning, LinkEvent::AdapterFound(record)) if record.advertises(&self.service) => {
                (S::Connecting, vec![A::StopScan, A::Connect(record)])
            }

            (S::Connecting, LinkEvent::ConnectSucceeded) => (S::Subscribing, vec![A::Subscribe]),
            (S::Connecting, LinkEvent::ConnectFailed(reason)) => {
                debug!(%reason, "Connect failed");
                (S::Idle, vec![A::Disconnect])
            }

            (S::Subscribing, LinkEvent::CharacteristicFound { notify_enabled: true }) => {
                (S::Ready, Vec::new())
            }
            (S::Subscribing, LinkEvent::CharacteristicFound { notify_enabled: false })
            | (S::Subscribing, LinkEvent::CharacteristicMissing) => {
                (S::Idle, vec![A::Disconnect])
            }

            (S::Scanning, LinkEvent::CloseRequested) => (S::Idle, vec![A::StopScan]),
            (S::Connecting | S::Subscribing | S::Ready, LinkEvent::CloseRequested) => {
                (S::Disconnecting, vec![A::Disconnect])
            }

            // Remote drop; the transport still holds the dead connection
            (S::Connecting | S::Subscribing | S::Ready, LinkEvent::Disconnected) => {
                (S::Idle, vec![A::Disconnect])
            }
            (S::Disconnecting, LinkEvent::Disconnected) => (S::Idle, Vec::new()),

            (S::Scanning, LinkEvent::FatalError(reason)) => {
                debug!(%reason, "Fatal error while scanning");
                (S::Idle, vec![A::StopScan])
            }
            (state, LinkEvent::FatalError(reason)) if state.holds_connection() => {
                debug!(%reason, %state, "Fatal error");
                (S::Idle, vec![A::Disconnect])
            }

            (state, event) => {
                debug!(%state, ?event, "Event ignored");
                return Transition::stay(state);
            }
        };

        self.state = to;
        Transition { from, to, actions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::uuid_from_u16;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn record(service: u16) -> AdapterRecord {
        AdapterRecord {
            address: "66:1E:32:00:0B:D2".to_string(),
            name: Some("OBDII".to_string()),
            services: vec![uuid_from_u16(service)],
            rssi: Some(-60),
        }
    }

    fn machine() -> LinkStateMachine {
        LinkStateMachine::new(uuid_from_u16(0xFFF0))
    }

    fn ready_machine() -> LinkStateMachine {
        let m = drive(4);
        assert_eq!(m.state(), LinkState::Ready);
        m
    }

    /// Apply the first `steps` events of a successful connection
    fn drive(steps: usize) -> LinkStateMachine {
        let mut m = machine();
        let events = [
            LinkEvent::StartScan,
            LinkEvent::AdapterFound(record(0xFFF0)),
            LinkEvent::ConnectSucceeded,
            LinkEvent::CharacteristicFound { notify_enabled: true },
        ];
        for event in events.into_iter().take(steps) {
            m.handle(event);
        }
        m
    }

    #[test]
    fn test_happy_path() {
        let mut m = machine();

        let t = m.handle(LinkEvent::StartScan);
        assert_eq!(t.to, LinkState::Scanning);
        assert_eq!(t.actions, vec![LinkAction::StartScan]);

        let t = m.handle(LinkEvent::AdapterFound(record(0xFFF0)));
        assert_eq!(t.to, LinkState::Connecting);
        assert_eq!(
            t.actions,
            vec![LinkAction::StopScan, LinkAction::Connect(record(0xFFF0))]
        );

        let t = m.handle(LinkEvent::ConnectSucceeded);
        assert_eq!(t.to, LinkState::Subscribing);
        assert_eq!(t.actions, vec![LinkAction::Subscribe]);

        let t = m.handle(LinkEvent::CharacteristicFound { notify_enabled: true });
        assert!(t.entered(LinkState::Ready));
        assert!(t.actions.is_empty());
    }

    #[test]
    fn test_foreign_advertiser_is_ignored() {
        let mut m = machine();
        m.handle(LinkEvent::StartScan);

        let t = m.handle(LinkEvent::AdapterFound(record(0x180D)));
        assert!(!t.changed());
        assert_eq!(m.state(), LinkState::Scanning);
    }

    #[test]
    fn test_first_match_wins() {
        let mut m = machine();
        m.handle(LinkEvent::StartScan);
        m.handle(LinkEvent::AdapterFound(record(0xFFF0)));

        let mut other = record(0xFFF0);
        other.address = "11:22:33:44:55:66".to_string();
        let t = m.handle(LinkEvent::AdapterFound(other));
        assert!(!t.changed());
        assert!(t.actions.is_empty());
        assert_eq!(m.state(), LinkState::Connecting);
    }

    #[test]
    fn test_connect_failure_returns_to_idle() {
        let mut m = machine();
        m.handle(LinkEvent::StartScan);
        m.handle(LinkEvent::AdapterFound(record(0xFFF0)));

        let t = m.handle(LinkEvent::ConnectFailed("timeout".to_string()));
        assert!(t.entered(LinkState::Idle));
        assert_eq!(t.actions, vec![LinkAction::Disconnect]);
    }

    #[test]
    fn test_characteristic_failures_return_to_idle() {
        for event in [
            LinkEvent::CharacteristicMissing,
            LinkEvent::CharacteristicFound { notify_enabled: false },
        ] {
            let mut m = machine();
            m.handle(LinkEvent::StartScan);
            m.handle(LinkEvent::AdapterFound(record(0xFFF0)));
            m.handle(LinkEvent::ConnectSucceeded);

            let t = m.handle(event);
            assert_eq!(t.to, LinkState::Idle);
            assert_eq!(t.actions, vec![LinkAction::Disconnect]);
        }
    }

    #[test]
    fn test_reconnection_after_disconnect() {
        let mut m = ready_machine();

        let t = m.handle(LinkEvent::Disconnected);
        assert!(t.left(LinkState::Ready));
        assert_eq!(t.to, LinkState::Idle);

        m.handle(LinkEvent::StartScan);
        m.handle(LinkEvent::AdapterFound(record(0xFFF0)));
        m.handle(LinkEvent::ConnectSucceeded);
        m.handle(LinkEvent::CharacteristicFound { notify_enabled: true });
        assert_eq!(m.state(), LinkState::Ready);
    }

    #[test]
    fn test_repeated_disconnect_is_noop() {
        let mut m = ready_machine();
        assert!(m.handle(LinkEvent::Disconnected).changed());

        for _ in 0..3 {
            let t = m.handle(LinkEvent::Disconnected);
            assert!(!t.changed());
            assert!(t.actions.is_empty());
        }

        m.handle(LinkEvent::StartScan);
        let t = m.handle(LinkEvent::Disconnected);
        assert!(!t.changed());
        assert_eq!(m.state(), LinkState::Scanning);
    }

    #[rstest]
    #[case(2, LinkState::Connecting)]
    #[case(3, LinkState::Subscribing)]
    #[case(4, LinkState::Ready)]
    fn test_disconnect_from_connected_states(#[case] steps: usize, #[case] state: LinkState) {
        let mut m = drive(steps);
        assert_eq!(m.state(), state);

        let t = m.handle(LinkEvent::Disconnected);
        assert_eq!(t.to, LinkState::Idle);
        assert_eq!(t.actions, vec![LinkAction::Disconnect]);
    }

    #[test]
    fn test_close_goes_through_disconnecting() {
        let mut m = ready_machine();

        let t = m.handle(LinkEvent::CloseRequested);
        assert_eq!(t.to, LinkState::Disconnecting);
        assert_eq!(t.actions, vec![LinkAction::Disconnect]);

        // A second close while closing does nothing
        assert!(!m.handle(LinkEvent::CloseRequested).changed());

        // The close already released the connection
        let t = m.handle(LinkEvent::Disconnected);
        assert_eq!(t.to, LinkState::Idle);
        assert!(t.actions.is_empty());
    }

    #[test]
    fn test_close_while_scanning_stops_scan() {
        let mut m = machine();
        m.handle(LinkEvent::StartScan);

        let t = m.handle(LinkEvent::CloseRequested);
        assert_eq!(t.to, LinkState::Idle);
        assert_eq!(t.actions, vec![LinkAction::StopScan]);
    }

    #[test]
    fn test_fatal_error_from_every_state() {
        let mut m = machine();
        assert!(!m.handle(LinkEvent::FatalError("x".into())).changed());

        m.handle(LinkEvent::StartScan);
        let t = m.handle(LinkEvent::FatalError("scan refused".into()));
        assert_eq!(t.to, LinkState::Idle);
        assert_eq!(t.actions, vec![LinkAction::StopScan]);

        let mut m = ready_machine();
        let t = m.handle(LinkEvent::FatalError("write failed".into()));
        assert_eq!(t.to, LinkState::Idle);
        assert_eq!(t.actions, vec![LinkAction::Disconnect]);

        let mut m = ready_machine();
        m.handle(LinkEvent::CloseRequested);
        let t = m.handle(LinkEvent::FatalError("disconnect failed".into()));
        assert_eq!(t.to, LinkState::Idle);
    }

    #[test]
    fn test_out_of_order_events_are_ignored() {
        let mut m = machine();
        for event in [
            LinkEvent::ConnectSucceeded,
            LinkEvent::CharacteristicFound { notify_enabled: true },
            LinkEvent::AdapterFound(record(0xFFF0)),
            LinkEvent::CloseRequested,
        ] {
            assert!(!m.handle(event).changed());
        }
        assert_eq!(m.state(), LinkState::Idle);

        let mut m = ready_machine();
        assert!(!m.handle(LinkEvent::StartScan).changed());
        assert!(!m.handle(LinkEvent::ConnectSucceeded).changed());
        assert_eq!(m.state(), LinkState::Ready);
    }
}
