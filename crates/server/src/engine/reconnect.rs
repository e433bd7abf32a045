//! Reconnection state machine for wait mode
//!
//! Pure bookkeeping: the engine reports what each iteration observed and
//! carries out the returned [`ReconnectAction`]. The phases are:
//!
//! ```text
//! Idle ──not disconnected──> Connected
//! Connected ──timed wake──> PollingAbsence ──probe: gone──> Reconnecting
//!                                           └─probe: present──> Connected
//! Connected ──disconnected──> Reconnecting
//! Reconnecting ──device rebound──> Connected
//! Reconnecting ──transport closed / shutdown──> Idle
//! ```

use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReconnectPhase {
    /// No opinion yet about the device
    #[default]
    Idle,
    /// Device verified present
    Connected,
    /// Handle believed present, liveness probe pending
    PollingAbsence,
    /// Rebuilding the device binding
    Reconnecting,
}

/// What the engine must do after an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    Nothing,
    /// Query the device for its configuration and report back through
    /// [`ReconnectMachine::probe_finished`]
    Probe,
    /// Run the reconnection procedure
    Reconnect,
}

#[derive(Debug, Default)]
pub struct ReconnectMachine {
    phase: ReconnectPhase,
}

impl ReconnectMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ReconnectPhase {
        self.phase
    }

    fn enter(&mut self, phase: ReconnectPhase) {
        if self.phase != phase {
            debug!("wait mode: {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Feed one loop iteration's observation
    ///
    /// `disconnected` is the host's view of the device, `timed_out` whether
    /// the wait ended without any ready descriptor.
    pub fn observe(&mut self, disconnected: bool, timed_out: bool) -> ReconnectAction {
        match self.phase {
            ReconnectPhase::Idle => {
                if !disconnected {
                    self.enter(ReconnectPhase::Connected);
                }
                ReconnectAction::Nothing
            }
            ReconnectPhase::Connected if timed_out => {
                self.enter(ReconnectPhase::PollingAbsence);
                ReconnectAction::Probe
            }
            ReconnectPhase::Connected if disconnected => {
                self.enter(ReconnectPhase::Reconnecting);
                ReconnectAction::Reconnect
            }
            ReconnectPhase::Connected => ReconnectAction::Nothing,
            ReconnectPhase::PollingAbsence => ReconnectAction::Probe,
            ReconnectPhase::Reconnecting => ReconnectAction::Reconnect,
        }
    }

    /// Result of the liveness probe; `disconnected` already accounts for a
    /// forced disconnect after a failed probe
    pub fn probe_finished(&mut self, disconnected: bool) -> ReconnectAction {
        if disconnected {
            self.enter(ReconnectPhase::Reconnecting);
            ReconnectAction::Reconnect
        } else {
            self.enter(ReconnectPhase::Connected);
            ReconnectAction::Nothing
        }
    }

    /// A fresh host is bound to the returned device
    pub fn reconnected(&mut self) {
        self.enter(ReconnectPhase::Connected);
    }

    /// Reconnection gave up because the transport closed or shutdown was
    /// requested
    pub fn abandoned(&mut self) {
        self.enter(ReconnectPhase::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_waits_for_connected_device() {
        let mut machine = ReconnectMachine::new();
        assert_eq!(machine.observe(true, true), ReconnectAction::Nothing);
        assert_eq!(machine.phase(), ReconnectPhase::Idle);

        assert_eq!(machine.observe(false, false), ReconnectAction::Nothing);
        assert_eq!(machine.phase(), ReconnectPhase::Connected);
    }

    #[test]
    fn test_first_observation_never_probes() {
        let mut machine = ReconnectMachine::new();
        assert_eq!(machine.observe(false, true), ReconnectAction::Nothing);
        assert_eq!(machine.phase(), ReconnectPhase::Connected);
    }

    #[test]
    fn test_timed_wake_probes_device() {
        let mut machine = ReconnectMachine::new();
        machine.observe(false, false);

        assert_eq!(machine.observe(false, true), ReconnectAction::Probe);
        assert_eq!(machine.phase(), ReconnectPhase::PollingAbsence);

        assert_eq!(machine.probe_finished(false), ReconnectAction::Nothing);
        assert_eq!(machine.phase(), ReconnectPhase::Connected);
    }

    #[test]
    fn test_failed_probe_reconnects() {
        let mut machine = ReconnectMachine::new();
        machine.observe(false, false);
        machine.observe(false, true);

        assert_eq!(machine.probe_finished(true), ReconnectAction::Reconnect);
        assert_eq!(machine.phase(), ReconnectPhase::Reconnecting);

        machine.reconnected();
        assert_eq!(machine.phase(), ReconnectPhase::Connected);
    }

    #[test]
    fn test_reported_disconnect_reconnects_without_probe() {
        let mut machine = ReconnectMachine::new();
        machine.observe(false, false);

        assert_eq!(machine.observe(true, false), ReconnectAction::Reconnect);
        assert_eq!(machine.phase(), ReconnectPhase::Reconnecting);
    }

    #[test]
    fn test_abandon_returns_to_idle() {
        let mut machine = ReconnectMachine::new();
        machine.observe(false, false);
        machine.observe(true, false);

        machine.abandoned();
        assert_eq!(machine.phase(), ReconnectPhase::Idle);
        assert_eq!(machine.observe(true, true), ReconnectAction::Nothing);
    }
}
