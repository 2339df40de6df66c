// Actuator safety state machine
//
// Disabled -> VelocityControl on a velocity or enable command,
// VelocityControl/Disabled -> Emergency when the command path stays silent
// for a whole watchdog window, Emergency -> VelocityControl on a fresh
// velocity command.

use std::time::Duration;

use tracing::warn;

use crate::protocol::{ControlState, Side};

/// Control mode of both actuators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActuatorStatus {
    pub left: ControlState,
    pub right: ControlState,
}

impl ActuatorStatus {
    pub fn uniform(state: ControlState) -> Self {
        Self {
            left: state,
            right: state,
        }
    }

    /// True when both actuators are in `state`
    pub fn all(&self, state: ControlState) -> bool {
        self.left == state && self.right == state
    }

    pub fn get(&self, side: Side) -> ControlState {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

/// Idle-time accumulator for the command path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watchdog {
    window: Duration,
    idle: Duration,
}

impl Watchdog {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            idle: Duration::ZERO,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn idle(&self) -> Duration {
        self.idle
    }

    pub fn reset(&mut self) {
        self.idle = Duration::ZERO;
    }

    /// Add `elapsed` of silence. Returns true (and starts over) once the
    /// window is reached.
    pub fn accumulate(&mut self, elapsed: Duration) -> bool {
        self.idle += elapsed;
        if self.idle >= self.window {
            self.idle = Duration::ZERO;
            return true;
        }
        false
    }
}

/// Outcome of one safety evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyAction {
    /// Nothing to enforce
    Idle,
    /// Still counting down, keep ticking
    Waiting,
    /// Source is live and driving: refresh the setpoints
    KeepAlive,
    /// Window expired: both actuators were switched to Emergency
    EmergencyStop,
    /// Emergency not yet delivered to the board, send the stop again
    Enforcing,
}

impl SafetyAction {
    /// Whether the heartbeat must keep running for this action
    pub fn is_outstanding(self) -> bool {
        !matches!(self, SafetyAction::Idle)
    }
}

/// Evaluate the watchdog for one tick
///
/// A live source is a continuous reset. Once both actuators are in
/// Emergency nothing more is reported until a command moves them out.
pub fn evaluate(
    status: &mut ActuatorStatus,
    watchdog: &mut Watchdog,
    elapsed: Duration,
    source_active: bool,
) -> SafetyAction {
    if source_active {
        watchdog.reset();
        return if status.all(ControlState::Velocity) {
            SafetyAction::KeepAlive
        } else {
            SafetyAction::Waiting
        };
    }

    if status.all(ControlState::Emergency) {
        watchdog.reset();
        return SafetyAction::Idle;
    }

    if watchdog.accumulate(elapsed) {
        warn!(
            "No velocity command for {:?}, forcing emergency stop",
            watchdog.window()
        );
        *status = ActuatorStatus::uniform(ControlState::Emergency);
        return SafetyAction::EmergencyStop;
    }
    SafetyAction::Waiting
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watchdog_crosses_once() {
        let mut status = ActuatorStatus::default();
        let mut watchdog = Watchdog::new(Duration::from_secs(1));
        let tick = Duration::from_millis(300);

        let actions: Vec<_> = (0..8)
            .map(|_| evaluate(&mut status, &mut watchdog, tick, false))
            .collect();

        assert_eq!(
            actions,
            vec![
                SafetyAction::Waiting,
                SafetyAction::Waiting,
                SafetyAction::Waiting,
                SafetyAction::EmergencyStop,
                SafetyAction::Idle,
                SafetyAction::Idle,
                SafetyAction::Idle,
                SafetyAction::Idle,
            ]
        );
        assert!(status.all(ControlState::Emergency));
    }

    #[test]
    fn test_live_source_resets_accumulator() {
        let mut status = ActuatorStatus::uniform(ControlState::Velocity);
        let mut watchdog = Watchdog::new(Duration::from_secs(1));

        evaluate(&mut status, &mut watchdog, Duration::from_millis(900), false);
        assert_eq!(watchdog.idle(), Duration::from_millis(900));

        let action = evaluate(&mut status, &mut watchdog, Duration::from_millis(900), true);
        assert_eq!(action, SafetyAction::KeepAlive);
        assert_eq!(watchdog.idle(), Duration::ZERO);

        let action = evaluate(&mut status, &mut watchdog, Duration::from_millis(900), false);
        assert_eq!(action, SafetyAction::Waiting, "Accumulator restarted from zero");
    }

    #[test]
    fn test_live_source_while_disabled_waits() {
        let mut status = ActuatorStatus::default();
        let mut watchdog = Watchdog::new(Duration::from_secs(1));
        let action = evaluate(&mut status, &mut watchdog, Duration::from_secs(5), true);
        assert_eq!(action, SafetyAction::Waiting);
        assert!(status.all(ControlState::Disabled));
    }

    #[test]
    fn test_only_idle_is_not_outstanding() {
        assert!(!SafetyAction::Idle.is_outstanding());
        assert!(SafetyAction::Waiting.is_outstanding());
        assert!(SafetyAction::EmergencyStop.is_outstanding());
        assert!(SafetyAction::Enforcing.is_outstanding());
    }
}
