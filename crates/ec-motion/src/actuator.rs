//! Actuator state machine.
//!
//! Drives one axis through home, positioning, end-stop moves, jog and stop
//! using synchronous signal writes and a deadline-bounded poll loop:
//!
//! ```text
//! IDLE ──home──► HOMING ──complete──► IDLE (homed)
//! IDLE ──move/jog──► MOVING ──complete/stop──► IDLE
//! any ──alarm──► ALARM ──reset_alarm──► IDLE
//! ```
//!
//! Every poll is a cancellable wait: [`Actuator::stop`] from another thread
//! wakes it immediately and the motion returns [`ActuatorError::Cancelled`].
//! The command signal that started a motion is cleared on every exit path,
//! and only after that does the axis leave HOMING/MOVING, so a new motion
//! cannot start while the cancelled one still owns its command bit.

use crate::codec::AxisCommand;
use crate::io::{AxisIo, PositionIo};
use crate::signals::{Direction, Parameter, Signal};
use ec_common::config::{ControllerConfig, MotionConfig, TimingConfig};
use ec_common::error::{ActuatorError, EcResult};
use ec_common::limits::MotionLimits;
use ec_common::state::{AxisState, StateMachine};
use ec_common::units;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Span};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Generation counter bumped by every `stop()`. A wait started under one
/// generation ends as soon as the counter moves on.
#[derive(Debug, Default)]
struct CancelToken {
    generation: Mutex<u64>,
    wake: Condvar,
}

impl CancelToken {
    fn ticket(&self) -> u64 {
        *lock(&self.generation)
    }

    fn cancel(&self) {
        let mut generation = lock(&self.generation);
        *generation = generation.wrapping_add(1);
        self.wake.notify_all();
    }

    /// Block for up to `timeout`. Returns true if cancelled since `ticket`.
    fn wait(&self, ticket: u64, timeout: Duration) -> bool {
        let guard = lock(&self.generation);
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, timeout, |generation| *generation == ticket)
            .unwrap_or_else(PoisonError::into_inner);
        *guard != ticket
    }
}

/// One actuator axis.
///
/// All methods take `&self`; share the actuator across threads to call
/// [`stop`](Self::stop) while a motion is blocking another thread.
#[derive(Debug)]
pub struct Actuator<IO> {
    io: IO,
    limits: MotionLimits,
    motion: MotionConfig,
    timing: TimingConfig,
    model: String,
    state: Mutex<StateMachine>,
    homed: AtomicBool,
    /// A blocking motion is in flight. Only changed under the state lock.
    driving: AtomicBool,
    cancel: CancelToken,
    span: Span,
}

impl<IO: AxisIo> Actuator<IO> {
    /// Create an actuator over `io`, taking limits and timing from `config`.
    pub fn new(io: IO, config: &ControllerConfig) -> Self {
        let span = info_span!("actuator", axis = %io.describe());
        Self {
            io,
            limits: MotionLimits::from_config(config),
            motion: config.motion.clone(),
            timing: config.timing.clone(),
            model: config.controller.model.clone(),
            state: Mutex::new(StateMachine::new()),
            homed: AtomicBool::new(false),
            driving: AtomicBool::new(false),
            cancel: CancelToken::default(),
            span,
        }
    }

    /// I/O backend.
    pub fn io(&self) -> &IO {
        &self.io
    }

    /// Motion limits of the configured model.
    pub fn limits(&self) -> &MotionLimits {
        &self.limits
    }

    /// Motion defaults.
    pub fn motion_defaults(&self) -> &MotionConfig {
        &self.motion
    }

    /// Timing configuration.
    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Current axis state.
    pub fn state(&self) -> AxisState {
        lock(&self.state).state()
    }

    /// Whether a home sequence has completed since connecting.
    pub fn is_homed(&self) -> bool {
        self.homed.load(Ordering::Acquire)
    }

    /// Whether the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.io.transport().is_connected()
    }

    /// Open the transport.
    pub fn connect(&self) -> EcResult<()> {
        let _span = self.span.enter();
        let peer = self.io.transport().peer();
        if self.io.transport().connect() {
            info!(%peer, "Connected");
            Ok(())
        } else {
            error!(%peer, "Connection failed");
            Err(ActuatorError::NotConnected)
        }
    }

    /// Close the transport and forget the homed flag.
    pub fn disconnect(&self) {
        let _span = self.span.enter();
        self.cancel.cancel();
        self.io.transport().disconnect();
        self.homed.store(false, Ordering::Release);
        lock(&self.state).reset();
        info!("Disconnected");
    }

    fn ensure_connected(&self) -> EcResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            error!("Not connected to the controller");
            Err(ActuatorError::NotConnected)
        }
    }

    fn begin(&self, target: AxisState) -> EcResult<u64> {
        lock(&self.state).transition(target)?;
        Ok(self.cancel.ticket())
    }

    /// Like `begin`, for a motion that settles its own state in `finish`.
    fn begin_motion(&self, target: AxisState) -> EcResult<u64> {
        let mut state = lock(&self.state);
        state.transition(target)?;
        self.driving.store(true, Ordering::Release);
        Ok(self.cancel.ticket())
    }

    fn finish(&self, outcome: &EcResult<()>) {
        let mut state = lock(&self.state);
        self.driving.store(false, Ordering::Release);
        if matches!(outcome, Err(ActuatorError::AlarmDuringMotion { .. })) {
            state.enter_alarm();
        } else {
            state.settle();
        }
    }

    /// Poll `done` until it reports true, an alarm is raised, the deadline
    /// passes or `stop()` cancels the wait.
    fn poll<F>(
        &self,
        operation: &str,
        ticket: u64,
        timeout: Duration,
        interval: Duration,
        mut done: F,
    ) -> EcResult<()>
    where
        F: FnMut() -> EcResult<bool>,
    {
        let start = Instant::now();
        loop {
            if done()? {
                return Ok(());
            }
            if self.io.is_alarmed()? {
                return Err(ActuatorError::AlarmDuringMotion {
                    operation: operation.to_string(),
                });
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(ActuatorError::Timeout {
                    operation: operation.to_string(),
                    elapsed,
                });
            }
            if self.cancel.wait(ticket, interval.min(timeout - elapsed)) {
                return Err(ActuatorError::Cancelled {
                    operation: operation.to_string(),
                });
            }
        }
    }

    /// Raise `command`, poll `done`, and clear `command` whatever happened.
    fn drive<F>(
        &self,
        operation: &str,
        command: AxisCommand,
        ticket: u64,
        timeout: Duration,
        interval: Duration,
        done: F,
    ) -> EcResult<()>
    where
        F: FnMut() -> EcResult<bool>,
    {
        let outcome = self
            .io
            .set_command(command, true)
            .and_then(|()| self.poll(operation, ticket, timeout, interval, done));
        let cleared = self.io.set_command(command, false);
        if let Err(e) = &cleared {
            warn!(%command, error = %e, "Failed to clear command signal");
        }
        outcome.and(cleared)
    }

    fn report(&self, operation: &str, outcome: &EcResult<()>) {
        match outcome {
            Ok(()) => info!(operation, "Motion complete"),
            Err(e @ ActuatorError::Cancelled { .. }) => warn!(operation, error = %e, "Motion cancelled"),
            Err(e) => error!(operation, error = %e, "Motion failed"),
        }
    }

    /// Run the home sequence.
    ///
    /// Raises ST0 and polls the home-complete indication every
    /// `home_poll_interval`. ST0 is cleared before returning on every path.
    pub fn home(&self, timeout: Option<Duration>) -> EcResult<()> {
        let _span = self.span.enter();
        self.ensure_connected()?;
        let timeout = timeout.unwrap_or(self.timing.home_timeout);
        let ticket = self.begin_motion(AxisState::Homing)?;
        info!(timeout_ms = timeout.as_millis(), "Starting home sequence");

        let outcome = self.drive(
            "home",
            AxisCommand::St0,
            ticket,
            timeout,
            self.timing.home_poll_interval,
            || self.io.home_complete(),
        );
        self.finish(&outcome);
        if outcome.is_ok() {
            self.homed.store(true, Ordering::Release);
        }
        self.report("home", &outcome);
        outcome
    }

    /// Drive to the end in `direction` and wait for its end signal.
    pub fn move_to_end(&self, direction: Direction, timeout: Option<Duration>) -> EcResult<()> {
        let _span = self.span.enter();
        self.ensure_connected()?;
        let timeout = timeout.unwrap_or(self.timing.end_timeout);
        let ticket = self.begin_motion(AxisState::Moving)?;
        info!(%direction, "Moving to end");

        let outcome = self.drive(
            "move_to_end",
            AxisCommand::for_direction(direction),
            ticket,
            timeout,
            self.timing.move_poll_interval,
            || self.io.end_reached(direction),
        );
        self.finish(&outcome);
        self.report("move_to_end", &outcome);
        outcome
    }

    /// Wait for the end signal in `direction` without driving the axis.
    pub fn wait_for_end(&self, direction: Direction, timeout: Option<Duration>) -> EcResult<()> {
        let _span = self.span.enter();
        self.ensure_connected()?;
        let timeout = timeout.unwrap_or(self.timing.end_timeout);
        let ticket = self.cancel.ticket();
        self.poll(
            "wait_for_end",
            ticket,
            timeout,
            self.timing.move_poll_interval,
            || self.io.end_reached(direction),
        )
    }

    /// Start jogging in `direction`. Returns immediately; the axis keeps
    /// moving until [`stop`](Self::stop).
    pub fn jog_start(&self, direction: Direction, speed: Option<f64>) -> EcResult<()> {
        let _span = self.span.enter();
        if let Some(speed) = speed {
            if !self.io.supports_speed() {
                return Err(ActuatorError::InvalidArgument(format!(
                    "{} has no speed parameter",
                    self.io.describe()
                )));
            }
            self.limits.check_speed(speed)?;
        }
        self.ensure_connected()?;
        self.begin(AxisState::Moving)?;

        let outcome = speed
            .map_or(Ok(()), |speed| self.io.write_speed(speed))
            .and_then(|()| {
                self.io
                    .set_command(AxisCommand::for_direction(direction), true)
            });
        match &outcome {
            Ok(()) => info!(%direction, ?speed, "Jog started"),
            Err(e) => {
                error!(%direction, error = %e, "Jog start failed");
                self.stop();
            }
        }
        outcome
    }

    /// Clear both direction commands and cancel any in-flight wait.
    ///
    /// A jog settles to IDLE here. A cancelled blocking motion settles when
    /// it returns, after clearing its own command. Always succeeds; write
    /// failures are logged.
    pub fn stop(&self) {
        let _span = self.span.enter();
        self.cancel.cancel();
        for command in [AxisCommand::St0, AxisCommand::St1] {
            if let Err(e) = self.io.set_command(command, false) {
                warn!(%command, error = %e, "Failed to clear command on stop");
            }
        }
        let mut state = lock(&self.state);
        if !self.driving.load(Ordering::Acquire) {
            state.settle();
        }
        info!("Stopped");
    }

    /// Pulse RES and check that the alarm cleared.
    pub fn reset_alarm(&self) -> EcResult<()> {
        let _span = self.span.enter();
        self.ensure_connected()?;
        let settle = self.timing.reset_settle;
        info!(settle_ms = settle.as_millis(), "Resetting alarm");

        let pulse = self.io.set_command(AxisCommand::Res, true);
        thread::sleep(settle);
        let release = self.io.set_command(AxisCommand::Res, false);
        pulse.and(release)?;
        thread::sleep(settle);

        if self.check_alarm()? {
            error!("Alarm still active after reset");
            lock(&self.state).enter_alarm();
            return Err(ActuatorError::AlarmNotCleared);
        }

        let mut state = lock(&self.state);
        if state.state() == AxisState::Alarm {
            state.transition(AxisState::Idle)?;
        }
        info!("Alarm cleared");
        Ok(())
    }

    /// Alarm status; a failed read counts as no alarm and is logged.
    pub fn is_alarmed(&self) -> bool {
        self.check_alarm().unwrap_or_else(|e| {
            warn!(error = %e, "Alarm status unreadable");
            false
        })
    }

    /// Alarm status, surfacing read failures.
    pub fn check_alarm(&self) -> EcResult<bool> {
        self.io.is_alarmed()
    }

    /// Wait for `duration` unless `stop()` is called first.
    pub fn pause(&self, duration: Duration) -> EcResult<()> {
        let ticket = self.cancel.ticket();
        if self.cancel.wait(ticket, duration) {
            Err(ActuatorError::Cancelled {
                operation: String::from("dwell"),
            })
        } else {
            Ok(())
        }
    }
}

impl<IO: PositionIo> Actuator<IO> {
    /// Move to an absolute position in degrees.
    ///
    /// Arguments are validated before any write. Homes first if needed.
    /// `timeout` is clamped to the configured move timeout.
    pub fn move_to_position(
        &self,
        position: f64,
        speed: Option<f64>,
        acceleration: Option<f64>,
        timeout: Option<Duration>,
    ) -> EcResult<()> {
        let _span = self.span.enter();
        self.validate_move(position, speed, acceleration)?;
        self.ensure_connected()?;

        if !self.is_homed() {
            warn!("Axis not homed, running home sequence first");
            self.home(None)?;
        }

        let ceiling = self.timing.move_timeout;
        let timeout = timeout.map_or(ceiling, |t| t.min(ceiling));
        let ticket = self.begin_motion(AxisState::Moving)?;

        let outcome = self.position_move(position, speed, acceleration, ticket, timeout);
        self.finish(&outcome);
        self.report("move", &outcome);
        outcome
    }

    /// Check a move's arguments without touching the controller.
    pub fn validate_move(
        &self,
        position: f64,
        speed: Option<f64>,
        acceleration: Option<f64>,
    ) -> EcResult<()> {
        self.limits.check_position(position)?;
        if let Some(speed) = speed {
            self.limits.check_speed(speed)?;
        }
        if let Some(acceleration) = acceleration {
            self.limits.check_acceleration(acceleration)?;
        }
        Ok(())
    }

    fn position_move(
        &self,
        position: f64,
        speed: Option<f64>,
        acceleration: Option<f64>,
        ticket: u64,
        timeout: Duration,
    ) -> EcResult<()> {
        let tags = self.io.tags();
        let transport = self.io.transport();

        if let Some(speed) = speed {
            self.io.write_speed(speed)?;
        }
        if let Some(acceleration) = acceleration {
            transport.write_value(&tags.parameter(Parameter::Acceleration), acceleration)?;
            transport.write_value(&tags.parameter(Parameter::Deceleration), acceleration)?;
        }
        transport.write_value(&tags.parameter(Parameter::TargetPos), position)?;

        let current = transport.read_f64(&tags.parameter(Parameter::Position))?;
        let direction = if position > current {
            Direction::Forward
        } else {
            Direction::Backward
        };

        if let Some(estimate) = units::estimate_motion_time(
            position - current,
            speed.unwrap_or(self.motion.default_speed),
            acceleration.unwrap_or(self.motion.default_acceleration),
        ) {
            debug!(expected_ms = estimate.total.as_millis(), "Estimated move time");
        }
        info!(position, current, %direction, "Moving to position");

        self.drive(
            "move",
            AxisCommand::for_direction(direction),
            ticket,
            timeout,
            self.timing.move_poll_interval,
            || self.io.end_reached(direction),
        )
    }

    /// Current position in degrees.
    pub fn current_position(&self) -> EcResult<f64> {
        self.io
            .transport()
            .read_f64(&self.io.tags().parameter(Parameter::Position))
    }

    /// Read a numeric parameter.
    pub fn read_parameter(&self, parameter: Parameter) -> EcResult<f64> {
        self.io
            .transport()
            .read_f64(&self.io.tags().parameter(parameter))
    }

    /// Read a boolean signal.
    pub fn read_signal(&self, signal: Signal) -> EcResult<bool> {
        self.io.transport().read_bool(&self.io.tags().signal(signal))
    }

    /// Write push force and position, then enable push mode.
    pub fn arm_push(&self, force: u8, position: f64) -> EcResult<()> {
        MotionLimits::check_push_force(force)?;
        let tags = self.io.tags();
        let transport = self.io.transport();
        transport.write_value(&tags.parameter(Parameter::PushForce), i64::from(force))?;
        transport.write_value(&tags.parameter(Parameter::PushPosition), position)?;
        transport.write_value(&tags.parameter(Parameter::PushMode), true)
    }

    /// Disable push mode.
    pub fn disarm_push(&self) -> EcResult<()> {
        self.io
            .transport()
            .write_value(&self.io.tags().parameter(Parameter::PushMode), false)
    }
}

static_assertions::assert_impl_all!(Actuator<crate::io::TagAxis>: Send, Sync);
static_assertions::assert_impl_all!(Actuator<crate::io::GatewayAxis>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::TagAxis;
    use crate::signals::TagMap;
    use ec_transport::{Address, SharedTransport, SimHandle, SimulatedTransport, TagValue};

    fn fast_config() -> ControllerConfig {
        let mut config = ControllerConfig::default();
        config.timing.home_poll_interval = Duration::from_millis(2);
        config.timing.move_poll_interval = Duration::from_millis(2);
        config.timing.home_timeout = Duration::from_millis(200);
        config.timing.move_timeout = Duration::from_millis(200);
        config.timing.end_timeout = Duration::from_millis(200);
        config.timing.reset_settle = Duration::from_millis(1);
        config
    }

    fn rig() -> (Actuator<TagAxis>, SimHandle) {
        let sim = SimulatedTransport::new();
        let handle = sim.handle();
        let axis = TagAxis::new(SharedTransport::new(sim), TagMap::default());
        let actuator = Actuator::new(axis, &fast_config());
        actuator.connect().unwrap();
        handle.set(Address::tag("Controller.ALM"), true);
        handle.set(Address::tag("Controller.HomeComplete"), false);
        handle.set(Address::tag("Controller.Position"), 0.0);
        (actuator, handle)
    }

    #[test]
    fn test_cancel_token_wakes_waiter() {
        let token = CancelToken::default();
        let ticket = token.ticket();
        assert!(!token.wait(ticket, Duration::from_millis(1)));
        token.cancel();
        assert!(token.wait(ticket, Duration::from_secs(5)));
        assert!(!token.wait(token.ticket(), Duration::from_millis(1)));
    }

    #[test]
    fn test_home_requires_connection() {
        let (actuator, handle) = rig();
        actuator.disconnect();
        handle.clear_events();
        assert_eq!(actuator.home(None), Err(ActuatorError::NotConnected));
        assert!(handle.events().is_empty());
    }

    #[test]
    fn test_home_success_sets_homed() {
        let (actuator, handle) = rig();
        handle.set(Address::tag("Controller.HomeComplete"), true);
        actuator.home(None).unwrap();
        assert!(actuator.is_homed());
        assert_eq!(actuator.state(), AxisState::Idle);
        assert_eq!(
            handle.writes_to(&Address::tag("Controller.ST0")),
            vec![TagValue::Bool(true), TagValue::Bool(false)]
        );

        actuator.disconnect();
        assert!(!actuator.is_homed());
    }

    #[test]
    fn test_alarm_during_home_enters_alarm_state() {
        let (actuator, handle) = rig();
        handle.set(Address::tag("Controller.ALM"), false);
        let result = actuator.home(None);
        assert!(matches!(result, Err(ActuatorError::AlarmDuringMotion { .. })));
        assert_eq!(actuator.state(), AxisState::Alarm);

        // Motion is refused until the alarm is reset
        assert!(matches!(
            actuator.move_to_end(Direction::Forward, None),
            Err(ActuatorError::InvalidStateTransition { .. })
        ));

        handle.set(Address::tag("Controller.ALM"), true);
        actuator.reset_alarm().unwrap();
        assert_eq!(actuator.state(), AxisState::Idle);
    }

    #[test]
    fn test_move_direction_follows_current_position() {
        let (actuator, handle) = rig();
        handle.set(Address::tag("Controller.HomeComplete"), true);
        handle.set(Address::tag("Controller.Position"), 200.0);
        handle.set(Address::tag("Controller.LS0"), true);
        actuator.home(None).unwrap();
        handle.clear_events();

        actuator
            .move_to_position(90.0, Some(50.0), Some(0.3), None)
            .unwrap();
        assert_eq!(
            handle.writes(),
            vec![
                (Address::tag("Controller.Speed"), TagValue::Real(50.0)),
                (Address::tag("Controller.Acceleration"), TagValue::Real(0.3)),
                (Address::tag("Controller.Deceleration"), TagValue::Real(0.3)),
                (Address::tag("Controller.TargetPos"), TagValue::Real(90.0)),
                (Address::tag("Controller.ST0"), TagValue::Bool(true)),
                (Address::tag("Controller.ST0"), TagValue::Bool(false)),
            ]
        );
    }

    #[test]
    fn test_jog_then_stop() {
        let (actuator, handle) = rig();
        actuator.jog_start(Direction::Forward, Some(30.0)).unwrap();
        assert_eq!(actuator.state(), AxisState::Moving);
        assert!(matches!(
            actuator.home(None),
            Err(ActuatorError::InvalidStateTransition { .. })
        ));

        actuator.stop();
        assert_eq!(actuator.state(), AxisState::Idle);
        assert_eq!(
            handle.get(&Address::tag("Controller.ST1")),
            Some(TagValue::Bool(false))
        );
    }

    #[test]
    fn test_stop_leaves_settling_to_the_cancelled_motion() {
        let (actuator, _) = rig();
        let ticket = actuator.begin_motion(AxisState::Moving).unwrap();
        actuator.stop();
        assert!(actuator.cancel.wait(ticket, Duration::ZERO));

        // Still owned by the in-flight motion until it has cleared its bit
        assert_eq!(actuator.state(), AxisState::Moving);
        assert!(matches!(
            actuator.move_to_end(Direction::Backward, None),
            Err(ActuatorError::InvalidStateTransition { .. })
        ));

        actuator.finish(&Err(ActuatorError::Cancelled {
            operation: String::from("move_to_end"),
        }));
        assert_eq!(actuator.state(), AxisState::Idle);
        actuator.stop();
        assert_eq!(actuator.state(), AxisState::Idle);
    }

    #[test]
    fn test_jog_speed_validated_before_writes() {
        let (actuator, handle) = rig();
        handle.clear_events();
        assert!(matches!(
            actuator.jog_start(Direction::Backward, Some(5.0)),
            Err(ActuatorError::InvalidArgument(_))
        ));
        assert!(handle.writes().is_empty());
        assert_eq!(actuator.state(), AxisState::Idle);
    }

    #[test]
    fn test_pause_cancelled_by_stop() {
        let (actuator, _) = rig();
        crossbeam_utils::thread::scope(|s| {
            let waiter = s.spawn(|_| actuator.pause(Duration::from_secs(10)));
            thread::sleep(Duration::from_millis(20));
            actuator.stop();
            assert!(matches!(
                waiter.join().unwrap(),
                Err(ActuatorError::Cancelled { .. })
            ));
        })
        .unwrap();
    }

    #[test]
    fn test_push_force_checked_before_writes() {
        let (actuator, handle) = rig();
        handle.clear_events();
        assert!(actuator.arm_push(80, 10.0).is_err());
        assert!(handle.writes().is_empty());
    }
}
