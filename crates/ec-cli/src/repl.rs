//! Line-oriented command console.
//!
//! One command per line: `home`, `move <pos> [speed]`, `jog+ [speed]`,
//! `jog- [speed]`, `stop`, `status`, `reset`, `help`, `exit`. Errors are
//! printed and the loop carries on.

use ec_common::error::{ActuatorError, EcResult};
use ec_motion::{
    Actuator, Direction, GatewayAxis, MotionPort, PositionIo, PositionPort, StatusPort,
    StatusReport,
};
use std::io::{self, BufRead, Write};
use std::sync::Arc;

const PROMPT: &str = "EC> ";

const HELP: &str = "\
commands:
  home                 run the homing sequence
  move <pos> [speed]   move to an absolute position in degrees
  jog+ [speed]         jog forward until stop
  jog- [speed]         jog backward until stop
  stop                 stop motion
  status               print a status snapshot
  reset                reset an active alarm
  help                 show this list
  exit                 leave the console";

/// A parsed console command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Home,
    Move { position: f64, speed: Option<f64> },
    Jog { direction: Direction, speed: Option<f64> },
    Stop,
    Status,
    Reset,
    Help,
    Exit,
}

/// Whether the console keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

fn number(token: &str, what: &str) -> EcResult<f64> {
    token
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ActuatorError::InvalidArgument(format!("{what} must be a number, got {token:?}")))
}

fn optional_speed(token: Option<&str>) -> EcResult<Option<f64>> {
    token.map(|t| number(t, "speed")).transpose()
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> EcResult<Option<Command>> {
    let mut tokens = line.split_whitespace();
    let Some(keyword) = tokens.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = tokens.collect();
    let max_args = |n: usize| {
        if args.len() > n {
            Err(ActuatorError::InvalidArgument(format!(
                "too many arguments for {keyword}"
            )))
        } else {
            Ok(())
        }
    };

    let keyword_lower = keyword.to_ascii_lowercase();
    let bare = |command: Command| max_args(0).map(|()| command);
    let command = match keyword_lower.as_str() {
        "home" => bare(Command::Home)?,
        "move" => {
            max_args(2)?;
            let position = args
                .first()
                .ok_or_else(|| ActuatorError::InvalidArgument("move needs a position".into()))
                .and_then(|t| number(t, "position"))?;
            Command::Move {
                position,
                speed: optional_speed(args.get(1).copied())?,
            }
        }
        "jog+" | "jog-" => {
            max_args(1)?;
            let direction = if keyword.ends_with('+') {
                Direction::Forward
            } else {
                Direction::Backward
            };
            Command::Jog {
                direction,
                speed: optional_speed(args.first().copied())?,
            }
        }
        "stop" => bare(Command::Stop)?,
        "status" => bare(Command::Status)?,
        "reset" => bare(Command::Reset)?,
        "help" | "?" => bare(Command::Help)?,
        "exit" | "quit" => bare(Command::Exit)?,
        _ => return Err(ActuatorError::UnknownCommand(keyword.to_string())),
    };
    Ok(Some(command))
}

/// The controller behind the console.
pub trait Console {
    /// Motion commands.
    fn motion(&self) -> &dyn MotionPort;

    /// Position commands, if the controller has a position table.
    fn position(&self) -> Option<&dyn PositionPort>;

    /// Flattened status rows.
    fn status(&self) -> EcResult<Vec<(String, String)>>;

    /// Speed used by `jog` without an explicit speed.
    fn jog_speed(&self) -> Option<f64>;
}

/// Console over a position controller.
pub struct PositionConsole<IO> {
    actuator: Arc<Actuator<IO>>,
}

impl<IO> PositionConsole<IO> {
    pub fn new(actuator: Arc<Actuator<IO>>) -> Self {
        Self { actuator }
    }
}

impl<IO: PositionIo> Console for PositionConsole<IO> {
    fn motion(&self) -> &dyn MotionPort {
        self.actuator.as_ref()
    }

    fn position(&self) -> Option<&dyn PositionPort> {
        Some(self.actuator.as_ref())
    }

    fn status(&self) -> EcResult<Vec<(String, String)>> {
        Ok(self.actuator.snapshot()?.flatten())
    }

    fn jog_speed(&self) -> Option<f64> {
        Some(self.actuator.motion_defaults().jog_speed)
    }
}

/// Console over one gateway axis. Speeds and positions are not available.
pub struct GatewayConsole {
    actuator: Arc<Actuator<GatewayAxis>>,
}

impl GatewayConsole {
    pub fn new(actuator: Arc<Actuator<GatewayAxis>>) -> Self {
        Self { actuator }
    }
}

impl Console for GatewayConsole {
    fn motion(&self) -> &dyn MotionPort {
        self.actuator.as_ref()
    }

    fn position(&self) -> Option<&dyn PositionPort> {
        None
    }

    fn status(&self) -> EcResult<Vec<(String, String)>> {
        Ok(self.actuator.io().gateway().snapshot()?.flatten())
    }

    fn jog_speed(&self) -> Option<f64> {
        None
    }
}

fn io_error(e: io::Error) -> ActuatorError {
    ActuatorError::Io(e.to_string())
}

/// Run one command, writing its output to `out`.
pub fn execute(console: &dyn Console, command: Command, out: &mut dyn Write) -> EcResult<Flow> {
    let motion = console.motion();
    match command {
        Command::Home => {
            motion.home()?;
            writeln!(out, "homed").map_err(io_error)?;
        }
        Command::Move { position, speed } => {
            let port = console.position().ok_or_else(|| {
                ActuatorError::InvalidArgument(
                    "move needs a controller with position data; use jog+/jog-".into(),
                )
            })?;
            port.move_to_position(position, speed)?;
            let reached = port.current_position()?;
            writeln!(out, "at {reached:.1} deg").map_err(io_error)?;
        }
        Command::Jog { direction, speed } => {
            motion.jog_start(direction, speed.or_else(|| console.jog_speed()))?;
            writeln!(out, "jogging {direction}; 'stop' to halt").map_err(io_error)?;
        }
        Command::Stop => {
            motion.stop();
            writeln!(out, "stopped").map_err(io_error)?;
        }
        Command::Status => {
            let rows = console.status()?;
            let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
            for (key, value) in rows {
                writeln!(out, "{key:<width$}  {value}").map_err(io_error)?;
            }
        }
        Command::Reset => {
            motion.reset_alarm()?;
            writeln!(out, "alarm cleared").map_err(io_error)?;
        }
        Command::Help => writeln!(out, "{HELP}").map_err(io_error)?,
        Command::Exit => {
            motion.stop();
            return Ok(Flow::Exit);
        }
    }
    Ok(Flow::Continue)
}

/// Read commands from `input` until `exit` or end of input.
///
/// Axis motion is stopped on the way out.
pub fn run_repl(console: &dyn Console, input: impl BufRead, mut out: impl Write) -> io::Result<()> {
    writeln!(out, "Type 'help' for commands.")?;
    write!(out, "{PROMPT}")?;
    out.flush()?;

    for line in input.lines() {
        let line = line?;
        let flow = match parse_line(&line) {
            Ok(None) => Ok(Flow::Continue),
            Ok(Some(command)) => execute(console, command, &mut out),
            Err(e) => Err(e),
        };
        match flow {
            Ok(Flow::Exit) => return Ok(()),
            Ok(Flow::Continue) => {}
            Err(e) => {
                tracing::debug!(error = %e, "Command failed");
                writeln!(out, "error: {e}")?;
            }
        }
        write!(out, "{PROMPT}")?;
        out.flush()?;
    }

    writeln!(out)?;
    console.motion().stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ec_common::ControllerConfig;
    use ec_motion::{simulated_controller, TagAxis, TagMap};
    use ec_transport::SharedTransport;
    use std::io::Cursor;
    use std::time::Duration;

    fn console() -> PositionConsole<TagAxis> {
        let mut config = ControllerConfig::default();
        config.timing.home_poll_interval = Duration::from_millis(1);
        config.timing.move_poll_interval = Duration::from_millis(1);
        config.timing.reset_settle = Duration::from_millis(1);
        let (sim, _handle) = simulated_controller(&config);
        let axis = TagAxis::new(SharedTransport::new(sim), TagMap::new(&config.tags));
        let actuator = Actuator::new(axis, &config);
        actuator.connect().unwrap();
        PositionConsole::new(Arc::new(actuator))
    }

    fn run(input: &str) -> String {
        let console = console();
        let mut out = Vec::new();
        run_repl(&console, Cursor::new(input.to_string()), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_line("home").unwrap(), Some(Command::Home));
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(
            parse_line("move 90").unwrap(),
            Some(Command::Move { position: 90.0, speed: None })
        );
        assert_eq!(
            parse_line("MOVE 45.5 200").unwrap(),
            Some(Command::Move { position: 45.5, speed: Some(200.0) })
        );
        assert_eq!(
            parse_line("jog- 50").unwrap(),
            Some(Command::Jog { direction: Direction::Backward, speed: Some(50.0) })
        );
        assert_eq!(
            parse_line("jog+").unwrap(),
            Some(Command::Jog { direction: Direction::Forward, speed: None })
        );
        assert_eq!(parse_line("quit").unwrap(), Some(Command::Exit));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_line("spin"),
            Err(ActuatorError::UnknownCommand(ref c)) if c == "spin"
        ));
        assert!(matches!(parse_line("move"), Err(ActuatorError::InvalidArgument(_))));
        assert!(matches!(parse_line("move abc"), Err(ActuatorError::InvalidArgument(_))));
        assert!(matches!(parse_line("move NaN"), Err(ActuatorError::InvalidArgument(_))));
        assert!(matches!(parse_line("jog+ 1 2"), Err(ActuatorError::InvalidArgument(_))));
    }

    #[test]
    fn test_bare_commands_reject_arguments() {
        for line in ["home 90", "stop now", "status all", "reset 1", "help move", "exit 0"] {
            assert!(
                matches!(parse_line(line), Err(ActuatorError::InvalidArgument(_))),
                "{line:?} should be rejected"
            );
        }
        assert_eq!(parse_line(" Stop ").unwrap(), Some(Command::Stop));
    }

    #[test]
    fn test_session_moves_and_exits() {
        let out = run("home\nmove 90\nexit\nmove 180\n");
        assert!(out.contains("homed"));
        assert!(out.contains("at 90.0 deg"));
        assert!(!out.contains("180"));
    }

    #[test]
    fn test_errors_are_printed_and_loop_continues() {
        let out = run("spin\nmove 500\nmove 10\n");
        assert!(out.contains("error: unknown command: spin"));
        assert!(out.contains("error: invalid argument"));
        assert!(out.contains("at 10.0 deg"));
    }

    #[test]
    fn test_status_lists_flattened_rows() {
        let out = run("status\n");
        assert!(out.contains("connection.connected"));
        assert!(out.contains("alarm.description"));
    }

    #[test]
    fn test_jog_then_stop() {
        let console = console();
        let mut out = Vec::new();
        execute(
            &console,
            Command::Jog { direction: Direction::Forward, speed: None },
            &mut out,
        )
        .unwrap();
        assert_eq!(execute(&console, Command::Stop, &mut out).unwrap(), Flow::Continue);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("jogging forward"));
        assert!(text.contains("stopped"));
    }
}
