use std::fmt;
use std::str::FromStr;

/// Commands accepted over the command link. Distances in cm, angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    EnterSdkMode,
    TakeOff,
    Land,
    EmergencyStop,
    StartVideo,
    StopVideo,
    SetSpeed(i32),
    Forward(i32),
    Back(i32),
    Left(i32),
    Right(i32),
    Up(i32),
    Down(i32),
    Clockwise(i32),
    CounterClockwise(i32),
    Go { x: i32, y: i32, z: i32, speed: i32 },
    GetSpeed,
    GetBattery,
    GetTime,
}

impl Command {
    pub fn is_query(&self) -> bool {
        matches!(self, Command::GetSpeed | Command::GetBattery | Command::GetTime)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::EnterSdkMode => write!(f, "command"),
            Command::TakeOff => write!(f, "takeoff"),
            Command::Land => write!(f, "land"),
            Command::EmergencyStop => write!(f, "emergency"),
            Command::StartVideo => write!(f, "streamon"),
            Command::StopVideo => write!(f, "streamoff"),
            Command::SetSpeed(v) => write!(f, "speed {}", v),
            Command::Forward(v) => write!(f, "forward {}", v),
            Command::Back(v) => write!(f, "back {}", v),
            Command::Left(v) => write!(f, "left {}", v),
            Command::Right(v) => write!(f, "right {}", v),
            Command::Up(v) => write!(f, "up {}", v),
            Command::Down(v) => write!(f, "down {}", v),
            Command::Clockwise(v) => write!(f, "cw {}", v),
            Command::CounterClockwise(v) => write!(f, "ccw {}", v),
            Command::Go { x, y, z, speed } => write!(f, "go {} {} {} {}", x, y, z, speed),
            Command::GetSpeed => write!(f, "speed?"),
            Command::GetBattery => write!(f, "battery?"),
            Command::GetTime => write!(f, "time?"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseCommandError {
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{verb}` takes {expected} integer argument(s)")]
    Arity { verb: String, expected: usize },
    #[error("`{0}` is not an integer")]
    NotAnInteger(String),
}

/// Parses the same tokens `Display` writes, e.g. `forward 20` or `go 10 0 0 50`.
impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();
        let args = words
            .map(|w| w.parse::<i32>().map_err(|_| ParseCommandError::NotAnInteger(w.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(ParseCommandError::Arity { verb: verb.clone(), expected })
            }
        };

        let bare = match verb.as_str() {
            "command" => Some(Command::EnterSdkMode),
            "takeoff" => Some(Command::TakeOff),
            "land" => Some(Command::Land),
            "emergency" => Some(Command::EmergencyStop),
            "streamon" => Some(Command::StartVideo),
            "streamoff" => Some(Command::StopVideo),
            "speed?" => Some(Command::GetSpeed),
            "battery?" => Some(Command::GetBattery),
            "time?" => Some(Command::GetTime),
            _ => None,
        };
        if let Some(cmd) = bare {
            arity(0)?;
            return Ok(cmd);
        }
        if verb == "go" {
            arity(4)?;
            return Ok(Command::Go { x: args[0], y: args[1], z: args[2], speed: args[3] });
        }

        let unary: fn(i32) -> Command = match verb.as_str() {
            "speed" => Command::SetSpeed,
            "forward" => Command::Forward,
            "back" => Command::Back,
            "left" => Command::Left,
            "right" => Command::Right,
            "up" => Command::Up,
            "down" => Command::Down,
            "cw" => Command::Clockwise,
            "ccw" => Command::CounterClockwise,
            _ => return Err(ParseCommandError::Unknown(s.trim().to_string())),
        };
        arity(1)?;
        Ok(unary(args[0]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    /// Query result; -1 when the vehicle cannot answer (unpowered).
    Value(i32),
    Error(String),
}

impl Response {
    pub fn is_ok(&self) -> bool {
        !matches!(self, Response::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sdk_tokens() {
        assert_eq!("takeoff".parse::<Command>().unwrap(), Command::TakeOff);
        assert_eq!(" CW  90 ".parse::<Command>().unwrap(), Command::Clockwise(90));
        assert_eq!("battery?".parse::<Command>().unwrap(), Command::GetBattery);
        assert_eq!(
            "go 10 -20 30 50".parse::<Command>().unwrap(),
            Command::Go { x: 10, y: -20, z: 30, speed: 50 }
        );
    }

    #[test]
    fn display_parses_back() {
        let samples = [
            Command::EnterSdkMode,
            Command::SetSpeed(40),
            Command::CounterClockwise(15),
            Command::GetTime,
        ];
        for cmd in samples {
            assert_eq!(cmd.to_string().parse::<Command>().unwrap(), cmd);
        }
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(
            "flip l".parse::<Command>().unwrap_err(),
            ParseCommandError::Unknown("flip l".into())
        );
        assert!(matches!(
            "forward".parse::<Command>(),
            Err(ParseCommandError::Arity { expected: 1, .. })
        ));
        assert!(matches!(
            "land 3".parse::<Command>(),
            Err(ParseCommandError::Arity { expected: 0, .. })
        ));
        assert_eq!(
            "up ten".parse::<Command>().unwrap_err(),
            ParseCommandError::NotAnInteger("ten".into())
        );
    }

    #[test]
    fn only_queries_are_queries() {
        assert!(Command::GetSpeed.is_query());
        assert!(!Command::SetSpeed(10).is_query());
        assert!(Response::Value(-1).is_ok());
        assert!(!Response::Error("nope".into()).is_ok());
    }
}
