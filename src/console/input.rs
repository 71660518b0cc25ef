use crate::device::command::{Direction, SpeedStep};
use crate::device::types::PeripheralRecord;
use crate::error::InputError;

/// A peripheral as typed by the user: its position in the last listing, or its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Index(usize),
    Id(String),
}

impl Target {
    fn parse(argument: &str) -> Target {
        match argument.parse::<usize>() {
            Ok(index) => Target::Index(index),
            Err(_) => Target::Id(argument.to_string()),
        }
    }

    /// Indices are 1-based. An id does not need to be in the list.
    pub fn resolve(&self, peripherals: &[PeripheralRecord]) -> Option<String> {
        match self {
            Target::Index(index) => {
                let position = index.checked_sub(1)?;
                peripherals.get(position).map(|record| record.id.clone())
            },
            Target::Id(id) => Some(id.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Scan,
    List,
    Connect(Target),
    Drive(Direction),
    Speed(SpeedStep),
    Disconnect,
    Retry,
    Status,
    Help,
    Quit,
}

/// Parses one line of input. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, InputError> {
    let mut words = line.split_whitespace();
    let keyword = match words.next() {
        Some(keyword) => keyword.to_lowercase(),
        None => return Ok(None),
    };

    let command = match keyword.as_str() {
        "scan" => ConsoleCommand::Scan,
        "list" | "ls" => ConsoleCommand::List,
        "connect" | "c" => match words.next() {
            Some(argument) => ConsoleCommand::Connect(Target::parse(argument)),
            None => return Err(InputError::MissingArgument("connect")),
        },
        "+" => ConsoleCommand::Speed(SpeedStep::Increase),
        "-" => ConsoleCommand::Speed(SpeedStep::Decrease),
        "disconnect" | "d" => ConsoleCommand::Disconnect,
        "retry" => ConsoleCommand::Retry,
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        other => {
            let mut chars = other.chars();
            match (chars.next().and_then(Direction::from_code), chars.next()) {
                (Some(direction), None) => ConsoleCommand::Drive(direction),
                _ => return Err(InputError::UnknownCommand(other.to_string())),
            }
        },
    };

    Ok(Some(command))
}
