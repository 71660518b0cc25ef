use std::fmt;
use log::debug;

use crate::device::constants::{DEFAULT_SPEED, MAX_SPEED, MIN_SPEED, SPEED_INCREMENT};
use crate::device::transport::PeripheralLink;
use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

impl Direction {
    pub fn code(&self) -> char {
        match self {
            Direction::Forward => 'F',
            Direction::Backward => 'B',
            Direction::Left => 'L',
            Direction::Right => 'R',
            Direction::Stop => 'S',
        }
    }

    pub fn from_code(code: char) -> Option<Direction> {
        match code.to_ascii_uppercase() {
            'F' => Some(Direction::Forward),
            'B' => Some(Direction::Backward),
            'L' => Some(Direction::Left),
            'R' => Some(Direction::Right),
            'S' => Some(Direction::Stop),
            _ => None,
        }
    }
}

/// A command for the car. The text form is exactly what is written to the characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Direction(Direction),
    Speed(u8),
}

impl Command {
    pub fn payload(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Direction(direction) => write!(f, "{}", direction.code()),
            Command::Speed(speed) => write!(f, "SPEED:{}", speed),
        }
    }
}

fn clamp_speed(value: i32) -> u8 {
    // the clamp bounds fit in u8, so the cast can not truncate
    value.clamp(i32::from(MIN_SPEED), i32::from(MAX_SPEED)) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedStep {
    Increase,
    Decrease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedSetting {
    value: u8,
}

impl SpeedSetting {
    pub fn new(initial: u8) -> Self {
        SpeedSetting { value: clamp_speed(i32::from(initial)) }
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    /// Moves the speed one step and returns the command that tells the car about it. The command
    /// is returned even when the speed was already at its limit.
    pub fn adjust(&mut self, step: SpeedStep) -> Command {
        let current = i32::from(self.value);
        let increment = i32::from(SPEED_INCREMENT);

        let target = match step {
            SpeedStep::Increase => current + increment,
            SpeedStep::Decrease => current - increment,
        };

        self.value = clamp_speed(target);
        Command::Speed(self.value)
    }
}

impl Default for SpeedSetting {
    fn default() -> Self {
        SpeedSetting::new(DEFAULT_SPEED)
    }
}

pub async fn send_command<L: PeripheralLink>(link: &L, command: &Command) -> Result<(), TransportError> {
    debug!("Sending {} to {}", command, link.peripheral_id());
    link.write_command(&command.payload()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_encode_as_ascii() {
        assert_eq!(Command::Direction(Direction::Forward).payload(), b"F".to_vec());
        assert_eq!(Command::Direction(Direction::Stop).payload(), b"S".to_vec());
        assert_eq!(Command::Speed(180).payload(), b"SPEED:180".to_vec());
    }

    #[test]
    fn direction_codes_parse_case_insensitively() {
        for direction in [Direction::Forward, Direction::Backward, Direction::Left, Direction::Right, Direction::Stop] {
            assert_eq!(Direction::from_code(direction.code()), Some(direction));
            assert_eq!(Direction::from_code(direction.code().to_ascii_lowercase()), Some(direction));
        }
        assert_eq!(Direction::from_code('X'), None);
    }

    #[test]
    fn speeds_are_clamped() {
        assert_eq!(clamp_speed(300), 255);
        assert_eq!(clamp_speed(-5), 100);
        assert_eq!(clamp_speed(140), 140);
    }

    #[test]
    fn increasing_never_exceeds_the_maximum() {
        let mut speed = SpeedSetting::default();
        assert_eq!(speed.value(), 200);

        for _ in 0..11 {
            speed.adjust(SpeedStep::Increase);
            assert!(speed.value() <= MAX_SPEED);
        }
        assert_eq!(speed.value(), 255);
        assert_eq!(speed.adjust(SpeedStep::Increase).to_string(), "SPEED:255");
    }

    #[test]
    fn decreasing_never_goes_below_the_minimum() {
        let mut speed = SpeedSetting::default();

        for _ in 0..11 {
            speed.adjust(SpeedStep::Decrease);
            assert!(speed.value() >= MIN_SPEED);
        }
        assert_eq!(speed.value(), 100);
    }

    #[test]
    fn steps_are_twenty() {
        let mut speed = SpeedSetting::new(200);
        assert_eq!(speed.adjust(SpeedStep::Increase), Command::Speed(220));
        assert_eq!(speed.adjust(SpeedStep::Decrease), Command::Speed(200));
        assert_eq!(speed.adjust(SpeedStep::Decrease), Command::Speed(180));
    }

    #[test]
    fn initial_speed_is_clamped() {
        assert_eq!(SpeedSetting::new(20).value(), 100);
    }
}
