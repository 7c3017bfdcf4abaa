use std::{
    io::{Read, Write},
    rc::Rc,
};

use anyhow::Error;

/// Whether an event marks a function being entered or left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Enter,
    Exit,
}

impl Direction {
    /// Returns the opcode identifying this direction in a binary trace record
    pub fn opcode(&self) -> u8 {
        match self {
            Direction::Enter => 1,
            Direction::Exit => 2,
        }
    }

    /// Returns the direction for a binary trace opcode, or `None` if the
    /// opcode is neither an entry nor an exit marker.
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            1 => Some(Direction::Enter),
            2 => Some(Direction::Exit),
            _ => None,
        }
    }

    /// The single-bit signal value a function takes on after this event
    pub fn level(&self) -> char {
        match self {
            Direction::Enter => '1',
            Direction::Exit => '0',
        }
    }
}

/// The generic (format-independent) representation of an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    direction: Direction,
    function: Rc<str>,
    time: u64,
}

impl Event {
    pub fn new(direction: Direction, function: impl Into<Rc<str>>, time: u64) -> Self {
        Self {
            direction,
            function: function.into(),
            time,
        }
    }

    pub fn into_fields(self) -> (Direction, Rc<str>, u64) {
        (self.direction, self.function, self.time)
    }
}

/// Shared iterator item type for [`Parser`] and [`Encoder`] implementations.
pub type EventResult = Result<Event, Error>;

/// Common trait for parsers of function call traces
pub trait Parser {
    type Iter<R: Read>: Iterator<Item = EventResult>;

    /// Parses a function call trace of some specific format.
    fn parse<R: Read>(&mut self, input: R) -> Result<Self::Iter<R>, Error>;

    /// Returns a string identifying the trace format of this parser.
    fn format(&self) -> &'static str;
}

/// Common trait for encoders of function call traces
pub trait Encoder {
    /// A constant that indicates the approximate space in bytes an event will occupy.
    const EVENT_SIZE_HINT: usize;

    /// Encodes a function call trace into some specific format.
    fn encode<W: Write, I: IntoIterator<Item = EventResult>>(
        &mut self,
        input: I,
        output: W,
    ) -> Result<(), Error>;

    /// Returns a string identifying the output format of this encoder.
    fn format(&self) -> &'static str;
}
