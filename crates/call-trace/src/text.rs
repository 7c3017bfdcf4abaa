use std::io::Write;

use anyhow::Error;

use crate::generic::{Direction, Encoder, Event, EventResult};

/// An encoder to emit function call traces as human-readable lines
///
/// Each event becomes `time|enter|function` or `time|exit|function`.
pub struct TextEncoder;

impl TextEncoder {
    pub fn new() -> Self {
        Self {}
    }

    fn encode_event(&self, event: Event) -> String {
        let (direction, function, time) = event.into_fields();

        let direction = match direction {
            Direction::Enter => "enter",
            Direction::Exit => "exit",
        };

        format!("{time}|{direction}|{function}")
    }
}

impl Default for TextEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for TextEncoder {
    const EVENT_SIZE_HINT: usize = 24;

    fn encode<W: Write, I: IntoIterator<Item = EventResult>>(
        &mut self,
        input: I,
        mut output: W,
    ) -> Result<(), Error> {
        for event in input {
            writeln!(output, "{}", self.encode_event(event?))?
        }

        Ok(())
    }

    fn format(&self) -> &'static str {
        "TEXT"
    }
}
