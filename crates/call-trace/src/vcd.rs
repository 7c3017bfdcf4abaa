use std::{
    borrow::Cow,
    io::{self, BufWriter, Cursor, Read, Seek, SeekFrom, Write},
};

use anyhow::{Error, ensure};
use log::debug;
use serde::Serialize;

use crate::{
    error::TraceError,
    generic::{Encoder, EventResult},
    ident::IdentifierAllocator,
};

/// Number of value changes buffered before they hit the staging area.
const STAGED_EVENTS: usize = 8192;

/// Free-form metadata written to the VCD header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcdHeader {
    pub date: String,
    pub version: String,
    pub timescale: String,
    pub scope: String,
}

impl Default for VcdHeader {
    fn default() -> Self {
        Self {
            date: "unknown".into(),
            version: format!("trace2vcd {}", env!("CARGO_PKG_VERSION")),
            timescale: "1 ns".into(),
            scope: "top".into(),
        }
    }
}

/// A signal declared in the VCD header.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SignalRecord {
    pub name: String,
    pub code: String,
}

/// What an encoded VCD document contains.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct VcdSummary {
    pub signals: Vec<SignalRecord>,
    pub events: u64,
    pub end_time: u64,
}

/// An encoder to emit function call traces as a _Value Change Dump_
///
/// Every function becomes a single-bit wire that is high while the function
/// executes. Only functions that actually occur in the trace are declared,
/// so the header can only be written once the whole trace has been seen:
/// value changes are staged in `staging` first and copied behind the header
/// afterwards.
pub struct VcdEncoder<S: Read + Write + Seek> {
    header: VcdHeader,
    staging: S,
    signals: IdentifierAllocator,
    n_events: u64,
    last_time: u64,
}

impl VcdEncoder<Cursor<Vec<u8>>> {
    /// Creates an encoder that stages the value changes in memory.
    pub fn in_memory(header: VcdHeader) -> Self {
        Self::new(header, Cursor::new(Vec::new()))
    }
}

impl<S: Read + Write + Seek> VcdEncoder<S> {
    pub fn new(header: VcdHeader, staging: S) -> Self {
        Self {
            header,
            staging,
            signals: IdentifierAllocator::new(),
            n_events: 0,
            last_time: 0,
        }
    }

    pub fn summary(&self) -> VcdSummary {
        VcdSummary {
            signals: self
                .signals
                .sorted()
                .into_iter()
                .map(|(name, code)| SignalRecord {
                    name: name.into(),
                    code: code.into(),
                })
                .collect(),
            events: self.n_events,
            end_time: self.end_time(),
        }
    }

    fn end_time(&self) -> u64 {
        if self.n_events == 0 {
            0
        } else {
            self.last_time + 2
        }
    }

    /// Writes one value change block per event to the staging area and
    /// returns the number of bytes staged.
    fn stage_payload<I: IntoIterator<Item = EventResult>>(&mut self, input: I) -> Result<u64, Error> {
        self.staging.seek(SeekFrom::Start(0))?;
        let mut payload =
            BufWriter::with_capacity(STAGED_EVENTS * Self::EVENT_SIZE_HINT, &mut self.staging);

        for event in input {
            let (direction, function, time) = event?.into_fields();
            if time <= self.last_time {
                return Err(TraceError::NonMonotonicTime {
                    time,
                    previous: self.last_time,
                }
                .into());
            }

            let code = self.signals.allocate(&function);
            writeln!(payload, "#{time}")?;
            writeln!(payload, "{}{code}", direction.level())?;

            self.last_time = time;
            self.n_events += 1;
        }

        payload.flush()?;
        drop(payload);

        Ok(self.staging.stream_position()?)
    }

    fn write_header<W: Write>(&self, output: &mut W) -> Result<(), Error> {
        let VcdHeader {
            date,
            version,
            timescale,
            scope,
        } = &self.header;

        writeln!(output, "$date {date} $end")?;
        writeln!(output, "$version {version} $end")?;
        writeln!(output, "$timescale {timescale} $end")?;
        writeln!(output, "$scope module {scope} $end")?;

        let signals = self.signals.sorted();
        for (name, code) in &signals {
            writeln!(output, "$var wire 1 {code} {} $end", signal_reference(name))?;
        }

        writeln!(output, "$upscope $end")?;
        writeln!(output, "$enddefinitions $end")?;

        writeln!(output, "#0")?;
        for (_, code) in &signals {
            writeln!(output, "0{code}")?;
        }

        Ok(())
    }

    /// Drives every signal low again, leaving a clean state after the last event.
    fn write_final_block<W: Write>(&self, output: &mut W) -> Result<(), Error> {
        if self.n_events == 0 {
            return Ok(());
        }

        writeln!(output, "#{}", self.end_time())?;
        for (_, code) in self.signals.sorted() {
            writeln!(output, "0{code}")?;
        }

        Ok(())
    }
}

/// VCD references are whitespace-delimited, so demangled signatures like
/// `foo(int, char)` need their blanks replaced.
fn signal_reference(name: &str) -> Cow<'_, str> {
    if name.contains(char::is_whitespace) {
        Cow::Owned(name.replace(char::is_whitespace, "_"))
    } else {
        Cow::Borrowed(name)
    }
}

impl<S: Read + Write + Seek> Encoder for VcdEncoder<S> {
    const EVENT_SIZE_HINT: usize = 12;

    fn encode<W: Write, I: IntoIterator<Item = EventResult>>(
        &mut self,
        input: I,
        mut output: W,
    ) -> Result<(), Error> {
        ensure!(
            self.n_events == 0 && self.signals.is_empty(),
            "A VCD encoder can only encode a single trace"
        );

        let staged = self.stage_payload(input)?;
        debug!(
            "Staged {} value changes ({staged} bytes) for {} signals",
            self.n_events,
            self.signals.len()
        );

        self.write_header(&mut output)?;

        self.staging.seek(SeekFrom::Start(0))?;
        io::copy(&mut (&mut self.staging).take(staged), &mut output)?;

        self.write_final_block(&mut output)?;

        Ok(())
    }

    fn format(&self) -> &'static str {
        "VCD"
    }
}
