use std::{io::Read, rc::Rc};

use anyhow::Error;
use log::{debug, trace, warn};

use crate::{
    error::TraceError,
    generic::{Direction, Event, EventResult, Parser},
    symbols::SymbolTable,
};

use super::{ByteOrder, CHUNK_RECORDS, RECORD_SIZE, Record};

/// A parser for function call traces in _FnTrace_ format.
///
/// Every record is resolved against the symbol table the parser was created
/// with, and its relative time delta is turned into an absolute timestamp.
pub struct FnTraceParser {
    symbols: Rc<SymbolTable>,
    limit: u64,
    byte_order: ByteOrder,
}

impl FnTraceParser {
    pub fn new(symbols: Rc<SymbolTable>) -> Self {
        Self {
            symbols,
            limit: 0,
            byte_order: ByteOrder::default(),
        }
    }

    /// Stops parsing after `max_records` records. `0` parses the whole input.
    pub fn with_limit(mut self, max_records: u64) -> Self {
        self.limit = max_records;
        self
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }
}

impl Parser for FnTraceParser {
    type Iter<R: Read> = FnTraceIterator<R>;

    fn parse<R: Read>(&mut self, input: R) -> Result<Self::Iter<R>, Error> {
        let remaining = (self.limit != 0).then_some(self.limit);

        Ok(FnTraceIterator::new(
            input,
            Rc::clone(&self.symbols),
            remaining,
            self.byte_order,
        ))
    }

    fn format(&self) -> &'static str {
        "FnTrace"
    }
}

pub struct FnTraceIterator<R: Read> {
    input: R,
    symbols: Rc<SymbolTable>,
    byte_order: ByteOrder,
    buffer: Vec<u8>,
    filled: usize,
    position: usize,
    remaining: Option<u64>,
    record_counter: u64,
    unresolved: u64,
    time: u64,
    finished: bool,
}

impl<R: Read> FnTraceIterator<R> {
    fn new(
        input: R,
        symbols: Rc<SymbolTable>,
        remaining: Option<u64>,
        byte_order: ByteOrder,
    ) -> Self {
        Self {
            input,
            symbols,
            byte_order,
            buffer: vec![0; CHUNK_RECORDS * RECORD_SIZE],
            filled: 0,
            position: 0,
            remaining,
            record_counter: 0,
            unresolved: 0,
            // Time 0 holds the initial state of all signals
            time: 1,
            finished: false,
        }
    }

    /// Number of records decoded so far.
    pub fn records(&self) -> u64 {
        self.record_counter
    }

    /// Number of decoded records whose address no function covered.
    pub fn unresolved(&self) -> u64 {
        self.unresolved
    }

    /// Refills the buffer with up to one chunk of whole records.
    fn fill_chunk(&mut self) -> Result<(), Error> {
        let mut wanted = self.buffer.len();
        if let Some(remaining) = self.remaining {
            let remaining_bytes = usize::try_from(remaining)
                .unwrap_or(usize::MAX)
                .saturating_mul(RECORD_SIZE);
            wanted = wanted.min(remaining_bytes);
        }

        let mut filled = 0;
        while filled < wanted {
            match self.input.read(&mut self.buffer[filled..wanted]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let trailing = filled % RECORD_SIZE;
        if trailing != 0 {
            warn!(
                "Ignoring {trailing} trailing bytes after record #{}: not a whole record",
                self.record_counter + (filled / RECORD_SIZE) as u64
            );
        }

        debug!("Read {} records from trace", filled / RECORD_SIZE);

        self.filled = filled - trailing;
        self.position = 0;

        Ok(())
    }

    fn next_time(&mut self, delta: u32) -> u64 {
        let mut time = self.time + u64::from(delta);
        // Two value changes must never share a timestamp
        if time == self.time {
            time += 1;
        }
        self.time = time;
        time
    }

    fn inner_next(&mut self) -> Result<Option<Event>, Error> {
        if self.finished || self.remaining == Some(0) {
            return Ok(None);
        }

        if self.position == self.filled {
            self.fill_chunk()?;
            if self.filled == 0 {
                return Ok(None);
            }
        }

        let mut bytes = [0; RECORD_SIZE];
        bytes.copy_from_slice(&self.buffer[self.position..self.position + RECORD_SIZE]);
        self.position += RECORD_SIZE;

        let record = Record::from_bytes(bytes, self.byte_order);
        let Some(direction) = Direction::from_opcode(record.opcode) else {
            return Err(TraceError::InvalidOpcode {
                opcode: record.opcode,
                record: self.record_counter,
            }
            .into());
        };

        let time = self.next_time(record.delta);
        let address = u64::from(record.address);
        let function = match self.symbols.lookup(address) {
            Some(entry) => Rc::clone(entry.name()),
            None => {
                self.unresolved += 1;
                self.symbols.resolve(address)
            }
        };

        trace!(
            "#{} {direction:?} {function} at {time} (address {address:#010x})",
            self.record_counter
        );

        self.record_counter += 1;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }

        Ok(Some(Event::new(direction, function, time)))
    }
}

impl<R: Read> Iterator for FnTraceIterator<R> {
    type Item = EventResult;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.inner_next();
        if !matches!(next, Ok(Some(_))) {
            self.finished = true;
        }
        next.transpose()
    }
}
