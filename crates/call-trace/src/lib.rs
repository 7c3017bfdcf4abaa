//! Decoding of binary function call traces and their conversion into
//! waveforms.
//!
//! A trace is a sequence of fixed-width records marking function entries
//! and exits. The [`fntrace`] parser resolves the recorded addresses through
//! a [`SymbolTable`] and reconstructs absolute timestamps; an [`Encoder`]
//! such as the [`VcdEncoder`] turns the resulting events into an output
//! document.

use std::io::{Read, Write};

use anyhow::Error;

use crate::generic::{Encoder, Parser};

mod error;
/// Utilities to parse function call traces in FnTrace format
pub mod fntrace;
/// Generic traits and structs for parsing and encoding of function call traces
pub mod generic;
pub mod ident;
pub mod symbols;
mod text;
mod vcd;

pub use error::TraceError;
pub use fntrace::{ByteOrder, parser::FnTraceParser};
pub use generic::{Direction, Event, EventResult};
pub use ident::IdentifierAllocator;
pub use symbols::{SymbolTable, TopExtent};
pub use text::TextEncoder;
pub use vcd::{SignalRecord, VcdEncoder, VcdHeader, VcdSummary};

/// Converts a function call trace from one format into another
pub fn convert<P: Parser, E: Encoder, I: Read, O: Write>(
    parser: &mut P,
    encoder: &mut E,
    input: I,
    mut output: O,
) -> Result<(), Error> {
    encoder.encode(parser.parse(input)?, &mut output)?;

    output.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, rc::Rc};

    use anyhow::Error;

    use crate::{
        FnTraceParser, SymbolTable, TextEncoder, TopExtent, TraceError, VcdEncoder, VcdHeader,
        convert,
        fntrace::{ByteOrder, Record},
        symbols::RawSymbol,
    };

    fn foo_bar_symbols() -> Rc<SymbolTable> {
        Rc::new(SymbolTable::from_symbols(
            vec![
                RawSymbol::new(0x1000, 'T', "foo"),
                RawSymbol::new(0x1010, 'T', "bar"),
                RawSymbol::new(0x1020, 'B', "_end"),
            ],
            TopExtent::Unbounded,
        ))
    }

    fn trace_bytes(records: &[Record]) -> Vec<u8> {
        records
            .iter()
            .flat_map(|record| record.to_bytes(ByteOrder::Little))
            .collect()
    }

    fn header() -> VcdHeader {
        VcdHeader {
            date: "today".into(),
            version: "test".into(),
            ..VcdHeader::default()
        }
    }

    #[test]
    fn convert_fntrace_to_vcd() -> Result<(), Error> {
        let trace = trace_bytes(&[
            Record::new(1, 5, 0x1004),
            Record::new(2, 3, 0x1008),
            Record::new(1, 0, 0x1010),
            Record::new(2, 0, 0x101F),
        ]);

        let mut parser = FnTraceParser::new(foo_bar_symbols());
        let mut encoder = VcdEncoder::in_memory(header());
        let mut output = Cursor::new(Vec::new());
        convert(&mut parser, &mut encoder, &trace[..], &mut output)?;

        let vcd = String::from_utf8(output.into_inner())?;
        assert!(vcd.contains("$var wire 1 ) bar $end\n$var wire 1 ( foo $end\n"));
        assert!(vcd.ends_with("#0\n0)\n0(\n#6\n1(\n#9\n0(\n#10\n1)\n#11\n0)\n#13\n0)\n0(\n"));

        Ok(())
    }

    #[test]
    fn convert_unknown_address() -> Result<(), Error> {
        let trace = trace_bytes(&[Record::new(1, 1, 0xBEEF), Record::new(2, 1, 0xBEEF)]);

        let mut parser = FnTraceParser::new(foo_bar_symbols());
        let mut encoder = VcdEncoder::in_memory(header());
        let mut output = Vec::new();
        convert(&mut parser, &mut encoder, &trace[..], &mut output)?;

        let vcd = String::from_utf8(output)?;
        assert!(vcd.contains("$var wire 1 ( UNKNOWN_0000BEEF $end"));
        assert!(vcd.contains("#2\n1(\n#3\n0(\n"));

        Ok(())
    }

    #[test]
    fn convert_to_text() -> Result<(), Error> {
        let trace = trace_bytes(&[Record::new(1, 2, 0x1000), Record::new(2, 2, 0x1000)]);

        let mut parser = FnTraceParser::new(foo_bar_symbols());
        let mut output = Vec::new();
        convert(&mut parser, &mut TextEncoder::new(), &trace[..], &mut output)?;

        assert_eq!(String::from_utf8(output)?, "3|enter|foo\n5|exit|foo\n");

        Ok(())
    }

    #[test]
    fn invalid_opcode_produces_no_output() -> Result<(), Error> {
        let trace = trace_bytes(&[
            Record::new(1, 1, 0x1000),
            Record::new(7, 1, 0x1000),
            Record::new(2, 1, 0x1000),
        ]);

        let mut parser = FnTraceParser::new(foo_bar_symbols());
        let mut encoder = VcdEncoder::in_memory(header());
        let mut output = Vec::new();
        let err = convert(&mut parser, &mut encoder, &trace[..], &mut output).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<TraceError>(),
            Some(TraceError::InvalidOpcode { opcode: 7, .. })
        ));
        assert!(output.is_empty());

        Ok(())
    }
}
