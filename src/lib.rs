//! Conversion of binary function call traces into waveform files.
//!
//! The heavy lifting happens in [`call_trace`]; this crate loads the symbols
//! of the traced program, wires the trace parser to an encoder and takes care
//! that the output file only ever appears complete.

use std::{
    ffi::{OsStr, OsString},
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    rc::Rc,
    time::SystemTime,
};

use anyhow::{Context, Error};
use call_trace::{
    ByteOrder, EventResult, FnTraceParser, SymbolTable, TextEncoder, TopExtent, VcdEncoder,
    VcdHeader, VcdSummary,
    fntrace::RECORD_SIZE,
    generic::{Encoder, Parser},
};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tempfile::NamedTempFile;

use crate::progress::Progress;

/// Invocation of the external symbol listing tool
pub mod nm;
mod progress;

/// Where the symbols of the traced program come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolInput {
    /// The traced program itself, whose symbols are listed with `nm`.
    Program(PathBuf),
    /// A saved `nm -n` listing.
    Listing(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Vcd,
    Text,
}

/// Everything [`convert_file`] needs to know about a single conversion.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub tracefile: PathBuf,
    pub output: PathBuf,
    pub symbols: SymbolInput,
    /// The `nm` command used for [`SymbolInput::Program`].
    pub nm: OsString,
    /// Maximum number of records to convert, `0` converts all of them.
    pub limit: u64,
    pub byte_order: ByteOrder,
    pub top: TopExtent,
    pub format: OutputFormat,
    pub header: VcdHeader,
    /// Where to write the signal summary as JSON (VCD output only).
    pub signal_map: Option<PathBuf>,
}

impl ConvertOptions {
    pub fn new(tracefile: PathBuf, output: PathBuf, symbols: SymbolInput) -> Self {
        Self {
            tracefile,
            output,
            symbols,
            nm: OsString::from("nm"),
            limit: 0,
            byte_order: ByteOrder::default(),
            top: TopExtent::default(),
            format: OutputFormat::default(),
            header: VcdHeader::default(),
            signal_map: None,
        }
    }
}

/// Statistics of a finished conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    pub records: u64,
    pub unresolved: u64,
    pub functions: usize,
    /// Present for VCD output.
    pub summary: Option<VcdSummary>,
}

/// Builds the symbol table of the traced program.
pub fn load_symbols(input: &SymbolInput, nm: &OsStr, top: TopExtent) -> Result<SymbolTable, Error> {
    match input {
        SymbolInput::Program(program) => {
            let listing = nm::symbol_listing(nm, program)?;
            SymbolTable::from_listing(&listing[..], top)
                .with_context(|| format!("Failed to read symbols of {}", program.display()))
        }
        SymbolInput::Listing(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open symbol listing {}", path.display()))?;
            SymbolTable::from_listing(BufReader::new(file), top)
                .with_context(|| format!("Failed to read symbol listing {}", path.display()))
        }
    }
}

/// Formats the modification time of `path` for the `$date` section of a VCD header.
pub fn modification_date(path: &Path) -> Result<String, Error> {
    let modified: SystemTime = std::fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .with_context(|| format!("Failed to read modification time of {}", path.display()))?;

    Ok(DateTime::<Utc>::from(modified)
        .format("%b %d %Y %H:%M:%S")
        .to_string())
}

/// The number of records a conversion of a `trace_len` bytes long trace will process.
fn expected_records(trace_len: u64, limit: u64) -> u64 {
    let records = trace_len / RECORD_SIZE as u64;
    if limit == 0 { records } else { records.min(limit) }
}

/// Number of encoded events buffered before they are written to the output file.
const BUFFERED_EVENTS: usize = 8192;

fn encode_into<E: Encoder, I: IntoIterator<Item = EventResult>>(
    encoder: &mut E,
    events: I,
    output: &mut File,
) -> Result<(), Error> {
    let mut output = BufWriter::with_capacity(BUFFERED_EVENTS * E::EVENT_SIZE_HINT, output);

    encoder
        .encode(events, &mut output)
        .with_context(|| format!("Failed to encode trace as {}", encoder.format()))?;

    output.flush()?;

    Ok(())
}

/// Creates the temporary file the output is written to before it is moved
/// to `target`.
///
/// `NamedTempFile` is private to its owner by default. The output instead
/// gets the permissions of the file it replaces, or those of a newly created
/// file (`0666` minus the umask).
fn temporary_output(target: &Path) -> Result<NamedTempFile, Error> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }

    let output = builder
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create temporary output in {}", dir.display()))?;

    if let Ok(existing) = std::fs::metadata(target) {
        output
            .as_file()
            .set_permissions(existing.permissions())
            .with_context(|| format!("Failed to copy permissions of {}", target.display()))?;
    }

    Ok(output)
}

/// Converts the trace file described by `options`.
///
/// The output is written to a temporary file next to `options.output` and
/// only moved into place once the conversion succeeded, so a failed
/// conversion neither creates nor replaces the output file.
pub fn convert_file(options: &ConvertOptions) -> Result<ConversionReport, Error> {
    let symbols = Rc::new(load_symbols(&options.symbols, &options.nm, options.top)?);
    info!("Loaded {} functions", symbols.len());

    let input = File::open(&options.tracefile)
        .with_context(|| format!("Failed to open trace file {}", options.tracefile.display()))?;
    let total = expected_records(input.metadata()?.len(), options.limit);
    debug!("Expecting {total} records");

    let mut parser = FnTraceParser::new(symbols)
        .with_limit(options.limit)
        .with_byte_order(options.byte_order);
    let mut events = parser.parse(input)?;
    info!(
        "Converting {} trace {}",
        parser.format(),
        options.tracefile.display()
    );

    let mut output = temporary_output(&options.output)?;

    let summary = {
        let writer = output.as_file_mut();
        let progress = Progress::new(events.by_ref(), total);

        match options.format {
            OutputFormat::Vcd => {
                let staging =
                    tempfile::tempfile().context("Failed to create staging file for the VCD payload")?;
                let mut encoder = VcdEncoder::new(options.header.clone(), staging);
                encode_into(&mut encoder, progress, writer)?;
                Some(encoder.summary())
            }
            OutputFormat::Text => {
                encode_into(&mut TextEncoder::new(), progress, writer)?;
                None
            }
        }
    };

    output
        .persist(&options.output)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to write output file {}", options.output.display()))?;

    // Only written once the output it describes exists
    match (&options.signal_map, &summary) {
        (Some(path), Some(summary)) => {
            let json = serde_json::to_string_pretty(summary)?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write signal map {}", path.display()))?;
        }
        (Some(_), None) => warn!("A signal map is only written for VCD output"),
        _ => {}
    }

    let report = ConversionReport {
        records: events.records(),
        unresolved: events.unresolved(),
        functions: summary.as_ref().map_or(0, |summary| summary.signals.len()),
        summary,
    };

    info!(
        "Converted {} records into {} ({} unresolved addresses)",
        report.records,
        options.output.display(),
        report.unresolved
    );

    Ok(report)
}
