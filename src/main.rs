use std::{ffi::OsString, path::PathBuf};

use anyhow::{Context, Error};
use call_trace::{ByteOrder, TopExtent, TraceError, VcdHeader};
use clap::{ArgAction, Parser, ValueEnum};
use log::LevelFilter;
use log4rs::{
    append::console::{ConsoleAppender, Target},
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};
use trace2vcd::{ConvertOptions, OutputFormat, SymbolInput};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_MALFORMED_TRACE: i32 = 2;

#[derive(Parser)]
#[command(version, about = "Converts binary function call traces into VCD waveforms")]
struct Cli {
    /// Binary trace file to convert
    #[arg(short, long)]
    tracefile: PathBuf,

    /// File to write the waveform to
    #[arg(short, long)]
    output: PathBuf,

    /// Traced program, its symbols are listed with `nm`
    #[arg(short, long, required_unless_present = "symbols", conflicts_with = "symbols")]
    program: Option<PathBuf>,

    /// Saved `nm -n` listing of the traced program
    #[arg(short, long)]
    symbols: Option<PathBuf>,

    /// Convert at most this many records (0 converts all)
    #[arg(short, long, default_value_t = 0)]
    limit: u64,

    /// Symbol listing command
    #[arg(long, default_value = "nm")]
    nm: OsString,

    #[arg(long, value_enum, default_value_t = RecordByteOrder::Little)]
    byte_order: RecordByteOrder,

    /// End (hex) of the highest function, which is unbounded otherwise
    #[arg(long, value_parser = parse_hex_address)]
    max_address: Option<u64>,

    #[arg(long, value_enum, default_value_t = Format::Vcd)]
    format: Format,

    /// `$date` of the VCD header [default: modification time of the trace file]
    #[arg(long)]
    date: Option<String>,

    /// `$timescale` of the VCD header
    #[arg(long, default_value = "1 ns")]
    timescale: String,

    /// Also write the assigned signal identifiers as JSON
    #[arg(long)]
    signal_map: Option<PathBuf>,

    /// More output per occurrence (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only report errors
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum RecordByteOrder {
    Little,
    Big,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Vcd,
    Text,
}

fn parse_hex_address(value: &str) -> Result<u64, String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u64::from_str_radix(digits, 16).map_err(|e| format!("not a hex address: {e}"))
}

impl Cli {
    fn level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Error;
        }

        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn into_options(self) -> Result<ConvertOptions, Error> {
        let symbols = match (self.program, self.symbols) {
            (_, Some(listing)) => SymbolInput::Listing(listing),
            (Some(program), None) => SymbolInput::Program(program),
            (None, None) => anyhow::bail!("Either --program or --symbols is required"),
        };

        let date = match self.date {
            Some(date) => date,
            None => trace2vcd::modification_date(&self.tracefile)?,
        };

        let mut options = ConvertOptions::new(self.tracefile, self.output, symbols);
        options.nm = self.nm;
        options.limit = self.limit;
        options.byte_order = match self.byte_order {
            RecordByteOrder::Little => ByteOrder::Little,
            RecordByteOrder::Big => ByteOrder::Big,
        };
        options.top = match self.max_address {
            Some(max) => TopExtent::Until(max),
            None => TopExtent::Unbounded,
        };
        options.format = match self.format {
            Format::Vcd => OutputFormat::Vcd,
            Format::Text => OutputFormat::Text,
        };
        options.header = VcdHeader {
            date,
            timescale: self.timescale,
            ..VcdHeader::default()
        };
        options.signal_map = self.signal_map;

        Ok(options)
    }
}

fn init_logging(level: LevelFilter) -> Result<(), Error> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{l:<5} {t} - {m}{n}")))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .context("Invalid logging configuration")?;

    log4rs::init_config(config).context("Failed to initialize logging")?;

    Ok(())
}

fn run(args: Cli) -> Result<(), Error> {
    init_logging(args.level())?;

    let options = args.into_options()?;
    let report = trace2vcd::convert_file(&options)?;

    if report.unresolved > 0 {
        log::info!(
            "{} of {} records hit addresses outside of known functions",
            report.unresolved,
            report.records
        );
    }

    Ok(())
}

fn exit_code_for(err: &Error) -> i32 {
    if err.chain().any(|cause| cause.is::<TraceError>()) {
        EXIT_MALFORMED_TRACE
    } else {
        EXIT_ERROR
    }
}

fn main() {
    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help and --version are reported through clap errors as well
            let code = if e.use_stderr() { EXIT_ERROR } else { EXIT_SUCCESS };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    std::process::exit(match run(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    });
}
