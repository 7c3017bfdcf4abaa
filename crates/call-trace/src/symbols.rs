use std::{io::BufRead, rc::Rc};

use anyhow::Error;
use log::debug;

/// Symbol kinds of `nm` that denote code in the text section (global and local).
const FUNCTION_KINDS: [char; 2] = ['T', 't'];

/// Names with this prefix are compiler-internal and never become functions.
const RESERVED_PREFIX: char = '.';

/// A single `(address, kind, name)` triple of a symbol listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSymbol {
    pub address: u64,
    pub kind: char,
    pub name: String,
}

impl RawSymbol {
    pub fn new(address: u64, kind: char, name: impl Into<String>) -> Self {
        Self {
            address,
            kind,
            name: name.into(),
        }
    }

    fn is_function(&self) -> bool {
        FUNCTION_KINDS.contains(&self.kind) && !self.name.starts_with(RESERVED_PREFIX)
    }
}

/// Parses a single line of `nm -n` output.
///
/// The name is the remainder of the line after the kind character, which
/// keeps demangled signatures like `foo(int, char)` intact. Returns `None`
/// for lines that do not carry all three fields, e.g. blank lines or
/// undefined symbols that have no address.
pub fn parse_symbol_line(line: &str) -> Option<RawSymbol> {
    let line = line.trim();
    let (address, rest) = line.split_once(' ')?;
    let (kind, name) = rest.trim_start().split_once(' ')?;

    let mut kind_chars = kind.chars();
    let kind = kind_chars.next()?;
    if kind_chars.next().is_some() {
        return None;
    }

    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let address = u64::from_str_radix(address, 16).ok()?;

    Some(RawSymbol::new(address, kind, name))
}

/// How far the highest-address function extends, given that no symbol
/// above it marks its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopExtent {
    /// The topmost function claims every address from its start upwards.
    #[default]
    Unbounded,
    /// The topmost function ends (exclusively) at the given address.
    Until(u64),
}

/// A function occupying the half-open address range `[start, end)`.
///
/// An `end` of `None` marks an open-ended range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    start: u64,
    end: Option<u64>,
    name: Rc<str>,
}

impl SymbolEntry {
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> Option<u64> {
        self.end
    }

    pub fn name(&self) -> &Rc<str> {
        &self.name
    }

    pub fn contains(&self, address: u64) -> bool {
        self.start <= address && self.end.is_none_or(|end| address < end)
    }
}

/// Address to function name lookup built from an address-ordered symbol listing.
///
/// Symbol tables only record where a function starts, so each function is
/// assumed to extend up to the next symbol in the listing.
#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
}

impl SymbolTable {
    /// Builds the table from symbols in ascending address order.
    ///
    /// Non-function symbols still bound the function below them. If several
    /// functions share a start address, the one listed last claims the range.
    pub fn from_symbols<I: IntoIterator<Item = RawSymbol>>(symbols: I, top: TopExtent) -> Self {
        let mut symbols: Vec<RawSymbol> = symbols.into_iter().collect();
        symbols.sort_by_key(|symbol| symbol.address);

        let mut entries = Vec::new();
        let mut boundary = None;
        let mut dropped = 0_usize;

        for symbol in symbols.iter().rev() {
            if symbol.is_function() {
                let end = match (boundary, top) {
                    (Some(boundary), _) => Some(boundary),
                    (None, TopExtent::Unbounded) => None,
                    (None, TopExtent::Until(max)) => Some(max),
                };

                if end.is_none_or(|end| end > symbol.address) {
                    entries.push(SymbolEntry {
                        start: symbol.address,
                        end,
                        name: Rc::from(symbol.name.as_str()),
                    });
                } else {
                    dropped += 1;
                }
            }
            boundary = Some(symbol.address);
        }

        entries.reverse();

        debug!(
            "Built symbol table: {} functions from {} symbols ({} zero-width functions dropped)",
            entries.len(),
            symbols.len(),
            dropped
        );

        Self { entries }
    }

    /// Builds the table from the textual output of `nm -n`, skipping lines
    /// that are not `(address, kind, name)` triples or not valid UTF-8.
    ///
    /// # Errors
    ///
    /// Fails if reading from `listing` fails.
    pub fn from_listing<R: BufRead>(listing: R, top: TopExtent) -> Result<Self, Error> {
        let mut symbols = Vec::new();
        for line in listing.split(b'\n') {
            let line = line?;
            match std::str::from_utf8(&line).ok().and_then(parse_symbol_line) {
                Some(symbol) => symbols.push(symbol),
                None => log::trace!("Skipping symbol line: {:?}", String::from_utf8_lossy(&line)),
            }
        }

        Ok(Self::from_symbols(symbols, top))
    }

    /// Returns the function whose range contains `address`, if any.
    pub fn lookup(&self, address: u64) -> Option<&SymbolEntry> {
        let idx = self.entries.partition_point(|entry| entry.start <= address);
        let candidate = self.entries.get(idx.checked_sub(1)?)?;
        candidate.contains(address).then_some(candidate)
    }

    /// Returns the name of the function containing `address`.
    ///
    /// Addresses outside of every known function (library code, for instance)
    /// resolve to `UNKNOWN_` followed by the address as 8 uppercase hex digits.
    pub fn resolve(&self, address: u64) -> Rc<str> {
        match self.lookup(address) {
            Some(entry) => Rc::clone(&entry.name),
            None => Rc::from(unknown_function_name(address)),
        }
    }

    pub fn entries(&self) -> &[SymbolEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The placeholder name for an address that no function covers.
pub fn unknown_function_name(address: u64) -> String {
    format!("UNKNOWN_{address:08X}")
}

#[cfg(test)]
mod tests {
    use anyhow::Error;

    use super::{RawSymbol, SymbolTable, TopExtent, parse_symbol_line};

    fn foo_bar_table() -> SymbolTable {
        SymbolTable::from_symbols(
            [
                RawSymbol::new(0x1000, 'T', "foo"),
                RawSymbol::new(0x1010, 'T', "bar"),
                RawSymbol::new(0x1020, 'B', "__bss_start"),
            ],
            TopExtent::Unbounded,
        )
    }

    #[test]
    fn resolve_inside_ranges() {
        let table = foo_bar_table();

        for address in 0x1000..0x1010 {
            assert_eq!(&*table.resolve(address), "foo");
        }
        for address in 0x1010..0x1020 {
            assert_eq!(&*table.resolve(address), "bar");
        }
    }

    #[test]
    fn resolve_outside_ranges() {
        let table = foo_bar_table();

        assert_eq!(&*table.resolve(0xFFF), "UNKNOWN_00000FFF");
        assert_eq!(&*table.resolve(0x1020), "UNKNOWN_00001020");
        assert_eq!(&*table.resolve(0xDEAD_BEEF), "UNKNOWN_DEADBEEF");
        assert_eq!(&*table.resolve(0), "UNKNOWN_00000000");
    }

    #[test]
    fn non_function_symbols_bound_ranges() {
        let table = SymbolTable::from_symbols(
            [
                RawSymbol::new(0x100, 'T', "main"),
                RawSymbol::new(0x180, 'r', "some_rodata"),
                RawSymbol::new(0x200, 't', "helper"),
                RawSymbol::new(0x240, 'D', "some_data"),
            ],
            TopExtent::Unbounded,
        );

        assert_eq!(table.len(), 2);
        assert_eq!(&*table.resolve(0x17F), "main");
        assert_eq!(&*table.resolve(0x180), "UNKNOWN_00000180");
        assert_eq!(&*table.resolve(0x23F), "helper");
        assert_eq!(&*table.resolve(0x240), "UNKNOWN_00000240");
    }

    #[test]
    fn reserved_and_foreign_symbols_are_skipped() {
        let table = SymbolTable::from_symbols(
            [
                RawSymbol::new(0x10, 'T', ".L_internal"),
                RawSymbol::new(0x20, 'W', "weak_fn"),
                RawSymbol::new(0x30, 'T', "real_fn"),
                RawSymbol::new(0x40, 'b', "buffer"),
            ],
            TopExtent::Unbounded,
        );

        assert_eq!(table.len(), 1);
        assert_eq!(&*table.resolve(0x15), "UNKNOWN_00000015");
        assert_eq!(&*table.resolve(0x25), "UNKNOWN_00000025");
        assert_eq!(&*table.resolve(0x35), "real_fn");
    }

    #[test]
    fn aliases_keep_last_listed_name() {
        let table = SymbolTable::from_symbols(
            [
                RawSymbol::new(0x400, 'T', "alias"),
                RawSymbol::new(0x400, 'T', "canonical"),
                RawSymbol::new(0x410, 'T', "next"),
            ],
            TopExtent::Until(0x420),
        );

        assert_eq!(table.len(), 2);
        assert_eq!(&*table.resolve(0x400), "canonical");
        assert_eq!(&*table.resolve(0x40F), "canonical");
    }

    #[test]
    fn unbounded_top_symbol() {
        let table = foo_bar_table();
        let only_functions = SymbolTable::from_symbols(
            [
                RawSymbol::new(0x1000, 'T', "foo"),
                RawSymbol::new(0x1010, 'T', "bar"),
            ],
            TopExtent::Unbounded,
        );

        assert_eq!(table.entries().last().unwrap().end(), Some(0x1020));
        assert_eq!(only_functions.entries().last().unwrap().end(), None);
        assert_eq!(&*only_functions.resolve(0x1010), "bar");
        assert_eq!(&*only_functions.resolve(u64::MAX), "bar");
    }

    #[test]
    fn bounded_top_symbol() {
        let bounded = SymbolTable::from_symbols(
            [
                RawSymbol::new(0x1000, 'T', "foo"),
                RawSymbol::new(0x1010, 'T', "bar"),
            ],
            TopExtent::Until(0x1018),
        );
        assert_eq!(&*bounded.resolve(0x1017), "bar");
        assert_eq!(&*bounded.resolve(0x1018), "UNKNOWN_00001018");

        let below_start = SymbolTable::from_symbols(
            [
                RawSymbol::new(0x1000, 'T', "foo"),
                RawSymbol::new(0x1010, 'T', "bar"),
            ],
            TopExtent::Until(0x1010),
        );
        assert_eq!(below_start.len(), 1);
        assert_eq!(&*below_start.resolve(0x1010), "UNKNOWN_00001010");
    }

    #[test]
    fn empty_table_resolves_nothing() {
        let table = SymbolTable::from_symbols([], TopExtent::Unbounded);
        assert!(table.is_empty());
        assert!(table.lookup(0x1234).is_none());
        assert_eq!(&*table.resolve(0x1234), "UNKNOWN_00001234");
    }

    #[test]
    fn parse_nm_lines() {
        assert_eq!(
            parse_symbol_line("0000000000401136 T main\n"),
            Some(RawSymbol::new(0x401136, 'T', "main"))
        );
        assert_eq!(
            parse_symbol_line("00001040 t foo(int, char const*)\r\n"),
            Some(RawSymbol::new(0x1040, 't', "foo(int, char const*)"))
        );
        assert_eq!(parse_symbol_line("                 U puts"), None);
        assert_eq!(parse_symbol_line(""), None);
        assert_eq!(parse_symbol_line("00001040 T"), None);
        assert_eq!(parse_symbol_line("zzzz T main"), None);
        assert_eq!(parse_symbol_line("00001040 TT main"), None);
    }

    #[test]
    fn build_from_listing() -> Result<(), Error> {
        let listing = "\
                 w __gmon_start__
                 U usleep
0000000000401000 T _init
0000000000401020 t .annobin_init.c
0000000000401030 T FISH3(int)
0000000000401060 T FISH2()

0000000000401070 T FISH()
00000000004010a0 T main
00000000004010c0 T _fini
0000000000404028 B __bss_start
";
        let table = SymbolTable::from_listing(listing.as_bytes(), TopExtent::Unbounded)?;

        assert_eq!(table.len(), 6);
        assert_eq!(&*table.resolve(0x401000), "_init");
        assert_eq!(&*table.resolve(0x40101F), "_init");
        assert_eq!(&*table.resolve(0x401025), "UNKNOWN_00401025");
        assert_eq!(&*table.resolve(0x401042), "FISH3(int)");
        assert_eq!(&*table.resolve(0x401075), "FISH()");
        assert_eq!(&*table.resolve(0x4010a5), "main");
        assert_eq!(&*table.resolve(0x404000), "_fini");
        assert_eq!(&*table.resolve(0x404028), "UNKNOWN_00404028");

        Ok(())
    }

    #[test]
    fn skip_lines_that_are_not_utf8() -> Result<(), Error> {
        let listing: &[u8] = b"0000000000001000 T foo\n\
0000000000001008 t caf\xe9\n\
0000000000001010 T bar\n\
0000000000001020 B _end\n";
        let table = SymbolTable::from_listing(listing, TopExtent::Unbounded)?;

        assert_eq!(table.len(), 2);
        assert_eq!(&*table.resolve(0x100C), "foo");
        assert_eq!(&*table.resolve(0x1014), "bar");

        Ok(())
    }
}
