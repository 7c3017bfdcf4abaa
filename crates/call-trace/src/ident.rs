use std::{collections::HashMap, rc::Rc};

/// First character of the identifier alphabet.
///
/// Starting at `(` keeps quotes as well as `#` and `$` (which introduce
/// timestamps and keywords in VCD) out of every identifier.
const FIRST_CHAR: u8 = b'(';
const LAST_CHAR: u8 = b'~';
const RADIX: u64 = (LAST_CHAR - FIRST_CHAR + 1) as u64;

/// Encodes `index` as a positional numeral over the identifier alphabet,
/// most significant digit first.
///
/// Single characters cover the first 87 indices; after that a second
/// character is prefixed, then a third and so on.
pub fn encode_identifier(index: u64) -> String {
    let mut digits = Vec::new();
    let mut remainder = index;

    loop {
        digits.push(FIRST_CHAR + (remainder % RADIX) as u8);
        remainder /= RADIX;
        if remainder == 0 {
            break;
        }
    }

    digits.iter().rev().map(|&digit| char::from(digit)).collect()
}

/// Hands out short printable identifiers, one per distinct name, in
/// first-encounter order.
pub struct IdentifierAllocator {
    codes: HashMap<Rc<str>, String>,
    counter: u64,
}

impl IdentifierAllocator {
    pub fn new() -> Self {
        Self {
            codes: HashMap::new(),
            counter: 0,
        }
    }

    /// Returns the identifier of `name`, assigning the next free one if
    /// `name` has not been seen before.
    pub fn allocate(&mut self, name: &str) -> &str {
        if !self.codes.contains_key(name) {
            let code = encode_identifier(self.counter);
            self.counter += 1;
            self.codes.insert(Rc::from(name), code);
        }

        &self.codes[name]
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<&str> {
        self.codes.get(name).map(String::as_str)
    }

    /// Returns all `(name, identifier)` assignments ordered by name.
    pub fn sorted(&self) -> Vec<(&str, &str)> {
        let mut assignments: Vec<(&str, &str)> = self
            .codes
            .iter()
            .map(|(name, code)| (&**name, code.as_str()))
            .collect();
        assignments.sort_unstable_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));
        assignments
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl Default for IdentifierAllocator {
    fn default() -> Self {
        Self::new()
    }
}
