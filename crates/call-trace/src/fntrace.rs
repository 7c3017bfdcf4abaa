/// Utilities to parse function call traces in FnTrace format.
pub mod parser;

// ============================================================================
// Layout of a single FnTrace record:
//
//   | packed: u32                          | address: u32 |
//   | opcode (bits 31..24) | delta (23..0) |              |
pub const RECORD_SIZE: usize = 8;

const OPCODE_BIT_OFFSET: u32 = 24;
const OPCODE_MASK: u32 = 0xFF;
const DELTA_MASK: u32 = (1 << OPCODE_BIT_OFFSET) - 1;

/// Number of records fetched from the input per read.
const CHUNK_RECORDS: usize = 16384;
// ============================================================================

/// Byte order of the two 32-bit words in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    fn read_u32(&self, bytes: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        }
    }

    fn write_u32(&self, value: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }
}

/// A raw FnTrace record, as written by the instrumentation hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub opcode: u8,
    /// Time elapsed since the previous record (only the low 24 bits are stored)
    pub delta: u32,
    pub address: u32,
}

impl Record {
    pub fn new(opcode: u8, delta: u32, address: u32) -> Self {
        Self {
            opcode,
            delta,
            address,
        }
    }

    pub fn from_bytes(bytes: [u8; RECORD_SIZE], order: ByteOrder) -> Self {
        let [p0, p1, p2, p3, a0, a1, a2, a3] = bytes;
        let packed = order.read_u32([p0, p1, p2, p3]);
        let address = order.read_u32([a0, a1, a2, a3]);

        Self {
            opcode: ((packed >> OPCODE_BIT_OFFSET) & OPCODE_MASK) as u8,
            delta: packed & DELTA_MASK,
            address,
        }
    }

    /// Encodes the record. A `delta` wider than 24 bits is truncated.
    pub fn to_bytes(&self, order: ByteOrder) -> [u8; RECORD_SIZE] {
        let packed = (u32::from(self.opcode) << OPCODE_BIT_OFFSET) | (self.delta & DELTA_MASK);
        let [p0, p1, p2, p3] = order.write_u32(packed);
        let [a0, a1, a2, a3] = order.write_u32(self.address);

        [p0, p1, p2, p3, a0, a1, a2, a3]
    }
}
