use thiserror::Error;

/// Fatal conditions of a function call trace.
///
/// These travel inside [`anyhow::Error`] like every other failure of this
/// crate, but callers can recognize them with
/// [`anyhow::Error::downcast_ref`] or by walking the error chain.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TraceError {
    #[error("Invalid opcode {opcode} in trace record #{record} (expected 1 = enter or 2 = exit)")]
    InvalidOpcode { opcode: u8, record: u64 },

    #[error("Event time {time} does not advance past the previous event time {previous}")]
    NonMonotonicTime { time: u64, previous: u64 },
}
