//! Input and output codecs of the `dealroom` binary.

pub mod csv;
pub mod jsonl;
