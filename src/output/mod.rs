//! JSON output for `--output json`.

mod writer;

pub use writer::OutputWriter;
