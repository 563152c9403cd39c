//! `mudio`: line-oriented async IO for the muddy server.
//!
//! The wire format is one UTF-8 JSON document per line; this crate only deals
//! in raw lines and leaves parsing to `mudwire`.

pub mod line;

pub use line::LineReader;
