//! Built-in sinks.

mod log;

pub use log::TracingSink;
