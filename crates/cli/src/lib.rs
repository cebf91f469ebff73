//! Building blocks of the `fnotify` binary

pub mod sink;

pub use sink::{LineFormat, LogSink, StdoutSink};
