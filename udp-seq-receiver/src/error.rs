//! Error types for the receiver.

use thiserror::Error;

/// Invalid command line settings. Detected before the socket is opened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("samples per packet must be at least 1 (got {0})")]
    SamplesPerPacket(usize),
    #[error("sample size must be at least 4 bytes (got {0})")]
    SampleSize(usize),
    #[error("count column {column} puts the counter at bytes {offset}..{end}, outside a {sample_size} byte sample")]
    CounterOutsideSample {
        column: usize,
        offset: usize,
        end: usize,
        sample_size: usize,
    },
    #[error("invalid count column {0} (use -1 to disable sequence checking)")]
    CountColumn(i64),
    #[error("datagram size {0} exceeds the maximum UDP payload of {1} bytes")]
    DatagramTooLarge(usize, usize),
    #[error("report interval must be at least 1 second")]
    ReportInterval,
    #[error("invalid bind address '{0}'")]
    Interface(String),
    #[error("counter at offset {offset} does not fit in a {len} byte datagram")]
    CounterOutOfBounds { offset: usize, len: usize },
}

/// Fatal conditions that end a run.
#[derive(Error, Debug)]
pub enum RxError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("protocol violation: expected {expected} byte datagram, received {received} bytes")]
    DatagramSize { expected: usize, received: usize },
    #[error("receive failed: {0}")]
    Receive(#[source] std::io::Error),
    #[error("passthrough write failed: {0}")]
    Sink(#[source] std::io::Error),
    #[error("socket setup failed: {0}")]
    Socket(#[source] std::io::Error),
}
