//! UDP receiver that checks a 32 bit sample counter embedded in every
//! datagram, accounts for lost and reordered samples and reports receive
//! rates periodically.

pub mod config;
pub mod error;
pub mod packet;
pub mod receiver;
pub mod rt;
pub mod runner;
pub mod sequence;
pub mod sink;
pub mod stats;

pub use config::{Args, ReceiverConfig, SinkTarget};
pub use error::{ConfigError, RxError};
pub use packet::{DatagramLayout, read_counter};
pub use receiver::{DatagramSource, UdpReceiver};
pub use runner::{LoopControl, RunSummary, Runner, StopReason};
pub use sequence::{Deviation, Observation, Outcome, SequenceTracker};
pub use stats::{RateReport, RateReporter};
