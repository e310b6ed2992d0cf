use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::packet::{COUNTER_WIDTH, DatagramLayout};

/// Largest payload a single IPv4 UDP datagram can carry.
pub const MAX_UDP_PAYLOAD: usize = 65507;

#[derive(Parser, Debug, Clone)]
#[command(name = "udp-seq-receiver")]
#[command(about = "UDP receiver with 32 bit sequence number check")]
pub struct Args {
    /// UDP receive port
    #[arg(short, long, default_value = "9000")]
    pub port: u16,

    /// Interface IP to bind to
    #[arg(short, long, default_value = "0.0.0.0")]
    pub interface: String,

    /// Socket receive buffer size (bytes)
    #[arg(short = 'b', long, default_value = "2000000")]
    pub socket_buffer_size: usize,

    /// Samples per packet
    #[arg(long, default_value = "1")]
    pub spp: usize,

    /// Sample size (bytes)
    #[arg(long, default_value = "64")]
    pub ssb: usize,

    /// Count column (indexed from 0, -1 disables sequence checking)
    #[arg(short, long, default_value = "1", allow_negative_numbers = true)]
    pub count_column: i64,

    /// SCHED_FIFO priority for the receive thread (0: no set)
    #[arg(short = 'R', long, default_value = "0")]
    pub rt_prio: i32,

    /// Pin the receive thread to this CPU core
    #[arg(long)]
    pub core: Option<usize>,

    /// Mirror raw payload to this file ('-' for stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Suppress periodic rate reports
    #[arg(short, long, default_value = "false")]
    pub quiet: bool,

    /// Stop after this many samples (0 = unlimited)
    #[arg(short = 'n', long, default_value = "0")]
    pub max_samples: u64,

    /// Stop once the error count exceeds this value
    #[arg(short = 'e', long, default_value = "9")]
    pub max_errors: u64,

    /// Report interval in seconds
    #[arg(short = 'r', long, default_value = "10")]
    pub interval: u64,

    /// Receive timeout in milliseconds (0 = block forever)
    #[arg(long, default_value = "0")]
    pub timeout_ms: u64,

    /// Verbose logging (default: false)
    #[arg(short, long, default_value = "false")]
    pub verbose: bool,
}

/// Where the raw datagrams are mirrored to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    Stdout,
    File(PathBuf),
}

/// Validated receiver settings. Built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub bind_addr: SocketAddr,
    pub socket_buffer_size: usize,
    pub layout: DatagramLayout,
    pub rt_priority: Option<i32>,
    pub core: Option<usize>,
    pub output: Option<SinkTarget>,
    pub quiet: bool,
    pub max_samples: Option<u64>,
    pub max_errors: u64,
    pub report_interval: Duration,
    pub recv_timeout: Option<Duration>,
}

impl ReceiverConfig {
    /// Settings for a receiver on `port` with the given datagram shape and
    /// everything else at its command line default.
    pub fn new(port: u16, layout: DatagramLayout) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            socket_buffer_size: 2_000_000,
            layout,
            rt_priority: None,
            core: None,
            output: None,
            quiet: false,
            max_samples: None,
            max_errors: 9,
            report_interval: Duration::from_secs(10),
            recv_timeout: None,
        }
    }

    pub fn sequence_checking(&self) -> bool {
        self.layout.count_column.is_some()
    }
}

impl TryFrom<Args> for ReceiverConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let count_column = match args.count_column {
            -1 => None,
            c if c < 0 => return Err(ConfigError::CountColumn(c)),
            c => Some(c as usize),
        };
        let layout = DatagramLayout::new(args.ssb, args.spp, count_column)?;

        if args.interval == 0 {
            return Err(ConfigError::ReportInterval);
        }

        let ip: IpAddr = args
            .interface
            .parse()
            .map_err(|_| ConfigError::Interface(args.interface.clone()))?;

        let output = args.output.map(|path| {
            if path.as_os_str() == "-" {
                SinkTarget::Stdout
            } else {
                SinkTarget::File(path)
            }
        });

        Ok(Self {
            bind_addr: SocketAddr::new(ip, args.port),
            socket_buffer_size: args.socket_buffer_size,
            layout,
            rt_priority: (args.rt_prio != 0).then_some(args.rt_prio),
            core: args.core,
            output,
            quiet: args.quiet,
            max_samples: (args.max_samples != 0).then_some(args.max_samples),
            max_errors: args.max_errors,
            report_interval: Duration::from_secs(args.interval),
            recv_timeout: (args.timeout_ms != 0).then(|| Duration::from_millis(args.timeout_ms)),
        })
    }
}

/// Checks the datagram shape before any socket work.
pub(crate) fn validate_layout(
    sample_size: usize,
    samples_per_packet: usize,
    count_column: Option<usize>,
) -> Result<(), ConfigError> {
    if samples_per_packet == 0 {
        return Err(ConfigError::SamplesPerPacket(samples_per_packet));
    }
    if sample_size < COUNTER_WIDTH {
        return Err(ConfigError::SampleSize(sample_size));
    }
    if let Some(column) = count_column {
        let offset = column.saturating_mul(COUNTER_WIDTH);
        let end = offset.saturating_add(COUNTER_WIDTH);
        if end > sample_size {
            return Err(ConfigError::CounterOutsideSample {
                column,
                offset,
                end,
                sample_size,
            });
        }
    }
    let datagram_size = sample_size.saturating_mul(samples_per_packet);
    if datagram_size > MAX_UDP_PAYLOAD {
        return Err(ConfigError::DatagramTooLarge(datagram_size, MAX_UDP_PAYLOAD));
    }
    Ok(())
}
