use anyhow::Result;
use clap::Parser;
use tracing::info;

use udp_seq_receiver::{Args, ReceiverConfig, Runner, UdpReceiver, rt};

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    let config = ReceiverConfig::try_from(args)?;
    info!("Starting UDP sequence receiver on {}", config.bind_addr);

    rt::apply(config.rt_priority, config.core);

    let source = UdpReceiver::bind(config.bind_addr, config.socket_buffer_size, config.recv_timeout)?;
    let summary = Runner::new(config, source)?.run()?;

    info!("{}", summary);
    Ok(())
}
