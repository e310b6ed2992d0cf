use std::fmt;
use std::io::{self, Write};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ReceiverConfig;
use crate::error::RxError;
use crate::receiver::{DatagramSource, RECV_BUFFER_SIZE, is_timeout};
use crate::sequence::{Outcome, SequenceTracker, echo_line};
use crate::sink::PassthroughSink;
use crate::stats::{RateReporter, SequenceFigures, fmt_elapsed};

/// What the loop should do after one iteration.
#[derive(Debug)]
pub enum LoopControl {
    Continue,
    StopClean(StopReason),
    StopFatal(RxError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Configured sample count reached.
    SampleLimit(u64),
    /// Error count went past the configured maximum.
    ErrorLimit(u64),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::SampleLimit(n) => write!(f, "sample limit of {} reached", n),
            StopReason::ErrorLimit(n) => write!(f, "error count exceeded {}", n),
        }
    }
}

/// Totals of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub reason: StopReason,
    pub packets: u64,
    pub bytes: u64,
    pub samples: u64,
    pub error_count: u64,
    pub packets_lost: u64,
    pub reordered: u64,
    pub elapsed: Duration,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Run finished ({}): {} packets, {} bytes, {} samples, ErrCount = {}, Lost = {}, Reordered = {}, Elapsed {}",
            self.reason,
            self.packets,
            self.bytes,
            self.samples,
            self.error_count,
            self.packets_lost,
            self.reordered,
            fmt_elapsed(self.elapsed)
        )
    }
}

/// Operator facing lines: counter echoes, deviations and rate reports.
struct Console(Box<dyn Write>);

impl Console {
    fn line(&mut self, line: impl fmt::Display) {
        writeln!(self.0, "{}", line).ok();
    }
}

/// Receive loop for a single socket.
///
/// Each datagram is checked for size, its sample counters are fed to the
/// tracker, it is mirrored to the sink and accounted for rate reporting.
pub struct Runner<S: DatagramSource> {
    config: ReceiverConfig,
    source: S,
    tracker: Option<SequenceTracker>,
    reporter: RateReporter,
    sink: Option<PassthroughSink>,
    console: Console,
    buffer: Vec<u8>,
    samples: u64,
}

impl<S: DatagramSource> Runner<S> {
    pub fn new(config: ReceiverConfig, source: S) -> Result<Self, RxError> {
        let sink = config
            .output
            .as_ref()
            .map(PassthroughSink::open)
            .transpose()
            .map_err(RxError::Sink)?;

        let tracker = config
            .sequence_checking()
            .then(|| SequenceTracker::new(config.layout.samples_per_packet));
        let reporter = RateReporter::new(config.report_interval, !config.quiet, Instant::now());

        Ok(Self {
            config,
            source,
            tracker,
            reporter,
            sink,
            console: Console(Box::new(io::stderr())),
            buffer: vec![0u8; RECV_BUFFER_SIZE],
            samples: 0,
        })
    }

    /// Replace the passthrough sink.
    pub fn with_sink(mut self, sink: PassthroughSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Send operator output somewhere other than stderr.
    pub fn with_console(mut self, out: Box<dyn Write>) -> Self {
        self.console = Console(out);
        self
    }

    /// Receive and process one datagram.
    pub fn step(&mut self) -> LoopControl {
        let size = match self.source.recv_datagram(&mut self.buffer) {
            Ok(size) => size,
            Err(e) if is_timeout(&e) => {
                debug!("Receive timed out, link idle");
                self.report_if_due(Instant::now());
                return LoopControl::Continue;
            }
            Err(e) => return LoopControl::StopFatal(RxError::Receive(e)),
        };

        let layout = self.config.layout;
        let expected = layout.datagram_size();
        if size != expected {
            return LoopControl::StopFatal(RxError::DatagramSize {
                expected,
                received: size,
            });
        }

        let now = Instant::now();
        let datagram = &self.buffer[..size];

        if let Some(tracker) = self.tracker.as_mut() {
            for value in layout.counters(datagram) {
                let value = match value {
                    Ok(value) => value,
                    Err(e) => return LoopControl::StopFatal(e.into()),
                };

                let observation = tracker.observe(value);
                if observation.echo {
                    self.console.line(echo_line(value));
                }

                if let Outcome::Deviation(deviation) = observation.outcome {
                    let completed = self.reporter.total_packets();
                    let bytes_lost = deviation.packets_lost * expected as u64;
                    self.console.line(format_args!(
                        "{}, Completed Packets = {}, Bytes = {}",
                        deviation, completed, bytes_lost
                    ));

                    if tracker.error_limit_exceeded(self.config.max_errors) {
                        return LoopControl::StopClean(StopReason::ErrorLimit(
                            self.config.max_errors,
                        ));
                    }
                }
            }
        }
        self.reporter.record(size, now);
        self.samples += layout.samples_per_packet as u64;

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.write_datagram(datagram) {
                return LoopControl::StopFatal(RxError::Sink(e));
            }
        }

        self.report_if_due(now);

        match self.config.max_samples {
            Some(limit) if self.samples >= limit => {
                LoopControl::StopClean(StopReason::SampleLimit(limit))
            }
            _ => LoopControl::Continue,
        }
    }

    /// Run until the sample limit or the error limit stops the loop.
    pub fn run(mut self) -> Result<RunSummary, RxError> {
        info!(
            "Expecting {} byte datagrams ({} samples of {} bytes), sequence check {}",
            self.config.layout.datagram_size(),
            self.config.layout.samples_per_packet,
            self.config.layout.sample_size,
            match self.config.layout.count_column {
                Some(column) => format!("on column {}", column),
                None => "disabled".to_string(),
            }
        );

        loop {
            match self.step() {
                LoopControl::Continue => {}
                LoopControl::StopClean(reason) => {
                    if let StopReason::ErrorLimit(max) = reason {
                        warn!("Error count exceeded {}, stopping", max);
                    }
                    self.flush_sink()?;
                    return Ok(self.summary(reason));
                }
                LoopControl::StopFatal(e) => {
                    error!("Receiver stopped: {}", e);
                    if let Err(flush_err) = self.flush_sink() {
                        warn!("{}", flush_err);
                    }
                    return Err(e);
                }
            }
        }
    }

    pub fn summary(&self, reason: StopReason) -> RunSummary {
        RunSummary {
            reason,
            packets: self.reporter.total_packets(),
            bytes: self.reporter.total_bytes(),
            samples: self.samples,
            error_count: self.tracker.as_ref().map_or(0, SequenceTracker::error_count),
            packets_lost: self.tracker.as_ref().map_or(0, SequenceTracker::packets_lost),
            reordered: self.tracker.as_ref().map_or(0, SequenceTracker::reordered),
            elapsed: self.reporter.elapsed(Instant::now()),
        }
    }

    pub fn tracker(&self) -> Option<&SequenceTracker> {
        self.tracker.as_ref()
    }

    pub fn reporter(&self) -> &RateReporter {
        &self.reporter
    }

    fn report_if_due(&mut self, now: Instant) {
        let figures = self.tracker.as_ref().map(|t| SequenceFigures {
            error_count: t.error_count(),
            packets_lost: t.packets_lost(),
        });
        if let Some(report) = self.reporter.poll(now, figures) {
            self.console.line(report);
        }
    }

    fn flush_sink(&mut self) -> Result<(), RxError> {
        match self.sink.as_mut() {
            Some(sink) => sink.flush().map_err(RxError::Sink),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::DatagramLayout;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Hands out prepared datagrams, then fails like a closed socket.
    struct ScriptedSource {
        datagrams: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ScriptedSource {
        fn new(datagrams: Vec<Vec<u8>>) -> Self {
            Self {
                datagrams: datagrams.into_iter().map(Ok).collect(),
            }
        }
    }

    impl DatagramSource for ScriptedSource {
        fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.datagrams.pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(io::ErrorKind::ConnectionAborted, "script exhausted")),
            }
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn bytes(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }

        fn text(&self) -> String {
            String::from_utf8(self.bytes()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn config(sample_size: usize, spp: usize, column: Option<usize>) -> ReceiverConfig {
        let mut config = ReceiverConfig::new(0, DatagramLayout::new(sample_size, spp, column).unwrap());
        config.quiet = true;
        config
    }

    /// One datagram per chunk of `spp` counter values, counter in column 0.
    fn datagrams(layout: &DatagramLayout, values: &[u32]) -> Vec<Vec<u8>> {
        values
            .chunks(layout.samples_per_packet)
            .map(|chunk| {
                let mut data = vec![0u8; layout.datagram_size()];
                for (i, value) in chunk.iter().enumerate() {
                    let at = i * layout.sample_size;
                    data[at..at + 4].copy_from_slice(&value.to_le_bytes());
                }
                data
            })
            .collect()
    }

    fn runner(config: ReceiverConfig, values: &[u32]) -> (Runner<ScriptedSource>, SharedBuf) {
        let source = ScriptedSource::new(datagrams(&config.layout, values));
        let console = SharedBuf::default();
        let runner = Runner::new(config, source)
            .unwrap()
            .with_console(Box::new(console.clone()));
        (runner, console)
    }

    #[test]
    fn test_gap_scenario_run() {
        let mut config = config(64, 1, Some(0));
        config.max_samples = Some(5);
        let (runner, console) = runner(config, &[100, 101, 102, 105, 106]);

        let summary = runner.run().unwrap();
        assert_eq!(summary.reason, StopReason::SampleLimit(5));
        assert_eq!(summary.packets, 5);
        assert_eq!(summary.bytes, 320);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.packets_lost, 2);

        let text = console.text();
        assert!(text.contains("Deviation! ErrCount = 1, Expected SPAD : 103, Received SPAD : 105"));
        assert!(text.contains("Completed Packets = 3, Bytes = 128"));
        assert!(text.contains("0x00000064    100"));
    }

    #[test]
    fn test_step_outcomes() {
        let (mut runner, _) = runner(config(64, 1, Some(0)), &[1, 2, 4]);

        assert!(matches!(runner.step(), LoopControl::Continue));
        assert!(matches!(runner.step(), LoopControl::Continue));
        assert!(matches!(runner.step(), LoopControl::Continue));
        assert_eq!(runner.tracker().unwrap().error_count(), 1);
        assert_eq!(runner.tracker().unwrap().expected_next(), Some(5));
        assert!(matches!(
            runner.step(),
            LoopControl::StopFatal(RxError::Receive(_))
        ));
    }

    #[test]
    fn test_stops_after_error_limit() {
        let mut config = config(64, 1, Some(0));
        config.max_errors = 2;
        // every value after the first deviates
        let (mut runner, _) = runner(config, &[0, 10, 20, 30, 40, 50]);

        let mut steps = 0;
        let reason = loop {
            steps += 1;
            match runner.step() {
                LoopControl::Continue => {}
                LoopControl::StopClean(reason) => break reason,
                LoopControl::StopFatal(e) => panic!("unexpected fatal error: {}", e),
            }
        };

        assert_eq!(reason, StopReason::ErrorLimit(2));
        assert_eq!(steps, 4);
        assert_eq!(runner.tracker().unwrap().error_count(), 3);
    }

    #[test]
    fn test_error_limit_stops_mid_packet() {
        let mut config = config(16, 4, Some(0));
        config.max_errors = 0;
        let sink = SharedBuf::default();
        let (runner, _) = runner(config, &[0, 1, 9, 10]);
        let runner = runner.with_sink(PassthroughSink::from_writer(Box::new(sink.clone())));

        let summary = runner.run().unwrap();
        assert_eq!(summary.reason, StopReason::ErrorLimit(0));
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.samples, 0);
        assert_eq!(summary.packets, 0);
        assert_eq!(summary.bytes, 0);
        assert!(sink.bytes().is_empty());
    }

    #[test]
    fn test_datagram_size_mismatch_is_fatal() {
        let config = config(9000, 1, Some(0));
        let source = ScriptedSource::new(vec![vec![0u8; 500], vec![0u8; 9000]]);
        let sink = SharedBuf::default();
        let runner = Runner::new(config, source)
            .unwrap()
            .with_console(Box::new(io::sink()))
            .with_sink(PassthroughSink::from_writer(Box::new(sink.clone())));

        match runner.run() {
            Err(RxError::DatagramSize { expected, received }) => {
                assert_eq!(expected, 9000);
                assert_eq!(received, 500);
            }
            other => panic!("expected size error, got {:?}", other),
        }
        assert!(sink.bytes().is_empty());
    }

    #[test]
    fn test_passthrough_only_mode() {
        let mut config = config(64, 2, None);
        config.max_samples = Some(6);
        let source = ScriptedSource::new(vec![vec![0x5Au8; 128], vec![1u8; 128], vec![2u8; 128]]);
        let sink = SharedBuf::default();
        let console = SharedBuf::default();
        let runner = Runner::new(config, source)
            .unwrap()
            .with_console(Box::new(console.clone()))
            .with_sink(PassthroughSink::from_writer(Box::new(sink.clone())));

        assert!(runner.tracker().is_none());
        let summary = runner.run().unwrap();

        assert_eq!(summary.reason, StopReason::SampleLimit(6));
        assert_eq!(summary.packets, 3);
        assert_eq!(summary.bytes, 384);
        assert_eq!(summary.error_count, 0);
        assert!(console.text().is_empty());

        let mirrored = sink.bytes();
        assert_eq!(mirrored.len(), 384);
        assert!(mirrored[..128].iter().all(|&b| b == 0x5A));
        assert!(mirrored[256..].iter().all(|&b| b == 2));
    }

    #[test]
    fn test_multi_sample_packets() {
        let mut config = config(16, 4, Some(0));
        config.max_samples = Some(12);
        // second packet loses 8 samples between its 2nd and 3rd sample
        let values = [0, 1, 2, 3, 4, 5, 14, 15, 16, 17, 18, 19];
        let (runner, _) = runner(config, &values);

        let summary = runner.run().unwrap();
        assert_eq!(summary.samples, 12);
        assert_eq!(summary.packets, 3);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.packets_lost, 2);
    }

    #[test]
    fn test_echo_lines() {
        let mut config = config(64, 1, Some(0));
        config.max_samples = Some(10);
        let (runner, console) = runner(config, &[0, 1, 2, 3, 4, 5, 6, 50, 51, 52]);

        runner.run().unwrap();
        let text = console.text();
        let echoed: Vec<&str> = text.lines().filter(|l| l.starts_with("0x")).collect();
        assert_eq!(
            echoed,
            vec![
                "0x00000000    0",
                "0x00000001    1",
                "0x00000002    2",
                "0x00000003    3",
                "0x00000004    4",
                "0x00000033    51",
            ]
        );
    }

    #[test]
    fn test_timeout_is_idle_iteration() {
        let config = config(64, 1, Some(0));
        let source = ScriptedSource {
            datagrams: VecDeque::from(vec![Err(io::Error::new(io::ErrorKind::WouldBlock, "idle"))]),
        };
        let mut runner = Runner::new(config, source)
            .unwrap()
            .with_console(Box::new(io::sink()));

        assert!(matches!(runner.step(), LoopControl::Continue));
        assert_eq!(runner.reporter().total_packets(), 0);
        assert_eq!(runner.tracker().unwrap().samples_seen(), 0);
    }

    #[test]
    fn test_periodic_report_uses_tracker_figures() {
        let mut config = config(64, 1, Some(0));
        config.quiet = false;
        config.report_interval = Duration::ZERO;
        config.max_samples = Some(3);
        let (runner, console) = runner(config, &[0, 1, 5]);

        runner.run().unwrap();
        let text = console.text();
        let reports: Vec<&str> = text.lines().filter(|l| l.starts_with("Rx rate")).collect();
        assert_eq!(reports.len(), 3);
        assert!(reports[0].contains("ErrCount = 0"));
        assert!(reports[2].contains("ErrCount = 1, Lost = 3"));
    }
}
