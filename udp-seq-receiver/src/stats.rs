use std::fmt;
use std::time::{Duration, Instant};

const B1M: f64 = 1_000_000.0;

/// Interval and cumulative receive counters with a fixed report period.
///
/// Accumulates until `interval` has passed since the last report, then
/// `poll` yields a [`RateReport`] and the interval counters start over.
#[derive(Debug, Clone)]
pub struct RateReporter {
    interval: Duration,
    enabled: bool,
    run_start: Option<Instant>,
    interval_start: Instant,
    interval_bytes: u64,
    interval_packets: u64,
    total_bytes: u64,
    total_packets: u64,
}

/// Sequence figures shown in a report when checking is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceFigures {
    pub error_count: u64,
    pub packets_lost: u64,
}

/// One periodic status line.
#[derive(Debug, Clone, PartialEq)]
pub struct RateReport {
    pub interval_secs: f64,
    pub interval_bytes: u64,
    pub interval_packets: u64,
    pub total_bytes: u64,
    pub total_packets: u64,
    pub elapsed: Duration,
    /// `None` when sequence checking is disabled.
    pub sequence: Option<SequenceFigures>,
}

impl RateReport {
    pub fn rate_mbps(&self) -> f64 {
        if self.interval_secs <= 0.0 {
            return 0.0;
        }
        self.interval_bytes as f64 * 8.0 / self.interval_secs / B1M
    }

    /// Megabytes per second received over the interval.
    pub fn interval_mb_per_sec(&self) -> f64 {
        if self.interval_secs <= 0.0 {
            return 0.0;
        }
        self.interval_bytes as f64 / B1M / self.interval_secs
    }

    /// Deviations per received packet.
    pub fn packet_error_rate(&self) -> f64 {
        match self.sequence {
            Some(seq) if self.total_packets > 0 => seq.error_count as f64 / self.total_packets as f64,
            _ => 0.0,
        }
    }
}

impl fmt::Display for RateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rx rate: {:.2} Mbps, rx {:.2} MB/s (total: {} MB), Elapsed {}",
            self.rate_mbps(),
            self.interval_mb_per_sec(),
            self.total_bytes / B1M as u64,
            fmt_elapsed(self.elapsed)
        )?;
        match self.sequence {
            Some(seq) => write!(
                f,
                ", ErrCount = {}, Lost = {}, PER {:.3e}",
                seq.error_count,
                seq.packets_lost,
                self.packet_error_rate()
            ),
            None => write!(f, ", packets {} (sequence check disabled)", self.total_packets),
        }
    }
}

impl RateReporter {
    pub fn new(interval: Duration, enabled: bool, now: Instant) -> Self {
        Self {
            interval,
            enabled,
            run_start: None,
            interval_start: now,
            interval_bytes: 0,
            interval_packets: 0,
            total_bytes: 0,
            total_packets: 0,
        }
    }

    /// Account one received datagram. The first one marks the run start.
    pub fn record(&mut self, bytes: usize, now: Instant) {
        if self.run_start.is_none() {
            self.run_start = Some(now);
        }
        self.interval_bytes += bytes as u64;
        self.interval_packets += 1;
        self.total_bytes += bytes as u64;
        self.total_packets += 1;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.interval_start) >= self.interval
    }

    /// Produce a report if the interval has elapsed, resetting the interval
    /// counters. Returns `None` while accumulating or when reporting is off.
    pub fn poll(&mut self, now: Instant, sequence: Option<SequenceFigures>) -> Option<RateReport> {
        if !self.enabled || !self.is_due(now) {
            return None;
        }

        let report = RateReport {
            interval_secs: now.saturating_duration_since(self.interval_start).as_secs_f64(),
            interval_bytes: self.interval_bytes,
            interval_packets: self.interval_packets,
            total_bytes: self.total_bytes,
            total_packets: self.total_packets,
            elapsed: self.elapsed(now),
            sequence,
        };

        self.interval_bytes = 0;
        self.interval_packets = 0;
        self.interval_start = now;
        Some(report)
    }

    /// Time since the first datagram, zero before it arrives.
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.run_start
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    pub fn interval_bytes(&self) -> u64 {
        self.interval_bytes
    }

    pub fn interval_packets(&self) -> u64 {
        self.interval_packets
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets
    }
}

/// Format as `HH:MM:SS`. Hours keep counting past 24.
pub fn fmt_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_fmt_elapsed() {
        assert_eq!(fmt_elapsed(secs(0)), "00:00:00");
        assert_eq!(fmt_elapsed(secs(3661)), "01:01:01");
        assert_eq!(fmt_elapsed(Duration::from_millis(59_999)), "00:00:59");
        assert_eq!(fmt_elapsed(secs(100 * 3600 + 5)), "100:00:05");
    }

    #[test]
    fn test_not_due_before_interval() {
        let t0 = Instant::now();
        let mut reporter = RateReporter::new(secs(10), true, t0);
        reporter.record(1000, t0);

        assert!(reporter.poll(t0 + Duration::from_millis(9_999), None).is_none());
        assert_eq!(reporter.interval_bytes(), 1000);
    }

    #[test]
    fn test_report_resets_interval_counters() {
        let t0 = Instant::now();
        let mut reporter = RateReporter::new(secs(10), true, t0);
        for _ in 0..4 {
            reporter.record(2500, t0 + secs(1));
        }

        let report = reporter.poll(t0 + secs(10), None).unwrap();
        assert_eq!(report.interval_bytes, 10_000);
        assert_eq!(report.interval_packets, 4);
        assert_eq!(report.total_bytes, 10_000);
        assert_eq!(report.elapsed, secs(9));
        assert!((report.rate_mbps() - 0.008).abs() < 1e-9);
        assert!((report.interval_mb_per_sec() - 0.001).abs() < 1e-12);

        assert_eq!(reporter.interval_bytes(), 0);
        assert_eq!(reporter.interval_packets(), 0);
        assert_eq!(reporter.total_bytes(), 10_000);

        // next interval starts at the report
        assert!(reporter.poll(t0 + secs(19), None).is_none());
        reporter.record(500, t0 + secs(19));
        let report = reporter.poll(t0 + secs(20), None).unwrap();
        assert_eq!(report.interval_bytes, 500);
        assert_eq!(report.total_bytes, 10_500);
        assert_eq!(report.total_packets, 5);
    }

    #[test]
    fn test_quiet_never_reports() {
        let t0 = Instant::now();
        let mut reporter = RateReporter::new(secs(1), false, t0);
        reporter.record(64, t0);

        assert!(reporter.poll(t0 + secs(100), None).is_none());
        assert_eq!(reporter.total_packets(), 1);
    }

    #[test]
    fn test_report_with_sequence_figures() {
        let t0 = Instant::now();
        let mut reporter = RateReporter::new(secs(10), true, t0);
        for _ in 0..1000 {
            reporter.record(9000, t0);
        }
        let figures = SequenceFigures {
            error_count: 2,
            packets_lost: 7,
        };

        let report = reporter.poll(t0 + secs(10), Some(figures)).unwrap();
        assert!((report.packet_error_rate() - 0.002).abs() < 1e-12);
        assert_eq!(
            report.to_string(),
            "Rx rate: 7.20 Mbps, rx 0.90 MB/s (total: 9 MB), Elapsed 00:00:10, ErrCount = 2, Lost = 7, PER 2.000e-3"
        );
    }

    #[test]
    fn test_report_without_sequence_checking() {
        let t0 = Instant::now();
        let mut reporter = RateReporter::new(secs(10), true, t0);
        reporter.record(64, t0);
        reporter.record(64, t0);

        let report = reporter.poll(t0 + secs(10), None).unwrap();
        assert_eq!(report.packet_error_rate(), 0.0);
        assert!(report.to_string().ends_with("packets 2 (sequence check disabled)"));
        assert!(!report.to_string().contains("ErrCount"));
    }

    #[test]
    fn test_idle_interval_reports_zero_rate() {
        let t0 = Instant::now();
        let mut reporter = RateReporter::new(secs(1), true, t0);

        let report = reporter.poll(t0 + secs(2), None).unwrap();
        assert_eq!(report.rate_mbps(), 0.0);
        assert_eq!(report.interval_mb_per_sec(), 0.0);
        assert_eq!(report.elapsed, Duration::ZERO);
    }
}
