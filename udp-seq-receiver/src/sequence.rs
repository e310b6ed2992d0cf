use std::fmt;

/// Number of samples echoed at the start of a run.
pub const ECHO_FIRST_SAMPLES: u64 = 5;

/// Per-run tracker for the embedded sample counter.
///
/// Expects the counter to advance by exactly one per sample (wrapping at
/// 2^32). Any other value is a deviation: it is counted and the tracker
/// resynchronises on the received value instead of trying to recover the
/// original sequence.
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    samples_per_packet: u64,
    expected_next: Option<u32>,
    error_count: u64,
    packets_lost: u64,
    reordered: u64,
    samples_seen: u64,
    last_error_sample: u64,
    in_deviation: bool,
}

/// Result of feeding one counter value to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// First value of the run, taken as the starting point.
    Initial(u32),
    Match(u32),
    Deviation(Deviation),
}

/// A counter mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deviation {
    pub expected: u32,
    pub received: u32,
    /// `received - expected`, wrapping.
    pub jump: u32,
    /// Whole packets covered by the jump (`jump / samples_per_packet`).
    /// Zero for a backwards step.
    pub packets_lost: u64,
    /// Running error count including this one.
    pub error_count: u64,
    /// Zero based index of the sample in the run.
    pub sample_index: u64,
    pub samples_since_last_error: u64,
    /// Packets between the previous error's packet and this one.
    pub packets_since_last_error: u64,
}

impl Deviation {
    /// The jump as a signed distance, so a step backwards shows as negative.
    pub fn signed_jump(&self) -> i64 {
        i64::from(self.jump as i32)
    }

    /// The counter went back, i.e. a reordered or repeated sample.
    pub fn is_backwards(&self) -> bool {
        self.signed_jump() < 0
    }
}

/// Tracker outcome plus whether the value should be echoed to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub outcome: Outcome,
    pub echo: bool,
}

impl SequenceTracker {
    pub fn new(samples_per_packet: usize) -> Self {
        Self {
            samples_per_packet: samples_per_packet.max(1) as u64,
            expected_next: None,
            error_count: 0,
            packets_lost: 0,
            reordered: 0,
            samples_seen: 0,
            last_error_sample: 0,
            in_deviation: false,
        }
    }

    /// Start tracking from `first`. The stream may already be in progress,
    /// so nothing is assumed about the starting value.
    pub fn initialize(&mut self, first: u32) {
        self.expected_next = Some(first);
    }

    /// Process the counter value of the next sample.
    pub fn observe(&mut self, value: u32) -> Observation {
        let index = self.samples_seen;
        let echo = index < ECHO_FIRST_SAMPLES || self.in_deviation;
        self.samples_seen += 1;

        let expected = match self.expected_next {
            Some(expected) => expected,
            None => {
                self.initialize(value);
                self.expected_next = Some(value.wrapping_add(1));
                return Observation {
                    outcome: Outcome::Initial(value),
                    echo,
                };
            }
        };

        let outcome = if value == expected {
            self.in_deviation = false;
            Outcome::Match(value)
        } else {
            let jump = value.wrapping_sub(expected);
            let mut deviation = Deviation {
                expected,
                received: value,
                jump,
                packets_lost: 0,
                error_count: self.error_count + 1,
                sample_index: index,
                samples_since_last_error: index - self.last_error_sample,
                packets_since_last_error: index / self.samples_per_packet
                    - self.last_error_sample / self.samples_per_packet,
            };
            if deviation.is_backwards() {
                self.reordered += 1;
            } else {
                deviation.packets_lost = u64::from(jump) / self.samples_per_packet;
                self.packets_lost += deviation.packets_lost;
            }
            self.error_count += 1;
            self.in_deviation = true;
            self.last_error_sample = index;
            Outcome::Deviation(deviation)
        };

        self.expected_next = Some(value.wrapping_add(1));
        Observation { outcome, echo }
    }

    /// True once the error count has gone past `max_errors`.
    pub fn error_limit_exceeded(&self, max_errors: u64) -> bool {
        self.error_count > max_errors
    }

    pub fn expected_next(&self) -> Option<u32> {
        self.expected_next
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Loss in whole packets. Gaps that are not a multiple of the packet
    /// size are truncated.
    pub fn packets_lost(&self) -> u64 {
        self.packets_lost
    }

    /// Deviations where the counter stepped backwards.
    pub fn reordered(&self) -> u64 {
        self.reordered
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    pub fn last_error_sample(&self) -> u64 {
        self.last_error_sample
    }

    pub fn in_deviation(&self) -> bool {
        self.in_deviation
    }
}

impl fmt::Display for Deviation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Deviation! ErrCount = {}, Expected SPAD : {}, Received SPAD : {}, Sample Jump = {}, Packets Lost = {}, Packets since last error = {}",
            self.error_count,
            self.expected,
            self.received,
            self.signed_jump(),
            self.packets_lost,
            self.packets_since_last_error
        )
    }
}

/// Operator echo line for a counter value: hex and decimal.
pub fn echo_line(value: u32) -> String {
    format!("{:#010x}    {}", value, value)
}
