use crate::config::validate_layout;
use crate::error::ConfigError;

/// Width of the embedded sample counter in bytes.
pub const COUNTER_WIDTH: usize = 4;

/// Shape of the datagrams on the link: `samples_per_packet` samples of
/// `sample_size` bytes, each with a u32 counter in column `count_column`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramLayout {
    pub sample_size: usize,
    pub samples_per_packet: usize,
    /// `None` disables sequence checking.
    pub count_column: Option<usize>,
}

impl DatagramLayout {
    pub fn new(
        sample_size: usize,
        samples_per_packet: usize,
        count_column: Option<usize>,
    ) -> Result<Self, ConfigError> {
        validate_layout(sample_size, samples_per_packet, count_column)?;
        Ok(Self {
            sample_size,
            samples_per_packet,
            count_column,
        })
    }

    /// Every datagram must be exactly this long.
    pub fn datagram_size(&self) -> usize {
        self.sample_size * self.samples_per_packet
    }

    /// Iterate the counters of every sample in `datagram`.
    ///
    /// Yields nothing when sequence checking is disabled.
    pub fn counters<'a>(
        &'a self,
        datagram: &'a [u8],
    ) -> impl Iterator<Item = Result<u32, ConfigError>> + 'a {
        let samples = if self.count_column.is_some() {
            self.samples_per_packet
        } else {
            0
        };
        (0..samples).map(move |index| {
            read_counter(datagram, index, self.sample_size, self.count_column.unwrap_or(0))
        })
    }
}

/// Read the little-endian counter of sample `index`.
///
/// The counter sits at `index * sample_size + 4 * count_column`. An offset
/// past the end of the datagram means the layout does not match the data.
pub fn read_counter(
    datagram: &[u8],
    index: usize,
    sample_size: usize,
    count_column: usize,
) -> Result<u32, ConfigError> {
    let offset = index
        .checked_mul(sample_size)
        .and_then(|base| base.checked_add(count_column.checked_mul(COUNTER_WIDTH)?))
        .ok_or(ConfigError::CounterOutOfBounds {
            offset: usize::MAX,
            len: datagram.len(),
        })?;

    let field = offset
        .checked_add(COUNTER_WIDTH)
        .and_then(|end| datagram.get(offset..end))
        .ok_or(ConfigError::CounterOutOfBounds {
            offset,
            len: datagram.len(),
        })?;

    Ok(u32::from_le_bytes([field[0], field[1], field[2], field[3]]))
}
