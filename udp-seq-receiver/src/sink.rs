use std::fs::File;
use std::io::{self, BufWriter, Write};

use crate::config::SinkTarget;

/// Raw payload mirror. Every accepted datagram is written unchanged.
pub struct PassthroughSink {
    out: BufWriter<Box<dyn Write + Send>>,
    bytes_written: u64,
}

impl PassthroughSink {
    pub fn open(target: &SinkTarget) -> io::Result<Self> {
        let out: Box<dyn Write + Send> = match target {
            SinkTarget::Stdout => Box::new(io::stdout()),
            SinkTarget::File(path) => Box::new(File::create(path)?),
        };
        Ok(Self::from_writer(out))
    }

    pub fn from_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: BufWriter::with_capacity(1 << 20, out),
            bytes_written: 0,
        }
    }

    pub fn write_datagram(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.out.write_all(datagram)?;
        self.bytes_written += datagram.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}
