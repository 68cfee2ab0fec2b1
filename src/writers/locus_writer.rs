
use crate::data_types::locus::Locus;

use std::io::{Read, Write};

/// Which serialization the locus stream uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LocusFormat {
    /// one JSON object per line
    Json,
    /// binary records, each preceded by a little-endian u32 length
    Framed
}

/// Streams genotyped loci in the native formats.
pub struct LocusWriter<W: Write> {
    writer: W,
    format: LocusFormat
}

impl<W: Write> LocusWriter<W> {
    pub fn new(writer: W, format: LocusFormat) -> LocusWriter<W> {
        LocusWriter { writer, format }
    }

    /// Appends one locus record to the stream.
    /// # Errors
    /// * on serialization or write failures
    pub fn write_locus(&mut self, locus: &Locus) -> Result<(), Box<dyn std::error::Error>> {
        match self.format {
            LocusFormat::Json => {
                serde_json::to_writer(&mut self.writer, locus)?;
                writeln!(self.writer)?;
            },
            LocusFormat::Framed => {
                let encoded: Vec<u8> = bincode::serialize(locus)?;
                let frame_len: u32 = encoded.len().try_into()?;
                self.writer.write_all(&frame_len.to_le_bytes())?;
                self.writer.write_all(&encoded)?;
            }
        }
        Ok(())
    }

    /// Flushes the underlying stream.
    pub fn flush(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Reads the next locus from a framed binary stream, or `None` at a clean end
/// of stream.
/// # Arguments
/// * `reader` - the framed stream
/// # Errors
/// * on truncated frames or malformed records
pub fn read_framed_locus<R: Read>(reader: &mut R) -> Result<Option<Locus>, Box<dyn std::error::Error>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Box::new(e))
    }
    let frame_len = u32::from_le_bytes(len_bytes) as usize;
    let mut encoded = vec![0u8; frame_len];
    reader.read_exact(&mut encoded)?;
    Ok(Some(bincode::deserialize(&encoded)?))
}
