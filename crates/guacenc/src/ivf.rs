//! Minimal IVF container writer.
//!
//! IVF is the trivial framed container used for raw AV1/VPx bitstreams: a
//! 32-byte file header followed by `[u32 size][u64 pts][payload]` records.
//! The frame count lives in the header and is patched in at finalize time.

use std::io::{self, Seek, SeekFrom, Write};

pub struct IvfWriter<W: Write + Seek> {
    out: W,
    frame_count: u32,
}

impl<W: Write + Seek> IvfWriter<W> {
    /// Writes the file header. `fourcc` identifies the codec (`AV01`).
    pub fn new(
        mut out: W,
        fourcc: [u8; 4],
        width: u16,
        height: u16,
        framerate: u32,
    ) -> io::Result<IvfWriter<W>> {
        out.write_all(b"DKIF")?;
        out.write_all(&0u16.to_le_bytes())?; // version
        out.write_all(&32u16.to_le_bytes())?; // header size
        out.write_all(&fourcc)?;
        out.write_all(&width.to_le_bytes())?;
        out.write_all(&height.to_le_bytes())?;
        out.write_all(&framerate.to_le_bytes())?; // timebase denominator
        out.write_all(&1u32.to_le_bytes())?; // timebase numerator
        out.write_all(&0u32.to_le_bytes())?; // frame count, patched later
        out.write_all(&0u32.to_le_bytes())?; // reserved
        Ok(IvfWriter {
            out,
            frame_count: 0,
        })
    }

    pub fn write_frame(&mut self, data: &[u8], pts: u64) -> io::Result<()> {
        self.out.write_all(&(data.len() as u32).to_le_bytes())?;
        self.out.write_all(&pts.to_le_bytes())?;
        self.out.write_all(data)?;
        self.frame_count += 1;
        Ok(())
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Patches the frame count into the header and flushes.
    pub fn finalize(&mut self) -> io::Result<()> {
        let end = self.out.stream_position()?;
        self.out.seek(SeekFrom::Start(24))?;
        self.out.write_all(&self.frame_count.to_le_bytes())?;
        self.out.seek(SeekFrom::Start(end))?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_and_frames_round_trip() {
        let mut writer =
            IvfWriter::new(Cursor::new(Vec::new()), *b"AV01", 640, 480, 25).unwrap();
        writer.write_frame(&[1, 2, 3], 0).unwrap();
        writer.write_frame(&[4], 1).unwrap();
        writer.finalize().unwrap();
        let bytes = writer.out.into_inner();

        assert_eq!(&bytes[0..4], b"DKIF");
        assert_eq!(&bytes[8..12], b"AV01");
        assert_eq!(u16::from_le_bytes([bytes[12], bytes[13]]), 640);
        assert_eq!(u16::from_le_bytes([bytes[14], bytes[15]]), 480);
        assert_eq!(
            u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]),
            2
        );
        // First frame record: 3-byte payload at pts 0.
        assert_eq!(
            u32::from_le_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]),
            3
        );
        assert_eq!(&bytes[44..47], &[1, 2, 3]);
    }
}
