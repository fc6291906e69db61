//! Element-level output formatting.
//!
//! Elements are `LENGTH.VALUE` where `LENGTH` counts UTF-8 code points of
//! `VALUE`, never bytes. Binary elements are base64 with the length prefix
//! counting base64 characters, `ceil(bytes / 3) * 4`.

use crate::error::ProtocolError;
use crate::socket::GuacSocket;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;

/// Writes an integer as plain decimal ASCII (no length prefix).
pub fn write_decimal(socket: &dyn GuacSocket, value: i64) -> Result<(), ProtocolError> {
    socket.write(value.to_string().as_bytes())
}

/// Writes a length-prefixed string element.
pub fn write_length_string(socket: &dyn GuacSocket, value: &str) -> Result<(), ProtocolError> {
    write_decimal(socket, value.chars().count() as i64)?;
    socket.write(b".")?;
    socket.write(value.as_bytes())
}

/// Writes a length-prefixed integer element.
pub fn write_length_int(socket: &dyn GuacSocket, value: i64) -> Result<(), ProtocolError> {
    write_length_string(socket, &value.to_string())
}

/// Writes a length-prefixed floating point element in shortest-round-trip
/// form (the `%g` analog).
pub fn write_length_double(socket: &dyn GuacSocket, value: f64) -> Result<(), ProtocolError> {
    write_length_string(socket, &value.to_string())
}

/// Number of base64 characters produced for `bytes` input bytes, padding
/// included.
pub fn base64_len(bytes: usize) -> usize {
    bytes.div_ceil(3) * 4
}

/// Writes a complete base64 binary element: length prefix, `.`, and the
/// encoded payload.
pub fn write_length_base64(socket: &dyn GuacSocket, data: &[u8]) -> Result<(), ProtocolError> {
    write_decimal(socket, base64_len(data.len()) as i64)?;
    socket.write(b".")?;
    let mut writer = Base64Writer::new(socket);
    writer.write(data)?;
    writer.finish()
}

/// Decodes a base64 element value back into bytes.
pub fn decode_base64(value: &str) -> Result<Vec<u8>, ProtocolError> {
    STANDARD
        .decode(value)
        .map_err(|_| ProtocolError::BadRequest("invalid base64 element"))
}

/// Streaming base64 encoder which turns input triplets into output
/// quadruplets as they arrive. Padding is emitted only by
/// [`Base64Writer::finish`], so a single element may be produced from many
/// `write` calls.
pub struct Base64Writer<'a> {
    socket: &'a dyn GuacSocket,
    pending: [u8; 3],
    pending_len: usize,
}

impl<'a> Base64Writer<'a> {
    pub fn new(socket: &'a dyn GuacSocket) -> Self {
        Self {
            socket,
            pending: [0; 3],
            pending_len: 0,
        }
    }

    pub fn write(&mut self, mut data: &[u8]) -> Result<(), ProtocolError> {
        // Complete a previously-started triplet first.
        if self.pending_len > 0 {
            while self.pending_len < 3 && !data.is_empty() {
                self.pending[self.pending_len] = data[0];
                self.pending_len += 1;
                data = &data[1..];
            }
            if self.pending_len < 3 {
                return Ok(());
            }
            let quad = STANDARD_NO_PAD.encode(self.pending);
            self.socket.write(quad.as_bytes())?;
            self.pending_len = 0;
        }

        // Encode whole triplets in one pass; hold the remainder back.
        let aligned = data.len() - data.len() % 3;
        if aligned > 0 {
            let encoded = STANDARD_NO_PAD.encode(&data[..aligned]);
            self.socket.write(encoded.as_bytes())?;
        }
        let rest = &data[aligned..];
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();
        Ok(())
    }

    /// Emits the final quadruplet with `=` padding, if any input remains
    /// buffered. The writer is spent afterwards.
    pub fn finish(mut self) -> Result<(), ProtocolError> {
        if self.pending_len > 0 {
            let tail = STANDARD.encode(&self.pending[..self.pending_len]);
            self.socket.write(tail.as_bytes())?;
            self.pending_len = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::BufferedSocket;
    use std::sync::Arc;

    fn capture(f: impl FnOnce(&dyn GuacSocket)) -> Vec<u8> {
        let sink = Arc::new(parking_lot::Mutex::new(Vec::new()));
        struct S(Arc<parking_lot::Mutex<Vec<u8>>>);
        impl std::io::Write for S {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let socket = BufferedSocket::new(S(Arc::clone(&sink)));
        f(&socket);
        socket.flush().unwrap();
        let out = sink.lock().clone();
        out
    }

    #[test]
    fn string_element_counts_code_points() {
        let out = capture(|s| write_length_string(s, "héllo").unwrap());
        // 5 code points, 6 bytes.
        assert_eq!(out, "5.héllo".as_bytes());
    }

    #[test]
    fn double_element_trims_trailing_zeroes() {
        let out = capture(|s| write_length_double(s, 0.5).unwrap());
        assert_eq!(out, b"3.0.5");
        let out = capture(|s| write_length_double(s, 2.0).unwrap());
        assert_eq!(out, b"1.2");
    }

    #[test]
    fn base64_element_length_is_padded_length() {
        assert_eq!(base64_len(0), 0);
        assert_eq!(base64_len(1), 4);
        assert_eq!(base64_len(3), 4);
        assert_eq!(base64_len(4), 8);

        let out = capture(|s| write_length_base64(s, b"hi").unwrap());
        assert_eq!(out, b"4.aGk=");
    }

    #[test]
    fn streaming_writer_matches_one_shot_encode() {
        let data: Vec<u8> = (0u8..=255).collect();
        let streamed = capture(|s| {
            let mut w = Base64Writer::new(s);
            for chunk in data.chunks(7) {
                w.write(chunk).unwrap();
            }
            w.finish().unwrap();
        });
        assert_eq!(streamed, STANDARD.encode(&data).into_bytes());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(decode_base64("aGk=").unwrap(), b"hi");
        assert!(decode_base64("not base64!").is_err());
    }
}
