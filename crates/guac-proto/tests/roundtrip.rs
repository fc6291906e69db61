//! Encode/decode round-trip properties for the instruction codec.

use guac_proto::parser::Parser;
use guac_proto::socket::{BufferedSocket, GuacSocket};
use guac_proto::writer::{base64_len, decode_base64, write_length_base64, write_length_string};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Clone, Default)]
struct Sink(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn encode_instruction(opcode: &str, args: &[String]) -> Vec<u8> {
    let sink = Sink::default();
    let socket = BufferedSocket::new(sink.clone());
    socket.instruction_begin();
    write_length_string(&socket, opcode).unwrap();
    for arg in args {
        socket.write(b",").unwrap();
        write_length_string(&socket, arg).unwrap();
    }
    socket.write(b";").unwrap();
    socket.instruction_end();
    socket.flush().unwrap();
    let bytes = sink.0.lock().clone();
    bytes
}

proptest! {
    /// decode(encode(S)) == S for arbitrary UTF-8 strings, and the length
    /// prefix counts code points.
    #[test]
    fn string_elements_round_trip(args in proptest::collection::vec(".{0,40}", 0..6)) {
        let bytes = encode_instruction("test", &args);
        let mut parser = Parser::new();
        let (consumed, instruction) = parser.feed(&bytes).unwrap();
        prop_assert_eq!(consumed, bytes.len());
        let instruction = instruction.unwrap();
        prop_assert_eq!(instruction.opcode, "test");
        prop_assert_eq!(instruction.args, args);
    }

    /// Restartability: the split point of the input never changes the result.
    #[test]
    fn split_feeds_equal_whole_feed(arg in ".{1,24}", split in 0usize..64) {
        let bytes = encode_instruction("echo", std::slice::from_ref(&arg));
        let split = split.min(bytes.len());

        let mut parser = Parser::new();
        let (_, first) = parser.feed(&bytes[..split]).unwrap();
        let instruction = match first {
            Some(i) => i,
            None => parser.feed(&bytes[split..]).unwrap().1.unwrap(),
        };
        prop_assert_eq!(instruction.args, vec![arg]);
    }

    /// Binary elements decode back to the original bytes and advertise the
    /// padded base64 character count.
    #[test]
    fn base64_elements_round_trip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let sink = Sink::default();
        let socket = BufferedSocket::new(sink.clone());
        write_length_base64(&socket, &data).unwrap();
        socket.flush().unwrap();
        let bytes = sink.0.lock().clone();
        let text = String::from_utf8(bytes).unwrap();

        let (length, value) = text.split_once('.').unwrap();
        prop_assert_eq!(length.parse::<usize>().unwrap(), base64_len(data.len()));
        prop_assert_eq!(value.chars().count(), base64_len(data.len()));
        prop_assert_eq!(decode_base64(value).unwrap(), data);
    }
}
