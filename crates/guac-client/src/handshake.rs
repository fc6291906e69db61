//! Server side of the connection handshake.
//!
//! The remote viewer opens with `select <protocol>`; the server answers
//! `args` (version token first, then the backend's parameter names); the
//! viewer announces capabilities via `size`, `audio`, `video`, `image`, and
//! optionally `timezone`, then commits with `connect <values…>`. Viewers
//! older than 1.1.0 send no version token and are treated as 1.0.0.

use crate::user::UserInfo;
use guac_proto::protocol::send_args;
use guac_proto::{GuacSocket, Instruction, Parser, ProtocolError, ProtocolVersion};
use std::io::BufRead;
use tracing::debug;

/// Everything negotiated before a user may be attached to a session.
#[derive(Debug)]
pub struct Handshake {
    /// Protocol (or session id) named by `select`.
    pub protocol: String,
    pub info: UserInfo,
    /// Connection parameter values from `connect`, version token removed.
    pub connect_values: Vec<String>,
}

/// Runs the handshake over a raw connection. `arg_names` are the backend's
/// connection parameters, sent after the version token.
pub fn run<R: BufRead>(
    reader: &mut R,
    socket: &dyn GuacSocket,
    arg_names: &[&str],
) -> Result<Handshake, ProtocolError> {
    let mut parser = Parser::new();

    let select = expect(&mut parser, reader, "select")?;
    if select.args.is_empty() {
        return Err(ProtocolError::BadRequest("select names no protocol"));
    }
    let protocol = select.args[0].clone();

    let mut args = Vec::with_capacity(arg_names.len() + 1);
    args.push(ProtocolVersion::V1_3_0.as_token());
    args.extend_from_slice(arg_names);
    send_args(socket, &args)?;
    socket.flush()?;

    let mut info = UserInfo::default();

    loop {
        let Some(instruction) = parser.read_instruction(reader)? else {
            return Err(ProtocolError::BadRequest("connection closed mid-handshake"));
        };
        match instruction.opcode.as_str() {
            "size" => {
                if let Ok(width) = instruction.arg(0).parse() {
                    info.optimal_width = width;
                }
                if let Ok(height) = instruction.arg(1).parse() {
                    info.optimal_height = height;
                }
                if let Ok(dpi) = instruction.arg(2).parse() {
                    info.optimal_resolution = dpi;
                }
            }
            "audio" => info.audio_mimetypes = instruction.args.clone(),
            "video" => info.video_mimetypes = instruction.args.clone(),
            "image" => info.image_mimetypes = instruction.args.clone(),
            "timezone" => {
                // Informational; carried by 1.1.0+ viewers.
                debug!(target: "client.handshake", timezone = %instruction.arg(0), "viewer timezone");
            }
            "connect" => {
                let mut values = instruction.args;
                if let Some(version) = values
                    .first()
                    .and_then(|token| ProtocolVersion::from_token(token))
                {
                    info.protocol_version = version.min(ProtocolVersion::V1_3_0);
                    values.remove(0);
                }
                return Ok(Handshake {
                    protocol,
                    info,
                    connect_values: values,
                });
            }
            other => {
                debug!(target: "client.handshake", opcode = %other, "unexpected handshake opcode ignored");
            }
        }
    }
}

fn expect<R: BufRead>(
    parser: &mut Parser,
    reader: &mut R,
    opcode: &str,
) -> Result<Instruction, ProtocolError> {
    let Some(instruction) = parser.read_instruction(reader)? else {
        return Err(ProtocolError::BadRequest("connection closed mid-handshake"));
    };
    if instruction.opcode != opcode {
        return Err(ProtocolError::BadRequest("unexpected handshake opcode"));
    }
    Ok(instruction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use guac_proto::socket::BufferedSocket;
    use parking_lot::Mutex;
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

    #[test]
    fn full_handshake_negotiates_version() {
        let inbound = "6.select,3.ssh;\
                       4.size,4.1024,3.768,2.96;\
                       5.audio,9.audio/L16;\
                       5.video;\
                       5.image,9.image/png,10.image/jpeg;\
                       7.connect,13.VERSION_1_3_0,9.localhost,2.22;";
        let mut reader = std::io::Cursor::new(inbound.as_bytes().to_vec());
        let sink = Sink::default();
        let socket = BufferedSocket::new(sink.clone());

        let handshake = run(&mut reader, &socket, &["hostname", "port"]).unwrap();
        assert_eq!(handshake.protocol, "ssh");
        assert_eq!(handshake.info.protocol_version, ProtocolVersion::V1_3_0);
        assert_eq!(handshake.info.optimal_width, 1024);
        assert_eq!(handshake.info.audio_mimetypes, vec!["audio/L16"]);
        assert_eq!(handshake.connect_values, vec!["localhost", "22"]);

        let sent = String::from_utf8(sink.0.lock().clone()).unwrap();
        assert_eq!(sent, "4.args,13.VERSION_1_3_0,8.hostname,4.port;");
    }

    #[test]
    fn versionless_connect_is_1_0_0() {
        let inbound = "6.select,3.ssh;7.connect,9.localhost,2.22;";
        let mut reader = std::io::Cursor::new(inbound.as_bytes().to_vec());
        let socket = BufferedSocket::new(std::io::sink());

        let handshake = run(&mut reader, &socket, &["hostname", "port"]).unwrap();
        assert_eq!(handshake.info.protocol_version, ProtocolVersion::V1_0_0);
        assert_eq!(handshake.connect_values, vec!["localhost", "22"]);
    }

    #[test]
    fn wrong_opening_opcode_rejected() {
        let mut reader = std::io::Cursor::new(b"4.sync,1.0;".to_vec());
        let socket = BufferedSocket::new(std::io::sink());
        assert!(run(&mut reader, &socket, &[]).is_err());
    }
}
