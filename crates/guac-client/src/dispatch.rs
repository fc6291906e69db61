//! Opcode dispatch for instructions received from a connected viewer.
//!
//! Unknown opcodes are ignored for forward compatibility. Parse failures of
//! arguments are protocol violations fatal to the offending user only.

use crate::user::User;
use guac_proto::writer::decode_base64;
use guac_proto::{Instruction, ProtocolError, Status, Timestamp};
use std::sync::Arc;
use tracing::{debug, trace};

fn parse_int(value: &str) -> Result<i32, ProtocolError> {
    value
        .parse::<i32>()
        .map_err(|_| ProtocolError::BadRequest("invalid integer argument"))
}

fn parse_double(value: &str) -> Result<f64, ProtocolError> {
    value
        .parse::<f64>()
        .map_err(|_| ProtocolError::BadRequest("invalid numeric argument"))
}

fn require(instruction: &Instruction, count: usize) -> Result<(), ProtocolError> {
    if instruction.args.len() < count {
        debug!(
            target: "client.dispatch",
            opcode = %instruction.opcode,
            args = instruction.args.len(),
            "instruction incomplete"
        );
        return Err(ProtocolError::BadRequest("instruction incomplete"));
    }
    Ok(())
}

/// Routes one instruction from this user to the session. Inputs from every
/// user funnel into the same backend handler with per-user attribution.
pub fn dispatch(user: &Arc<User>, instruction: &Instruction) -> Result<(), ProtocolError> {
    let Some(client) = user.client() else {
        return Err(ProtocolError::Closed);
    };
    let handler = Arc::clone(client.handler());

    match instruction.opcode.as_str() {
        "sync" => {
            require(instruction, 1)?;
            let timestamp: Timestamp = instruction
                .arg(0)
                .parse()
                .map_err(|_| ProtocolError::BadRequest("invalid sync timestamp"))?;
            user.set_last_received_timestamp(timestamp);
            handler.on_sync(user, timestamp);
        }

        "mouse" => {
            require(instruction, 3)?;
            let x = parse_int(instruction.arg(0))?;
            let y = parse_int(instruction.arg(1))?;
            let mask = parse_int(instruction.arg(2))?;
            client.cursor.update(&client, user, x, y, mask);
            handler.on_mouse(user, x, y, mask);
        }

        "key" => {
            require(instruction, 2)?;
            let keysym = parse_int(instruction.arg(0))?;
            let pressed = parse_int(instruction.arg(1))? != 0;
            handler.on_key(user, keysym, pressed);
        }

        "touch" => {
            require(instruction, 7)?;
            handler.on_touch(
                user,
                parse_int(instruction.arg(0))?,
                parse_int(instruction.arg(1))?,
                parse_int(instruction.arg(2))?,
                parse_int(instruction.arg(3))?,
                parse_int(instruction.arg(4))?,
                parse_double(instruction.arg(5))?,
                parse_double(instruction.arg(6))?,
            );
        }

        "size" => {
            require(instruction, 2)?;
            let width = parse_int(instruction.arg(0))?;
            let height = parse_int(instruction.arg(1))?;
            handler.on_resize(user, width, height);
        }

        "clipboard" => {
            require(instruction, 2)?;
            let stream = parse_int(instruction.arg(0))?;
            let mimetype = instruction.arg(1).to_owned();
            client.clipboard.begin_inbound_stream(user, stream, &mimetype);
        }

        "argv" => {
            require(instruction, 3)?;
            let stream = parse_int(instruction.arg(0))?;
            let mimetype = instruction.arg(1);
            let name = instruction.arg(2);
            if !client.argv.received(user, stream, mimetype, name) {
                user.ack(stream, "Argument not allowed", Status::ClientForbidden);
            }
        }

        "blob" => {
            require(instruction, 2)?;
            let stream = parse_int(instruction.arg(0))?;
            let data = decode_base64(instruction.arg(1))?;
            match user.stream_blob(stream, &data) {
                Ok(()) => user.ack(stream, "OK", Status::Success),
                Err(status) => user.ack(stream, "Invalid stream", status),
            }
        }

        "end" => {
            require(instruction, 1)?;
            let stream = parse_int(instruction.arg(0))?;
            if let Err(status) = user.stream_end(stream) {
                user.ack(stream, "Invalid stream", status);
            }
        }

        "ack" => {
            require(instruction, 3)?;
            let stream = parse_int(instruction.arg(0))?;
            let status = Status::from_code(parse_int(instruction.arg(2))? as u16)
                .unwrap_or(Status::ServerError);
            if status != Status::Success {
                debug!(
                    target: "client.dispatch",
                    user = %user.id, stream, %status,
                    "outbound stream closed by client"
                );
            }
        }

        // File, pipe, and object transfers belong to protocol drivers; with
        // none attached, the streams are refused outright.
        "file" | "pipe" | "audio" => {
            require(instruction, 1)?;
            let stream = parse_int(instruction.arg(0))?;
            user.ack(stream, "Not supported", Status::Unsupported);
        }

        "get" | "put" => {
            require(instruction, 1)?;
            trace!(target: "client.dispatch", opcode = %instruction.opcode, "object operation unsupported");
        }

        "disconnect" => {
            user.stop();
        }

        "nop" => {}

        other => {
            // Unknown opcodes are silently ignored for forward compatibility.
            trace!(target: "client.dispatch", opcode = %other, "ignoring unknown opcode");
        }
    }

    Ok(())
}
