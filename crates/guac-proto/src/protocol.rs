//! Typed senders for every instruction the core emits.
//!
//! Each sender brackets its output with `instruction_begin`/`instruction_end`
//! so that instructions remain atomic even when several threads write to the
//! same socket (broadcast fan-out, recording tees). Flushing is left to the
//! caller; senders only buffer.

use crate::error::ProtocolError;
use crate::socket::GuacSocket;
use crate::status::Status;
use crate::timestamp::Timestamp;
use crate::types::{CompositeMode, LineCapStyle, LineJoinStyle, TransferFunction};
use crate::writer::{
    write_length_base64, write_length_double, write_length_int, write_length_string,
};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};

/// One in-progress instruction. Ends the socket bracket on drop, so an early
/// return from a failed element write cannot leave the socket locked.
struct InstructionWriter<'a> {
    socket: &'a dyn GuacSocket,
}

impl<'a> InstructionWriter<'a> {
    fn begin(socket: &'a dyn GuacSocket, opcode: &str) -> Result<Self, ProtocolError> {
        socket.instruction_begin();
        let writer = Self { socket };
        write_length_string(socket, opcode)?;
        Ok(writer)
    }

    fn arg(&mut self, value: &str) -> Result<(), ProtocolError> {
        self.socket.write(b",")?;
        write_length_string(self.socket, value)
    }

    fn arg_int(&mut self, value: i64) -> Result<(), ProtocolError> {
        self.socket.write(b",")?;
        write_length_int(self.socket, value)
    }

    fn arg_double(&mut self, value: f64) -> Result<(), ProtocolError> {
        self.socket.write(b",")?;
        write_length_double(self.socket, value)
    }

    fn arg_base64(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.socket.write(b",")?;
        write_length_base64(self.socket, data)
    }

    fn finish(self) -> Result<(), ProtocolError> {
        self.socket.write(b";")
    }
}

impl Drop for InstructionWriter<'_> {
    fn drop(&mut self) {
        self.socket.instruction_end();
    }
}

/* Handshake and control */

pub fn send_select(socket: &dyn GuacSocket, protocol: &str) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "select")?;
    w.arg(protocol)?;
    w.finish()
}

pub fn send_args(socket: &dyn GuacSocket, args: &[&str]) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "args")?;
    for arg in args {
        w.arg(arg)?;
    }
    w.finish()
}

pub fn send_connect(socket: &dyn GuacSocket, args: &[&str]) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "connect")?;
    for arg in args {
        w.arg(arg)?;
    }
    w.finish()
}

pub fn send_ready(socket: &dyn GuacSocket, id: &str) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "ready")?;
    w.arg(id)?;
    w.finish()
}

pub fn send_required(socket: &dyn GuacSocket, names: &[&str]) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "required")?;
    for name in names {
        w.arg(name)?;
    }
    w.finish()
}

pub fn send_sync(socket: &dyn GuacSocket, timestamp: Timestamp) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "sync")?;
    w.arg_int(timestamp)?;
    w.finish()
}

pub fn send_nop(socket: &dyn GuacSocket) -> Result<(), ProtocolError> {
    let w = InstructionWriter::begin(socket, "nop")?;
    w.finish()
}

pub fn send_disconnect(socket: &dyn GuacSocket) -> Result<(), ProtocolError> {
    let w = InstructionWriter::begin(socket, "disconnect")?;
    w.finish()
}

pub fn send_name(socket: &dyn GuacSocket, name: &str) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "name")?;
    w.arg(name)?;
    w.finish()
}

pub fn send_error(
    socket: &dyn GuacSocket,
    message: &str,
    status: Status,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "error")?;
    w.arg(message)?;
    w.arg_int(i64::from(status.code()))?;
    w.finish()
}

/* Streams */

pub fn send_ack(
    socket: &dyn GuacSocket,
    stream: i32,
    message: &str,
    status: Status,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "ack")?;
    w.arg_int(i64::from(stream))?;
    w.arg(message)?;
    w.arg_int(i64::from(status.code()))?;
    w.finish()
}

pub fn send_blob(socket: &dyn GuacSocket, stream: i32, data: &[u8]) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "blob")?;
    w.arg_int(i64::from(stream))?;
    w.arg_base64(data)?;
    w.finish()
}

pub fn send_end(socket: &dyn GuacSocket, stream: i32) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "end")?;
    w.arg_int(i64::from(stream))?;
    w.finish()
}

#[allow(clippy::too_many_arguments)]
pub fn send_img(
    socket: &dyn GuacSocket,
    stream: i32,
    mode: CompositeMode,
    layer: i32,
    mimetype: &str,
    x: i32,
    y: i32,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "img")?;
    w.arg_int(i64::from(stream))?;
    w.arg_int(i64::from(mode.mask()))?;
    w.arg_int(i64::from(layer))?;
    w.arg(mimetype)?;
    w.arg_int(i64::from(x))?;
    w.arg_int(i64::from(y))?;
    w.finish()
}

pub fn send_audio(socket: &dyn GuacSocket, stream: i32, mimetype: &str) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "audio")?;
    w.arg_int(i64::from(stream))?;
    w.arg(mimetype)?;
    w.finish()
}

pub fn send_video(
    socket: &dyn GuacSocket,
    stream: i32,
    layer: i32,
    mimetype: &str,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "video")?;
    w.arg_int(i64::from(stream))?;
    w.arg_int(i64::from(layer))?;
    w.arg(mimetype)?;
    w.finish()
}

pub fn send_clipboard(
    socket: &dyn GuacSocket,
    stream: i32,
    mimetype: &str,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "clipboard")?;
    w.arg_int(i64::from(stream))?;
    w.arg(mimetype)?;
    w.finish()
}

pub fn send_argv(
    socket: &dyn GuacSocket,
    stream: i32,
    mimetype: &str,
    name: &str,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "argv")?;
    w.arg_int(i64::from(stream))?;
    w.arg(mimetype)?;
    w.arg(name)?;
    w.finish()
}

pub fn send_pipe(
    socket: &dyn GuacSocket,
    stream: i32,
    mimetype: &str,
    name: &str,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "pipe")?;
    w.arg_int(i64::from(stream))?;
    w.arg(mimetype)?;
    w.arg(name)?;
    w.finish()
}

pub fn send_file(
    socket: &dyn GuacSocket,
    stream: i32,
    mimetype: &str,
    filename: &str,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "file")?;
    w.arg_int(i64::from(stream))?;
    w.arg(mimetype)?;
    w.arg(filename)?;
    w.finish()
}

pub fn send_body(
    socket: &dyn GuacSocket,
    object: i32,
    stream: i32,
    mimetype: &str,
    name: &str,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "body")?;
    w.arg_int(i64::from(object))?;
    w.arg_int(i64::from(stream))?;
    w.arg(mimetype)?;
    w.arg(name)?;
    w.finish()
}

/* Events relayed server-to-client */

pub fn send_mouse(
    socket: &dyn GuacSocket,
    x: i32,
    y: i32,
    button_mask: i32,
    timestamp: Timestamp,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "mouse")?;
    w.arg_int(i64::from(x))?;
    w.arg_int(i64::from(y))?;
    w.arg_int(i64::from(button_mask))?;
    w.arg_int(timestamp)?;
    w.finish()
}

#[allow(clippy::too_many_arguments)]
pub fn send_touch(
    socket: &dyn GuacSocket,
    id: i32,
    x: i32,
    y: i32,
    x_radius: i32,
    y_radius: i32,
    angle: f64,
    force: f64,
    timestamp: Timestamp,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "touch")?;
    w.arg_int(i64::from(id))?;
    w.arg_int(i64::from(x))?;
    w.arg_int(i64::from(y))?;
    w.arg_int(i64::from(x_radius))?;
    w.arg_int(i64::from(y_radius))?;
    w.arg_double(angle)?;
    w.arg_double(force)?;
    w.arg_int(timestamp)?;
    w.finish()
}

pub fn send_key(
    socket: &dyn GuacSocket,
    keysym: i32,
    pressed: bool,
    timestamp: Timestamp,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "key")?;
    w.arg_int(i64::from(keysym))?;
    w.arg_int(i64::from(pressed))?;
    w.arg_int(timestamp)?;
    w.finish()
}

pub fn send_size(
    socket: &dyn GuacSocket,
    layer: i32,
    width: i32,
    height: i32,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "size")?;
    w.arg_int(i64::from(layer))?;
    w.arg_int(i64::from(width))?;
    w.arg_int(i64::from(height))?;
    w.finish()
}

#[allow(clippy::too_many_arguments)]
pub fn send_cursor(
    socket: &dyn GuacSocket,
    hotspot_x: i32,
    hotspot_y: i32,
    src_layer: i32,
    src_x: i32,
    src_y: i32,
    width: i32,
    height: i32,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "cursor")?;
    w.arg_int(i64::from(hotspot_x))?;
    w.arg_int(i64::from(hotspot_y))?;
    w.arg_int(i64::from(src_layer))?;
    w.arg_int(i64::from(src_x))?;
    w.arg_int(i64::from(src_y))?;
    w.arg_int(i64::from(width))?;
    w.arg_int(i64::from(height))?;
    w.finish()
}

/* Drawing */

pub fn send_rect(
    socket: &dyn GuacSocket,
    layer: i32,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "rect")?;
    w.arg_int(i64::from(layer))?;
    w.arg_int(i64::from(x))?;
    w.arg_int(i64::from(y))?;
    w.arg_int(i64::from(width))?;
    w.arg_int(i64::from(height))?;
    w.finish()
}

#[allow(clippy::too_many_arguments)]
pub fn send_cfill(
    socket: &dyn GuacSocket,
    mode: CompositeMode,
    layer: i32,
    r: u8,
    g: u8,
    b: u8,
    a: u8,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "cfill")?;
    w.arg_int(i64::from(mode.mask()))?;
    w.arg_int(i64::from(layer))?;
    w.arg_int(i64::from(r))?;
    w.arg_int(i64::from(g))?;
    w.arg_int(i64::from(b))?;
    w.arg_int(i64::from(a))?;
    w.finish()
}

pub fn send_lfill(
    socket: &dyn GuacSocket,
    mode: CompositeMode,
    layer: i32,
    src_layer: i32,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "lfill")?;
    w.arg_int(i64::from(mode.mask()))?;
    w.arg_int(i64::from(layer))?;
    w.arg_int(i64::from(src_layer))?;
    w.finish()
}

#[allow(clippy::too_many_arguments)]
pub fn send_cstroke(
    socket: &dyn GuacSocket,
    mode: CompositeMode,
    layer: i32,
    cap: LineCapStyle,
    join: LineJoinStyle,
    thickness: i32,
    r: u8,
    g: u8,
    b: u8,
    a: u8,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "cstroke")?;
    w.arg_int(i64::from(mode.mask()))?;
    w.arg_int(i64::from(layer))?;
    w.arg_int(cap as i64)?;
    w.arg_int(join as i64)?;
    w.arg_int(i64::from(thickness))?;
    w.arg_int(i64::from(r))?;
    w.arg_int(i64::from(g))?;
    w.arg_int(i64::from(b))?;
    w.arg_int(i64::from(a))?;
    w.finish()
}

#[allow(clippy::too_many_arguments)]
pub fn send_lstroke(
    socket: &dyn GuacSocket,
    mode: CompositeMode,
    layer: i32,
    cap: LineCapStyle,
    join: LineJoinStyle,
    thickness: i32,
    src_layer: i32,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "lstroke")?;
    w.arg_int(i64::from(mode.mask()))?;
    w.arg_int(i64::from(layer))?;
    w.arg_int(cap as i64)?;
    w.arg_int(join as i64)?;
    w.arg_int(i64::from(thickness))?;
    w.arg_int(i64::from(src_layer))?;
    w.finish()
}

#[allow(clippy::too_many_arguments)]
pub fn send_copy(
    socket: &dyn GuacSocket,
    src_layer: i32,
    src_x: i32,
    src_y: i32,
    width: i32,
    height: i32,
    mode: CompositeMode,
    dst_layer: i32,
    dst_x: i32,
    dst_y: i32,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "copy")?;
    w.arg_int(i64::from(src_layer))?;
    w.arg_int(i64::from(src_x))?;
    w.arg_int(i64::from(src_y))?;
    w.arg_int(i64::from(width))?;
    w.arg_int(i64::from(height))?;
    w.arg_int(i64::from(mode.mask()))?;
    w.arg_int(i64::from(dst_layer))?;
    w.arg_int(i64::from(dst_x))?;
    w.arg_int(i64::from(dst_y))?;
    w.finish()
}

#[allow(clippy::too_many_arguments)]
pub fn send_transfer(
    socket: &dyn GuacSocket,
    src_layer: i32,
    src_x: i32,
    src_y: i32,
    width: i32,
    height: i32,
    function: TransferFunction,
    dst_layer: i32,
    dst_x: i32,
    dst_y: i32,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "transfer")?;
    w.arg_int(i64::from(src_layer))?;
    w.arg_int(i64::from(src_x))?;
    w.arg_int(i64::from(src_y))?;
    w.arg_int(i64::from(width))?;
    w.arg_int(i64::from(height))?;
    w.arg_int(i64::from(function.value()))?;
    w.arg_int(i64::from(dst_layer))?;
    w.arg_int(i64::from(dst_x))?;
    w.arg_int(i64::from(dst_y))?;
    w.finish()
}

pub fn send_clip(socket: &dyn GuacSocket, layer: i32) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "clip")?;
    w.arg_int(i64::from(layer))?;
    w.finish()
}

pub fn send_line(socket: &dyn GuacSocket, layer: i32, x: i32, y: i32) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "line")?;
    w.arg_int(i64::from(layer))?;
    w.arg_int(i64::from(x))?;
    w.arg_int(i64::from(y))?;
    w.finish()
}

#[allow(clippy::too_many_arguments)]
pub fn send_curve(
    socket: &dyn GuacSocket,
    layer: i32,
    cp1x: i32,
    cp1y: i32,
    cp2x: i32,
    cp2y: i32,
    x: i32,
    y: i32,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "curve")?;
    w.arg_int(i64::from(layer))?;
    w.arg_int(i64::from(cp1x))?;
    w.arg_int(i64::from(cp1y))?;
    w.arg_int(i64::from(cp2x))?;
    w.arg_int(i64::from(cp2y))?;
    w.arg_int(i64::from(x))?;
    w.arg_int(i64::from(y))?;
    w.finish()
}

#[allow(clippy::too_many_arguments)]
pub fn send_arc(
    socket: &dyn GuacSocket,
    layer: i32,
    x: i32,
    y: i32,
    radius: i32,
    start_angle: f64,
    end_angle: f64,
    negative: bool,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "arc")?;
    w.arg_int(i64::from(layer))?;
    w.arg_int(i64::from(x))?;
    w.arg_int(i64::from(y))?;
    w.arg_int(i64::from(radius))?;
    w.arg_double(start_angle)?;
    w.arg_double(end_angle)?;
    w.arg_int(i64::from(negative))?;
    w.finish()
}

pub fn send_start(socket: &dyn GuacSocket, layer: i32, x: i32, y: i32) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "start")?;
    w.arg_int(i64::from(layer))?;
    w.arg_int(i64::from(x))?;
    w.arg_int(i64::from(y))?;
    w.finish()
}

pub fn send_close(socket: &dyn GuacSocket, layer: i32) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "close")?;
    w.arg_int(i64::from(layer))?;
    w.finish()
}

pub fn send_move(
    socket: &dyn GuacSocket,
    layer: i32,
    parent: i32,
    x: i32,
    y: i32,
    z: i32,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "move")?;
    w.arg_int(i64::from(layer))?;
    w.arg_int(i64::from(parent))?;
    w.arg_int(i64::from(x))?;
    w.arg_int(i64::from(y))?;
    w.arg_int(i64::from(z))?;
    w.finish()
}

pub fn send_shade(socket: &dyn GuacSocket, layer: i32, opacity: u8) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "shade")?;
    w.arg_int(i64::from(layer))?;
    w.arg_int(i64::from(opacity))?;
    w.finish()
}

pub fn send_push(socket: &dyn GuacSocket, layer: i32) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "push")?;
    w.arg_int(i64::from(layer))?;
    w.finish()
}

pub fn send_pop(socket: &dyn GuacSocket, layer: i32) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "pop")?;
    w.arg_int(i64::from(layer))?;
    w.finish()
}

pub fn send_reset(socket: &dyn GuacSocket, layer: i32) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "reset")?;
    w.arg_int(i64::from(layer))?;
    w.finish()
}

pub fn send_set(
    socket: &dyn GuacSocket,
    layer: i32,
    name: &str,
    value: &str,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "set")?;
    w.arg_int(i64::from(layer))?;
    w.arg(name)?;
    w.arg(value)?;
    w.finish()
}

pub fn send_dispose(socket: &dyn GuacSocket, layer: i32) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "dispose")?;
    w.arg_int(i64::from(layer))?;
    w.finish()
}

pub fn send_identity(socket: &dyn GuacSocket, layer: i32) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "identity")?;
    w.arg_int(i64::from(layer))?;
    w.finish()
}

#[allow(clippy::too_many_arguments)]
pub fn send_distort(
    socket: &dyn GuacSocket,
    layer: i32,
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "distort")?;
    w.arg_int(i64::from(layer))?;
    for value in [a, b, c, d, e, f] {
        w.arg_double(value)?;
    }
    w.finish()
}

#[allow(clippy::too_many_arguments)]
pub fn send_transform(
    socket: &dyn GuacSocket,
    layer: i32,
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
) -> Result<(), ProtocolError> {
    let mut w = InstructionWriter::begin(socket, "transform")?;
    w.arg_int(i64::from(layer))?;
    for value in [a, b, c, d, e, f] {
        w.arg_double(value)?;
    }
    w.finish()
}

/// Sends an RGBA surface as a `png` draw instruction. The surface is encoded
/// in-memory and written as a single base64 element whose length prefix is
/// the base64 character count.
pub fn send_png(
    socket: &dyn GuacSocket,
    mode: CompositeMode,
    layer: i32,
    x: i32,
    y: i32,
    surface: &RgbaImage,
) -> Result<(), ProtocolError> {
    let mut encoded = Vec::new();
    PngEncoder::new(&mut encoded)
        .write_image(
            surface.as_raw(),
            surface.width(),
            surface.height(),
            ExtendedColorType::Rgba8,
        )
        .map_err(|e| ProtocolError::Image(e.to_string()))?;

    let mut w = InstructionWriter::begin(socket, "png")?;
    w.arg_int(i64::from(mode.mask()))?;
    w.arg_int(i64::from(layer))?;
    w.arg_int(i64::from(x))?;
    w.arg_int(i64::from(y))?;
    w.arg_base64(&encoded)?;
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::BufferedSocket;
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

    fn emit(f: impl FnOnce(&dyn GuacSocket)) -> String {
        let sink = Sink::default();
        let socket = BufferedSocket::new(sink.clone());
        f(&socket);
        socket.flush().unwrap();
        let bytes = sink.0.lock().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn sync_wire_form() {
        let out = emit(|s| send_sync(s, 1234).unwrap());
        assert_eq!(out, "4.sync,4.1234;");
    }

    #[test]
    fn select_and_args_wire_form() {
        let out = emit(|s| send_select(s, "vnc").unwrap());
        assert_eq!(out, "6.select,3.vnc;");

        let out = emit(|s| {
            send_args(s, &["version", "host", "port", "password"]).unwrap();
        });
        assert_eq!(out, "4.args,7.version,4.host,4.port,8.password;");
    }

    #[test]
    fn cfill_wire_form() {
        let out = emit(|s| send_cfill(s, CompositeMode::Over, 0, 0, 0, 0, 255).unwrap());
        assert_eq!(out, "5.cfill,2.14,1.0,1.0,1.0,1.0,3.255;");
    }

    #[test]
    fn copy_wire_form() {
        let out = emit(|s| {
            send_copy(s, 0, 0, 0, 640, 16, CompositeMode::Over, 0, 0, 160).unwrap();
        });
        assert_eq!(out, "4.copy,1.0,1.0,1.0,3.640,2.16,2.14,1.0,1.0,3.160;");
    }

    #[test]
    fn blob_payload_counts_base64_chars() {
        let out = emit(|s| send_blob(s, 3, b"pcm").unwrap());
        // 3 bytes -> 4 base64 chars.
        assert_eq!(out, "4.blob,1.3,4.cGNt;");
    }

    #[test]
    fn error_carries_status_code() {
        let out = emit(|s| send_error(s, "denied", Status::ClientForbidden).unwrap());
        assert_eq!(out, "5.error,6.denied,3.771;");
    }

    #[test]
    fn png_round_trips_through_decoder() {
        let mut surface = RgbaImage::new(4, 2);
        for pixel in surface.pixels_mut() {
            *pixel = image::Rgba([10, 200, 30, 255]);
        }
        let out = emit(|s| send_png(s, CompositeMode::Over, 0, 5, 7, &surface).unwrap());

        let mut parser = crate::parser::Parser::new();
        let (_, instruction) = parser.feed(out.as_bytes()).unwrap();
        let instruction = instruction.unwrap();
        assert_eq!(instruction.opcode, "png");
        assert_eq!(instruction.args[0], "14");
        assert_eq!(instruction.args[1], "0");
        assert_eq!(instruction.args[2], "5");
        assert_eq!(instruction.args[3], "7");

        let payload = crate::writer::decode_base64(&instruction.args[4]).unwrap();
        let decoded = image::load_from_memory(&payload).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (4, 2));
        assert_eq!(decoded.get_pixel(0, 0).0, [10, 200, 30, 255]);
    }
}
