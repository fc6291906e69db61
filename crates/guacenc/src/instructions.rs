//! Dispatch of parsed instructions onto the display.
//!
//! Only the drawing-relevant subset is handled; all other opcodes are
//! ignored, which keeps the encoder forward compatible with protocol
//! extensions it does not render.

use crate::display::Display;
use crate::error::EncodeError;
use crate::surface::Rect;
use guac_proto::writer::decode_base64;
use guac_proto::{CompositeMode, Instruction, Timestamp};
use tracing::{debug, warn};

fn parse_int(value: &str, opcode: &'static str) -> Result<i32, EncodeError> {
    value.parse::<i32>().map_err(|_| EncodeError::BadInstruction {
        opcode,
        reason: "invalid integer argument",
    })
}

fn require(instruction: &Instruction, count: usize, opcode: &'static str) -> Result<(), EncodeError> {
    if instruction.args.len() < count {
        warn!(target: "enc.instructions", opcode, "instruction incomplete");
        return Err(EncodeError::BadInstruction {
            opcode,
            reason: "missing arguments",
        });
    }
    Ok(())
}

/// Applies one instruction to the display. Unknown opcodes are silently
/// ignored; handler failures are reported to the caller, which logs and
/// continues.
pub fn handle_instruction(
    display: &mut Display,
    instruction: &Instruction,
) -> Result<(), EncodeError> {
    match instruction.opcode.as_str() {
        "blob" => handle_blob(display, instruction),
        "img" => handle_img(display, instruction),
        "end" => handle_end(display, instruction),
        "mouse" => handle_mouse(display, instruction),
        "sync" => handle_sync(display, instruction),
        "cursor" => handle_cursor(display, instruction),
        "copy" => handle_copy(display, instruction),
        "transfer" => handle_transfer(display, instruction),
        "size" => handle_size(display, instruction),
        "rect" => handle_rect(display, instruction),
        "cfill" => handle_cfill(display, instruction),
        "move" => handle_move(display, instruction),
        "shade" => handle_shade(display, instruction),
        "dispose" => handle_dispose(display, instruction),
        _ => Ok(()),
    }
}

fn handle_img(display: &mut Display, instruction: &Instruction) -> Result<(), EncodeError> {
    require(instruction, 6, "img")?;
    let stream = parse_int(instruction.arg(0), "img")?;
    let mask = parse_int(instruction.arg(1), "img")?;
    let layer = parse_int(instruction.arg(2), "img")?;
    let mimetype = instruction.arg(3);
    let x = parse_int(instruction.arg(4), "img")?;
    let y = parse_int(instruction.arg(5), "img")?;
    display.create_image_stream(stream, mask, layer, mimetype, x, y)
}

fn handle_blob(display: &mut Display, instruction: &Instruction) -> Result<(), EncodeError> {
    require(instruction, 2, "blob")?;
    let stream_index = parse_int(instruction.arg(0), "blob")?;
    let data = decode_base64(instruction.arg(1))?;
    let Some(stream) = display.get_image_stream(stream_index) else {
        return Err(EncodeError::BadInstruction {
            opcode: "blob",
            reason: "no such stream",
        });
    };
    stream.receive(&data)
}

fn handle_end(display: &mut Display, instruction: &Instruction) -> Result<(), EncodeError> {
    require(instruction, 1, "end")?;
    let stream_index = parse_int(instruction.arg(0), "end")?;
    let Some(mut stream) = display.take_image_stream(stream_index) else {
        return Err(EncodeError::BadInstruction {
            opcode: "end",
            reason: "no such stream",
        });
    };
    let Some(buffer) = display.get_related_buffer(stream.layer_index) else {
        return Err(EncodeError::BadInstruction {
            opcode: "end",
            reason: "no such destination buffer",
        });
    };
    stream.end(buffer)
}

fn handle_mouse(display: &mut Display, instruction: &Instruction) -> Result<(), EncodeError> {
    require(instruction, 2, "mouse")?;
    display.cursor.x = parse_int(instruction.arg(0), "mouse")?;
    display.cursor.y = parse_int(instruction.arg(1), "mouse")?;

    // A timestamped mouse event also advances the frame timeline.
    if instruction.args.len() < 4 {
        return Ok(());
    }
    let timestamp: Timestamp =
        instruction
            .arg(3)
            .parse()
            .map_err(|_| EncodeError::BadInstruction {
                opcode: "mouse",
                reason: "invalid timestamp",
            })?;
    display.sync(timestamp)
}

fn handle_sync(display: &mut Display, instruction: &Instruction) -> Result<(), EncodeError> {
    require(instruction, 1, "sync")?;
    let timestamp: Timestamp =
        instruction
            .arg(0)
            .parse()
            .map_err(|_| EncodeError::BadInstruction {
                opcode: "sync",
                reason: "invalid timestamp",
            })?;
    display.sync(timestamp)
}

fn handle_cursor(display: &mut Display, instruction: &Instruction) -> Result<(), EncodeError> {
    require(instruction, 7, "cursor")?;
    let hotspot_x = parse_int(instruction.arg(0), "cursor")?;
    let hotspot_y = parse_int(instruction.arg(1), "cursor")?;
    let src_index = parse_int(instruction.arg(2), "cursor")?;
    let src_x = parse_int(instruction.arg(3), "cursor")?;
    let src_y = parse_int(instruction.arg(4), "cursor")?;
    let width = parse_int(instruction.arg(5), "cursor")?;
    let height = parse_int(instruction.arg(6), "cursor")?;

    let Some(source) = display
        .get_related_buffer(src_index)
        .and_then(|buffer| buffer.surface())
        .map(|surface| surface.extract(Rect::new(src_x, src_y, width, height)))
    else {
        return Ok(());
    };

    display.cursor.hotspot_x = hotspot_x;
    display.cursor.hotspot_y = hotspot_y;
    let cursor = &mut display.cursor.buffer;
    cursor.resize(width, height)?;
    cursor.draw(
        &source,
        Rect::new(0, 0, width, height),
        0,
        0,
        CompositeMode::Src,
    );
    Ok(())
}

fn handle_copy(display: &mut Display, instruction: &Instruction) -> Result<(), EncodeError> {
    require(instruction, 9, "copy")?;
    let src_index = parse_int(instruction.arg(0), "copy")?;
    let src_x = parse_int(instruction.arg(1), "copy")?;
    let src_y = parse_int(instruction.arg(2), "copy")?;
    let width = parse_int(instruction.arg(3), "copy")?;
    let height = parse_int(instruction.arg(4), "copy")?;
    let mask = parse_int(instruction.arg(5), "copy")?;
    let dst_index = parse_int(instruction.arg(6), "copy")?;
    let dst_x = parse_int(instruction.arg(7), "copy")?;
    let dst_y = parse_int(instruction.arg(8), "copy")?;

    // Snapshot the source rectangle first; source and destination may be
    // the same surface (scrolls), and overlapping blits must not alias.
    let Some(source) = display
        .get_related_buffer(src_index)
        .and_then(|buffer| buffer.surface())
        .map(|surface| surface.extract(Rect::new(src_x, src_y, width, height)))
    else {
        return Err(EncodeError::BadInstruction {
            opcode: "copy",
            reason: "no such source buffer",
        });
    };

    let Some(dst) = display.get_related_buffer(dst_index) else {
        return Err(EncodeError::BadInstruction {
            opcode: "copy",
            reason: "no such destination buffer",
        });
    };
    if dst.autosize {
        dst.fit(dst_x + width, dst_y + height)?;
    }
    let mode = CompositeMode::from_mask(mask).unwrap_or_default();
    dst.draw(
        &source,
        Rect::new(0, 0, source.width() as i32, source.height() as i32),
        dst_x,
        dst_y,
        mode,
    );
    Ok(())
}

fn handle_transfer(_display: &mut Display, instruction: &Instruction) -> Result<(), EncodeError> {
    require(instruction, 9, "transfer")?;
    // Rarely emitted; not rendered.
    debug!(target: "enc.instructions", "\"transfer\" not implemented; ignored");
    Ok(())
}

fn handle_size(display: &mut Display, instruction: &Instruction) -> Result<(), EncodeError> {
    require(instruction, 3, "size")?;
    let index = parse_int(instruction.arg(0), "size")?;
    let width = parse_int(instruction.arg(1), "size")?;
    let height = parse_int(instruction.arg(2), "size")?;
    let Some(buffer) = display.get_related_buffer(index) else {
        return Err(EncodeError::BadInstruction {
            opcode: "size",
            reason: "no such buffer",
        });
    };
    buffer.resize(width, height)
}

fn handle_rect(display: &mut Display, instruction: &Instruction) -> Result<(), EncodeError> {
    require(instruction, 5, "rect")?;
    let index = parse_int(instruction.arg(0), "rect")?;
    let x = parse_int(instruction.arg(1), "rect")?;
    let y = parse_int(instruction.arg(2), "rect")?;
    let width = parse_int(instruction.arg(3), "rect")?;
    let height = parse_int(instruction.arg(4), "rect")?;

    let Some(buffer) = display.get_related_buffer(index) else {
        return Err(EncodeError::BadInstruction {
            opcode: "rect",
            reason: "no such buffer",
        });
    };
    if buffer.autosize {
        buffer.fit(x + width, y + height)?;
    }
    buffer.set_path(Rect::new(x, y, width, height));
    Ok(())
}

fn handle_cfill(display: &mut Display, instruction: &Instruction) -> Result<(), EncodeError> {
    require(instruction, 6, "cfill")?;
    let mask = parse_int(instruction.arg(0), "cfill")?;
    let index = parse_int(instruction.arg(1), "cfill")?;
    let r = parse_int(instruction.arg(2), "cfill")?.clamp(0, 255) as u8;
    let g = parse_int(instruction.arg(3), "cfill")?.clamp(0, 255) as u8;
    let b = parse_int(instruction.arg(4), "cfill")?.clamp(0, 255) as u8;
    let a = parse_int(instruction.arg(5), "cfill")?.clamp(0, 255) as u8;

    let Some(buffer) = display.get_related_buffer(index) else {
        return Err(EncodeError::BadInstruction {
            opcode: "cfill",
            reason: "no such buffer",
        });
    };
    let mode = CompositeMode::from_mask(mask).unwrap_or_default();
    buffer.fill([r, g, b, a], mode);
    Ok(())
}

fn handle_move(display: &mut Display, instruction: &Instruction) -> Result<(), EncodeError> {
    require(instruction, 5, "move")?;
    let layer_index = parse_int(instruction.arg(0), "move")?;
    let parent_index = parse_int(instruction.arg(1), "move")?;
    let x = parse_int(instruction.arg(2), "move")?;
    let y = parse_int(instruction.arg(3), "move")?;
    let z = parse_int(instruction.arg(4), "move")?;

    // Validate the parent before mutating the child.
    if display.get_layer(parent_index).is_none() {
        return Err(EncodeError::BadInstruction {
            opcode: "move",
            reason: "no such parent layer",
        });
    }
    let Some(layer) = display.get_layer(layer_index) else {
        return Err(EncodeError::BadInstruction {
            opcode: "move",
            reason: "no such layer",
        });
    };
    layer.parent_index = parent_index;
    layer.x = x;
    layer.y = y;
    layer.z = z;
    Ok(())
}

fn handle_shade(display: &mut Display, instruction: &Instruction) -> Result<(), EncodeError> {
    require(instruction, 2, "shade")?;
    let index = parse_int(instruction.arg(0), "shade")?;
    let opacity = parse_int(instruction.arg(1), "shade")?.clamp(0, 255) as u8;
    let Some(layer) = display.get_layer(index) else {
        return Err(EncodeError::BadInstruction {
            opcode: "shade",
            reason: "no such layer",
        });
    };
    layer.opacity = opacity;
    Ok(())
}

fn handle_dispose(display: &mut Display, instruction: &Instruction) -> Result<(), EncodeError> {
    require(instruction, 1, "dispose")?;
    let index = parse_int(instruction.arg(0), "dispose")?;
    if index > 0 {
        return display.free_layer(index);
    }
    if index == 0 {
        // The default layer is never disposed.
        warn!(target: "enc.instructions", "refusing to dispose default layer");
        return Err(EncodeError::BadInstruction {
            opcode: "dispose",
            reason: "cannot dispose default layer",
        });
    }
    display.free_buffer(index)
}
