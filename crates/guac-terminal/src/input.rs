//! Keyboard and mouse input directed at the terminal.
//!
//! Key events arrive as X11 keysyms and are translated to the byte
//! sequences a process on the far side of a PTY expects; translated bytes
//! are queued on the terminal's input channel for the backend to drain.
//! Mouse events drive scrollback paging (wheel) and text selection
//! (left-button drag).

use crate::terminal::Term;
use guac_proto::ProtocolError;
use tracing::trace;

/* Mouse button mask bits. */
pub const MOUSE_LEFT: i32 = 0x01;
pub const MOUSE_MIDDLE: i32 = 0x02;
pub const MOUSE_RIGHT: i32 = 0x04;
pub const MOUSE_SCROLL_UP: i32 = 0x08;
pub const MOUSE_SCROLL_DOWN: i32 = 0x10;

/// Rows scrolled per wheel click.
const WHEEL_SCROLL_AMOUNT: usize = 3;

/* Keysyms handled beyond the printable range. */
const KEYSYM_BACKSPACE: i32 = 0xFF08;
const KEYSYM_TAB: i32 = 0xFF09;
const KEYSYM_ENTER: i32 = 0xFF0D;
const KEYSYM_ESCAPE: i32 = 0xFF1B;
const KEYSYM_HOME: i32 = 0xFF50;
const KEYSYM_LEFT: i32 = 0xFF51;
const KEYSYM_UP: i32 = 0xFF52;
const KEYSYM_RIGHT: i32 = 0xFF53;
const KEYSYM_DOWN: i32 = 0xFF54;
const KEYSYM_PAGE_UP: i32 = 0xFF55;
const KEYSYM_PAGE_DOWN: i32 = 0xFF56;
const KEYSYM_END: i32 = 0xFF57;
const KEYSYM_INSERT: i32 = 0xFF63;
const KEYSYM_KP_ENTER: i32 = 0xFF8D;
const KEYSYM_F1: i32 = 0xFFBE;
const KEYSYM_F12: i32 = 0xFFC9;
const KEYSYM_SHIFT_L: i32 = 0xFFE1;
const KEYSYM_SHIFT_R: i32 = 0xFFE2;
const KEYSYM_CTRL_L: i32 = 0xFFE3;
const KEYSYM_CTRL_R: i32 = 0xFFE4;
const KEYSYM_ALT_L: i32 = 0xFFE9;
const KEYSYM_ALT_R: i32 = 0xFFEA;
const KEYSYM_DELETE: i32 = 0xFFFF;

/// Unicode keysyms are the codepoint with this bit set.
const KEYSYM_UNICODE_FLAG: i32 = 0x0100_0000;

impl Term {
    /// Handles one key event, queuing translated bytes for the backend.
    pub(crate) fn send_key(&mut self, keysym: i32, pressed: bool) -> Result<(), ProtocolError> {
        // Modifier bookkeeping happens on both edges.
        match keysym {
            KEYSYM_SHIFT_L | KEYSYM_SHIFT_R => {
                self.mod_shift = pressed;
                return Ok(());
            }
            KEYSYM_CTRL_L | KEYSYM_CTRL_R => {
                self.mod_ctrl = pressed;
                return Ok(());
            }
            KEYSYM_ALT_L | KEYSYM_ALT_R => {
                self.mod_alt = pressed;
                return Ok(());
            }
            _ => {}
        }
        if !pressed {
            return Ok(());
        }

        // Shift with the paging keys drives the scrollback view rather
        // than the backend.
        if self.mod_shift && keysym == KEYSYM_PAGE_UP {
            return self.scroll_display_up(self.height / 2);
        }
        if self.mod_shift && keysym == KEYSYM_PAGE_DOWN {
            return self.scroll_display_down(self.height / 2);
        }

        // Any typed key snaps the view back to the live screen.
        if self.scroll_offset > 0 {
            self.scroll_display_down(self.scroll_offset)?;
        }

        let mut bytes = match self.translate_keysym(keysym) {
            Some(bytes) => bytes,
            None => {
                trace!(target: "terminal.input", keysym, "ignoring untranslatable keysym");
                return Ok(());
            }
        };
        if self.mod_alt {
            bytes.insert(0, 0x1B);
        }
        self.queue_input(bytes);
        Ok(())
    }

    fn translate_keysym(&self, keysym: i32) -> Option<Vec<u8>> {
        // Control characters from letters while ctrl is held.
        if self.mod_ctrl {
            if let Some(c) = char::from_u32(keysym as u32) {
                if c.is_ascii_alphabetic() {
                    return Some(vec![(c.to_ascii_uppercase() as u8) & 0x1F]);
                }
            }
        }

        // Printable ASCII range maps directly.
        if (0x20..0x7F).contains(&keysym) {
            return Some(vec![keysym as u8]);
        }

        // Unicode keysyms carry the codepoint directly.
        if keysym & KEYSYM_UNICODE_FLAG != 0 {
            let c = char::from_u32((keysym & 0x00FF_FFFF) as u32)?;
            let mut buf = [0u8; 4];
            return Some(c.encode_utf8(&mut buf).as_bytes().to_vec());
        }

        let sequence: &[u8] = match keysym {
            KEYSYM_BACKSPACE => b"\x7f",
            KEYSYM_TAB => b"\t",
            KEYSYM_ENTER | KEYSYM_KP_ENTER => b"\r",
            KEYSYM_ESCAPE => b"\x1b",
            KEYSYM_UP => b"\x1b[A",
            KEYSYM_DOWN => b"\x1b[B",
            KEYSYM_RIGHT => b"\x1b[C",
            KEYSYM_LEFT => b"\x1b[D",
            KEYSYM_HOME => b"\x1b[1~",
            KEYSYM_INSERT => b"\x1b[2~",
            KEYSYM_DELETE => b"\x1b[3~",
            KEYSYM_END => b"\x1b[4~",
            KEYSYM_PAGE_UP => b"\x1b[5~",
            KEYSYM_PAGE_DOWN => b"\x1b[6~",
            _ if (KEYSYM_F1..=KEYSYM_F12).contains(&keysym) => {
                return Some(function_key(keysym - KEYSYM_F1 + 1));
            }
            _ => return None,
        };
        Some(sequence.to_vec())
    }

    /// Handles one mouse event in pixel coordinates: wheel paging and
    /// left-drag selection.
    pub(crate) fn send_mouse(&mut self, x: i32, y: i32, mask: i32) -> Result<(), ProtocolError> {
        let pressed = mask & !self.mouse_mask;
        self.mouse_mask = mask;

        if pressed & MOUSE_SCROLL_UP != 0 {
            self.scroll_display_up(WHEEL_SCROLL_AMOUNT)?;
        }
        if pressed & MOUSE_SCROLL_DOWN != 0 {
            self.scroll_display_down(WHEEL_SCROLL_AMOUNT)?;
        }

        let row = (y.max(0) as usize / self.display.char_height).min(self.height - 1);
        let col = (x.max(0) as usize / self.display.char_width).min(self.width - 1);

        if mask & MOUSE_LEFT != 0 {
            if pressed & MOUSE_LEFT != 0 {
                self.selection_dragging = true;
                self.select_start(row, col)?;
            } else if self.selection_dragging {
                self.select_update(row, col)?;
            }
        } else if self.selection_dragging {
            self.selection_dragging = false;
            self.select_end()?;
        }
        Ok(())
    }
}

fn function_key(number: i32) -> Vec<u8> {
    match number {
        1 => b"\x1bOP".to_vec(),
        2 => b"\x1bOQ".to_vec(),
        3 => b"\x1bOR".to_vec(),
        4 => b"\x1bOS".to_vec(),
        5 => b"\x1b[15~".to_vec(),
        6 => b"\x1b[17~".to_vec(),
        7 => b"\x1b[18~".to_vec(),
        8 => b"\x1b[19~".to_vec(),
        9 => b"\x1b[20~".to_vec(),
        10 => b"\x1b[21~".to_vec(),
        11 => b"\x1b[23~".to_vec(),
        _ => b"\x1b[24~".to_vec(),
    }
}
