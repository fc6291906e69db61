//! Escape-sequence interpretation.
//!
//! A deliberately practical VT subset: printable echo with wrapping,
//! C0 controls, and the CSI sequences shells and full-screen programs lean
//! on (cursor motion, erase, SGR, scroll regions, insert/delete). Unknown
//! sequences are logged at trace level and dropped.

use crate::terminal::Term;
use guac_proto::ProtocolError;
use tracing::trace;
use unicode_width::UnicodeWidthChar;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum VtState {
    Ground,
    Escape,
    Csi {
        params: Vec<u32>,
        current: Option<u32>,
        private: bool,
    },
}

impl Term {
    pub(crate) fn handle_char(&mut self, c: char) -> Result<(), ProtocolError> {
        match std::mem::replace(&mut self.vt, VtState::Ground) {
            VtState::Ground => self.handle_ground(c),
            VtState::Escape => self.handle_escape(c),
            VtState::Csi {
                params,
                current,
                private,
            } => self.handle_csi(c, params, current, private),
        }
    }

    fn handle_ground(&mut self, c: char) -> Result<(), ProtocolError> {
        match c {
            '\x1b' => self.vt = VtState::Escape,
            '\r' => self.cursor_col = 0,
            '\n' => self.linefeed()?,
            '\x08' => self.cursor_col = self.cursor_col.saturating_sub(1),
            '\t' => {
                self.cursor_col = ((self.cursor_col / 8) + 1) * 8;
                if self.cursor_col >= self.width {
                    self.cursor_col = self.width - 1;
                }
            }
            '\x07' | '\x00' => {}
            _ => self.echo(c)?,
        }
        Ok(())
    }

    fn handle_escape(&mut self, c: char) -> Result<(), ProtocolError> {
        match c {
            '[' => {
                self.vt = VtState::Csi {
                    params: Vec::new(),
                    current: None,
                    private: false,
                };
            }
            // Index / reverse index.
            'D' => self.linefeed()?,
            'M' => self.reverse_linefeed()?,
            // Save / restore cursor.
            '7' => self.saved_cursor = (self.cursor_row, self.cursor_col),
            '8' => {
                let (row, col) = self.saved_cursor;
                self.cursor_row = row.min(self.height - 1);
                self.cursor_col = col.min(self.width - 1);
            }
            // Full reset.
            'c' => {
                self.current_attributes = self.default_attributes;
                self.cursor_row = 0;
                self.cursor_col = 0;
                self.scroll_start = 0;
                self.scroll_end = self.height - 1;
                self.clear_area(0, 0, self.height, self.width)?;
            }
            other => {
                trace!(target: "terminal.vt", escape = %other, "ignoring escape sequence");
            }
        }
        Ok(())
    }

    fn handle_csi(
        &mut self,
        c: char,
        mut params: Vec<u32>,
        current: Option<u32>,
        private: bool,
    ) -> Result<(), ProtocolError> {
        match c {
            '0'..='9' => {
                let digit = c as u32 - '0' as u32;
                let value = current.unwrap_or(0).saturating_mul(10) + digit;
                self.vt = VtState::Csi {
                    params,
                    current: Some(value),
                    private,
                };
                return Ok(());
            }
            ';' => {
                params.push(current.unwrap_or(0));
                self.vt = VtState::Csi {
                    params,
                    current: None,
                    private,
                };
                return Ok(());
            }
            '?' => {
                self.vt = VtState::Csi {
                    params,
                    current,
                    private: true,
                };
                return Ok(());
            }
            _ => {}
        }

        if let Some(value) = current {
            params.push(value);
        }
        if private {
            // DEC private modes (cursor visibility, alternate screen) do not
            // affect the character grid.
            trace!(target: "terminal.vt", terminator = %c, "ignoring private CSI sequence");
            return Ok(());
        }

        let arg = |index: usize, default: u32| -> u32 {
            params.get(index).copied().unwrap_or(default)
        };

        match c {
            'A' => {
                let n = arg(0, 1).max(1) as usize;
                self.cursor_row = self.cursor_row.saturating_sub(n);
            }
            'B' => {
                let n = arg(0, 1).max(1) as usize;
                self.cursor_row = (self.cursor_row + n).min(self.height - 1);
            }
            'C' => {
                let n = arg(0, 1).max(1) as usize;
                self.cursor_col = (self.cursor_col + n).min(self.width - 1);
            }
            'D' => {
                let n = arg(0, 1).max(1) as usize;
                self.cursor_col = self.cursor_col.saturating_sub(n);
            }
            'E' => {
                let n = arg(0, 1).max(1) as usize;
                self.cursor_row = (self.cursor_row + n).min(self.height - 1);
                self.cursor_col = 0;
            }
            'F' => {
                let n = arg(0, 1).max(1) as usize;
                self.cursor_row = self.cursor_row.saturating_sub(n);
                self.cursor_col = 0;
            }
            'G' => {
                self.cursor_col = (arg(0, 1).max(1) as usize - 1).min(self.width - 1);
            }
            'd' => {
                self.cursor_row = (arg(0, 1).max(1) as usize - 1).min(self.height - 1);
            }
            'X' => {
                let n = (arg(0, 1).max(1) as usize).min(self.width - self.cursor_col);
                self.clear_area(self.cursor_row, self.cursor_col, 1, n)?;
            }
            'H' | 'f' => {
                self.cursor_row = (arg(0, 1).max(1) as usize - 1).min(self.height - 1);
                self.cursor_col = (arg(1, 1).max(1) as usize - 1).min(self.width - 1);
            }
            'J' => match arg(0, 0) {
                0 => self.clear_to_document_end()?,
                1 => self.clear_from_document_start()?,
                _ => self.clear_area(0, 0, self.height, self.width)?,
            },
            'K' => match arg(0, 0) {
                0 => self.clear_area(self.cursor_row, self.cursor_col, 1, self.width - self.cursor_col)?,
                1 => self.clear_area(self.cursor_row, 0, 1, self.cursor_col + 1)?,
                _ => self.clear_area(self.cursor_row, 0, 1, self.width)?,
            },
            'L' => {
                if self.cursor_row <= self.scroll_end {
                    let n = (arg(0, 1).max(1) as usize).min(self.scroll_end + 1 - self.cursor_row);
                    self.scroll_down_region(self.cursor_row, self.scroll_end, n)?;
                }
            }
            'M' => {
                if self.cursor_row <= self.scroll_end {
                    let n = (arg(0, 1).max(1) as usize).min(self.scroll_end + 1 - self.cursor_row);
                    self.scroll_up_region(self.cursor_row, self.scroll_end, n)?;
                }
            }
            '@' => self.insert_chars(arg(0, 1).max(1) as usize)?,
            'P' => self.delete_chars(arg(0, 1).max(1) as usize)?,
            'm' => self.apply_sgr(&params),
            'r' => {
                let top = arg(0, 1).max(1) as usize - 1;
                let bottom = (arg(1, self.height as u32).max(1) as usize - 1).min(self.height - 1);
                if top < bottom {
                    self.scroll_start = top;
                    self.scroll_end = bottom;
                    self.cursor_row = 0;
                    self.cursor_col = 0;
                }
            }
            's' => self.saved_cursor = (self.cursor_row, self.cursor_col),
            'u' => {
                let (row, col) = self.saved_cursor;
                self.cursor_row = row.min(self.height - 1);
                self.cursor_col = col.min(self.width - 1);
            }
            other => {
                trace!(target: "terminal.vt", terminator = %other, "ignoring CSI sequence");
            }
        }
        Ok(())
    }

    fn apply_sgr(&mut self, params: &[u32]) {
        let params = if params.is_empty() { &[0][..] } else { params };
        for &param in params {
            match param {
                0 => self.current_attributes = self.default_attributes,
                1 => self.current_attributes.bold = true,
                4 => self.current_attributes.underscore = true,
                7 => self.current_attributes.reverse = true,
                22 => self.current_attributes.bold = false,
                24 => self.current_attributes.underscore = false,
                27 => self.current_attributes.reverse = false,
                30..=37 => self.current_attributes.foreground = (param - 30) as u8,
                39 => self.current_attributes.foreground = self.default_attributes.foreground,
                40..=47 => self.current_attributes.background = (param - 40) as u8,
                49 => self.current_attributes.background = self.default_attributes.background,
                90..=97 => self.current_attributes.foreground = (param - 90 + 8) as u8,
                100..=107 => self.current_attributes.background = (param - 100 + 8) as u8,
                other => {
                    trace!(target: "terminal.vt", sgr = other, "ignoring SGR parameter");
                }
            }
        }
    }

    /// Echoes one printable character, wrapping and scrolling as needed.
    /// Double-width characters occupy two cells.
    fn echo(&mut self, c: char) -> Result<(), ProtocolError> {
        let char_width = c.width().unwrap_or(0).max(1);
        if self.cursor_col + char_width > self.width {
            self.cursor_col = 0;
            self.linefeed()?;
        }
        self.set_cell(self.cursor_row, self.cursor_col, c)?;
        if char_width == 2 && self.cursor_col + 1 < self.width {
            self.set_cell(self.cursor_row, self.cursor_col + 1, ' ')?;
        }
        self.cursor_col += char_width;
        Ok(())
    }

    fn linefeed(&mut self) -> Result<(), ProtocolError> {
        if self.cursor_row == self.scroll_end {
            self.scroll_up_region(self.scroll_start, self.scroll_end, 1)?;
        } else if self.cursor_row + 1 < self.height {
            self.cursor_row += 1;
        }
        Ok(())
    }

    fn reverse_linefeed(&mut self) -> Result<(), ProtocolError> {
        if self.cursor_row == self.scroll_start {
            self.scroll_down_region(self.scroll_start, self.scroll_end, 1)?;
        } else if self.cursor_row > 0 {
            self.cursor_row -= 1;
        }
        Ok(())
    }

    fn insert_chars(&mut self, count: usize) -> Result<(), ProtocolError> {
        let count = count.min(self.width - self.cursor_col);
        let remaining = self.width - self.cursor_col - count;
        if remaining > 0 {
            self.copy_area(
                self.cursor_row,
                self.cursor_col + count,
                self.cursor_row,
                self.cursor_col,
                remaining,
                1,
            )?;
        }
        self.clear_area(self.cursor_row, self.cursor_col, 1, count)
    }

    fn delete_chars(&mut self, count: usize) -> Result<(), ProtocolError> {
        let count = count.min(self.width - self.cursor_col);
        let remaining = self.width - self.cursor_col - count;
        if remaining > 0 {
            self.copy_area(
                self.cursor_row,
                self.cursor_col,
                self.cursor_row,
                self.cursor_col + count,
                remaining,
                1,
            )?;
        }
        self.clear_area(self.cursor_row, self.width - count, 1, count)
    }

    fn clear_to_document_end(&mut self) -> Result<(), ProtocolError> {
        self.clear_range(
            self.cursor_row,
            self.cursor_col,
            self.height - 1,
            self.width - 1,
        )
    }

    fn clear_from_document_start(&mut self) -> Result<(), ProtocolError> {
        self.clear_range(0, 0, self.cursor_row, self.cursor_col)
    }
}
