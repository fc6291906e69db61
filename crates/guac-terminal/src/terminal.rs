//! The terminal emulator proper: visible buffer, scrollback, selection,
//! and the delta engine tying them to the remote display.
//!
//! All public operations serialize on one coarse mutex; backends feed
//! output bytes in via [`Terminal::write`] and user events via the
//! remaining methods, then [`Terminal::flush`] pushes the coalesced
//! changes out as instructions.

use crate::buffer::Buffer;
use crate::delta::Delta;
use crate::display::{BitmapFontRasterizer, GlyphRasterizer, TerminalDisplay};
use crate::scrollback::{Scrollback, DEFAULT_SCROLLBACK_ROWS};
use crate::types::{Attributes, Cell, DEFAULT_ATTRIBUTES};
use crate::vt::VtState;
use crossbeam_channel::{Receiver, Sender};
use guac_client::client::Client;
use guac_proto::ProtocolError;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

pub struct Terminal {
    inner: Mutex<Term>,
    input_rx: Receiver<Vec<u8>>,
}

pub(crate) struct Term {
    pub(crate) display: TerminalDisplay,
    pub(crate) buffer: Buffer,
    pub(crate) scrollback: Scrollback,
    pub(crate) delta: Delta,
    /// Grid dimensions, in cells.
    pub(crate) width: usize,
    pub(crate) height: usize,
    pub(crate) cursor_row: usize,
    pub(crate) cursor_col: usize,
    pub(crate) saved_cursor: (usize, usize),
    pub(crate) current_attributes: Attributes,
    pub(crate) default_attributes: Attributes,
    /// Inclusive scroll region bounds.
    pub(crate) scroll_start: usize,
    pub(crate) scroll_end: usize,
    /// Rows of scrollback currently scrolled into view.
    pub(crate) scroll_offset: usize,
    selection_start: usize,
    selection_end: usize,
    text_selected: bool,
    pub(crate) selection_dragging: bool,
    /// Cell currently rendered reversed as the cursor, with its contents
    /// at commit time.
    committed_cursor: Option<(usize, usize, Cell)>,
    pub(crate) vt: VtState,
    /* Input state */
    pub(crate) mod_shift: bool,
    pub(crate) mod_ctrl: bool,
    pub(crate) mod_alt: bool,
    pub(crate) mouse_mask: i32,
    input_tx: Sender<Vec<u8>>,
}

impl Terminal {
    /// Creates a terminal sized to the given pixel dimensions, using the
    /// built-in bitmap font.
    pub fn new(client: &Arc<Client>, width_px: usize, height_px: usize) -> Result<Terminal, ProtocolError> {
        Self::with_rasterizer(client, width_px, height_px, Box::new(BitmapFontRasterizer))
    }

    pub fn with_rasterizer(
        client: &Arc<Client>,
        width_px: usize,
        height_px: usize,
        rasterizer: Box<dyn GlyphRasterizer>,
    ) -> Result<Terminal, ProtocolError> {
        let display = TerminalDisplay::new(
            Arc::clone(client),
            rasterizer,
            DEFAULT_ATTRIBUTES.foreground,
            DEFAULT_ATTRIBUTES.background,
        );
        let width = (width_px / display.char_width).max(1);
        let height = (height_px / display.char_height).max(1);
        let (input_tx, input_rx) = crossbeam_channel::unbounded();

        let mut term = Term {
            buffer: Buffer::new(width, height, DEFAULT_ATTRIBUTES),
            scrollback: Scrollback::new(DEFAULT_SCROLLBACK_ROWS),
            delta: Delta::new(width, height),
            display,
            width,
            height,
            cursor_row: 0,
            cursor_col: 0,
            saved_cursor: (0, 0),
            current_attributes: DEFAULT_ATTRIBUTES,
            default_attributes: DEFAULT_ATTRIBUTES,
            scroll_start: 0,
            scroll_end: height - 1,
            scroll_offset: 0,
            selection_start: 0,
            selection_end: 0,
            text_selected: false,
            selection_dragging: false,
            committed_cursor: None,
            vt: VtState::Ground,
            mod_shift: false,
            mod_ctrl: false,
            mod_alt: false,
            mouse_mask: 0,
            input_tx,
        };

        term.display.send_display_size(width, height)?;
        term.clear_area(0, 0, height, width)?;
        Ok(Terminal {
            inner: Mutex::new(term),
            input_rx,
        })
    }

    /// Channel on which translated input bytes (destined for the backend's
    /// PTY) are delivered.
    pub fn input_receiver(&self) -> &Receiver<Vec<u8>> {
        &self.input_rx
    }

    /// Grid width in cells.
    pub fn columns(&self) -> usize {
        self.inner.lock().width
    }

    /// Grid height in cells.
    pub fn rows(&self) -> usize {
        self.inner.lock().height
    }

    pub fn cursor(&self) -> (usize, usize) {
        let term = self.inner.lock();
        (term.cursor_row, term.cursor_col)
    }

    pub fn scrollback_len(&self) -> usize {
        self.inner.lock().scrollback.len()
    }

    pub fn text_selected(&self) -> bool {
        self.inner.lock().text_selected
    }

    /// Reads a cell, for drivers and tests.
    pub fn cell(&self, row: usize, col: usize) -> Cell {
        *self.inner.lock().buffer.cell(row, col)
    }

    /// Interprets backend output.
    pub fn write(&self, data: &str) -> Result<(), ProtocolError> {
        let mut term = self.inner.lock();
        for c in data.chars() {
            term.handle_char(c)?;
        }
        Ok(())
    }

    /// Coalesces and emits all pending changes, then flushes the socket.
    pub fn flush(&self) -> Result<(), ProtocolError> {
        self.inner.lock().flush()
    }

    /// Toggles reverse video of one cell (cursor rendering).
    pub fn toggle_reverse(&self, row: usize, col: usize) -> Result<(), ProtocolError> {
        self.inner.lock().toggle_reverse(row, col)
    }

    /// Copies a cell rectangle (driver-level operation).
    #[allow(clippy::too_many_arguments)]
    pub fn copy(
        &self,
        dst_row: usize,
        dst_col: usize,
        src_row: usize,
        src_col: usize,
        width: usize,
        height: usize,
    ) -> Result<(), ProtocolError> {
        self.inner
            .lock()
            .copy_area(dst_row, dst_col, src_row, src_col, width, height)
    }

    /// Clears a cell rectangle to the current background.
    pub fn clear(&self, row: usize, col: usize, rows: usize, cols: usize) -> Result<(), ProtocolError> {
        self.inner.lock().clear_area(row, col, rows, cols)
    }

    /// Scrolls the given row range up, feeding scrollback when the range is
    /// the full screen.
    pub fn scroll_up(&self, start_row: usize, end_row: usize, amount: usize) -> Result<(), ProtocolError> {
        self.inner.lock().scroll_up_region(start_row, end_row, amount)
    }

    /// Scrolls the given row range down.
    pub fn scroll_down(&self, start_row: usize, end_row: usize, amount: usize) -> Result<(), ProtocolError> {
        self.inner.lock().scroll_down_region(start_row, end_row, amount)
    }

    /// Resizes to the given pixel dimensions, preserving content top-left
    /// and ejecting surplus top rows into scrollback.
    pub fn resize(&self, width_px: usize, height_px: usize) -> Result<(), ProtocolError> {
        self.inner.lock().resize(width_px, height_px)
    }

    /// Scrolls older content into view.
    pub fn scroll_display_up(&self, amount: usize) -> Result<(), ProtocolError> {
        self.inner.lock().scroll_display_up(amount)
    }

    /// Scrolls back toward the live screen.
    pub fn scroll_display_down(&self, amount: usize) -> Result<(), ProtocolError> {
        self.inner.lock().scroll_display_down(amount)
    }

    pub fn select_start(&self, row: usize, col: usize) -> Result<(), ProtocolError> {
        self.inner.lock().select_start(row, col)
    }

    pub fn select_update(&self, row: usize, col: usize) -> Result<(), ProtocolError> {
        self.inner.lock().select_update(row, col)
    }

    pub fn select_end(&self) -> Result<(), ProtocolError> {
        self.inner.lock().select_end()
    }

    /// Text of the current selection, rows joined by newlines. Trailing
    /// blanks of each selected row are dropped.
    pub fn selected_text(&self) -> String {
        self.inner.lock().selected_text()
    }

    /// Renders the cursor by reversing the cell under it, restoring the
    /// previously-reversed cell first. Typically called before a flush.
    pub fn commit_cursor(&self) -> Result<(), ProtocolError> {
        self.inner.lock().commit_cursor()
    }

    /// Handles a key event from a viewer. Translated bytes appear on
    /// [`Terminal::input_receiver`].
    pub fn send_key(&self, keysym: i32, pressed: bool) -> Result<(), ProtocolError> {
        self.inner.lock().send_key(keysym, pressed)
    }

    /// Handles a mouse event from a viewer, in pixel coordinates: wheel
    /// pages scrollback, left-button drag selects text.
    pub fn send_mouse(&self, x: i32, y: i32, button_mask: i32) -> Result<(), ProtocolError> {
        self.inner.lock().send_mouse(x, y, button_mask)
    }

    /// Marks the whole grid dirty and flushes, re-sending the full display
    /// state (used when re-duplicating the screen for joining users).
    pub fn redraw(&self) -> Result<(), ProtocolError> {
        let mut term = self.inner.lock();
        term.mark_all_dirty();
        term.flush()
    }
}

impl Term {
    pub(crate) fn flush(&mut self) -> Result<(), ProtocolError> {
        self.delta.flush(&mut self.display)?;
        self.display.flush()
    }

    /// Queues translated input bytes for the backend.
    pub(crate) fn queue_input(&self, bytes: Vec<u8>) {
        if self.input_tx.send(bytes).is_err() {
            debug!(target: "terminal.input", "input receiver dropped; bytes discarded");
        }
    }

    /// Writes one character at the given buffer position with the current
    /// attributes, annotating the delta when the cell is in view.
    pub(crate) fn set_cell(&mut self, row: usize, col: usize, c: char) -> Result<(), ProtocolError> {
        let cell = Cell {
            value: c,
            attributes: self.current_attributes,
        };
        let scrolled_row = row + self.scroll_offset;
        if scrolled_row < self.delta.height() {
            self.delta.set_columns(scrolled_row, col, col, cell);
        }
        self.buffer.set(row, col, cell);
        Ok(())
    }

    pub(crate) fn toggle_reverse(&mut self, row: usize, col: usize) -> Result<(), ProtocolError> {
        let cell = {
            let cell = self.buffer.cell_mut(row, col);
            cell.attributes.reverse = !cell.attributes.reverse;
            *cell
        };
        let scrolled_row = row + self.scroll_offset;
        if scrolled_row < self.delta.height() {
            self.delta.set(scrolled_row, col, cell);
        }
        Ok(())
    }

    /// Copies a cell rectangle, updating buffer and (where visible) delta.
    pub(crate) fn copy_area(
        &mut self,
        dst_row: usize,
        dst_col: usize,
        src_row: usize,
        src_col: usize,
        width: usize,
        height: usize,
    ) -> Result<(), ProtocolError> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        let scrolled_src = src_row + self.scroll_offset;
        let scrolled_dst = dst_row + self.scroll_offset;
        if scrolled_src < self.delta.height() && scrolled_dst < self.delta.height() {
            let mut rows = height;
            rows = rows.min(self.delta.height() - scrolled_src);
            rows = rows.min(self.delta.height() - scrolled_dst);
            self.delta
                .copy(scrolled_dst, dst_col, scrolled_src, src_col, width, rows);
        }
        self.buffer
            .copy(dst_row, dst_col, src_row, src_col, width, height);
        Ok(())
    }

    /// Clears a cell rectangle to blanks in the current background.
    pub(crate) fn clear_area(
        &mut self,
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    ) -> Result<(), ProtocolError> {
        if rows == 0 || cols == 0 {
            return Ok(());
        }
        let cell = Cell::blank(self.current_attributes);
        let scrolled_row = row + self.scroll_offset;
        if scrolled_row < self.delta.height() {
            let visible_rows = rows.min(self.delta.height() - scrolled_row);
            self.delta.set_rect(scrolled_row, col, cols, visible_rows, cell);
        }
        self.buffer.set_rect(row, col, cols, rows, cell);
        Ok(())
    }

    /// Moves rows within the scroll region up, pushing into scrollback when
    /// the region is the whole screen.
    pub(crate) fn scroll_up_region(
        &mut self,
        start_row: usize,
        end_row: usize,
        amount: usize,
    ) -> Result<(), ProtocolError> {
        if start_row > end_row {
            return Ok(());
        }
        let region_height = end_row - start_row + 1;
        let amount = amount.min(region_height);
        if amount == 0 {
            return Ok(());
        }

        if start_row == 0 && end_row == self.height - 1 {
            for row in 0..amount {
                let cells = trim_trailing_blanks(self.buffer.row(row));
                self.scrollback.append_row(cells);
            }
        }

        self.copy_area(
            start_row,
            0,
            start_row + amount,
            0,
            self.width,
            region_height - amount,
        )?;
        self.clear_area(end_row - amount + 1, 0, amount, self.width)
    }

    /// Moves rows within the scroll region down. No scrollback interaction.
    pub(crate) fn scroll_down_region(
        &mut self,
        start_row: usize,
        end_row: usize,
        amount: usize,
    ) -> Result<(), ProtocolError> {
        if start_row > end_row {
            return Ok(());
        }
        let region_height = end_row - start_row + 1;
        let amount = amount.min(region_height);
        if amount == 0 {
            return Ok(());
        }
        self.copy_area(
            start_row + amount,
            0,
            start_row,
            0,
            self.width,
            region_height - amount,
        )?;
        self.clear_area(start_row, 0, amount, self.width)
    }

    /// Clears the "to end of document" shape: leading partial row, full
    /// rows, trailing partial row.
    pub(crate) fn clear_range(
        &mut self,
        mut start_row: usize,
        start_col: usize,
        mut end_row: usize,
        end_col: usize,
    ) -> Result<(), ProtocolError> {
        if start_col > 0 {
            self.clear_area(start_row, start_col, 1, self.width - start_col)?;
            start_row += 1;
        }
        if end_col < self.width - 1 {
            self.clear_area(end_row, 0, 1, end_col + 1)?;
            if end_row == 0 {
                return Ok(());
            }
            end_row -= 1;
        }
        if start_row <= end_row {
            self.clear_area(start_row, 0, end_row - start_row + 1, self.width)?;
        }
        Ok(())
    }

    fn row_cells(&self, row: i32) -> Vec<Cell> {
        if row < 0 {
            match self.scrollback.row(row) {
                Some(scrollback_row) => scrollback_row.cells.clone(),
                None => Vec::new(),
            }
        } else {
            self.buffer.row(row as usize).to_vec()
        }
    }

    /// Paints one delta row from arbitrary (possibly scrollback) content.
    fn draw_row_into_delta(&mut self, dest_row: usize, cells: &[Cell]) {
        let blank = Cell::blank(self.default_attributes);
        self.delta.set_rect(dest_row, 0, self.width, 1, blank);
        for (col, cell) in cells.iter().take(self.width).enumerate() {
            self.delta.set_columns(dest_row, col, col, *cell);
        }
    }

    pub(crate) fn scroll_display_up(&mut self, mut amount: usize) -> Result<(), ProtocolError> {
        amount = amount.min(self.scrollback.len().saturating_sub(self.scroll_offset));
        if amount == 0 {
            return Ok(());
        }

        // Shift the visible content down; the exposed top band is filled
        // from scrollback.
        if self.height > amount {
            self.delta.copy(amount, 0, 0, 0, self.width, self.height - amount);
        }
        self.scroll_offset += amount;

        let start_row = -(self.scroll_offset as i32);
        for (dest_row, row) in (start_row..start_row + amount as i32).enumerate() {
            let cells = self.row_cells(row);
            self.draw_row_into_delta(dest_row, &cells);
        }

        self.flush()
    }

    pub(crate) fn scroll_display_down(&mut self, mut amount: usize) -> Result<(), ProtocolError> {
        amount = amount.min(self.scroll_offset);
        if amount == 0 {
            return Ok(());
        }

        // Shift the visible content up; the exposed bottom band comes from
        // newer scrollback or the live buffer.
        if self.height > amount {
            self.delta.copy(0, 0, amount, 0, self.width, self.height - amount);
        }
        self.scroll_offset -= amount;

        let end_row = self.height as i32 - self.scroll_offset as i32 - 1;
        let start_row = end_row - amount as i32 + 1;
        let mut dest_row = self.height - amount;
        for row in start_row..=end_row {
            let cells = self.row_cells(row);
            self.draw_row_into_delta(dest_row, &cells);
            dest_row += 1;
        }

        self.flush()
    }

    pub(crate) fn resize(&mut self, width_px: usize, height_px: usize) -> Result<(), ProtocolError> {
        let width = (width_px / self.display.char_width).max(1);
        let height = (height_px / self.display.char_height).max(1);
        if width == self.width && height == self.height {
            return Ok(());
        }

        let ejected = self.buffer.resize(width, height, self.default_attributes);
        let dropped_rows = ejected.len();
        for row in ejected {
            self.scrollback.append_row(trim_trailing_blanks(&row));
        }
        self.width = width;
        self.height = height;
        self.scroll_offset = 0;
        self.scroll_start = 0;
        self.scroll_end = height - 1;
        // Content shifted up by the ejected rows; the cursor tracks it.
        self.cursor_row = self.cursor_row.saturating_sub(dropped_rows).min(height - 1);
        self.cursor_col = self.cursor_col.min(width - 1);
        self.delta.resize(width, height);

        self.display.send_display_size(width, height)?;
        self.mark_all_dirty();
        self.flush()
    }

    pub(crate) fn mark_all_dirty(&mut self) {
        for row in 0..self.height {
            for col in 0..self.width {
                let cell = *self.buffer.cell(row, col);
                self.delta.set_columns(row, col, col, cell);
            }
        }
    }

    pub(crate) fn commit_cursor(&mut self) -> Result<(), ProtocolError> {
        let new = (self.cursor_row, self.cursor_col);
        if let Some((row, col, _)) = self.committed_cursor {
            if (row, col) == new {
                return Ok(());
            }
        }

        // Restore the old cursor cell, but only if its contents were not
        // rewritten since; rewritten cells already lost the reversal.
        if let Some((row, col, cell)) = self.committed_cursor.take() {
            if row < self.height && col < self.width && *self.buffer.cell(row, col) == cell {
                self.toggle_reverse(row, col)?;
            }
        }

        self.toggle_reverse(new.0, new.1)?;
        self.committed_cursor = Some((new.0, new.1, *self.buffer.cell(new.0, new.1)));
        Ok(())
    }

    /* Selection */

    fn set_selected(&mut self, index: usize, selected: bool) {
        let cell = {
            let cell = self.buffer.cell_at_index_mut(index);
            cell.attributes.selected = selected;
            *cell
        };
        let row = index / self.width;
        let col = index % self.width;
        if row < self.delta.height() {
            self.delta.set(row, col, cell);
        }
    }

    pub(crate) fn select_start(&mut self, row: usize, col: usize) -> Result<(), ProtocolError> {
        let index = self.buffer.index(row, col);
        self.selection_start = index;
        self.selection_end = index;
        self.text_selected = true;
        self.set_selected(index, true);
        self.flush()
    }

    pub(crate) fn select_update(&mut self, row: usize, col: usize) -> Result<(), ProtocolError> {
        let new_end = self.buffer.index(row, col);
        if new_end == self.selection_end {
            return Ok(());
        }

        let start = self.selection_start;
        let (old_a, old_b) = ordered(start, self.selection_end);
        let (new_a, new_b) = ordered(start, new_end);
        let search_a = old_a.min(new_a);
        let search_b = old_b.max(new_b);

        // Flip exactly the symmetric difference of old and new selections.
        for index in search_a..=search_b {
            let now = (new_a..=new_b).contains(&index);
            let was = (old_a..=old_b).contains(&index);
            if now && !was {
                self.set_selected(index, true);
            } else if was && !now {
                self.set_selected(index, false);
            }
        }

        self.selection_end = new_end;
        self.flush()
    }

    pub(crate) fn select_end(&mut self) -> Result<(), ProtocolError> {
        let (a, b) = ordered(self.selection_start, self.selection_end);
        for index in a..=b {
            self.set_selected(index, false);
        }
        self.text_selected = false;
        self.flush()
    }

    pub(crate) fn selected_text(&self) -> String {
        if !self.text_selected {
            return String::new();
        }
        let (start, end) = ordered(self.selection_start, self.selection_end);
        let mut text = String::new();
        let mut index = start;
        while index <= end {
            let row = index / self.width;
            let row_start = row * self.width;
            let row_end = (row_start + self.width - 1).min(end);

            let cells: Vec<char> = (index..=row_end)
                .map(|i| self.buffer.cell(i / self.width, i % self.width).value)
                .collect();
            let trimmed: String = {
                let line: String = cells.iter().collect();
                line.trim_end().to_owned()
            };
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&trimmed);
            index = row_start + self.width;
        }
        text
    }
}

fn ordered(a: usize, b: usize) -> (usize, usize) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Scrollback rows store only meaningful content; trailing blanks in the
/// default background are dropped so rows are variable-width.
fn trim_trailing_blanks(row: &[Cell]) -> Vec<Cell> {
    let end = row
        .iter()
        .rposition(|cell| cell.value != ' ' || cell.attributes != DEFAULT_ATTRIBUTES)
        .map(|pos| pos + 1)
        .unwrap_or(0);
    row[..end].to_vec()
}
