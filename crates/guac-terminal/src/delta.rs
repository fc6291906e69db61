//! The delta engine: coalesces pending per-cell operations into a minimal
//! set of rectangular draw instructions.
//!
//! Between flushes, terminal mutations annotate cells with `Set` or `Copy`
//! operations; untouched cells stay `Nop`. A flush walks the grid three
//! times, strictly in this order: translated-block copies first, then
//! same-color space runs as filled rectangles, then individual glyphs via
//! the glyph cache.

use crate::display::TerminalDisplay;
use crate::types::Cell;
use guac_proto::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Nop,
    /// Cell contents moved from the given source cell position.
    Copy { row: usize, col: usize },
    /// Cell contents replaced outright.
    Set(Cell),
}

pub struct Delta {
    width: usize,
    height: usize,
    ops: Vec<Op>,
    /// Aliasing-safe snapshot used by rectangular copies.
    scratch: Vec<Op>,
}

impl Delta {
    pub fn new(width: usize, height: usize) -> Delta {
        Delta {
            width,
            height,
            ops: vec![Op::Nop; width * height],
            scratch: vec![Op::Nop; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn op(&self, row: usize, col: usize) -> Op {
        self.ops[row * self.width + col]
    }

    /// True when no operation is pending.
    pub fn is_clean(&self) -> bool {
        self.ops.iter().all(|op| *op == Op::Nop)
    }

    pub fn set(&mut self, row: usize, col: usize, cell: Cell) {
        self.ops[row * self.width + col] = Op::Set(cell);
    }

    /// Marks a run of cells within one row, cell-granular.
    pub fn set_columns(&mut self, row: usize, start_col: usize, end_col: usize, cell: Cell) {
        for col in start_col..=end_col.min(self.width - 1) {
            self.ops[row * self.width + col] = Op::Set(cell);
        }
    }

    pub fn set_rect(&mut self, row: usize, col: usize, width: usize, height: usize, cell: Cell) {
        for r in row..(row + height).min(self.height) {
            for c in col..(col + width).min(self.width) {
                self.ops[r * self.width + c] = Op::Set(cell);
            }
        }
    }

    /// Annotates a rectangle as copied from elsewhere in the grid. Cells
    /// whose source already carries a pending operation inherit that
    /// operation instead of layering a copy on a copy.
    pub fn copy(
        &mut self,
        dst_row: usize,
        dst_col: usize,
        src_row: usize,
        src_col: usize,
        width: usize,
        height: usize,
    ) {
        self.scratch.copy_from_slice(&self.ops);
        for r in 0..height {
            for c in 0..width {
                let src = self.scratch[(src_row + r) * self.width + (src_col + c)];
                let dst = &mut self.ops[(dst_row + r) * self.width + (dst_col + c)];
                *dst = match src {
                    Op::Nop => Op::Copy {
                        row: src_row + r,
                        col: src_col + c,
                    },
                    pending => pending,
                };
            }
        }
    }

    /// Rebuilds the grid for a new size. All pending state is discarded;
    /// the caller is responsible for re-marking cells from the buffer.
    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.ops = vec![Op::Nop; width * height];
        self.scratch = vec![Op::Nop; width * height];
    }

    /// Flushes all pending operations as instructions. Afterwards the grid
    /// is entirely `Nop`.
    pub fn flush(&mut self, display: &mut TerminalDisplay) -> Result<(), ProtocolError> {
        self.flush_copies(display)?;
        self.flush_clears(display)?;
        self.flush_sets(display)
    }

    /// Pass 1: greedy maximal rectangles of translated-block copies.
    fn flush_copies(&mut self, display: &TerminalDisplay) -> Result<(), ProtocolError> {
        for row in 0..self.height {
            for col in 0..self.width {
                let Op::Copy {
                    row: src_row,
                    col: src_col,
                } = self.ops[row * self.width + col]
                else {
                    continue;
                };

                let (rect_width, rect_height) =
                    self.grow_rect(row, col, |r, c, dr, dc| {
                        self.ops[r * self.width + c]
                            == Op::Copy {
                                row: src_row + dr,
                                col: src_col + dc,
                            }
                    });

                // Consume exactly the cells that belong to the translated
                // block.
                for dr in 0..rect_height {
                    for dc in 0..rect_width {
                        let index = (row + dr) * self.width + (col + dc);
                        if self.ops[index]
                            == (Op::Copy {
                                row: src_row + dr,
                                col: src_col + dc,
                            })
                        {
                            self.ops[index] = Op::Nop;
                        }
                    }
                }

                display.copy_cells(src_row, src_col, rect_width, rect_height, row, col)?;
            }
        }
        Ok(())
    }

    /// Pass 2: maximal rectangles of spaces sharing an effective background.
    fn flush_clears(&mut self, display: &TerminalDisplay) -> Result<(), ProtocolError> {
        for row in 0..self.height {
            for col in 0..self.width {
                let Op::Set(anchor) = self.ops[row * self.width + col] else {
                    continue;
                };
                if anchor.value != ' ' {
                    continue;
                }
                let color = anchor.attributes.rendered_background();

                let (rect_width, rect_height) = self.grow_rect(row, col, |r, c, _, _| {
                    matches!(
                        self.ops[r * self.width + c],
                        Op::Set(cell)
                            if cell.value == ' '
                                && cell.attributes.rendered_background() == color
                    )
                });

                for dr in 0..rect_height {
                    for dc in 0..rect_width {
                        let index = (row + dr) * self.width + (col + dc);
                        if matches!(
                            self.ops[index],
                            Op::Set(cell)
                                if cell.value == ' '
                                    && cell.attributes.rendered_background() == color
                        ) {
                            self.ops[index] = Op::Nop;
                        }
                    }
                }

                display.fill_cells(row, col, rect_width, rect_height, color)?;
            }
        }
        Ok(())
    }

    /// Pass 3: everything left is drawn glyph by glyph through the cache.
    fn flush_sets(&mut self, display: &mut TerminalDisplay) -> Result<(), ProtocolError> {
        for row in 0..self.height {
            for col in 0..self.width {
                let Op::Set(cell) = self.ops[row * self.width + col] else {
                    continue;
                };
                display.set_colors(&cell.attributes)?;
                display.draw_glyph(row, col, cell.value)?;
                self.ops[row * self.width + col] = Op::Nop;
            }
        }
        Ok(())
    }

    /// Determines the maximal rectangle anchored at `(row, col)` whose
    /// every cell at offset `(dr, dc)` satisfies `matches`. The first row
    /// fixes the right bound; later rows are accepted while they reach at
    /// least that bound.
    fn grow_rect(
        &self,
        row: usize,
        col: usize,
        matches: impl Fn(usize, usize, usize, usize) -> bool,
    ) -> (usize, usize) {
        let mut detected_right: Option<usize> = None;
        let mut detected_bottom = row;

        for rect_row in row..self.height {
            let mut rect_col = col;
            while rect_col < self.width && matches(rect_row, rect_col, rect_row - row, rect_col - col)
            {
                rect_col += 1;
            }
            // Row too narrow to extend the rectangle.
            if rect_col == col || rect_col - 1 < detected_right.unwrap_or(0) {
                break;
            }
            detected_bottom = rect_row;
            if detected_right.is_none() {
                detected_right = Some(rect_col - 1);
            }
        }

        let right = detected_right.unwrap_or(col);
        (right - col + 1, detected_bottom - row + 1)
    }
}
