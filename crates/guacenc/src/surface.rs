//! Premultiplied-RGBA pixel surface with Porter-Duff compositing.
//!
//! Drawing instructions carry a 4-bit channel mask over the region pairs
//! `{src & !dst, src & dst, dst & !src, dst & src}`; each mask maps to a
//! pair of blend factors applied per premultiplied channel:
//! `out = (src * fa + dst * fb) / 255`.

use crate::error::EncodeError;
use guac_proto::CompositeMode;

#[derive(Clone)]
pub struct Surface {
    width: usize,
    height: usize,
    /// Premultiplied RGBA, tightly packed.
    data: Vec<u8>,
}

/// Rectangle in surface coordinates. Constructed clipped; width or height
/// of zero means empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Rect {
        Rect {
            x,
            y,
            width: width.max(0),
            height: height.max(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Blend factors (applied to source and destination) for one composite
/// mode, each scaled by the relevant alpha at the pixel.
fn factors(mode: CompositeMode, src_alpha: u32, dst_alpha: u32) -> (u32, u32) {
    use CompositeMode::*;
    match mode {
        Src => (255, 0),
        Over => (255, 255 - src_alpha),
        In => (dst_alpha, 0),
        Out => (255 - dst_alpha, 0),
        Atop => (dst_alpha, 255 - src_alpha),
        ROver => (255 - dst_alpha, 255),
        RIn => (0, src_alpha),
        ROut => (0, 255 - src_alpha),
        RAtop => (src_alpha, 255 - dst_alpha),
        Xor => (255 - dst_alpha, 255 - src_alpha),
        Plus => (255, 255),
    }
}

fn blend(src: [u8; 4], dst: [u8; 4], mode: CompositeMode) -> [u8; 4] {
    let (fa, fb) = factors(mode, u32::from(src[3]), u32::from(dst[3]));
    let mut out = [0u8; 4];
    for channel in 0..4 {
        let value = (u32::from(src[channel]) * fa + u32::from(dst[channel]) * fb) / 255;
        out[channel] = value.min(255) as u8;
    }
    out
}

impl Surface {
    /// Allocates a transparent surface, failing (non-fatally to the
    /// process) on overflow-prone sizes.
    pub fn new(width: i32, height: i32) -> Result<Surface, EncodeError> {
        let (w, h) = (usize::try_from(width), usize::try_from(height));
        let (w, h) = match (w, h) {
            (Ok(w), Ok(h)) => (w, h),
            _ => return Err(EncodeError::SurfaceTooLarge { width, height }),
        };
        let size = w
            .checked_mul(h)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or(EncodeError::SurfaceTooLarge { width, height })?;
        Ok(Surface {
            width: w,
            height: h,
            data: vec![0; size],
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let offset = (y * self.width + x) * 4;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ]
    }

    /// Stores one premultiplied pixel verbatim.
    pub fn write_pixel(&mut self, x: usize, y: usize, value: [u8; 4]) {
        let offset = (y * self.width + x) * 4;
        self.data[offset..offset + 4].copy_from_slice(&value);
    }

    fn clip(&self, rect: Rect) -> Rect {
        let x0 = rect.x.max(0);
        let y0 = rect.y.max(0);
        let x1 = (rect.x + rect.width).min(self.width as i32);
        let y1 = (rect.y + rect.height).min(self.height as i32);
        Rect::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Composites a constant color over a rectangle. `color` is straight
    /// RGBA; premultiplication happens here.
    pub fn fill_rect(&mut self, rect: Rect, color: [u8; 4], mode: CompositeMode) {
        let clipped = self.clip(rect);
        if clipped.is_empty() {
            return;
        }
        let alpha = u32::from(color[3]);
        let src = [
            (u32::from(color[0]) * alpha / 255) as u8,
            (u32::from(color[1]) * alpha / 255) as u8,
            (u32::from(color[2]) * alpha / 255) as u8,
            color[3],
        ];
        for y in clipped.y..clipped.y + clipped.height {
            for x in clipped.x..clipped.x + clipped.width {
                let dst = self.pixel(x as usize, y as usize);
                self.write_pixel(x as usize, y as usize, blend(src, dst, mode));
            }
        }
    }

    /// Composites a rectangle of `src` at `(dst_x, dst_y)`, with an extra
    /// opacity multiplier in 0..=255. Source and destination must be
    /// distinct surfaces; same-surface copies go through a scratch surface
    /// at the call site.
    #[allow(clippy::too_many_arguments)]
    pub fn blit(
        &mut self,
        src: &Surface,
        src_rect: Rect,
        dst_x: i32,
        dst_y: i32,
        mode: CompositeMode,
        opacity: u8,
    ) {
        if src_rect.is_empty() || opacity == 0 {
            return;
        }
        for row in 0..src_rect.height {
            for col in 0..src_rect.width {
                let sx = src_rect.x + col;
                let sy = src_rect.y + row;
                if sx < 0 || sy < 0 || sx >= src.width as i32 || sy >= src.height as i32 {
                    continue;
                }
                let dx = dst_x + col;
                let dy = dst_y + row;
                if dx < 0 || dy < 0 || dx >= self.width as i32 || dy >= self.height as i32 {
                    continue;
                }
                let mut pixel = src.pixel(sx as usize, sy as usize);
                if opacity != 255 {
                    for channel in &mut pixel {
                        *channel = (u32::from(*channel) * u32::from(opacity) / 255) as u8;
                    }
                }
                let dst = self.pixel(dx as usize, dy as usize);
                self.write_pixel(dx as usize, dy as usize, blend(pixel, dst, mode));
            }
        }
    }

    /// Extracts a copy of a clipped rectangle, used as scratch space for
    /// overlapping same-surface copies.
    pub fn extract(&self, rect: Rect) -> Surface {
        let clipped = self.clip(rect);
        let mut out = Surface {
            width: clipped.width.max(0) as usize,
            height: clipped.height.max(0) as usize,
            data: vec![0; (clipped.width.max(0) * clipped.height.max(0) * 4) as usize],
        };
        for row in 0..clipped.height {
            for col in 0..clipped.width {
                let pixel = self.pixel((clipped.x + col) as usize, (clipped.y + row) as usize);
                out.write_pixel(col as usize, row as usize, pixel);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const HALF_GREEN: [u8; 4] = [0, 255, 0, 128];

    #[test]
    fn over_blends_against_opaque() {
        let mut surface = Surface::new(2, 2).unwrap();
        surface.fill_rect(Rect::new(0, 0, 2, 2), RED, CompositeMode::Over);
        surface.fill_rect(Rect::new(0, 0, 1, 1), HALF_GREEN, CompositeMode::Over);
        let blended = surface.pixel(0, 0);
        // Premultiplied: r = 255*(1-128/255), g = 128-ish.
        assert!(blended[0] > 120 && blended[0] < 132, "{blended:?}");
        assert!(blended[1] > 120 && blended[1] < 132);
        assert_eq!(blended[3], 255);
        assert_eq!(surface.pixel(1, 1), [255, 0, 0, 255]);
    }

    #[test]
    fn src_replaces_region_only() {
        let mut surface = Surface::new(2, 1).unwrap();
        surface.fill_rect(Rect::new(0, 0, 2, 1), RED, CompositeMode::Over);
        surface.fill_rect(Rect::new(0, 0, 1, 1), [0, 0, 0, 0], CompositeMode::Src);
        assert_eq!(surface.pixel(0, 0), [0, 0, 0, 0]);
        assert_eq!(surface.pixel(1, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn rout_clears_where_source_opaque() {
        let mut surface = Surface::new(1, 1).unwrap();
        surface.fill_rect(Rect::new(0, 0, 1, 1), RED, CompositeMode::Over);
        surface.fill_rect(Rect::new(0, 0, 1, 1), [0, 0, 255, 255], CompositeMode::ROut);
        // Fully opaque source leaves nothing of the destination.
        assert_eq!(surface.pixel(0, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn fills_clip_to_bounds() {
        let mut surface = Surface::new(2, 2).unwrap();
        surface.fill_rect(Rect::new(-5, -5, 100, 100), RED, CompositeMode::Over);
        assert_eq!(surface.pixel(1, 1), [255, 0, 0, 255]);
    }

    #[test]
    fn oversized_allocation_fails_cleanly() {
        assert!(Surface::new(i32::MAX, i32::MAX).is_err());
        assert!(Surface::new(-1, 4).is_err());
    }

    #[test]
    fn blit_applies_opacity() {
        let mut src = Surface::new(1, 1).unwrap();
        src.fill_rect(Rect::new(0, 0, 1, 1), [255, 255, 255, 255], CompositeMode::Over);
        let mut dst = Surface::new(1, 1).unwrap();
        dst.blit(&src, Rect::new(0, 0, 1, 1), 0, 0, CompositeMode::Over, 128);
        let pixel = dst.pixel(0, 0);
        assert!(pixel[3] > 120 && pixel[3] < 132, "{pixel:?}");
    }
}
