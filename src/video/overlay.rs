//! Status frames and overlays
//!
//! Renders the "No frames received" error frame and the staleness overlay
//! onto raw RGB24 buffers. Text uses an embedded 5x7 bitmap font scaled to
//! the output height, so rendering stays deterministic and free of any
//! system font lookup.

use std::time::Duration;

use bytes::Bytes;

pub const ERROR_MESSAGE: &str = "No frames received";

/// Padding around the staleness overlay text, in pixels.
const OVERLAY_PADDING: usize = 10;

/// Blend factor of the black overlay box: out = 0.7 * frame + 0.3 * black.
const OVERLAY_ALPHA_NUM: u16 = 7;
const OVERLAY_ALPHA_DEN: u16 = 10;

const GLYPH_W: usize = 5;
const GLYPH_H: usize = 7;

/// Row bitmaps (bit 4 = leftmost column) for the glyphs the status
/// messages use. Anything else renders as a blank cell.
fn glyph(c: char) -> [u8; GLYPH_H] {
    match c {
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'a' => [0x00, 0x00, 0x0E, 0x01, 0x0F, 0x11, 0x0F],
        'c' => [0x00, 0x00, 0x0E, 0x11, 0x10, 0x11, 0x0E],
        'd' => [0x01, 0x01, 0x0D, 0x13, 0x11, 0x13, 0x0D],
        'e' => [0x00, 0x00, 0x0E, 0x11, 0x1F, 0x10, 0x0E],
        'f' => [0x06, 0x09, 0x08, 0x1C, 0x08, 0x08, 0x08],
        'i' => [0x04, 0x00, 0x0C, 0x04, 0x04, 0x04, 0x0E],
        'm' => [0x00, 0x00, 0x1A, 0x15, 0x15, 0x15, 0x15],
        'o' => [0x00, 0x00, 0x0E, 0x11, 0x11, 0x11, 0x0E],
        'r' => [0x00, 0x00, 0x16, 0x19, 0x10, 0x10, 0x10],
        's' => [0x00, 0x00, 0x0F, 0x10, 0x0E, 0x01, 0x1E],
        'v' => [0x00, 0x00, 0x11, 0x11, 0x11, 0x0A, 0x04],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        _ => [0x00; GLYPH_H],
    }
}

/// Rendered width of `text` at the given integer scale, including one
/// glyph-column of spacing between characters.
fn text_width(text: &str, scale: usize) -> usize {
    let chars = text.chars().count();
    if chars == 0 {
        return 0;
    }
    (chars * (GLYPH_W + 1) - 1) * scale
}

fn text_height(scale: usize) -> usize {
    GLYPH_H * scale
}

/// Draws `text` in white at (x, y), clipped to the frame.
fn draw_text(frame: &mut [u8], width: u32, height: u32, x: usize, y: usize, text: &str, scale: usize) {
    let (fw, fh) = (width as usize, height as usize);
    let mut pen_x = x;

    for c in text.chars() {
        let rows = glyph(c);
        for (gy, row) in rows.iter().enumerate() {
            for gx in 0..GLYPH_W {
                if row & (0x10 >> gx) == 0 {
                    continue;
                }
                // Scale each font pixel to a scale x scale block.
                for dy in 0..scale {
                    let py = y + gy * scale + dy;
                    if py >= fh {
                        continue;
                    }
                    for dx in 0..scale {
                        let px = pen_x + gx * scale + dx;
                        if px >= fw {
                            continue;
                        }
                        let at = (py * fw + px) * 3;
                        frame[at] = 255;
                        frame[at + 1] = 255;
                        frame[at + 2] = 255;
                    }
                }
            }
        }
        pen_x += (GLYPH_W + 1) * scale;
    }
}

/// Font scale for the centered error message, proportional to the output
/// height (4 at 1080p).
fn error_text_scale(height: u32) -> usize {
    (height as usize / 270).max(2)
}

/// Font scale for the corner staleness overlay (3 at 1080p).
fn overlay_text_scale(height: u32) -> usize {
    (height as usize / 360).max(2)
}

/// Builds the black error frame with "No frames received" centered in
/// white. Byte-exact for a given resolution.
pub fn error_frame(width: u32, height: u32) -> Bytes {
    let mut frame = vec![0u8; width as usize * height as usize * 3];
    let scale = error_text_scale(height);

    let tw = text_width(ERROR_MESSAGE, scale);
    let th = text_height(scale);
    let x = (width as usize).saturating_sub(tw) / 2;
    let y = (height as usize).saturating_sub(th) / 2;

    draw_text(&mut frame, width, height, x, y, ERROR_MESSAGE, scale);
    Bytes::from(frame)
}

/// Label shown on frozen frames.
pub fn staleness_label(age: Duration) -> String {
    format!("No frames received for {:.1}s", age.as_secs_f64())
}

/// Composites the staleness overlay into the top-left corner of `frame`:
/// a semi-transparent black box sized to the label plus padding, then the
/// label in opaque white. The caller passes a per-tick copy; the buffered
/// frame itself is never touched.
pub fn apply_staleness_overlay(frame: &mut [u8], width: u32, height: u32, age: Duration) {
    let scale = overlay_text_scale(height);
    let label = staleness_label(age);

    let box_w = (text_width(&label, scale) + 2 * OVERLAY_PADDING).min(width as usize);
    let box_h = (text_height(scale) + 2 * OVERLAY_PADDING).min(height as usize);

    let fw = width as usize;
    for y in 0..box_h {
        let row = y * fw * 3;
        for b in &mut frame[row..row + box_w * 3] {
            *b = ((*b as u16 * OVERLAY_ALPHA_NUM) / OVERLAY_ALPHA_DEN) as u8;
        }
    }

    draw_text(
        frame,
        width,
        height,
        OVERLAY_PADDING,
        OVERLAY_PADDING,
        &label,
        scale,
    );
}
