//! Detection overlay.
//!
//! Draws a box per detection and a filled label tag carrying the class name. The
//! tag sits above the box when there are at least 3 px of headroom, otherwise just
//! inside the top edge. Box and tag colours come from a fixed 20-entry palette
//! indexed by the class's position in the class table; text is always white.
//!
//! Labels use a built-in 5x7 bitmap font scaled by the configured line width, so
//! overlays render identically on every host without font files.

use crate::classes::ClassTable;
use crate::frame::Frame;
use crate::inference::{BoundingBox, Detection};

pub const DEFAULT_LINE_WIDTH: u32 = 2;
/// Widest accepted line width; also caps the glyph scale.
pub const MAX_LINE_WIDTH: u32 = 16;
pub const TEXT_COLOR: [u8; 3] = [255, 255, 255];

/// Minimum headroom (px) above the box for the tag to be drawn outside it.
const TAG_HEADROOM: i64 = 3;
const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;

/// Overlay palette, RGB.
const PALETTE: [[u8; 3]; 20] = [
    [0xFF, 0x38, 0x38],
    [0xFF, 0x9D, 0x97],
    [0xFF, 0x70, 0x1F],
    [0xFF, 0xB2, 0x1D],
    [0xCF, 0xD2, 0x31],
    [0x48, 0xF9, 0x0A],
    [0x92, 0xCC, 0x17],
    [0x3D, 0xDB, 0x86],
    [0x1A, 0x93, 0x34],
    [0x00, 0xD4, 0xBB],
    [0x2C, 0x99, 0xA8],
    [0x00, 0xC2, 0xFF],
    [0x34, 0x45, 0x93],
    [0x64, 0x73, 0xFF],
    [0x00, 0x18, 0xEC],
    [0x84, 0x38, 0xFF],
    [0x52, 0x00, 0x85],
    [0xCB, 0x38, 0xFF],
    [0xFF, 0x95, 0xC8],
    [0xFF, 0x37, 0xC7],
];

/// Overlay colour for a class index.
pub fn palette_color(class_index: usize) -> [u8; 3] {
    PALETTE[class_index % PALETTE.len()]
}

/// Rendered `(width, height)` of a label at the given line width.
pub fn text_size(label: &str, line_width: u32) -> (u32, u32) {
    let scale = glyph_scale(line_width);
    let chars = u32::try_from(label.chars().count()).unwrap_or(u32::MAX);
    (
        chars.saturating_mul(GLYPH_ADVANCE * scale),
        GLYPH_HEIGHT * scale,
    )
}

fn glyph_scale(line_width: u32) -> u32 {
    line_width.clamp(1, MAX_LINE_WIDTH)
}

/// Where a label tag and its text go for one box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LabelTag {
    /// Tag rectangle, `top <= bottom`.
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
    /// Top-left corner of the first glyph.
    pub text_x: i64,
    pub text_y: i64,
    /// True when the tag sits above the box.
    pub above: bool,
}

/// Place a `w` x `h` label tag for a box.
///
/// Above: the tag spans `ymin - h - 3 ..= ymin`. Below: `ymin ..= ymin + h + 3`.
/// Text is left-aligned at `xmin` with its baseline 2 px inside the tag.
pub fn label_tag(bbox: &BoundingBox, w: u32, h: u32) -> LabelTag {
    let x = bbox.xmin as i64;
    let y = bbox.ymin as i64;
    let (w, h) = (w as i64, h as i64);
    let above = y - h >= TAG_HEADROOM;
    if above {
        LabelTag {
            left: x,
            top: y - h - TAG_HEADROOM,
            right: x + w,
            bottom: y,
            text_x: x,
            text_y: y - 2 - h,
            above,
        }
    } else {
        LabelTag {
            left: x,
            top: y,
            right: x + w,
            bottom: y + h + TAG_HEADROOM,
            text_x: x,
            text_y: y + 2,
            above,
        }
    }
}

/// A detection left off the overlay because its class is not in the table.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotationSkip {
    pub class: String,
}

/// Annotated copy of a frame plus the detections that could not be drawn.
#[derive(Clone, Debug)]
pub struct Annotated {
    pub frame: Frame,
    pub skipped: Vec<AnnotationSkip>,
}

#[derive(Clone, Debug)]
pub struct Annotator {
    line_width: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_WIDTH)
    }
}

impl Annotator {
    pub fn new(line_width: u32) -> Self {
        Self {
            line_width: line_width.clamp(1, MAX_LINE_WIDTH),
        }
    }

    /// Draw detections onto a copy of `frame`. The input is never modified.
    pub fn annotate(
        &self,
        frame: &Frame,
        detections: &[Detection],
        classes: &ClassTable,
    ) -> Annotated {
        let mut canvas = frame.clone();
        let mut skipped = Vec::new();

        for det in detections {
            let Some(index) = classes.index_of(&det.class) else {
                log::warn!(
                    "annotation skipped: class '{}' is not in the class table",
                    det.class
                );
                skipped.push(AnnotationSkip {
                    class: det.class.clone(),
                });
                continue;
            };
            let color = palette_color(index);

            draw_box(&mut canvas, &det.bbox, self.line_width, color);

            let (w, h) = text_size(&det.class, self.line_width);
            let tag = label_tag(&det.bbox, w, h);
            fill_rect(&mut canvas, tag.left, tag.top, tag.right, tag.bottom, color);
            draw_text(
                &mut canvas,
                tag.text_x,
                tag.text_y,
                &det.class,
                glyph_scale(self.line_width),
                TEXT_COLOR,
            );
        }

        Annotated {
            frame: canvas,
            skipped,
        }
    }
}

fn draw_box(frame: &mut Frame, bbox: &BoundingBox, thickness: u32, color: [u8; 3]) {
    let t = thickness as i64;
    let (x0, y0, x1, y1) = (
        bbox.xmin as i64,
        bbox.ymin as i64,
        bbox.xmax as i64,
        bbox.ymax as i64,
    );
    for offset in -(t / 2)..(t - t / 2) {
        let (l, r) = (x0 - offset, x1 + offset);
        let (top, bottom) = (y0 - offset, y1 + offset);
        if l > r || top > bottom {
            continue;
        }
        fill_rect(frame, l, top, r, top, color);
        fill_rect(frame, l, bottom, r, bottom, color);
        fill_rect(frame, l, top, l, bottom, color);
        fill_rect(frame, r, top, r, bottom, color);
    }
}

/// Fill an inclusive rectangle, clamped to the frame.
fn fill_rect(frame: &mut Frame, left: i64, top: i64, right: i64, bottom: i64, color: [u8; 3]) {
    if frame.width == 0 || frame.height == 0 {
        return;
    }
    let max_x = frame.width as i64 - 1;
    let max_y = frame.height as i64 - 1;
    let (left, right) = (left.clamp(0, max_x), right.clamp(0, max_x));
    let (top, bottom) = (top.clamp(0, max_y), bottom.clamp(0, max_y));
    for y in top..=bottom {
        for x in left..=right {
            frame.put_pixel(x, y, color);
        }
    }
}

fn draw_text(frame: &mut Frame, x: i64, y: i64, text: &str, scale: u32, color: [u8; 3]) {
    let scale = scale as i64;
    let mut pen_x = x;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        let px = pen_x + col as i64 * scale;
                        let py = y + row as i64 * scale;
                        for dy in 0..scale {
                            for dx in 0..scale {
                                frame.put_pixel(px + dx, py + dy, color);
                            }
                        }
                    }
                }
            }
        }
        pen_x += GLYPH_ADVANCE as i64 * scale;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
