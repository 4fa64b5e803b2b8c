//! Overlay drawing on RGB frames.
//!
//! Boxes are drawn in the category colour with a depth/category label. The
//! legend is a column of swatches in the bottom-left corner, each followed by
//! the category name, its running count and a bar scaled by its share of the
//! session total. Text uses a built-in 5x7 bitmap font (upper case, digits
//! and a few symbols); lower case is drawn as upper case.

use crate::detect::BoundingBox;
use crate::frame::Frame;
use crate::record::{DetectionRecord, SessionStats};
use crate::severity::{CategoryTable, Rgb};

const SWATCH: u32 = 20;
const LEGEND_MARGIN: u32 = 10;
const LEGEND_ROW: u32 = 25;
const BAR_MAX: u32 = 120;
const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const GLYPH_ADVANCE: u32 = GLYPH_W + 1;
const LINE_HEIGHT: u32 = GLYPH_H + 3;
const LEGEND_TEXT: u32 = 20 * GLYPH_ADVANCE;
const INFO_SCALE: u32 = 2;
const WHITE: Rgb = [255, 255, 255];
const BLACK: Rgb = [0, 0, 0];

/// Outline thickness for a detection of the given confidence.
pub fn box_thickness(confidence: f32) -> u32 {
    ((confidence * 5.0) as u32).max(1)
}

/// Draw the record's box in its category colour.
pub fn draw_record(frame: &mut Frame, record: &DetectionRecord) {
    let bbox = record.detection.bbox.clipped(frame.width, frame.height);
    let thickness = box_thickness(record.detection.confidence);
    draw_rect(frame, &bbox, thickness, record.category.color);
}

/// Draw a rectangle outline; pixels outside the frame are skipped.
pub fn draw_rect(frame: &mut Frame, bbox: &BoundingBox, thickness: u32, color: Rgb) {
    let t = thickness as i32;
    for i in 0..t {
        let (x1, y1, x2, y2) = (bbox.x1 + i, bbox.y1 + i, bbox.x2 - i, bbox.y2 - i);
        if x1 > x2 || y1 > y2 {
            break;
        }
        for x in x1..=x2 {
            put(frame, x, y1, color);
            put(frame, x, y2, color);
        }
        for y in y1..=y2 {
            put(frame, x1, y, color);
            put(frame, x2, y, color);
        }
    }
}

/// Depth and category above the box, or below it when there is no room.
pub fn draw_label(frame: &mut Frame, record: &DetectionRecord) {
    let lines = [
        format!("{:.1}cm {}", record.depth_cm(), record.category.label()),
        format!("conf {:.2}", record.detection.confidence),
    ];
    let bbox = record.detection.bbox.clipped(frame.width, frame.height);
    let block_h = lines.len() as u32 * LINE_HEIGHT + 2;
    let block_w = lines.iter().map(|l| text_width(l, 1)).max().unwrap_or(0) + 4;
    let top = if bbox.y1 >= block_h as i32 {
        bbox.y1 - block_h as i32
    } else {
        bbox.y2 + 2
    };
    fill_rect(frame, bbox.x1, top, block_w, block_h, BLACK);
    for (i, line) in lines.iter().enumerate() {
        let y = top + 2 + (i as u32 * LINE_HEIGHT) as i32;
        draw_text(frame, bbox.x1 + 2, y, line, 1, WHITE);
    }
}

/// Frame position and detection counters in the top-left corner.
pub fn draw_frame_info(
    frame: &mut Frame,
    frame_index: u64,
    total_frames: Option<u64>,
    detections: usize,
    total_detections: u64,
) {
    let position = match total_frames {
        Some(total) => format!("Frame: {}/{}", frame_index, total),
        None => format!("Frame: {}", frame_index),
    };
    let lines = [
        position,
        format!("Detections: {}", detections),
        format!("Total: {}", total_detections),
    ];
    for (i, line) in lines.iter().enumerate() {
        let y = LEGEND_MARGIN + i as u32 * LINE_HEIGHT * INFO_SCALE;
        draw_text(frame, LEGEND_MARGIN as i32, y as i32, line, INFO_SCALE, WHITE);
    }
}

/// Pixel width of `text` at `scale`.
pub fn text_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        0
    } else {
        (n * GLYPH_ADVANCE - 1) * scale
    }
}

/// Draw `text` with its top-left corner at (`x`, `y`).
pub fn draw_text(frame: &mut Frame, x: i32, y: i32, text: &str, scale: u32, color: Rgb) {
    let scale = scale.max(1);
    let mut pen = x;
    for c in text.chars() {
        let rows = glyph(c.to_ascii_uppercase());
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) != 0 {
                    fill_rect(
                        frame,
                        pen + (col * scale) as i32,
                        y + (row as u32 * scale) as i32,
                        scale,
                        scale,
                        color,
                    );
                }
            }
        }
        pen += (GLYPH_ADVANCE * scale) as i32;
    }
}

fn glyph(c: char) -> [u8; 7] {
    match c {
        ' ' => [0; 7],
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
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

fn fill_rect(frame: &mut Frame, x: i32, y: i32, w: u32, h: u32, color: Rgb) {
    for yy in y..y + h as i32 {
        for xx in x..x + w as i32 {
            put(frame, xx, yy, color);
        }
    }
}

fn put(frame: &mut Frame, x: i32, y: i32, color: Rgb) {
    if x >= 0 && y >= 0 {
        frame.set_pixel(x as u32, y as u32, color);
    }
}

/// Draw the per-category legend for the current session.
pub fn draw_legend(frame: &mut Frame, table: &CategoryTable, stats: &SessionStats) {
    let rows = table.len() as i32;
    let top = frame.height as i32 - LEGEND_MARGIN as i32 - rows * LEGEND_ROW as i32;
    for (i, category) in table.iter().enumerate() {
        let y = top + i as i32 * LEGEND_ROW as i32;
        let x = LEGEND_MARGIN as i32;
        fill_rect(frame, x, y, SWATCH, SWATCH, category.color);
        draw_rect(
            frame,
            &BoundingBox {
                x1: x,
                y1: y,
                x2: x + SWATCH as i32 - 1,
                y2: y + SWATCH as i32 - 1,
            },
            1,
            WHITE,
        );
        let text_x = x + SWATCH as i32 + 5;
        let label = format!("{}: {}", category.label(), stats.count(&category.name));
        draw_text(
            frame,
            text_x,
            y + ((SWATCH - GLYPH_H) / 2) as i32,
            &label,
            1,
            WHITE,
        );
        let share = stats.percentage(&category.name) / 100.0;
        let bar = (share * BAR_MAX as f64).round() as u32;
        if bar > 0 {
            fill_rect(
                frame,
                text_x + LEGEND_TEXT as i32,
                y + SWATCH as i32 / 4,
                bar,
                SWATCH / 2,
                category.color,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::{DepthEstimator, DepthModel, Jitter};
    use crate::detect::Detection;
    use crate::record::RecordBuilder;

    fn record(x1: i32, y1: i32, x2: i32, y2: i32, confidence: f32) -> DetectionRecord {
        let mut builder = RecordBuilder::new(
            DepthEstimator::new(DepthModel::default(), Jitter::Disabled),
            CategoryTable::enhanced(),
        );
        let det = Detection::new(BoundingBox::new(x1, y1, x2, y2).unwrap(), confidence).unwrap();
        builder.build(det, 1280, 720).unwrap()
    }

    #[test]
    fn thickness_follows_confidence() {
        assert_eq!(box_thickness(0.1), 1);
        assert_eq!(box_thickness(0.45), 2);
        assert_eq!(box_thickness(0.8), 4);
        assert_eq!(box_thickness(1.0), 5);
    }

    #[test]
    fn box_drawn_in_category_colour() {
        let mut frame = Frame::filled(200, 100, [0, 0, 0]).unwrap();
        let rec = record(10, 10, 60, 40, 0.8);
        draw_record(&mut frame, &rec);
        let color = rec.category.color;
        assert_eq!(frame.pixel(10, 10), Some(color));
        assert_eq!(frame.pixel(13, 25), Some(color));
        assert_eq!(frame.pixel(60, 40), Some(color));
        // interior past the 4px outline stays untouched
        assert_eq!(frame.pixel(35, 25), Some([0, 0, 0]));
    }

    #[test]
    fn box_past_frame_edge_is_clipped() {
        let mut frame = Frame::filled(50, 50, [0, 0, 0]).unwrap();
        let rec = record(30, 30, 500, 500, 0.3);
        draw_record(&mut frame, &rec);
        assert_eq!(frame.pixel(30, 30), Some(rec.category.color));
        assert_eq!(frame.pixel(49, 49), Some(rec.category.color));
    }

    #[test]
    fn legend_bar_tracks_share() {
        let table = CategoryTable::enhanced();
        let rec = record(0, 0, 100, 50, 0.8);
        let mut stats = SessionStats::new(&table);
        stats.accumulate(&rec);

        let mut frame = Frame::filled(400, 300, [0, 0, 0]).unwrap();
        draw_legend(&mut frame, &table, &stats);

        let rows = table.len() as u32;
        let top = 300 - LEGEND_MARGIN - rows * LEGEND_ROW;
        let deep_row = table.iter().position(|c| c.name == "deep").unwrap() as u32;
        let y = top + deep_row * LEGEND_ROW + SWATCH / 2;
        let bar_x = LEGEND_MARGIN + SWATCH + 5 + LEGEND_TEXT;
        assert_eq!(frame.pixel(bar_x + BAR_MAX - 1, y), Some(rec.category.color));

        // other rows have an empty bar
        let y0 = top + SWATCH / 2;
        assert_eq!(frame.pixel(bar_x + 2, y0), Some([0, 0, 0]));
    }

    fn lit(frame: &Frame, x0: u32, y0: u32, w: u32, h: u32, color: Rgb) -> usize {
        let mut n = 0;
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                if frame.pixel(x, y) == Some(color) {
                    n += 1;
                }
            }
        }
        n
    }

    #[test]
    fn text_uses_bitmap_glyphs() {
        let mut frame = Frame::filled(40, 20, BLACK).unwrap();
        draw_text(&mut frame, 1, 1, "1", 1, WHITE);
        // '1' has a full-width foot on its last row and a 1px stem
        assert_eq!(lit(&frame, 1, 7, 5, 1, WHITE), 3);
        assert_eq!(frame.pixel(3, 4), Some(WHITE));
        assert_eq!(frame.pixel(1, 4), Some(BLACK));

        // lower case renders as upper case, scale doubles every pixel
        let mut a = Frame::filled(40, 20, BLACK).unwrap();
        let mut b = Frame::filled(40, 20, BLACK).unwrap();
        draw_text(&mut a, 0, 0, "cm", 2, WHITE);
        draw_text(&mut b, 0, 0, "CM", 2, WHITE);
        assert_eq!(a.pixels(), b.pixels());
        assert_eq!(text_width("CM", 2), 22);
        assert_eq!(text_width("", 1), 0);
    }

    #[test]
    fn label_sits_above_box_when_it_fits() {
        let mut frame = Frame::filled(400, 200, [50, 50, 50]).unwrap();
        let rec = record(100, 100, 200, 160, 0.9);
        draw_label(&mut frame, &rec);
        // black backing strip ends just above the box
        assert_eq!(frame.pixel(100, 99), Some(BLACK));
        assert!(lit(&frame, 100, 78, 100, 22, WHITE) > 0);
        assert_eq!(lit(&frame, 100, 100, 100, 60, WHITE), 0);

        // no room above: drawn below the box instead
        let mut frame = Frame::filled(400, 200, [50, 50, 50]).unwrap();
        let rec = record(100, 5, 200, 60, 0.9);
        draw_label(&mut frame, &rec);
        assert_eq!(frame.pixel(100, 62), Some(BLACK));
        assert!(lit(&frame, 100, 62, 100, 22, WHITE) > 0);
    }

    #[test]
    fn frame_info_and_legend_names_are_drawn() {
        let table = CategoryTable::enhanced();
        let stats = SessionStats::new(&table);
        let mut frame = Frame::filled(400, 300, BLACK).unwrap();
        draw_frame_info(&mut frame, 12, Some(40), 2, 7);
        assert!(lit(&frame, 10, 10, 200, 14, WHITE) > 0);
        assert!(lit(&frame, 10, 30, 200, 14, WHITE) > 0);
        assert!(lit(&frame, 10, 50, 200, 14, WHITE) > 0);

        draw_legend(&mut frame, &table, &stats);
        let top = 300 - LEGEND_MARGIN - table.len() as u32 * LEGEND_ROW;
        let text_x = LEGEND_MARGIN + SWATCH + 5;
        assert!(lit(&frame, text_x, top, LEGEND_TEXT, SWATCH, WHITE) > 0);
    }
}
