use crate::{
    detection::{BoundingBox, Detection},
    labels::ClassLabels,
};
use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

pub const PERSON_LABEL: &str = "person";
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const BOX_THICKNESS: u32 = 2;

/// Draws a box for every detection labelled exactly `person` and returns how many were drawn.
pub fn annotate_persons(
    image: &mut RgbImage,
    detections: &[Detection],
    labels: &ClassLabels,
) -> usize {
    let mut person_count = 0;
    for detection in detections {
        if labels.get(detection.class_id) != Some(PERSON_LABEL) {
            continue;
        }
        person_count += 1;
        draw_box(image, &detection.bbox);
    }
    person_count
}

/// Truncates both corners toward zero and orders them.
///
/// The span is clamped to one stroke width past each image edge: everything beyond is
/// invisible, and it keeps the rectangle arithmetic far from `i32` limits.
fn span(a: f32, b: f32, extent: u32) -> (i32, u32) {
    let margin = BOX_THICKNESS as i64;
    let max = (extent as i64 - 1 + margin).min(i32::MAX as i64 / 2);
    let a = (a as i64).clamp(-margin, max);
    let b = (b as i64).clamp(-margin, max);
    let (start, end) = (a.min(b), a.max(b));
    (start as i32, (end - start + 1) as u32)
}

/// Corners are truncated toward zero and treated as inclusive. Strokes grow inward.
pub fn draw_box(image: &mut RgbImage, bbox: &BoundingBox) {
    let (left, width) = span(bbox.x1, bbox.x2, image.width());
    let (top, height) = span(bbox.y1, bbox.y2, image.height());

    for inset in 0..BOX_THICKNESS {
        if width <= 2 * inset || height <= 2 * inset {
            break;
        }
        let offset = inset as i32;
        let rect = Rect::at(left + offset, top + offset)
            .of_size(width - 2 * inset, height - 2 * inset);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }
}
