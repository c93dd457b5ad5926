//! Draw tracked objects and the trigger line, then JPEG-encode

use crate::error::{Error, Result};
use crate::frame_source::Frame;
use crate::tracker::{TrackedObject, TriggerAxis, TriggerLine};
use image::{codecs::jpeg::JpegEncoder, Rgb, RgbImage};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const COUNTED_COLOR: Rgb<u8> = Rgb([0, 160, 255]);

/// Produces the compressed image sent with every frame message
#[derive(Debug, Clone)]
pub struct FrameAnnotator {
    quality: u8,
}

impl FrameAnnotator {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn annotate(
        &self,
        frame: &Frame,
        objects: &[&TrackedObject],
        trigger: TriggerLine,
    ) -> Result<Vec<u8>> {
        let mut image = RgbImage::from_raw(frame.width, frame.height, frame.pixels.clone())
            .ok_or_else(|| {
                Error::Encode(format!(
                    "frame {} does not match {}x{}",
                    frame.sequence, frame.width, frame.height
                ))
            })?;

        for object in objects {
            let color = if object.counted { COUNTED_COLOR } else { BOX_COLOR };
            draw_rectangle(
                &mut image,
                object.bbox.x1.round() as i32,
                object.bbox.y1.round() as i32,
                object.bbox.x2.round() as i32,
                object.bbox.y2.round() as i32,
                color,
            );
        }
        draw_trigger_line(&mut image, trigger);

        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, self.quality)
            .encode_image(&image)
            .map_err(|e| Error::Encode(format!("JPEG encode failed: {e}")))?;
        Ok(buffer)
    }
}

fn put(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_rectangle(image: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, color: Rgb<u8>) {
    for x in x1..=x2 {
        put(image, x, y1, color);
        put(image, x, y2, color);
    }
    for y in y1..=y2 {
        put(image, x1, y, color);
        put(image, x2, y, color);
    }
}

fn draw_trigger_line(image: &mut RgbImage, trigger: TriggerLine) {
    let position = trigger.position.round() as i32;
    match trigger.axis {
        TriggerAxis::Horizontal => {
            for x in 0..image.width() as i32 {
                put(image, x, position, LINE_COLOR);
                put(image, x, position + 1, LINE_COLOR);
            }
        }
        TriggerAxis::Vertical => {
            for y in 0..image.height() as i32 {
                put(image, position, y, LINE_COLOR);
                put(image, position + 1, y, LINE_COLOR);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{BoundingBox, CrossingDirection, Point};

    fn blank(width: u32, height: u32) -> Frame {
        Frame {
            width,
            height,
            pixels: vec![0; (width * height * 3) as usize],
            sequence: 7,
        }
    }

    #[test]
    fn test_annotate_produces_jpeg() {
        let object = TrackedObject {
            id: 0,
            centroid: Point { x: 20.0, y: 20.0 },
            previous_centroid: Point { x: 20.0, y: 20.0 },
            bbox: BoundingBox::around(20.0, 20.0, 10.0, 10.0),
            age_since_seen: 0,
            counted: false,
        };
        let jpeg = FrameAnnotator::new(50)
            .annotate(
                &blank(64, 48),
                &[&object],
                TriggerLine::horizontal(30.0, CrossingDirection::Increasing),
            )
            .unwrap();
        // SOI marker
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_mismatched_buffer_is_encode_error() {
        let mut frame = blank(8, 8);
        frame.pixels.truncate(10);
        let result = FrameAnnotator::new(50).annotate(
            &frame,
            &[],
            TriggerLine::vertical(4.0, CrossingDirection::Increasing),
        );
        assert!(matches!(result, Err(Error::Encode(_))));
    }

    #[test]
    fn test_trigger_line_drawn() {
        let mut image = RgbImage::new(10, 10);
        draw_trigger_line(
            &mut image,
            TriggerLine::horizontal(4.0, CrossingDirection::Increasing),
        );
        assert_eq!(*image.get_pixel(3, 4), LINE_COLOR);
        assert_eq!(*image.get_pixel(3, 6), Rgb([0, 0, 0]));
    }
}
