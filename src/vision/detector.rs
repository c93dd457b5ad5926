//! Detector trait and colour-threshold implementation

use crate::frame_source::Frame;
use crate::tracker::BoundingBox;
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::erode;
use imageproc::region_labelling::{connected_components, Connectivity};

const FOREGROUND: u8 = 255;

/// Per-frame object detector
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Vec<BoundingBox>;
}

/// Inclusive HSV window, hue on the 0..=180 scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| hsv[i] >= self.lower[i] && hsv[i] <= self.upper[i])
    }
}

/// Colour detector settings
#[derive(Debug, Clone, PartialEq)]
pub struct ColorDetectorConfig {
    /// A pixel belongs to the mask when any range contains it
    pub ranges: Vec<HsvRange>,
    pub erode_iterations: usize,
    /// Blobs with fewer pixels are dropped
    pub min_area: usize,
}

impl Default for ColorDetectorConfig {
    fn default() -> Self {
        Self {
            ranges: vec![
                // husk
                HsvRange::new([8, 50, 40], [30, 255, 255]),
                // exposed shell
                HsvRange::new([0, 0, 160], [40, 60, 255]),
            ],
            erode_iterations: 3,
            min_area: 1100,
        }
    }
}

/// Threshold, erode, and label 4-connected blobs
pub struct ColorDetector {
    config: ColorDetectorConfig,
}

impl ColorDetector {
    pub fn new(config: ColorDetectorConfig) -> Self {
        Self { config }
    }

    fn mask(&self, frame: &Frame) -> GrayImage {
        let width = frame.width as usize;
        GrayImage::from_fn(frame.width, frame.height, |x, y| {
            let i = (y as usize * width + x as usize) * 3;
            let px = &frame.pixels[i..i + 3];
            let hsv = rgb_to_hsv(px[0], px[1], px[2]);
            if self.config.ranges.iter().any(|r| r.contains(hsv)) {
                Luma([FOREGROUND])
            } else {
                Luma([0])
            }
        })
    }
}

impl Detector for ColorDetector {
    fn detect(&self, frame: &Frame) -> Vec<BoundingBox> {
        let width = frame.width as usize;
        let height = frame.height as usize;
        if frame.pixels.len() < width * height * 3 {
            tracing::warn!(
                width,
                height,
                len = frame.pixels.len(),
                "Frame buffer shorter than its dimensions"
            );
            return Vec::new();
        }

        let mut mask = self.mask(frame);
        // n passes of a 3x3 erosion equal one chessboard erosion of radius n
        if self.config.erode_iterations > 0 {
            let radius = u8::try_from(self.config.erode_iterations).unwrap_or(u8::MAX);
            mask = erode(&mask, Norm::LInf, radius);
        }

        let boxes: Vec<BoundingBox> = label_blobs(&mask)
            .into_iter()
            .filter(|blob| blob.area >= self.config.min_area)
            .map(|blob| {
                BoundingBox::new(
                    blob.min_x as f32,
                    blob.min_y as f32,
                    (blob.max_x + 1) as f32,
                    (blob.max_y + 1) as f32,
                    1.0,
                )
            })
            .collect();

        tracing::trace!(sequence = frame.sequence, detections = boxes.len(), "Detected blobs");
        boxes
    }
}

/// RGB to HSV with OpenCV's 8-bit scaling (H 0..=180, S and V 0..=255)
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { delta / max * 255.0 } else { 0.0 };
    let mut h = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    [(h / 2.0).round() as u8, s.round() as u8, v.round() as u8]
}

struct Blob {
    area: usize,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

/// 4-connected foreground regions in label order
fn label_blobs(mask: &GrayImage) -> Vec<Blob> {
    let labels = connected_components(mask, Connectivity::Four, Luma([0u8]));
    let mut blobs: Vec<Blob> = Vec::new();

    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if blobs.len() < label {
            blobs.resize_with(label, || Blob {
                area: 0,
                min_x: u32::MAX,
                min_y: u32::MAX,
                max_x: 0,
                max_y: 0,
            });
        }
        let blob = &mut blobs[label - 1];
        blob.area += 1;
        blob.min_x = blob.min_x.min(x);
        blob.min_y = blob.min_y.min(y);
        blob.max_x = blob.max_x.max(x);
        blob.max_y = blob.max_y.max(y);
    }
    blobs
}
