//! Vision - Pixel-level detection and frame annotation
//!
//! - `detector`: `Detector` trait and the HSV colour-segmentation detector
//! - `annotation`: draws tracked boxes and the trigger line, encodes JPEG

mod annotation;
mod detector;

pub use annotation::FrameAnnotator;
pub use detector::{ColorDetector, ColorDetectorConfig, Detector, HsvRange};
