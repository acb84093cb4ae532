//! Hand detection on images and video frames.
//!
//! A [`HandDetector`] wraps a pretrained SSD-style object detection network. Frames are scaled to
//! a resolution the network's stride accepts, optionally mirrored, and run through the network.
//! The raw per-box class scores are reduced to the best class per box, filtered with non-maximum
//! suppression, and mapped back to pixel coordinates of the original frame.
//!
//! # Environment Variables
//!
//! * `HANDTRACK_MODEL_DIR`: Directory containing the packaged `.onnx` model files used by
//!   [`HandDetector::load_default`]. Defaults to `models` (relative to the working directory).
//!
//! [`HandDetector`]: detector::HandDetector
//! [`HandDetector::load_default`]: detector::HandDetector::load_default

use log::LevelFilter;

pub mod detection;
pub mod detector;
pub mod error;
pub mod image;
pub mod nn;
pub mod num;
pub mod params;
pub mod resolution;
pub mod timer;

pub use error::{Error, Result};

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = LevelFilter::Debug;
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .filter(Some("tract_onnx"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// The calling crate and `handtrack` will log at *debug* level, `tract` at *warn* level. The
/// `RUST_LOG` environment variable can be used to override this.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
