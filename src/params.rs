//! Detection parameters.

use std::{fmt, path::PathBuf, str::FromStr};

use crate::error::{Error, Result};

/// Selects which packaged network [`HandDetector::load_default`] loads.
///
/// [`HandDetector::load_default`]: crate::detector::HandDetector::load_default
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModelType {
    /// SSD with a MobileNetV2 feature extractor, trained on the egohands dataset.
    MobilenetV2,
    /// A custom ONNX model at the given path.
    Custom(PathBuf),
}

impl ModelType {
    /// Returns the file name of the packaged model, or the full path for [`ModelType::Custom`].
    pub fn file_name(&self) -> PathBuf {
        match self {
            ModelType::MobilenetV2 => PathBuf::from("ssdlite_mobilenetv2.onnx"),
            ModelType::Custom(path) => path.clone(),
        }
    }
}

impl Default for ModelType {
    fn default() -> Self {
        ModelType::MobilenetV2
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::MobilenetV2 => f.write_str("MobilenetV2"),
            ModelType::Custom(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Parses a model name; anything other than a known name is treated as a path to an ONNX file.
impl FromStr for ModelType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "MobilenetV2" | "mobilenetv2" => ModelType::MobilenetV2,
            path => ModelType::Custom(path.into()),
        })
    }
}

/// Parameters controlling preprocessing and post-processing of detections.
///
/// The parameters in effect are captured at the start of each
/// [`HandDetector::detect`](crate::detector::HandDetector::detect) call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParameters {
    /// Mirror the input before inference. Output coordinates are mapped back to the unmirrored
    /// frame.
    pub flip_horizontal: bool,
    /// The network's output stride. The resized input is aligned so that it is 1 modulo this.
    pub output_stride: u32,
    /// Factor in `(0, 1]` to downscale the input by before stride alignment.
    pub image_scale_factor: f32,
    /// Maximum number of detections returned per frame.
    pub max_num_boxes: usize,
    /// Intersection-over-union threshold above which two boxes are considered duplicates.
    pub iou_threshold: f32,
    /// Minimum confidence for a detection to be returned.
    pub score_threshold: f32,
    pub model_type: ModelType,
}

impl ModelParameters {
    pub const DEFAULT_OUTPUT_STRIDE: u32 = 16;
    pub const DEFAULT_IMAGE_SCALE_FACTOR: f32 = 0.7;
    pub const DEFAULT_MAX_NUM_BOXES: usize = 20;
    pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;
    pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.99;

    pub fn with_flip_horizontal(mut self, flip: bool) -> Self {
        self.flip_horizontal = flip;
        self
    }

    pub fn with_output_stride(mut self, stride: u32) -> Self {
        self.output_stride = stride;
        self
    }

    pub fn with_image_scale_factor(mut self, scale: f32) -> Self {
        self.image_scale_factor = scale;
        self
    }

    pub fn with_max_num_boxes(mut self, max: usize) -> Self {
        self.max_num_boxes = max;
        self
    }

    pub fn with_iou_threshold(mut self, thresh: f32) -> Self {
        self.iou_threshold = thresh;
        self
    }

    pub fn with_score_threshold(mut self, thresh: f32) -> Self {
        self.score_threshold = thresh;
        self
    }

    pub fn with_model_type(mut self, model_type: ModelType) -> Self {
        self.model_type = model_type;
        self
    }

    /// Checks that all parameters are in their valid ranges.
    pub fn validate(&self) -> Result<()> {
        fn unit_interval(name: &'static str, value: f32) -> Result<()> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(Error::InvalidParameter {
                    name,
                    reason: "must be between 0.0 and 1.0",
                })
            }
        }

        if self.output_stride == 0 {
            return Err(Error::InvalidParameter {
                name: "output_stride",
                reason: "must be at least 1",
            });
        }
        if !(self.image_scale_factor > 0.0 && self.image_scale_factor <= 1.0) {
            return Err(Error::InvalidParameter {
                name: "image_scale_factor",
                reason: "must be greater than 0.0 and at most 1.0",
            });
        }
        if self.max_num_boxes == 0 {
            return Err(Error::InvalidParameter {
                name: "max_num_boxes",
                reason: "must be at least 1",
            });
        }
        unit_interval("iou_threshold", self.iou_threshold)?;
        unit_interval("score_threshold", self.score_threshold)?;
        Ok(())
    }

    /// Returns a copy of `self` with every field set in `update` replaced.
    pub fn merged(&self, update: ParameterUpdate) -> Self {
        let ParameterUpdate {
            flip_horizontal,
            output_stride,
            image_scale_factor,
            max_num_boxes,
            iou_threshold,
            score_threshold,
            model_type,
        } = update;

        Self {
            flip_horizontal: flip_horizontal.unwrap_or(self.flip_horizontal),
            output_stride: output_stride.unwrap_or(self.output_stride),
            image_scale_factor: image_scale_factor.unwrap_or(self.image_scale_factor),
            max_num_boxes: max_num_boxes.unwrap_or(self.max_num_boxes),
            iou_threshold: iou_threshold.unwrap_or(self.iou_threshold),
            score_threshold: score_threshold.unwrap_or(self.score_threshold),
            model_type: model_type.unwrap_or_else(|| self.model_type.clone()),
        }
    }
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            flip_horizontal: true,
            output_stride: Self::DEFAULT_OUTPUT_STRIDE,
            image_scale_factor: Self::DEFAULT_IMAGE_SCALE_FACTOR,
            max_num_boxes: Self::DEFAULT_MAX_NUM_BOXES,
            iou_threshold: Self::DEFAULT_IOU_THRESHOLD,
            score_threshold: Self::DEFAULT_SCORE_THRESHOLD,
            model_type: ModelType::default(),
        }
    }
}

/// A partial update of [`ModelParameters`].
///
/// Fields left at `None` keep their current value when the update is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterUpdate {
    pub flip_horizontal: Option<bool>,
    pub output_stride: Option<u32>,
    pub image_scale_factor: Option<f32>,
    pub max_num_boxes: Option<usize>,
    pub iou_threshold: Option<f32>,
    pub score_threshold: Option<f32>,
    pub model_type: Option<ModelType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let params = ModelParameters::default();
        assert!(params.flip_horizontal);
        assert_eq!(params.output_stride, 16);
        assert_eq!(params.image_scale_factor, 0.7);
        assert_eq!(params.max_num_boxes, 20);
        assert_eq!(params.iou_threshold, 0.5);
        assert_eq!(params.score_threshold, 0.99);
        assert_eq!(params.model_type, ModelType::MobilenetV2);
        params.validate().unwrap();
    }

    #[test]
    fn merge_overrides_only_given_fields() {
        let params = ModelParameters::default();
        let merged = params.merged(ParameterUpdate {
            score_threshold: Some(0.6),
            flip_horizontal: Some(false),
            ..Default::default()
        });

        assert_eq!(
            merged,
            ModelParameters {
                score_threshold: 0.6,
                flip_horizontal: false,
                ..ModelParameters::default()
            }
        );
        assert_eq!(params.merged(ParameterUpdate::default()), params);
    }

    #[test]
    fn validation() {
        let invalid = [
            ModelParameters::default().with_output_stride(0),
            ModelParameters::default().with_image_scale_factor(0.0),
            ModelParameters::default().with_image_scale_factor(1.5),
            ModelParameters::default().with_image_scale_factor(f32::NAN),
            ModelParameters::default().with_max_num_boxes(0),
            ModelParameters::default().with_iou_threshold(-0.1),
            ModelParameters::default().with_score_threshold(1.01),
        ];
        for params in invalid {
            match params.validate() {
                Err(Error::InvalidParameter { .. }) => {}
                other => panic!("expected invalid parameter for {params:?}, got {other:?}"),
            }
        }

        ModelParameters::default()
            .with_image_scale_factor(1.0)
            .with_iou_threshold(0.0)
            .with_score_threshold(1.0)
            .validate()
            .unwrap();
    }

    #[test]
    fn parse_model_type() {
        assert_eq!(
            "MobilenetV2".parse::<ModelType>().unwrap(),
            ModelType::MobilenetV2
        );
        assert_eq!(
            "models/hands.onnx".parse::<ModelType>().unwrap(),
            ModelType::Custom("models/hands.onnx".into())
        );
    }
}
