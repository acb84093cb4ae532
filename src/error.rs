//! Error types returned by the detection pipeline.

use std::fmt;

use thiserror::Error;

use crate::detector::PipelineState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    /// The model file could not be loaded, or the warm-up inference failed.
    #[error("failed to load model '{model}'")]
    ModelLoad {
        model: String,
        #[source]
        source: BoxError,
    },

    /// An operation was invoked in a pipeline state that does not permit it.
    #[error("cannot {operation} while the detector is {state}")]
    InvalidState {
        operation: Operation,
        state: PipelineState,
    },

    /// The input frame has a zero width or height.
    #[error("invalid input frame dimensions {width}x{height}")]
    InputDimension { width: u32, height: u32 },

    /// The network produced outputs that don't match the expected tensor layout.
    #[error("unexpected inference output: {0}")]
    InferenceShape(String),

    /// The network failed while running inference on a frame.
    #[error("inference failed")]
    Inference(#[source] BoxError),

    /// A model parameter is out of its valid range.
    #[error("invalid value for parameter `{name}`: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: &'static str,
    },
}

impl Error {
    pub(crate) fn model_load(model: impl fmt::Display, source: anyhow::Error) -> Self {
        Self::ModelLoad {
            model: model.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Self::InferenceShape(msg.into())
    }
}

/// The pipeline operation that was rejected with [`Error::InvalidState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Load,
    Detect,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Load => "load model",
            Operation::Detect => "run detection",
        })
    }
}
