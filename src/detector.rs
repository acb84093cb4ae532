//! The hand detection pipeline.

use std::{fmt, time::Instant};

use crate::{
    detection::{
        nms::{BoundingBox, NonMaxSuppression},
        reduce_scores, to_pixel_box, unmirror_pixel_box, Detection,
    },
    error::{Error, Operation, Result},
    image::Frame,
    nn::{tensor::Tensor, Model, ModelLoader, OnnxLoader, Outputs},
    params::{ModelParameters, ParameterUpdate},
    resolution::Resolution,
    timer::{fps_from_elapsed, Timer},
};

/// Input shape used for the warm-up pass of models without a fixed input shape.
pub const DEFAULT_WARMUP_SHAPE: [usize; 4] = [1, 300, 300, 3];

/// Lifecycle state of a [`HandDetector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No model has been loaded yet.
    Unloaded,
    /// The model is being loaded and warmed up.
    Loading,
    /// The model is loaded; detection is possible.
    Ready,
    /// Loading the model failed. This state is terminal.
    LoadFailed,
    /// The model was released by [`HandDetector::dispose`]. This state is terminal.
    Disposed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineState::Unloaded => "unloaded",
            PipelineState::Loading => "loading",
            PipelineState::Ready => "ready",
            PipelineState::LoadFailed => "in a failed state",
            PipelineState::Disposed => "disposed",
        })
    }
}

enum State {
    Unloaded,
    Loading,
    Ready(Box<dyn Model>),
    LoadFailed,
    Disposed,
}

impl State {
    fn tag(&self) -> PipelineState {
        match self {
            State::Unloaded => PipelineState::Unloaded,
            State::Loading => PipelineState::Loading,
            State::Ready(_) => PipelineState::Ready,
            State::LoadFailed => PipelineState::LoadFailed,
            State::Disposed => PipelineState::Disposed,
        }
    }
}

/// Detects hands in frames using an SSD object detection network.
///
/// A detector starts out [`PipelineState::Unloaded`]. After a successful [`HandDetector::load`] it
/// can process any number of frames with [`HandDetector::detect`] until it is disposed.
///
/// Calls to `detect` are serialized by taking `&mut self`. Parameter changes apply to the next
/// call.
pub struct HandDetector {
    params: ModelParameters,
    state: State,
    fps: u32,
    nms: NonMaxSuppression,
    t_preprocess: Timer,
    t_infer: Timer,
    t_nms: Timer,
}

impl HandDetector {
    /// Creates an unloaded detector with the given parameters.
    pub fn new(params: ModelParameters) -> Self {
        Self {
            nms: NonMaxSuppression::new(params.max_num_boxes),
            params,
            state: State::Unloaded,
            fps: 0,
            t_preprocess: Timer::new("preprocess"),
            t_infer: Timer::new("infer"),
            t_nms: Timer::new("nms"),
        }
    }

    /// Creates a detector and loads the packaged model selected by `params.model_type`.
    ///
    /// Models are loaded with [`OnnxLoader::from_env`].
    pub fn load_default(params: ModelParameters) -> Result<Self> {
        let mut detector = Self::new(params);
        detector.load(&OnnxLoader::from_env())?;
        Ok(detector)
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.state.tag()
    }

    /// Loads the model through `loader` and runs a warm-up inference pass.
    ///
    /// The warm-up runs the network once on a zero-filled input, so that any one-time setup cost
    /// of the inference engine is paid here instead of on the first frame.
    ///
    /// Only valid in the [`PipelineState::Unloaded`] state. If loading or the warm-up fails, the
    /// detector moves to [`PipelineState::LoadFailed`] and [`Error::ModelLoad`] is returned.
    pub fn load<L: ModelLoader + ?Sized>(&mut self, loader: &L) -> Result<()> {
        match self.state {
            State::Unloaded => {}
            _ => {
                return Err(Error::InvalidState {
                    operation: Operation::Load,
                    state: self.state(),
                })
            }
        }

        self.params.validate()?;
        let model_type = self.params.model_type.clone();
        self.state = State::Loading;
        log::debug!("loading hand detection model {}", model_type);

        let result = loader.load(&model_type).and_then(|model| {
            let shape = model.input_shape().unwrap_or(DEFAULT_WARMUP_SHAPE);
            let start = Instant::now();
            model.run(&Tensor::zeros(&shape))?;
            log::debug!("warm-up on {:?} took {:?}", shape, start.elapsed());
            Ok(model)
        });

        match result {
            Ok(model) => {
                self.state = State::Ready(model);
                Ok(())
            }
            Err(e) => {
                log::error!("failed to load model {}: {:#}", model_type, e);
                self.state = State::LoadFailed;
                Err(Error::model_load(model_type, e))
            }
        }
    }

    /// Releases the loaded model.
    ///
    /// Afterwards, [`HandDetector::detect`] fails with [`Error::InvalidState`]. Disposing a
    /// detector more than once has no effect.
    pub fn dispose(&mut self) {
        if let State::Ready(_) = self.state {
            log::debug!("disposing hand detection model");
        }
        self.state = State::Disposed;
    }

    /// Returns the current parameters.
    pub fn parameters(&self) -> &ModelParameters {
        &self.params
    }

    /// Applies a partial parameter update.
    ///
    /// Fields not set in `update` are kept. If the merged parameters are invalid, they are
    /// rejected and the current parameters stay in effect. Changing the model type has no effect
    /// on an already loaded model.
    pub fn set_parameters(&mut self, update: ParameterUpdate) -> Result<()> {
        let params = self.params.merged(update);
        params.validate()?;
        self.nms.set_max_output(params.max_num_boxes);
        self.params = params;
        Ok(())
    }

    /// Returns the frame rate derived from the most recent successful [`HandDetector::detect`]
    /// call, or 0 if there was none.
    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Returns the per-stage timers of the detection pipeline.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_preprocess, &self.t_infer, &self.t_nms].into_iter()
    }

    /// Detects hands in `frame`.
    ///
    /// Returns the detections in descending score order, with bounding boxes in pixel coordinates
    /// of `frame`.
    pub fn detect<F: Frame + ?Sized>(&mut self, frame: &F) -> Result<Vec<Detection>> {
        let start = Instant::now();
        let model = match &self.state {
            State::Ready(model) => model,
            state => {
                return Err(Error::InvalidState {
                    operation: Operation::Detect,
                    state: state.tag(),
                })
            }
        };

        let params = &self.params;
        let res = frame.resolution();
        if res.is_empty() {
            return Err(Error::InputDimension {
                width: res.width(),
                height: res.height(),
            });
        }

        let target = input_resolution(res, params);
        let input = self
            .t_preprocess
            .time(|| frame.to_tensor(target, params.flip_horizontal));
        let outputs = self
            .t_infer
            .time(|| model.run(&input))
            .map_err(|e| Error::Inference(e.into()))?;
        drop(input);

        let raw = RawOutput::extract(outputs)?;
        log::trace!(
            "{} candidate boxes with {} classes for {} input",
            raw.num_boxes,
            raw.num_classes,
            target
        );

        let reduced = reduce_scores(&raw.scores, raw.num_boxes, raw.num_classes);
        self.nms.set_iou_thresh(params.iou_threshold);
        self.nms.set_score_thresh(params.score_threshold);
        let guard = self.t_nms.start();
        let selected = self.nms.process(&raw.boxes, &reduced.max_scores);
        drop(guard);

        let detections = selected
            .iter()
            .map(|&i| {
                let class = u32::try_from(reduced.best_classes[i]).map_err(|_| {
                    Error::shape(format!("box {i} was selected but has no class scores"))
                })?;
                let mut bbox = to_pixel_box(raw.boxes[i].0, res.width(), res.height());
                if params.flip_horizontal {
                    bbox = unmirror_pixel_box(bbox, res.width());
                }
                Ok(Detection {
                    bbox,
                    class,
                    score: reduced.max_scores[i],
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.fps = fps_from_elapsed(start.elapsed());
        log::trace!("{} detections, {} FPS", detections.len(), self.fps);
        Ok(detections)
    }
}

impl fmt::Debug for HandDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandDetector")
            .field("params", &self.params)
            .field("state", &self.state())
            .field("fps", &self.fps)
            .finish()
    }
}

/// Flattened score and box data of one inference pass.
struct RawOutput {
    num_boxes: usize,
    num_classes: usize,
    scores: Vec<f32>,
    boxes: Vec<BoundingBox>,
}

impl RawOutput {
    /// Validates the output tensor shapes and copies their data out, releasing the tensors.
    fn extract(outputs: Outputs) -> Result<Self> {
        let [scores, boxes]: [Tensor; 2] =
            outputs.into_vec().try_into().map_err(|outputs: Vec<Tensor>| {
                Error::shape(format!(
                    "expected 2 output tensors (scores and boxes), got {}",
                    outputs.len()
                ))
            })?;

        let (num_boxes, num_classes) = match *scores.shape() {
            [1, num_boxes, num_classes] => (num_boxes, num_classes),
            _ => {
                return Err(Error::shape(format!(
                    "score tensor must have shape [1, boxes, classes], got {:?}",
                    scores.shape()
                )))
            }
        };
        if num_classes == 0 {
            return Err(Error::shape("score tensor has no classes"));
        }
        if boxes.shape() != [1, num_boxes, 1, 4] {
            return Err(Error::shape(format!(
                "box tensor must have shape [1, {}, 1, 4], got {:?}",
                num_boxes,
                boxes.shape()
            )));
        }

        let boxes = boxes
            .as_slice()
            .chunks_exact(4)
            .map(|b| BoundingBox([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Self {
            num_boxes,
            num_classes,
            scores: scores.into_vec(),
            boxes,
        })
    }
}

/// Target resolution the detector resizes a frame of size `res` to, given `params`.
pub fn input_resolution(res: Resolution, params: &ModelParameters) -> Resolution {
    res.stride_aligned(params.image_scale_factor, params.output_stride)
}
