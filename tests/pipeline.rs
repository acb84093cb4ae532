use handtrack::{
    detection::{nms, reduce_scores, to_pixel_box, unmirror_pixel_box, Detection},
    detector::{HandDetector, PipelineState},
    error::Operation,
    image::Image,
    nn::{tensor::Tensor, Model, Outputs},
    params::{ModelParameters, ModelType, ParameterUpdate},
    Error,
};

const NUM_BOXES: usize = 6;
const NUM_CLASSES: usize = 3;

#[rustfmt::skip]
const SCORES: [f32; NUM_BOXES * NUM_CLASSES] = [
    0.001, 0.995, 0.002, // hand, best candidate
    0.003, 0.993, 0.001, // overlaps box 0 heavily
    0.999, 0.999, 0.100, // tie between classes 0 and 1
    0.200, 0.300, 0.400, // below threshold
    0.010, 0.020, 0.991, // separate hand, class 2
    0.992, 0.000, 0.000, // corners swapped, inside box 2
];

#[rustfmt::skip]
const BOXES: [f32; NUM_BOXES * 4] = [
    0.10, 0.10, 0.40, 0.30,
    0.11, 0.10, 0.41, 0.31,
    0.50, 0.50, 0.90, 0.80,
    0.00, 0.00, 1.00, 1.00,
    0.60, 0.05, 0.95, 0.35,
    0.70, 0.70, 0.60, 0.60,
];

/// Stands in for the SSD network, always producing the same outputs.
struct FixedModel;

impl Model for FixedModel {
    fn input_shape(&self) -> Option<[usize; 4]> {
        Some([1, 300, 300, 3])
    }

    fn run(&self, input: &Tensor) -> anyhow::Result<Outputs> {
        anyhow::ensure!(input.rank() == 4, "expected NHWC input");
        Ok(Outputs::from([
            Tensor::from_iter(&[1, NUM_BOXES, NUM_CLASSES], SCORES),
            Tensor::from_iter(&[1, NUM_BOXES, 1, 4], BOXES),
        ]))
    }
}

fn fixed_loader(_: &ModelType) -> anyhow::Result<Box<dyn Model>> {
    Ok(Box::new(FixedModel))
}

fn loaded(params: ModelParameters) -> HandDetector {
    let mut detector = HandDetector::new(params);
    detector.load(&fixed_loader).unwrap();
    detector
}

fn frame() -> Image {
    Image::from_fn(300, 300, |x, y| [(x % 256) as u8, (y % 256) as u8, 128])
}

fn expected(params: &ModelParameters, width: u32, height: u32) -> Vec<Detection> {
    let reduced = reduce_scores(&SCORES, NUM_BOXES, NUM_CLASSES);
    let boxes: Vec<_> = BOXES
        .chunks_exact(4)
        .map(|b| nms::BoundingBox([b[0], b[1], b[2], b[3]]))
        .collect();
    nms::suppress(
        &boxes,
        &reduced.max_scores,
        params.max_num_boxes,
        params.iou_threshold,
        params.score_threshold,
    )
    .into_iter()
    .map(|i| {
        let mut bbox = to_pixel_box(boxes[i].0, width, height);
        if params.flip_horizontal {
            bbox = unmirror_pixel_box(bbox, width);
        }
        Detection {
            bbox,
            class: reduced.best_classes[i] as u32,
            score: reduced.max_scores[i],
        }
    })
    .collect()
}

#[test]
fn end_to_end_default_parameters() {
    let params = ModelParameters::default();
    let mut detector = loaded(params.clone());

    let detections = detector.detect(&frame()).unwrap();
    assert_eq!(detections, expected(&params, 300, 300));

    let classes: Vec<_> = detections.iter().map(|d| d.class).collect();
    let scores: Vec<_> = detections.iter().map(|d| d.score).collect();
    assert_eq!(classes, [0, 1, 0, 2]);
    assert_eq!(scores, [0.999, 0.995, 0.992, 0.991]);

    // same input, same output
    assert_eq!(detector.detect(&frame()).unwrap(), detections);
    assert!(detector.fps() > 0);
}

#[test]
fn end_to_end_without_flip() {
    let params = ModelParameters::default().with_flip_horizontal(false);
    let mut detector = loaded(params.clone());

    let detections = detector.detect(&frame()).unwrap();
    assert_eq!(detections, expected(&params, 300, 300));
    approx::assert_abs_diff_eq!(detections[1].bbox[0], 30.0, epsilon = 1e-3);
    approx::assert_abs_diff_eq!(detections[1].bbox[2], 60.0, epsilon = 1e-3);
}

#[test]
fn lower_threshold_admits_more_boxes() {
    let params = ModelParameters::default().with_score_threshold(0.3);
    let mut detector = loaded(params.clone());
    let detections = detector.detect(&frame()).unwrap();
    assert_eq!(detections, expected(&params, 300, 300));
    // the full-frame box overlaps nothing enough to be suppressed
    assert!(detections.iter().any(|d| d.score == 0.4));
}

#[test]
fn parameters_roundtrip() {
    let mut detector = HandDetector::new(ModelParameters::default());
    let update = ParameterUpdate {
        iou_threshold: Some(0.3),
        max_num_boxes: Some(5),
        ..Default::default()
    };
    detector.set_parameters(update).unwrap();

    assert_eq!(
        *detector.parameters(),
        ModelParameters {
            iou_threshold: 0.3,
            max_num_boxes: 5,
            ..ModelParameters::default()
        }
    );
}

#[test]
fn detect_requires_loaded_model() {
    let mut detector = HandDetector::new(ModelParameters::default());
    assert_eq!(detector.state(), PipelineState::Unloaded);
    match detector.detect(&frame()) {
        Err(Error::InvalidState {
            operation: Operation::Detect,
            state: PipelineState::Unloaded,
        }) => {}
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(detector.fps(), 0);
}

#[test]
fn detect_after_dispose_fails() {
    let mut detector = loaded(ModelParameters::default());
    detector.detect(&frame()).unwrap();

    detector.dispose();
    assert_eq!(detector.state(), PipelineState::Disposed);
    match detector.detect(&frame()) {
        Err(Error::InvalidState {
            operation: Operation::Detect,
            state: PipelineState::Disposed,
        }) => {}
        other => panic!("unexpected result {other:?}"),
    }

    // disposed detectors can't be revived
    assert!(matches!(
        detector.load(&fixed_loader),
        Err(Error::InvalidState { .. })
    ));
    detector.dispose();
    assert_eq!(detector.state(), PipelineState::Disposed);
}

#[test]
fn missing_model_file_fails_to_load() {
    let params = ModelParameters::default()
        .with_model_type(ModelType::Custom("does/not/exist.onnx".into()));
    match HandDetector::load_default(params) {
        Err(Error::ModelLoad { model, .. }) => assert_eq!(model, "does/not/exist.onnx"),
        other => panic!("unexpected result {other:?}"),
    }
}
