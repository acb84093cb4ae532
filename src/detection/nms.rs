//! Non-Maximum Suppression.
//!
//! Single-Shot MultiBox Detectors (SSD) produce many overlapping candidate boxes for each object.
//! Non-Maximum Suppression (NMS) is a greedy algorithm that keeps the highest-scoring box of each
//! cluster of overlapping boxes and discards the rest.
//!
//! Suppression always runs on the CPU, independent of where inference happened, so the selected
//! boxes are reproducible across platforms.

use crate::num::TotalF32;

/// An axis-aligned box in `[min_y, min_x, max_y, max_x]` order, as produced by the network.
///
/// The corners are allowed to be swapped (eg. `min_y > max_y`); they are normalized before
/// computing areas and overlaps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox(pub [f32; 4]);

impl BoundingBox {
    fn corners(&self) -> (f32, f32, f32, f32) {
        let [y0, x0, y1, x1] = self.0;
        (y0.min(y1), x0.min(x1), y0.max(y1), x0.max(x1))
    }

    /// Returns the area enclosed by the box.
    pub fn area(&self) -> f32 {
        let (min_y, min_x, max_y, max_x) = self.corners();
        (max_y - min_y) * (max_x - min_x)
    }

    /// Computes the Intersection over Union (IOU) of `self` and `other`.
    ///
    /// Returns 0.0 if either box has no area.
    pub fn iou(&self, other: &Self) -> f32 {
        let (area_a, area_b) = (self.area(), other.area());
        if area_a <= 0.0 || area_b <= 0.0 {
            return 0.0;
        }

        let (a_min_y, a_min_x, a_max_y, a_max_x) = self.corners();
        let (b_min_y, b_min_x, b_max_y, b_max_x) = other.corners();
        let inter_h = (a_max_y.min(b_max_y) - a_min_y.max(b_min_y)).max(0.0);
        let inter_w = (a_max_x.min(b_max_x) - a_min_x.max(b_min_x)).max(0.0);
        let intersection = inter_h * inter_w;
        intersection / (area_a + area_b - intersection)
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(raw: [f32; 4]) -> Self {
        Self(raw)
    }
}

/// A non-maximum suppression algorithm.
///
/// Selects box indices in descending score order. A box is selected if its score is at least the
/// score threshold and its IOU with every previously selected box does not exceed the IOU
/// threshold. Selection stops once the maximum number of boxes is reached.
pub struct NonMaxSuppression {
    iou_thresh: f32,
    score_thresh: f32,
    max_output: usize,
    candidates: Vec<usize>,
    selected: Vec<usize>,
}

impl NonMaxSuppression {
    /// The default intersection-over-union threshold used to determine if two boxes overlap.
    pub const DEFAULT_IOU_THRESH: f32 = 0.5;

    /// Creates a new non-maximum suppressor returning at most `max_output` boxes.
    ///
    /// The suppressor uses [`Self::DEFAULT_IOU_THRESH`] and a score threshold of 0.0.
    pub fn new(max_output: usize) -> Self {
        Self {
            iou_thresh: Self::DEFAULT_IOU_THRESH,
            score_thresh: 0.0,
            max_output,
            candidates: Vec::new(),
            selected: Vec::new(),
        }
    }

    /// Sets the intersection-over-union threshold above which a box is suppressed by a
    /// higher-scoring one.
    pub fn set_iou_thresh(&mut self, iou_thresh: f32) {
        self.iou_thresh = iou_thresh;
    }

    /// Sets the minimum score a box needs to be considered at all.
    pub fn set_score_thresh(&mut self, score_thresh: f32) {
        self.score_thresh = score_thresh;
    }

    /// Sets the maximum number of boxes to select.
    pub fn set_max_output(&mut self, max_output: usize) {
        self.max_output = max_output;
    }

    /// Performs non-maximum suppression on `boxes` with the matching `scores`.
    ///
    /// Returns the indices of the selected boxes, highest score first. Boxes with equal scores
    /// are visited in index order.
    ///
    /// # Panics
    ///
    /// Panics if `boxes` and `scores` have different lengths.
    #[track_caller]
    pub fn process(&mut self, boxes: &[BoundingBox], scores: &[f32]) -> &[usize] {
        assert_eq!(
            boxes.len(),
            scores.len(),
            "NMS needs exactly one score per box"
        );

        self.selected.clear();
        self.candidates.clear();
        self.candidates
            .extend((0..scores.len()).filter(|&i| scores[i] >= self.score_thresh));
        // Stable sort, so ties keep ascending index order.
        self.candidates
            .sort_by_key(|&i| std::cmp::Reverse(TotalF32(scores[i])));

        for &candidate in &self.candidates {
            if self.selected.len() >= self.max_output {
                break;
            }

            let suppressed = self
                .selected
                .iter()
                .any(|&kept| boxes[kept].iou(&boxes[candidate]) > self.iou_thresh);
            if !suppressed {
                self.selected.push(candidate);
            }
        }

        log::trace!(
            "NMS: {} boxes, {} above threshold, {} selected",
            boxes.len(),
            self.candidates.len(),
            self.selected.len()
        );
        &self.selected
    }
}

/// Runs non-maximum suppression once with the given parameters.
///
/// See [`NonMaxSuppression`] for the selection rules.
pub fn suppress(
    boxes: &[BoundingBox],
    scores: &[f32],
    max_output_size: usize,
    iou_threshold: f32,
    score_threshold: f32,
) -> Vec<usize> {
    let mut nms = NonMaxSuppression::new(max_output_size);
    nms.set_iou_thresh(iou_threshold);
    nms.set_score_thresh(score_threshold);
    nms.process(boxes, scores).to_vec()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn square(y: f32, x: f32, size: f32) -> BoundingBox {
        BoundingBox([y, x, y + size, x + size])
    }

    #[test]
    fn iou() {
        let a = square(0.0, 0.0, 1.0);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&square(2.0, 2.0, 1.0)), 0.0);
        assert_relative_eq!(a.iou(&square(0.0, 0.5, 1.0)), 1.0 / 3.0);

        // swapped corners describe the same box
        let swapped = BoundingBox([1.0, 1.0, 0.0, 0.0]);
        assert_eq!(swapped.area(), 1.0);
        assert_eq!(a.iou(&swapped), 1.0);

        // degenerate boxes never overlap anything
        let empty = BoundingBox([0.5, 0.5, 0.5, 0.5]);
        assert_eq!(a.iou(&empty), 0.0);
    }

    #[test]
    fn nms_suppresses_non_maximum() {
        let boxes = [square(0.0, 0.0, 1.0), square(0.0, 0.1, 1.0)];
        let selected = suppress(&boxes, &[0.6, 0.55], 10, 0.5, 0.0);
        assert_eq!(selected, [0]);

        // order of the input doesn't matter
        let boxes = [square(0.0, 0.1, 1.0), square(0.0, 0.0, 1.0)];
        let selected = suppress(&boxes, &[0.55, 0.6], 10, 0.5, 0.0);
        assert_eq!(selected, [1]);
    }

    #[test]
    fn nms_ignores_nonoverlapping() {
        let boxes = [square(0.0, 0.0, 1.0), square(0.0, 0.75, 1.0)];
        // IOU is 1/7
        let selected = suppress(&boxes, &[0.9, 0.95], 10, 0.5, 0.0);
        assert_eq!(selected, [1, 0]);
    }

    #[test]
    fn nms_applies_score_threshold() {
        let boxes = [
            square(0.0, 0.0, 1.0),
            square(5.0, 5.0, 1.0),
            square(9.0, 9.0, 1.0),
        ];
        let selected = suppress(&boxes, &[0.98, 0.995, 0.99], 10, 0.5, 0.99);
        assert_eq!(selected, [1, 2]);

        // a score equal to the threshold is enough
        let selected = suppress(&boxes[..1], &[1.0], 10, 0.5, 1.0);
        assert_eq!(selected, [0]);
    }

    #[test]
    fn nms_zero_iou_thresh_keeps_disjoint_boxes() {
        let boxes = [
            BoundingBox([0.0, 0.0, 0.1, 0.1]),
            BoundingBox([0.5, 0.5, 0.6, 0.6]),
            BoundingBox([0.05, 0.05, 0.15, 0.15]),
        ];
        let selected = suppress(&boxes, &[0.9, 0.8, 0.7], 10, 0.0, 0.0);
        // box 2 touches box 0, box 1 touches nothing
        assert_eq!(selected, [0, 1]);
    }

    #[test]
    fn nms_iou_equal_to_thresh_survives() {
        // `narrow` covers half of `wide`, so their IOU is exactly 0.5
        let wide = BoundingBox([0.0, 0.0, 1.0, 2.0]);
        let narrow = BoundingBox([0.0, 0.0, 1.0, 1.0]);
        assert_eq!(wide.iou(&narrow), 0.5);

        let selected = suppress(&[wide, narrow], &[0.9, 0.8], 10, 0.5, 0.0);
        assert_eq!(selected, [0, 1]);
        let selected = suppress(&[wide, narrow], &[0.9, 0.8], 10, 0.49, 0.0);
        assert_eq!(selected, [0]);
    }

    #[test]
    fn nms_limits_output() {
        let boxes: Vec<_> = (0..10).map(|i| square(i as f32 * 2.0, 0.0, 1.0)).collect();
        let scores: Vec<_> = (0..10).map(|i| i as f32 / 10.0 + 0.05).collect();
        let selected = suppress(&boxes, &scores, 3, 0.5, 0.0);
        assert_eq!(selected, [9, 8, 7]);
    }

    #[test]
    fn nms_ties_keep_index_order() {
        let boxes = [
            square(0.0, 0.0, 1.0),
            square(3.0, 0.0, 1.0),
            square(0.0, 0.0, 1.0),
        ];
        let selected = suppress(&boxes, &[0.7, 0.7, 0.7], 10, 0.5, 0.0);
        assert_eq!(selected, [0, 1]);
    }

    #[test]
    fn nms_selected_boxes_never_overlap() {
        let mut rng = fastrand::Rng::with_seed(7);
        let boxes: Vec<_> = (0..200)
            .map(|_| square(rng.f32(), rng.f32(), rng.f32() * 0.5 + 0.01))
            .collect();
        let scores: Vec<_> = (0..200).map(|_| rng.f32()).collect();

        let mut nms = NonMaxSuppression::new(50);
        nms.set_iou_thresh(0.3);
        nms.set_score_thresh(0.2);
        let selected = nms.process(&boxes, &scores).to_vec();

        assert!(selected.len() <= 50);
        for (n, &a) in selected.iter().enumerate() {
            assert!(scores[a] >= 0.2);
            if let Some(&next) = selected.get(n + 1) {
                assert!(scores[a] >= scores[next]);
            }
            for &b in &selected[n + 1..] {
                assert!(boxes[a].iou(&boxes[b]) <= 0.3);
            }
        }

        // the suppressor can be reused
        assert_eq!(nms.process(&boxes, &scores), &selected[..]);
    }
}
