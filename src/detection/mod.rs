//! Post-processing of raw SSD network outputs into [`Detection`]s.
//!
//! The network produces, for every candidate box, one score per object class and a box in
//! normalized `[min_y, min_x, max_y, max_x]` coordinates. [`reduce_scores`] picks the best class
//! of each box, [`nms::suppress`] removes duplicates, and [`to_pixel_box`] converts the surviving
//! boxes to pixel coordinates.

pub mod nms;

/// Class index reported by [`reduce_scores`] for boxes without any class scores.
pub const NO_CLASS: i32 = -1;

/// A detected hand.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// `[x, y, width, height]` of the bounding box, in pixels of the input frame.
    pub bbox: [f32; 4],
    /// Index of the highest-scoring class for this box.
    pub class: u32,
    /// Confidence score of `class`.
    pub score: f32,
}

impl Detection {
    #[inline]
    pub fn x(&self) -> f32 {
        self.bbox[0]
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.bbox[1]
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.bbox[2]
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.bbox[3]
    }

    /// Returns the center of the bounding box.
    pub fn center(&self) -> (f32, f32) {
        (
            self.x() + self.width() * 0.5,
            self.y() + self.height() * 0.5,
        )
    }
}

/// Per-box maximum scores and the classes they belong to.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReduction {
    pub max_scores: Vec<f32>,
    pub best_classes: Vec<i32>,
}

/// Finds the highest-scoring class of every box.
///
/// `scores` holds `num_classes` consecutive scores per box. Ties resolve to the lowest class
/// index. Boxes that have no class scoring above [`f32::MIN`] (in particular, when `num_classes`
/// is 0) get a score of [`f32::MIN`] and class [`NO_CLASS`].
///
/// # Panics
///
/// Panics if `scores` holds fewer than `num_boxes * num_classes` values, or if that product
/// overflows.
#[track_caller]
pub fn reduce_scores(scores: &[f32], num_boxes: usize, num_classes: usize) -> ScoreReduction {
    let needed = num_boxes.checked_mul(num_classes);
    assert!(
        needed.map_or(false, |needed| scores.len() >= needed),
        "score buffer of length {} too short for {} boxes with {} classes",
        scores.len(),
        num_boxes,
        num_classes,
    );

    let mut max_scores = Vec::with_capacity(num_boxes);
    let mut best_classes = Vec::with_capacity(num_boxes);
    for i in 0..num_boxes {
        let mut max = f32::MIN;
        let mut index = NO_CLASS;
        // `i * num_classes` can't overflow, it's below `needed`
        let row = &scores[i * num_classes..][..num_classes];
        for (j, &score) in row.iter().enumerate() {
            if score > max {
                max = score;
                index = j as i32;
            }
        }
        max_scores.push(max);
        best_classes.push(index);
    }

    ScoreReduction {
        max_scores,
        best_classes,
    }
}

/// Converts a normalized `[min_y, min_x, max_y, max_x]` box to pixel `[x, y, width, height]`.
///
/// No clamping is done; boxes with `max < min` produce negative sizes.
pub fn to_pixel_box(normalized: [f32; 4], width: u32, height: u32) -> [f32; 4] {
    let [min_y, min_x, max_y, max_x] = normalized;
    let (w, h) = (width as f32, height as f32);
    let x = min_x * w;
    let y = min_y * h;
    [x, y, max_x * w - x, max_y * h - y]
}

/// Maps a pixel box found in a horizontally mirrored frame of width `width` back into the
/// unmirrored frame.
pub fn unmirror_pixel_box(bbox: [f32; 4], width: u32) -> [f32; 4] {
    let [x, y, w, h] = bbox;
    [width as f32 - x - w, y, w, h]
}
