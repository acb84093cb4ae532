//! Image resolutions and stride alignment.

use std::fmt;

/// Resolution (`width x height`) of an image or network input.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    width: u32,
    height: u32,
}

impl Resolution {
    /// Creates a new [`Resolution`] of `width x height`.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns the width of this [`Resolution`].
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the height of this [`Resolution`].
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns `true` if either dimension is 0.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Scales `self` by `scale_factor` and aligns both dimensions to `stride`.
    ///
    /// Each dimension is computed with [`valid_resolution`] independently.
    pub fn stride_aligned(&self, scale_factor: f32, stride: u32) -> Resolution {
        let res = Resolution::new(
            valid_resolution(self.width, scale_factor, stride),
            valid_resolution(self.height, scale_factor, stride),
        );
        log::trace!("stride-aligned {self} (scale={scale_factor}, stride={stride}) -> {res}");
        res
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Computes a scaled image dimension that the network's internal downsampling stages divide
/// evenly.
///
/// The result is `dimension * scale_factor` rounded down to the nearest value that is congruent
/// to 1 modulo `stride`, and never less than 1.
///
/// The caller must ensure that `stride >= 1`; `dimension` and `scale_factor` are not validated
/// and produce a result of 1 when their product is less than 1.
pub fn valid_resolution(dimension: u32, scale_factor: f32, stride: u32) -> u32 {
    let stride = f64::from(stride);
    let even = f64::from(dimension) * f64::from(scale_factor) - 1.0;
    // `%` keeps the sign of the dividend, so a negative `even` maps to exactly 1.
    let aligned = even - (even % stride) + 1.0;
    // `aligned` is integral up to rounding error, round instead of truncating.
    aligned.round() as u32
}
