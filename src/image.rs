//! Frames and conversion of image data to network input tensors.
//!
//! This module provides:
//!
//! - The [`Frame`] trait, implemented by everything the detector can run on.
//! - The [`Image`] type, an owned 8-bit RGB image.

use std::{fmt, ops::Deref, path::Path};

use image::{
    imageops::{self, FilterType},
    GenericImageView, ImageBuffer, Pixel, RgbImage,
};

use crate::{nn::tensor::Tensor, resolution::Resolution};

/// An input frame for hand detection.
pub trait Frame {
    /// Returns the size of the frame, in pixels.
    fn resolution(&self) -> Resolution;

    /// Converts the frame to a `[1, H, W, 3]` network input tensor of size `target`.
    ///
    /// If `flip_horizontal` is `true`, the frame is mirrored before it is resized. The frame is
    /// resized with bilinear filtering. Channel values keep the range of the source pixels (eg.
    /// `0.0..=255.0` for 8-bit images).
    fn to_tensor(&self, target: Resolution, flip_horizontal: bool) -> Tensor;
}

impl<F: Frame + ?Sized> Frame for &F {
    fn resolution(&self) -> Resolution {
        (**self).resolution()
    }

    fn to_tensor(&self, target: Resolution, flip_horizontal: bool) -> Tensor {
        (**self).to_tensor(target, flip_horizontal)
    }
}

/// Any `image` buffer is a frame, including floating-point ones like `Rgb32FImage`.
impl<P, C> Frame for ImageBuffer<P, C>
where
    P: Pixel + 'static,
    P::Subpixel: Into<f32> + 'static,
    C: Deref<Target = [P::Subpixel]>,
{
    fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    fn to_tensor(&self, target: Resolution, flip_horizontal: bool) -> Tensor {
        view_to_tensor(self, target, flip_horizontal)
    }
}

fn view_to_tensor<I, P>(image: &I, target: Resolution, flip_horizontal: bool) -> Tensor
where
    I: GenericImageView<Pixel = P>,
    P: Pixel + 'static,
    P::Subpixel: Into<f32> + 'static,
{
    let (w, h) = (target.width(), target.height());
    let resized = if flip_horizontal {
        let flipped = imageops::flip_horizontal(image);
        imageops::resize(&flipped, w, h, FilterType::Triangle)
    } else {
        imageops::resize(image, w, h, FilterType::Triangle)
    };

    Tensor::from_shape_fn([1, h as usize, w as usize, 3], |[_, y, x, c]| {
        let rgb = resized.get_pixel(x as u32, y as u32).to_rgb();
        rgb.0[c].into()
    })
}

/// An 8-bit sRGB image.
#[derive(Clone)]
pub struct Image {
    buf: RgbImage,
}

impl Image {
    /// Loads an image from the filesystem.
    ///
    /// Supported formats are JPEG and PNG.
    pub fn load<A: AsRef<Path>>(path: A) -> anyhow::Result<Self> {
        Self::load_impl(path.as_ref())
    }

    fn load_impl(path: &Path) -> anyhow::Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("jpg" | "jpeg" | "png") => {}
            _ => anyhow::bail!(
                "invalid image path '{}' (must have one of the supported extensions)",
                path.display()
            ),
        }

        let buf = image::open(path)?.to_rgb8();
        Ok(Self { buf })
    }

    /// Creates an image from tightly packed 8-bit RGB data.
    ///
    /// Returns an error if `buf` doesn't contain exactly `3 * width * height` bytes.
    pub fn from_rgb8(res: Resolution, buf: Vec<u8>) -> anyhow::Result<Self> {
        let len = buf.len();
        match ImageBuffer::from_raw(res.width(), res.height(), buf) {
            Some(buf) => Ok(Self { buf }),
            None => anyhow::bail!("incorrect buffer size {} for {} RGB image", len, res),
        }
    }

    /// Creates a black image of a specified size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buf: ImageBuffer::new(width, height),
        }
    }

    /// Creates an image of the given size with every pixel computed by `f`.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> [u8; 3]) -> Self {
        Self {
            buf: ImageBuffer::from_fn(width, height, |x, y| image::Rgb(f(x, y))),
        }
    }

    /// Returns the width of this image, in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.buf.width()
    }

    /// Returns the height of this image, in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.buf.height()
    }

    /// Returns the color of the pixel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// This will panic if `(x, y)` is outside the bounds of this image.
    pub fn get(&self, x: u32, y: u32) -> [u8; 3] {
        self.buf[(x, y)].0
    }

    /// Returns a horizontally mirrored copy of this image.
    pub fn flip_horizontal(&self) -> Image {
        Image {
            buf: imageops::flip_horizontal(&self.buf),
        }
    }
}

impl Frame for Image {
    fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    fn to_tensor(&self, target: Resolution, flip_horizontal: bool) -> Tensor {
        view_to_tensor(&self.buf, target, flip_horizontal)
    }
}

impl From<RgbImage> for Image {
    fn from(buf: RgbImage) -> Self {
        Self { buf }
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("resolution", &self.resolution())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, Rgb32FImage};

    use super::*;

    fn gradient(width: u32, height: u32) -> Image {
        Image::from_fn(width, height, |x, _| [x as u8, 0, 255])
    }

    #[test]
    fn tensor_shape_and_range() {
        let image = Image::from_fn(8, 4, |_, _| [255, 128, 0]);
        let tensor = image.to_tensor(Resolution::new(5, 3), false);
        assert_eq!(tensor.shape(), &[1, 3, 5, 3]);
        for px in tensor.as_slice().chunks_exact(3) {
            assert_eq!(px, &[255.0, 128.0, 0.0]);
        }
    }

    #[test]
    fn identity_resize_preserves_pixels() {
        let image = gradient(4, 2);
        let tensor = image.to_tensor(image.resolution(), false);
        let red: Vec<f32> = tensor.as_slice().iter().step_by(3).copied().collect();
        assert_eq!(red, [0.0, 1.0, 2.0, 3.0, 0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn flip_mirrors_columns() {
        let image = gradient(4, 1);
        let tensor = image.to_tensor(image.resolution(), true);
        let red: Vec<f32> = tensor.as_slice().iter().step_by(3).copied().collect();
        assert_eq!(red, [3.0, 2.0, 1.0, 0.0]);

        let flipped = image.flip_horizontal();
        assert_eq!(flipped.get(0, 0), [3, 0, 255]);
        assert_eq!(flipped.get(3, 0), [0, 0, 255]);
    }

    #[test]
    fn float_buffers_are_frames() {
        let buf = Rgb32FImage::from_pixel(6, 6, Rgb([0.25, 0.5, 0.75]));
        assert_eq!(buf.resolution(), Resolution::new(6, 6));
        let tensor = buf.to_tensor(Resolution::new(3, 3), false);
        assert_eq!(tensor.shape(), &[1, 3, 3, 3]);
        for px in tensor.as_slice().chunks_exact(3) {
            approx::assert_abs_diff_eq!(px[0], 0.25, epsilon = 1e-6);
            approx::assert_abs_diff_eq!(px[1], 0.5, epsilon = 1e-6);
            approx::assert_abs_diff_eq!(px[2], 0.75, epsilon = 1e-6);
        }
    }

    #[test]
    fn from_rgb8_checks_size() {
        assert!(Image::from_rgb8(Resolution::new(2, 2), vec![0; 11]).is_err());
        let image = Image::from_rgb8(Resolution::new(2, 2), vec![7; 12]).unwrap();
        assert_eq!(image.get(1, 1), [7, 7, 7]);
    }

    #[test]
    fn load_rejects_unknown_extensions() {
        assert!(Image::load("frame.bmp").is_err());
    }
}
