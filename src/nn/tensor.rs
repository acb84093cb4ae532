//! Tensor API.
//!
//! Tensors are the inputs and outputs of the detection network. A tensor here is a dense,
//! row-major N-dimensional array of `f32`s together with its shape.

use std::fmt;

use tinyvec::TinyVec;

type Shape = TinyVec<[usize; 8]>;

/// A dynamically shaped tensor of `f32` values.
///
/// # Construction
///
/// Tensors are created with [`Tensor::zeros`], [`Tensor::from_vec`], [`Tensor::from_iter`], or
/// [`Tensor::from_shape_fn`].
///
/// # Data Access
///
/// The elements are stored in row-major order and exposed as a flat slice via
/// [`Tensor::as_slice`]. Use [`Tensor::shape`] to interpret it.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: Box<[f32]>,
}

impl Tensor {
    /// Creates a zero-filled tensor of the given shape.
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: TinyVec::from(shape),
            data: vec![0.0; shape.iter().product()].into_boxed_slice(),
        }
    }

    /// Creates a tensor from a shape and a flat buffer of row-major data.
    ///
    /// Returns an error if the number of elements in `data` does not match `shape`.
    pub fn from_vec(shape: &[usize], data: Vec<f32>) -> anyhow::Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            anyhow::bail!(
                "tensor of shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len(),
            );
        }

        Ok(Self {
            shape: TinyVec::from(shape),
            data: data.into_boxed_slice(),
        })
    }

    /// Creates a tensor of the given shape by pulling elements from an iterator.
    ///
    /// # Panics
    ///
    /// `iter` must yield exactly as many elements as specified by `shape` (by multiplying all of
    /// its entries), otherwise this method will panic.
    #[track_caller]
    pub fn from_iter<I: IntoIterator<Item = f32>>(shape: &[usize], iter: I) -> Self {
        let data: Box<[f32]> = iter.into_iter().collect();
        assert_eq!(
            data.len(),
            shape.iter().product::<usize>(),
            "element count does not match tensor shape {:?}",
            shape
        );
        Self {
            shape: TinyVec::from(shape),
            data,
        }
    }

    /// Creates an `N`-dimensional tensor of the given shape by calling `f` for each element.
    ///
    /// This will invoke `f` with successive indices to fill, starting with `[0, ..., 0, 0]`, then
    /// `[0, ..., 0, 1]` and so on.
    pub fn from_shape_fn<const N: usize, F: FnMut([usize; N]) -> f32>(
        shape: [usize; N],
        mut f: F,
    ) -> Self {
        let len = shape.iter().product();
        let mut data = Vec::with_capacity(len);
        let mut index = [0; N];
        for _ in 0..len {
            data.push(f(index));

            // Increment the index like an odometer, innermost dimension first.
            for (i, size) in index.iter_mut().zip(shape).rev() {
                *i += 1;
                if *i < size {
                    break;
                }
                *i = 0;
            }
        }

        Self {
            shape: TinyVec::from(&shape[..]),
            data: data.into_boxed_slice(),
        }
    }

    pub(super) fn from_tract(tract: &tract_onnx::prelude::Tensor) -> anyhow::Result<Self> {
        let data = tract.as_slice::<f32>()?.to_vec();
        Self::from_vec(tract.shape(), data)
    }

    pub(super) fn to_tract(&self) -> anyhow::Result<tract_onnx::prelude::Tensor> {
        tract_onnx::prelude::Tensor::from_shape(self.shape(), self.as_slice())
    }

    /// Returns the shape of this tensor.
    ///
    /// A tensor's shape is the number of entries in each dimension.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions of this tensor.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements in this tensor.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the tensor's elements in row-major order.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Consumes the tensor and returns its elements in row-major order.
    pub fn into_vec(self) -> Vec<f32> {
        self.data.into_vec()
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape())
            .finish()
    }
}
