//! Row-major `f32` tensor with an optional accelerator mirror.
//!
//! [`Tensor`] is the numeric buffer every other module works on. Host storage
//! is a contiguous `Vec<f32>` whose length always equals the product of the
//! shape. A tensor may additionally hold a device mirror (see
//! [`crate::device`]); host and device contents are synchronized only by the
//! explicit [`Tensor::to_device`] and [`Tensor::to_host`] transfers.
//!
//! # Shapes
//!
//! - `total_size` is the product of the shape, `0` for an empty shape.
//! - [`rows`](Tensor::rows) is `shape[0]` (0 for rank 0).
//! - [`cols`](Tensor::cols) is `shape[1]` (0 for rank < 2), so a rank-1 tensor
//!   has no addressable `(row, col)` elements.
//!
//! # Example
//!
//! ```rust
//! use nnkit::Tensor;
//!
//! let a = Tensor::from_vec(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])?;
//! let t = a.transpose()?;
//! assert_eq!(t.shape(), &[3, 2]);
//! assert_eq!(t.get(2, 1)?, 6.0);
//! # Ok::<(), nnkit::NnError>(())
//! ```

use std::fmt;

use log::warn;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::device::{self, DeviceBuffer};
use crate::error::{NnError, NnResult};

/// Standard deviation used by [`Tensor::initialize_random`].
pub const INIT_STD: f32 = 0.1;

/// Product of a shape; an empty shape holds no elements.
#[inline]
pub fn shape_size(shape: &[usize]) -> usize {
    if shape.is_empty() {
        0
    } else {
        shape.iter().product()
    }
}

/// Dense row-major tensor of `f32`.
///
/// Copies are always deep: cloning duplicates the host buffer and, if
/// present, the device mirror. Moving out with [`Tensor::take`] leaves an
/// empty tensor behind.
#[derive(Default)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
    device: Option<DeviceBuffer>,
}

impl Tensor {
    /// Creates a zero-filled tensor with the given shape.
    pub fn new(shape: Vec<usize>) -> Self {
        let size = shape_size(&shape);
        Self {
            shape,
            data: vec![0.0; size],
            device: None,
        }
    }

    /// Alias for [`Tensor::new`].
    #[inline]
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::new(shape)
    }

    /// Creates a tensor filled with `value`.
    pub fn filled(shape: Vec<usize>, value: f32) -> Self {
        let size = shape_size(&shape);
        Self {
            shape,
            data: vec![value; size],
            device: None,
        }
    }

    /// Wraps existing row-major data.
    ///
    /// # Errors
    ///
    /// Returns [`NnError::ShapeMismatch`] if `data.len()` differs from the
    /// product of `shape`.
    pub fn from_vec(shape: Vec<usize>, data: Vec<f32>) -> NnResult<Self> {
        let size = shape_size(&shape);
        if data.len() != size {
            return Err(NnError::shape_mismatch(&shape, &[data.len()]));
        }
        Ok(Self {
            shape,
            data,
            device: None,
        })
    }

    /// Builds a `[rows.len(), cols]` tensor from equally sized rows.
    pub fn from_rows(rows: &[Vec<f32>]) -> NnResult<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            if row.len() != cols {
                return Err(NnError::shape_mismatch(&[cols], &[row.len()]));
            }
            data.extend_from_slice(row);
        }
        Self::from_vec(vec![rows.len(), cols], data)
    }

    /// Creates a `[1, n]` single-row tensor.
    pub fn row_vector(values: &[f32]) -> Self {
        Self {
            shape: vec![1, values.len()],
            data: values.to_vec(),
            device: None,
        }
    }

    /// Creates a tensor sampled from `Normal(0, 0.1)` using `rng`.
    pub fn random<R: Rng + ?Sized>(shape: Vec<usize>, rng: &mut R) -> Self {
        let mut tensor = Self::new(shape);
        tensor.initialize_random_with(rng);
        tensor
    }

    /// Fills host storage with independent samples from `Normal(0, 0.1)`.
    pub fn initialize_random(&mut self) {
        self.initialize_random_with(&mut rand::thread_rng());
    }

    /// Same as [`initialize_random`](Self::initialize_random) with an explicit RNG.
    pub fn initialize_random_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for x in &mut self.data {
            let z: f32 = StandardNormal.sample(rng);
            *x = INIT_STD * z;
        }
    }

    /// Returns the shape.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the tensor holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of rows (`shape[0]`), 0 for an empty shape.
    #[inline]
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Number of columns (`shape[1]`), 0 for rank < 2.
    #[inline]
    pub fn cols(&self) -> usize {
        if self.shape.len() < 2 {
            0
        } else {
            self.shape[1]
        }
    }

    /// Host data in row-major order.
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Mutable host data in row-major order.
    ///
    /// Writing here does not touch the device mirror.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the tensor and returns its host data.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Moves the contents out, leaving an empty tensor (no shape, no buffers).
    pub fn take(&mut self) -> Tensor {
        std::mem::take(self)
    }

    /// Reads element `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> NnResult<f32> {
        let idx = self.index(row, col)?;
        Ok(self.data[idx])
    }

    /// Writes element `(row, col)`.
    pub fn set(&mut self, row: usize, col: usize, value: f32) -> NnResult<()> {
        let idx = self.index(row, col)?;
        self.data[idx] = value;
        Ok(())
    }

    #[inline]
    fn index(&self, row: usize, col: usize) -> NnResult<usize> {
        let (rows, cols) = (self.rows(), self.cols());
        if row >= rows || col >= cols {
            return Err(NnError::out_of_range(row, col, rows, cols));
        }
        Ok(row * cols + col)
    }

    /// Reinterprets the storage under `new_shape` without moving data.
    ///
    /// The device mirror, if any, is reshaped logically as well.
    pub fn reshape(&mut self, new_shape: Vec<usize>) -> NnResult<()> {
        if shape_size(&new_shape) != self.len() {
            return Err(NnError::shape_mismatch(&self.shape, &new_shape));
        }
        self.shape = new_shape;
        #[cfg(feature = "gpu")]
        if let Some(buf) = self.device.as_mut() {
            buf.set_shape(self.shape.clone());
        }
        Ok(())
    }

    /// Returns a transposed copy of a rank-2 tensor.
    pub fn transpose(&self) -> NnResult<Tensor> {
        if self.rank() != 2 {
            return Err(NnError::invalid_shape(format!(
                "transpose requires a rank-2 tensor, got shape {:?}",
                self.shape
            )));
        }
        let (rows, cols) = (self.rows(), self.cols());
        let mut out = vec![0.0f32; rows * cols];
        for i in 0..rows {
            let src = &self.data[i * cols..(i + 1) * cols];
            for (j, &v) in src.iter().enumerate() {
                out[j * rows + i] = v;
            }
        }
        Tensor::from_vec(vec![cols, rows], out)
    }

    /// Element-wise `self - other`.
    pub fn sub(&self, other: &Tensor) -> NnResult<Tensor> {
        self.zip_with(other, |a, b| a - b)
    }

    /// Element-wise `self * other`.
    pub fn mul(&self, other: &Tensor) -> NnResult<Tensor> {
        self.zip_with(other, |a, b| a * b)
    }

    /// Multiplies every element by `factor`.
    pub fn scale(&self, factor: f32) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| x * factor).collect(),
            device: None,
        }
    }

    fn zip_with(&self, other: &Tensor, f: impl Fn(f32, f32) -> f32) -> NnResult<Tensor> {
        if self.shape != other.shape {
            return Err(NnError::shape_mismatch(&self.shape, &other.shape));
        }
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Tensor::from_vec(self.shape.clone(), data)
    }

    /// Copies row `row` into a `[1, cols]` tensor.
    pub fn row(&self, row: usize) -> NnResult<Tensor> {
        let (rows, cols) = (self.rows(), self.cols());
        if row >= rows {
            return Err(NnError::out_of_range(row, 0, rows, cols));
        }
        Ok(Tensor::row_vector(&self.data[row * cols..(row + 1) * cols]))
    }

    /// Borrows row `row` of a rank-2 tensor.
    pub fn row_slice(&self, row: usize) -> NnResult<&[f32]> {
        let (rows, cols) = (self.rows(), self.cols());
        if row >= rows {
            return Err(NnError::out_of_range(row, 0, rows, cols));
        }
        Ok(&self.data[row * cols..(row + 1) * cols])
    }

    /// Index of the largest value in `row`; ties resolve to the first index.
    pub fn argmax_row(&self, row: usize) -> NnResult<usize> {
        let values = self.row_slice(row)?;
        let mut best = 0;
        for (j, &v) in values.iter().enumerate().skip(1) {
            if v > values[best] {
                best = j;
            }
        }
        Ok(best)
    }

    /// Outer product of two single-row tensors: `[cols(v1), cols(v2)]`.
    pub fn outer(v1: &Tensor, v2: &Tensor) -> NnResult<Tensor> {
        require_row_vector(v1, "outer")?;
        require_row_vector(v2, "outer")?;
        let (n1, n2) = (v1.cols(), v2.cols());
        let mut data = Vec::with_capacity(n1 * n2);
        for &a in &v1.data {
            data.extend(v2.data.iter().map(|&b| a * b));
        }
        Tensor::from_vec(vec![n1, n2], data)
    }

    /// Square matrix with the entries of single-row `v` on the diagonal.
    pub fn diag(v: &Tensor) -> NnResult<Tensor> {
        require_row_vector(v, "diag")?;
        let n = v.cols();
        let mut out = Tensor::new(vec![n, n]);
        for (i, &x) in v.data.iter().enumerate() {
            out.data[i * n + i] = x;
        }
        Ok(out)
    }

    /// Returns `true` if a device mirror exists.
    #[inline]
    pub fn is_on_device(&self) -> bool {
        self.device.is_some()
    }

    /// Borrows the device mirror, if any.
    #[inline]
    pub fn device_buffer(&self) -> Option<&DeviceBuffer> {
        self.device.as_ref()
    }

    /// Installs `buffer` as the device mirror; host contents become stale.
    #[cfg(feature = "gpu")]
    pub(crate) fn attach_device(&mut self, buffer: DeviceBuffer) {
        self.device = Some(buffer);
    }

    /// Deep copy that duplicates the device mirror on the device.
    ///
    /// # Errors
    ///
    /// [`NnError::AcceleratorExecution`] if the mirror cannot be duplicated.
    pub fn try_clone(&self) -> NnResult<Tensor> {
        let device = self.device.as_ref().map(DeviceBuffer::duplicate).transpose()?;
        Ok(Self {
            shape: self.shape.clone(),
            data: self.data.clone(),
            device,
        })
    }

    /// Drops the device mirror.
    pub fn release_device(&mut self) {
        self.device = None;
    }

    /// Copies host contents to the device, allocating the mirror if needed.
    ///
    /// # Errors
    ///
    /// - [`NnError::AcceleratorUnavailable`] if the build has no device support
    ///   or no device can be opened.
    /// - [`NnError::AcceleratorExecution`] if the tensor has no host storage
    ///   or the transfer fails.
    pub fn to_device(&mut self) -> NnResult<()> {
        if self.data.is_empty() {
            return Err(NnError::accelerator_execution(
                "cannot move to device: host storage does not exist",
            ));
        }
        match self.device.as_ref() {
            Some(buf) if buf.shape() == self.shape.as_slice() => buf.write(&self.data),
            _ => {
                self.device = Some(device::upload(&self.data, &self.shape)?);
                Ok(())
            }
        }
    }

    /// Copies device contents back into host storage.
    ///
    /// # Errors
    ///
    /// [`NnError::AcceleratorExecution`] if no device mirror exists or the
    /// read-back fails.
    pub fn to_host(&mut self) -> NnResult<()> {
        let buf = self.device.as_ref().ok_or_else(|| {
            NnError::accelerator_execution("cannot move to host: device storage does not exist")
        })?;
        let data = buf.download()?;
        if data.len() != self.data.len() {
            return Err(NnError::shape_mismatch(&self.shape, buf.shape()));
        }
        self.data = data;
        Ok(())
    }
}

fn require_row_vector(v: &Tensor, op: &str) -> NnResult<()> {
    if v.rank() != 2 || v.rows() != 1 {
        return Err(NnError::invalid_shape(format!(
            "{op} expects a single-row tensor, got shape {:?}",
            v.shape
        )));
    }
    Ok(())
}

impl Clone for Tensor {
    /// Deep copy. If the device mirror cannot be duplicated the copy is
    /// host-only; use [`Tensor::try_clone`] to observe that error.
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(tensor) => tensor,
            Err(err) => {
                warn!("tensor {:?}: device mirror not copied: {err}", self.shape);
                Self {
                    shape: self.shape.clone(),
                    data: self.data.clone(),
                    device: None,
                }
            }
        }
    }
}

impl PartialEq for Tensor {
    /// Compares shape and host contents; device mirrors are ignored.
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("len", &self.data.len())
            .field("on_device", &self.device.is_some())
            .finish()
    }
}
