//! Uniform buffer structures for GPU shaders.
//!
//! These are `#[repr(C)]` structures matching the std140 layout of the WGSL
//! uniform blocks in [`shaders`](crate::gpu::shaders). Every struct is padded
//! to a whole `vec4` (16 bytes).

use bytemuck::{Pod, Zeroable};

/// Dimensions of a matrix product.
///
/// # Layout
///
/// ```text
/// Offset  Size  Field
/// 0       4     m
/// 4       4     k
/// 8       4     n
/// 12      4     _padding
/// ```
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct MatmulUniforms {
    /// Rows of `a` and `c`.
    pub m: u32,
    /// Columns of `a`, rows of `b`.
    pub k: u32,
    /// Columns of `b` and `c`.
    pub n: u32,
    /// Padding.
    pub _padding: u32,
}

impl MatmulUniforms {
    /// Creates uniforms for `[m,k] × [k,n]`.
    pub fn new(m: usize, k: usize, n: usize) -> Self {
        Self {
            m: m as u32,
            k: k as u32,
            n: n as u32,
            _padding: 0,
        }
    }

    /// Returns the size in bytes.
    pub const fn size_bytes() -> usize {
        std::mem::size_of::<Self>()
    }
}

/// Element count for element-wise kernels.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct ElementwiseUniforms {
    /// Number of elements.
    pub len: u32,
    /// Padding.
    pub _padding: [u32; 3],
}

impl ElementwiseUniforms {
    /// Creates uniforms for `len` elements.
    pub fn new(len: usize) -> Self {
        Self {
            len: len as u32,
            _padding: [0; 3],
        }
    }

    /// Returns the size in bytes.
    pub const fn size_bytes() -> usize {
        std::mem::size_of::<Self>()
    }
}
