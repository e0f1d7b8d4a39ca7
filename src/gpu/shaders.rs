//! WGSL shader source code for the device kernels.
//!
//! Each shader runs one invocation per output element with a 1-D
//! workgroup of [`WORKGROUP_SIZE`](crate::gpu::WORKGROUP_SIZE) threads.

/// Matrix product `c = a × b` for row-major `a[m,k]`, `b[k,n]`, `c[m,n]`.
///
/// # Bindings
///
/// - Binding 0: a (storage, read) - [m, k]
/// - Binding 1: b (storage, read) - [k, n]
/// - Binding 2: c (storage, read_write) - [m, n]
/// - Binding 3: dims (uniform) - MatmulUniforms
///
/// The inner product accumulates in ascending `k` order, the same order the
/// host kernel uses.
pub const MATMUL_SHADER: &str = r#"
struct Dims {
    m: u32,
    k: u32,
    n: u32,
    _padding: u32,
}

@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(1) var<storage, read> b: array<f32>;
@group(0) @binding(2) var<storage, read_write> c: array<f32>;
@group(0) @binding(3) var<uniform> dims: Dims;

@compute @workgroup_size(64, 1, 1)
fn matmul_main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let idx = gid.x;
    if (idx >= dims.m * dims.n) {
        return;
    }

    let row = idx / dims.n;
    let col = idx % dims.n;

    var sum: f32 = 0.0;
    for (var p: u32 = 0u; p < dims.k; p = p + 1u) {
        sum = sum + a[row * dims.k + p] * b[p * dims.n + col];
    }
    c[idx] = sum;
}
"#;

/// Element-wise sum `c = a + b`.
///
/// # Bindings
///
/// - Binding 0: a (storage, read)
/// - Binding 1: b (storage, read)
/// - Binding 2: c (storage, read_write)
/// - Binding 3: config (uniform) - ElementwiseUniforms
pub const ADD_SHADER: &str = r#"
struct Config {
    len: u32,
    _padding0: u32,
    _padding1: u32,
    _padding2: u32,
}

@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(1) var<storage, read> b: array<f32>;
@group(0) @binding(2) var<storage, read_write> c: array<f32>;
@group(0) @binding(3) var<uniform> config: Config;

@compute @workgroup_size(64, 1, 1)
fn add_main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let idx = gid.x;
    if (idx >= config.len) {
        return;
    }
    c[idx] = a[idx] + b[idx];
}
"#;

/// Rectified linear unit `out = max(x, 0)`.
///
/// # Bindings
///
/// - Binding 0: x (storage, read)
/// - Binding 1: out (storage, read_write)
/// - Binding 2: config (uniform) - ElementwiseUniforms
pub const RELU_SHADER: &str = r#"
struct Config {
    len: u32,
    _padding0: u32,
    _padding1: u32,
    _padding2: u32,
}

@group(0) @binding(0) var<storage, read> x: array<f32>;
@group(0) @binding(1) var<storage, read_write> out: array<f32>;
@group(0) @binding(2) var<uniform> config: Config;

@compute @workgroup_size(64, 1, 1)
fn relu_main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let idx = gid.x;
    if (idx >= config.len) {
        return;
    }
    out[idx] = max(x[idx], 0.0);
}
"#;
