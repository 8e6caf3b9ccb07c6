//! Scalar reference kernels for the 16-bit vector codec.
//!
//! Quantization is linear over `[-1, 1]`: `q = round(clamp(x) * 32767)`,
//! `x̂ = q / 32767`, so the round-trip error per component is at most
//! `1 / 32767`. Rounding is round-to-nearest-even, matching the SIMD
//! convert instructions, so scalar and SIMD packs are byte-identical.
//!
//! Fused kernels decode and accumulate in SIMD-friendly chunks of 8 with
//! f32 inner accumulators and f64 outer accumulation to bound rounding error.

/// Quantization scale: the packed range is `[-32767, 32767]`.
pub const PACK_SCALE: f32 = 32767.0;

/// Reciprocal scale applied on decode. Multiplication, never division,
/// so every path reconstructs identical floats.
pub const UNPACK_SCALE: f32 = 1.0 / 32767.0;

/// SIMD-friendly chunk size: 8 lanes, one AVX register of f32.
const CHUNK: usize = 8;

#[inline]
fn clamp_unit(x: f32) -> f32 {
    // max-then-min matches the SIMD clamp sequence for NaN inputs
    x.max(-1.0).min(1.0)
}

/// Pack a float slice into i16. `out.len() == src.len()`.
pub fn pack(src: &[f32], out: &mut [i16]) {
    debug_assert_eq!(src.len(), out.len());
    for (x, q) in src.iter().zip(out.iter_mut()) {
        *q = (clamp_unit(*x) * PACK_SCALE).round_ties_even() as i16;
    }
}

/// Unpack an i16 slice back into floats. Lossy inverse of [`pack`].
pub fn unpack(src: &[i16], out: &mut [f32]) {
    debug_assert_eq!(src.len(), out.len());
    for (q, x) in src.iter().zip(out.iter_mut()) {
        *x = *q as f32 * UNPACK_SCALE;
    }
}

/// Fused decode-and-dot: `Σ (q_i / 32767) * y_i` without materializing
/// the decoded vector.
pub fn decode_and_dot(q: &[i16], y: &[f32]) -> f32 {
    debug_assert_eq!(q.len(), y.len());

    let len = q.len();
    let mut sum = 0.0f64;

    let full_chunks = len / CHUNK;
    for c in 0..full_chunks {
        let base = c * CHUNK;
        let mut acc = 0.0f32;
        for j in 0..CHUNK {
            acc += q[base + j] as f32 * UNPACK_SCALE * y[base + j];
        }
        sum += acc as f64;
    }

    for i in (full_chunks * CHUNK)..len {
        sum += (q[i] as f32 * UNPACK_SCALE * y[i]) as f64;
    }

    sum as f32
}

/// Fused decode-and-squared-Euclidean: `Σ (q_i / 32767 - y_i)²`.
pub fn decode_and_euclidean(q: &[i16], y: &[f32]) -> f32 {
    debug_assert_eq!(q.len(), y.len());

    let len = q.len();
    let mut sum = 0.0f64;

    let full_chunks = len / CHUNK;
    for c in 0..full_chunks {
        let base = c * CHUNK;
        let mut acc = 0.0f32;
        for j in 0..CHUNK {
            let d = q[base + j] as f32 * UNPACK_SCALE - y[base + j];
            acc += d * d;
        }
        sum += acc as f64;
    }

    for i in (full_chunks * CHUNK)..len {
        let d = q[i] as f32 * UNPACK_SCALE - y[i];
        sum += (d * d) as f64;
    }

    sum as f32
}

/// Plain f32 dot product, chunked like the fused kernels.
pub fn dot_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let len = a.len();
    let mut sum = 0.0f64;

    let full_chunks = len / CHUNK;
    for c in 0..full_chunks {
        let base = c * CHUNK;
        let mut acc = 0.0f32;
        for j in 0..CHUNK {
            acc += a[base + j] * b[base + j];
        }
        sum += acc as f64;
    }

    for i in (full_chunks * CHUNK)..len {
        sum += (a[i] * b[i]) as f64;
    }

    sum as f32
}
