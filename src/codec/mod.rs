//! 16-bit vector packing codec with SIMD-accelerated kernels.
//!
//! Floats in `[-1, 1]` pack linearly to `i16` (`q = round(x * 32767)`),
//! halving storage and memory bandwidth versus f32 nodes. The fused
//! decode-and-distance kernels never materialize the decoded vector.
//!
//! Dispatch: NEON on aarch64, AVX2+FMA when runtime-detected on x86_64
//! (fused kernels only), SSE2 otherwise, scalar chunked loops on other
//! platforms and for lengths that are not a lane multiple. Pack and unpack
//! always take the 8-lane path so packed output is byte-identical across
//! dispatch decisions; fused kernels across widths agree within `2e-4`.

/// Scalar reference kernels and quantization constants.
pub mod scalar;
/// SSE2 / AVX2+FMA (x86_64) and NEON (aarch64) kernels.
pub mod simd;

pub use scalar::{PACK_SCALE, UNPACK_SCALE};

/// True when the slice length divides into 8-lane SIMD steps.
#[inline]
fn lane_aligned(len: usize) -> bool {
    len % 8 == 0
}

/// Pack a float slice into i16: `round(clamp(x, -1, 1) * 32767)`.
#[inline]
#[allow(unreachable_code)]
pub fn pack(src: &[f32], out: &mut [i16]) {
    assert_eq!(src.len(), out.len());
    if lane_aligned(src.len()) {
        #[cfg(target_arch = "aarch64")]
        {
            return unsafe { simd::neon_pack(src, out) };
        }
        #[cfg(target_arch = "x86_64")]
        {
            return unsafe { simd::sse_pack(src, out) };
        }
    }
    scalar::pack(src, out)
}

/// Unpack an i16 slice back into floats: `q / 32767`.
#[inline]
#[allow(unreachable_code)]
pub fn unpack(src: &[i16], out: &mut [f32]) {
    assert_eq!(src.len(), out.len());
    if lane_aligned(src.len()) {
        #[cfg(target_arch = "aarch64")]
        {
            return unsafe { simd::neon_unpack(src, out) };
        }
        #[cfg(target_arch = "x86_64")]
        {
            return unsafe { simd::sse_unpack(src, out) };
        }
    }
    scalar::unpack(src, out)
}

/// Fused decode-and-dot: `Σ (q_i / 32767) * y_i`.
#[inline]
#[allow(unreachable_code)]
pub fn decode_and_dot(q: &[i16], y: &[f32]) -> f32 {
    debug_assert_eq!(q.len(), y.len());
    if lane_aligned(q.len()) {
        #[cfg(target_arch = "aarch64")]
        {
            return unsafe { simd::neon_decode_and_dot(q, y) };
        }
        #[cfg(target_arch = "x86_64")]
        {
            if std::arch::is_x86_feature_detected!("avx2")
                && std::arch::is_x86_feature_detected!("fma")
            {
                return unsafe { simd::avx2_decode_and_dot(q, y) };
            }
            return unsafe { simd::sse_decode_and_dot(q, y) };
        }
    }
    scalar::decode_and_dot(q, y)
}

/// Fused decode-and-squared-Euclidean: `Σ (q_i / 32767 - y_i)²`.
#[inline]
#[allow(unreachable_code)]
pub fn decode_and_euclidean(q: &[i16], y: &[f32]) -> f32 {
    debug_assert_eq!(q.len(), y.len());
    if lane_aligned(q.len()) {
        #[cfg(target_arch = "aarch64")]
        {
            return unsafe { simd::neon_decode_and_euclidean(q, y) };
        }
        #[cfg(target_arch = "x86_64")]
        {
            if std::arch::is_x86_feature_detected!("avx2")
                && std::arch::is_x86_feature_detected!("fma")
            {
                return unsafe { simd::avx2_decode_and_euclidean(q, y) };
            }
            return unsafe { simd::sse_decode_and_euclidean(q, y) };
        }
    }
    scalar::decode_and_euclidean(q, y)
}

/// Plain f32 dot product (build-phase margins and hyperplane projections).
#[inline]
#[allow(unreachable_code)]
pub fn dot_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    if lane_aligned(a.len()) {
        #[cfg(target_arch = "aarch64")]
        {
            return unsafe { simd::neon_dot_f32(a, b) };
        }
        #[cfg(target_arch = "x86_64")]
        {
            if std::arch::is_x86_feature_detected!("avx2")
                && std::arch::is_x86_feature_detected!("fma")
            {
                return unsafe { simd::avx2_dot_f32(a, b) };
            }
            return unsafe { simd::sse_dot_f32(a, b) };
        }
    }
    scalar::dot_f32(a, b)
}
