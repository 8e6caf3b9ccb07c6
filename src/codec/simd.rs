//! SIMD kernels for the 16-bit vector codec.
//!
//! Provides NEON (aarch64) and SSE2 / AVX2+FMA (x86_64) implementations of
//! pack, unpack, and the fused decode-and-distance kernels. Pack and unpack
//! always use the 8-lane path so packed bytes are identical regardless of
//! which dispatch decision the fused kernels take. Dispatch and scalar
//! fallback live in the parent module.

use super::scalar::{PACK_SCALE, UNPACK_SCALE};

// ============================================================================
// SSE2 implementations (x86_64 baseline)
// ============================================================================

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

/// Horizontal sum of 4 f32 values in a __m128 register.
#[cfg(target_arch = "x86_64")]
#[inline]
#[target_feature(enable = "sse2")]
unsafe fn hsum_f32x4(v: __m128) -> f32 {
    let hi64 = _mm_movehl_ps(v, v);
    let sum64 = _mm_add_ps(v, hi64);
    let hi32 = _mm_shuffle_ps(sum64, sum64, 0x55);
    _mm_cvtss_f32(_mm_add_ss(sum64, hi32))
}

/// SSE2 helper: sign-extend 8 i16 values from a __m128i into two f32x4
/// registers, scaled back to `[-1, 1]`.
#[cfg(target_arch = "x86_64")]
#[inline]
#[target_feature(enable = "sse2")]
unsafe fn sse_i16x8_to_f32_deq(s: __m128i, inv: __m128) -> (__m128, __m128) {
    let lo = _mm_srai_epi32(_mm_unpacklo_epi16(s, s), 16);
    let hi = _mm_srai_epi32(_mm_unpackhi_epi16(s, s), 16);
    (
        _mm_mul_ps(_mm_cvtepi32_ps(lo), inv),
        _mm_mul_ps(_mm_cvtepi32_ps(hi), inv),
    )
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
pub unsafe fn sse_pack(src: &[f32], out: &mut [i16]) {
    let len = src.len();
    let s_ptr = src.as_ptr();
    let o_ptr = out.as_mut_ptr();
    let lo = _mm_set1_ps(-1.0);
    let hi = _mm_set1_ps(1.0);
    let scale = _mm_set1_ps(PACK_SCALE);

    for i in (0..len).step_by(8) {
        let a = _mm_min_ps(_mm_max_ps(_mm_loadu_ps(s_ptr.add(i)), lo), hi);
        let b = _mm_min_ps(_mm_max_ps(_mm_loadu_ps(s_ptr.add(i + 4)), lo), hi);
        let ai = _mm_cvtps_epi32(_mm_mul_ps(a, scale));
        let bi = _mm_cvtps_epi32(_mm_mul_ps(b, scale));
        _mm_storeu_si128(o_ptr.add(i) as *mut __m128i, _mm_packs_epi32(ai, bi));
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
pub unsafe fn sse_unpack(src: &[i16], out: &mut [f32]) {
    let len = src.len();
    let s_ptr = src.as_ptr();
    let o_ptr = out.as_mut_ptr();
    let inv = _mm_set1_ps(UNPACK_SCALE);

    for i in (0..len).step_by(8) {
        let s = _mm_loadu_si128(s_ptr.add(i) as *const __m128i);
        let (a, b) = sse_i16x8_to_f32_deq(s, inv);
        _mm_storeu_ps(o_ptr.add(i), a);
        _mm_storeu_ps(o_ptr.add(i + 4), b);
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
pub unsafe fn sse_decode_and_dot(q: &[i16], y: &[f32]) -> f32 {
    let len = q.len();
    let q_ptr = q.as_ptr();
    let y_ptr = y.as_ptr();
    let inv = _mm_set1_ps(UNPACK_SCALE);

    let mut s0 = _mm_setzero_ps();
    let mut s1 = _mm_setzero_ps();

    for i in (0..len).step_by(8) {
        let s = _mm_loadu_si128(q_ptr.add(i) as *const __m128i);
        let (a, b) = sse_i16x8_to_f32_deq(s, inv);
        s0 = _mm_add_ps(s0, _mm_mul_ps(a, _mm_loadu_ps(y_ptr.add(i))));
        s1 = _mm_add_ps(s1, _mm_mul_ps(b, _mm_loadu_ps(y_ptr.add(i + 4))));
    }

    hsum_f32x4(_mm_add_ps(s0, s1))
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
pub unsafe fn sse_decode_and_euclidean(q: &[i16], y: &[f32]) -> f32 {
    let len = q.len();
    let q_ptr = q.as_ptr();
    let y_ptr = y.as_ptr();
    let inv = _mm_set1_ps(UNPACK_SCALE);

    let mut s0 = _mm_setzero_ps();
    let mut s1 = _mm_setzero_ps();

    for i in (0..len).step_by(8) {
        let s = _mm_loadu_si128(q_ptr.add(i) as *const __m128i);
        let (a, b) = sse_i16x8_to_f32_deq(s, inv);
        let d0 = _mm_sub_ps(a, _mm_loadu_ps(y_ptr.add(i)));
        let d1 = _mm_sub_ps(b, _mm_loadu_ps(y_ptr.add(i + 4)));
        s0 = _mm_add_ps(s0, _mm_mul_ps(d0, d0));
        s1 = _mm_add_ps(s1, _mm_mul_ps(d1, d1));
    }

    hsum_f32x4(_mm_add_ps(s0, s1))
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
pub unsafe fn sse_dot_f32(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut s0 = _mm_setzero_ps();
    let mut s1 = _mm_setzero_ps();

    for i in (0..len).step_by(8) {
        s0 = _mm_add_ps(
            s0,
            _mm_mul_ps(_mm_loadu_ps(a_ptr.add(i)), _mm_loadu_ps(b_ptr.add(i))),
        );
        s1 = _mm_add_ps(
            s1,
            _mm_mul_ps(
                _mm_loadu_ps(a_ptr.add(i + 4)),
                _mm_loadu_ps(b_ptr.add(i + 4)),
            ),
        );
    }

    hsum_f32x4(_mm_add_ps(s0, s1))
}

// ============================================================================
// AVX2+FMA implementations (x86_64, runtime-detected)
// ============================================================================

/// Horizontal sum of 8 f32 values in a __m256 register.
#[cfg(target_arch = "x86_64")]
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn hsum_f32x8(v: __m256) -> f32 {
    let hi128 = _mm256_extractf128_ps(v, 1);
    let lo128 = _mm256_castps256_ps128(v);
    let sum128 = _mm_add_ps(lo128, hi128);
    let hi64 = _mm_movehl_ps(sum128, sum128);
    let sum64 = _mm_add_ps(sum128, hi64);
    let hi32 = _mm_shuffle_ps(sum64, sum64, 0x55);
    _mm_cvtss_f32(_mm_add_ss(sum64, hi32))
}

/// AVX2 helper: sign-extend 16 i16 values into two f32x8 registers,
/// scaled back to `[-1, 1]`.
#[cfg(target_arch = "x86_64")]
#[inline]
#[target_feature(enable = "avx2,fma")]
unsafe fn avx2_i16x16_to_f32_deq(s: __m256i, inv: __m256) -> (__m256, __m256) {
    let lo = _mm256_cvtepi16_epi32(_mm256_castsi256_si128(s));
    let hi = _mm256_cvtepi16_epi32(_mm256_extracti128_si256(s, 1));
    (
        _mm256_mul_ps(_mm256_cvtepi32_ps(lo), inv),
        _mm256_mul_ps(_mm256_cvtepi32_ps(hi), inv),
    )
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
pub unsafe fn avx2_decode_and_dot(q: &[i16], y: &[f32]) -> f32 {
    let len = q.len();
    let q_ptr = q.as_ptr();
    let y_ptr = y.as_ptr();
    let inv = _mm256_set1_ps(UNPACK_SCALE);

    let mut s0 = _mm256_setzero_ps();
    let mut s1 = _mm256_setzero_ps();

    let chunks = len / 16;
    for i in 0..chunks {
        let base = i * 16;
        let s = _mm256_loadu_si256(q_ptr.add(base) as *const __m256i);
        let (a, b) = avx2_i16x16_to_f32_deq(s, inv);
        s0 = _mm256_fmadd_ps(a, _mm256_loadu_ps(y_ptr.add(base)), s0);
        s1 = _mm256_fmadd_ps(b, _mm256_loadu_ps(y_ptr.add(base + 8)), s1);
    }

    let mut sum = hsum_f32x8(_mm256_add_ps(s0, s1));

    // dim is a multiple of 8, so the tail is at most one 8-lane chunk
    for i in (chunks * 16)..len {
        sum += *q_ptr.add(i) as f32 * UNPACK_SCALE * *y_ptr.add(i);
    }
    sum
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
pub unsafe fn avx2_decode_and_euclidean(q: &[i16], y: &[f32]) -> f32 {
    let len = q.len();
    let q_ptr = q.as_ptr();
    let y_ptr = y.as_ptr();
    let inv = _mm256_set1_ps(UNPACK_SCALE);

    let mut s0 = _mm256_setzero_ps();
    let mut s1 = _mm256_setzero_ps();

    let chunks = len / 16;
    for i in 0..chunks {
        let base = i * 16;
        let s = _mm256_loadu_si256(q_ptr.add(base) as *const __m256i);
        let (a, b) = avx2_i16x16_to_f32_deq(s, inv);
        let d0 = _mm256_sub_ps(a, _mm256_loadu_ps(y_ptr.add(base)));
        let d1 = _mm256_sub_ps(b, _mm256_loadu_ps(y_ptr.add(base + 8)));
        s0 = _mm256_fmadd_ps(d0, d0, s0);
        s1 = _mm256_fmadd_ps(d1, d1, s1);
    }

    let mut sum = hsum_f32x8(_mm256_add_ps(s0, s1));

    for i in (chunks * 16)..len {
        let d = *q_ptr.add(i) as f32 * UNPACK_SCALE - *y_ptr.add(i);
        sum += d * d;
    }
    sum
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
pub unsafe fn avx2_dot_f32(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut s0 = _mm256_setzero_ps();
    let mut s1 = _mm256_setzero_ps();

    let chunks = len / 16;
    for i in 0..chunks {
        let base = i * 16;
        s0 = _mm256_fmadd_ps(
            _mm256_loadu_ps(a_ptr.add(base)),
            _mm256_loadu_ps(b_ptr.add(base)),
            s0,
        );
        s1 = _mm256_fmadd_ps(
            _mm256_loadu_ps(a_ptr.add(base + 8)),
            _mm256_loadu_ps(b_ptr.add(base + 8)),
            s1,
        );
    }

    let mut sum = hsum_f32x8(_mm256_add_ps(s0, s1));

    for i in (chunks * 16)..len {
        sum += *a_ptr.add(i) * *b_ptr.add(i);
    }
    sum
}

// ============================================================================
// NEON implementations (aarch64)
// ============================================================================

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

/// NEON helper: sign-extend 8 i16 values into two f32x4 registers,
/// scaled back to `[-1, 1]`.
#[cfg(target_arch = "aarch64")]
#[inline(always)]
unsafe fn neon_i16x8_to_f32_deq(s: int16x8_t, inv: float32x4_t) -> (float32x4_t, float32x4_t) {
    let lo = vcvtq_f32_s32(vmovl_s16(vget_low_s16(s)));
    let hi = vcvtq_f32_s32(vmovl_s16(vget_high_s16(s)));
    (vmulq_f32(lo, inv), vmulq_f32(hi, inv))
}

#[cfg(target_arch = "aarch64")]
pub unsafe fn neon_pack(src: &[f32], out: &mut [i16]) {
    let len = src.len();
    let s_ptr = src.as_ptr();
    let o_ptr = out.as_mut_ptr();
    let lo = vdupq_n_f32(-1.0);
    let hi = vdupq_n_f32(1.0);
    let scale = vdupq_n_f32(PACK_SCALE);

    for i in (0..len).step_by(8) {
        let a = vminq_f32(vmaxq_f32(vld1q_f32(s_ptr.add(i)), lo), hi);
        let b = vminq_f32(vmaxq_f32(vld1q_f32(s_ptr.add(i + 4)), lo), hi);
        // round-to-nearest-even convert, matching cvtps on x86
        let ai = vcvtnq_s32_f32(vmulq_f32(a, scale));
        let bi = vcvtnq_s32_f32(vmulq_f32(b, scale));
        vst1q_s16(o_ptr.add(i), vcombine_s16(vqmovn_s32(ai), vqmovn_s32(bi)));
    }
}

#[cfg(target_arch = "aarch64")]
pub unsafe fn neon_unpack(src: &[i16], out: &mut [f32]) {
    let len = src.len();
    let s_ptr = src.as_ptr();
    let o_ptr = out.as_mut_ptr();
    let inv = vdupq_n_f32(UNPACK_SCALE);

    for i in (0..len).step_by(8) {
        let s = vld1q_s16(s_ptr.add(i));
        let (a, b) = neon_i16x8_to_f32_deq(s, inv);
        vst1q_f32(o_ptr.add(i), a);
        vst1q_f32(o_ptr.add(i + 4), b);
    }
}

#[cfg(target_arch = "aarch64")]
pub unsafe fn neon_decode_and_dot(q: &[i16], y: &[f32]) -> f32 {
    let len = q.len();
    let q_ptr = q.as_ptr();
    let y_ptr = y.as_ptr();
    let inv = vdupq_n_f32(UNPACK_SCALE);

    let mut s0 = vdupq_n_f32(0.0);
    let mut s1 = vdupq_n_f32(0.0);

    for i in (0..len).step_by(8) {
        let s = vld1q_s16(q_ptr.add(i));
        let (a, b) = neon_i16x8_to_f32_deq(s, inv);
        s0 = vfmaq_f32(s0, a, vld1q_f32(y_ptr.add(i)));
        s1 = vfmaq_f32(s1, b, vld1q_f32(y_ptr.add(i + 4)));
    }

    vaddvq_f32(vaddq_f32(s0, s1))
}

#[cfg(target_arch = "aarch64")]
pub unsafe fn neon_decode_and_euclidean(q: &[i16], y: &[f32]) -> f32 {
    let len = q.len();
    let q_ptr = q.as_ptr();
    let y_ptr = y.as_ptr();
    let inv = vdupq_n_f32(UNPACK_SCALE);

    let mut s0 = vdupq_n_f32(0.0);
    let mut s1 = vdupq_n_f32(0.0);

    for i in (0..len).step_by(8) {
        let s = vld1q_s16(q_ptr.add(i));
        let (a, b) = neon_i16x8_to_f32_deq(s, inv);
        let d0 = vsubq_f32(a, vld1q_f32(y_ptr.add(i)));
        let d1 = vsubq_f32(b, vld1q_f32(y_ptr.add(i + 4)));
        s0 = vfmaq_f32(s0, d0, d0);
        s1 = vfmaq_f32(s1, d1, d1);
    }

    vaddvq_f32(vaddq_f32(s0, s1))
}

#[cfg(target_arch = "aarch64")]
pub unsafe fn neon_dot_f32(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut s0 = vdupq_n_f32(0.0);
    let mut s1 = vdupq_n_f32(0.0);

    for i in (0..len).step_by(8) {
        s0 = vfmaq_f32(s0, vld1q_f32(a_ptr.add(i)), vld1q_f32(b_ptr.add(i)));
        s1 = vfmaq_f32(s1, vld1q_f32(a_ptr.add(i + 4)), vld1q_f32(b_ptr.add(i + 4)));
    }

    vaddvq_f32(vaddq_f32(s0, s1))
}
