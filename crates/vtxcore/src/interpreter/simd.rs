//! Coordinate conversion, with shuffle based bodies for three component reads on hosts with
//! SSSE3. Both bodies produce the same bits.
use crate::convert;
use crate::format::Scalar;

#[cfg(target_arch = "x86_64")]
static SSSE3: std::sync::LazyLock<bool> =
    std::sync::LazyLock::new(|| std::arch::is_x86_feature_detected!("ssse3"));

/// Converts `components` big endian values of format `scalar` from `data`. Missing components
/// are zero.
#[inline(always)]
pub fn coords(scalar: Scalar, components: u32, data: &[u8], scale: f32) -> [f32; 3] {
    #[cfg(target_arch = "x86_64")]
    if components == 3 && scalar.size() >= 2 && *SSSE3 {
        // SAFETY: ssse3 is available
        return unsafe { x86::coords3(scalar, data, scale) };
    }

    scalar_coords(scalar, components, data, scale)
}

#[inline(always)]
pub fn scalar_coords(scalar: Scalar, components: u32, data: &[u8], scale: f32) -> [f32; 3] {
    let size = scalar.size() as usize;
    let mut out = [0.0; 3];
    for (i, value) in out.iter_mut().take(components as usize).enumerate() {
        *value = convert::component(scalar, &data[i * size..], scale);
    }

    out
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use crate::format::Scalar;
    use std::arch::x86_64::*;

    /// # Safety
    /// The host must support SSSE3.
    #[target_feature(enable = "ssse3")]
    pub unsafe fn coords3(scalar: Scalar, data: &[u8], scale: f32) -> [f32; 3] {
        let len = 3 * scalar.size() as usize;
        let mut buffer = [0u8; 16];
        buffer[..len].copy_from_slice(&data[..len]);

        let mut out = [0.0f32; 4];
        unsafe {
            let raw = _mm_loadu_si128(buffer.as_ptr().cast());
            let values = match scalar {
                Scalar::F32 => {
                    let swap = _mm_setr_epi8(3, 2, 1, 0, 7, 6, 5, 4, 11, 10, 9, 8, 15, 14, 13, 12);
                    _mm_castsi128_ps(_mm_shuffle_epi8(raw, swap))
                }
                _ => {
                    // each big endian half lands in the upper half of a 32 bit lane
                    let widen =
                        _mm_setr_epi8(-1, -1, 1, 0, -1, -1, 3, 2, -1, -1, 5, 4, -1, -1, -1, -1);
                    let wide = _mm_shuffle_epi8(raw, widen);
                    let ints = if scalar.is_signed() {
                        _mm_srai_epi32::<16>(wide)
                    } else {
                        _mm_srli_epi32::<16>(wide)
                    };

                    _mm_mul_ps(_mm_cvtepi32_ps(ints), _mm_set1_ps(scale))
                }
            };

            _mm_storeu_ps(out.as_mut_ptr(), values);
        }

        [out[0], out[1], out[2]]
    }
}
