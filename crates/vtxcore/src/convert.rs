//! Numeric conversions shared by every parser.
use crate::format::{Packing, Scalar};

/// Reciprocal powers of two, indexed by fraction bits.
pub const FRACTION_TABLE: [f32; 32] = {
    let mut table = [0.0; 32];
    let mut i = 0;
    while i < 32 {
        table[i] = 1.0 / (1u64 << i) as f32;
        i += 1;
    }

    table
};

/// Scale applied to fixed point normals of the given format. Normals have an implicit fraction.
#[inline(always)]
pub const fn normal_scale(scalar: Scalar) -> f32 {
    match scalar {
        Scalar::U8 => FRACTION_TABLE[7],
        Scalar::I8 => FRACTION_TABLE[6],
        Scalar::U16 => FRACTION_TABLE[15],
        Scalar::I16 => FRACTION_TABLE[14],
        Scalar::F32 => 1.0,
    }
}

/// Reads a big endian component of format `scalar` from the start of `data` and converts it.
#[inline(always)]
pub fn component(scalar: Scalar, data: &[u8], scale: f32) -> f32 {
    match scalar {
        Scalar::U8 => data[0] as f32 * scale,
        Scalar::I8 => data[0] as i8 as f32 * scale,
        Scalar::U16 => u16::from_be_bytes([data[0], data[1]]) as f32 * scale,
        Scalar::I16 => i16::from_be_bytes([data[0], data[1]]) as f32 * scale,
        Scalar::F32 => f32::from_bits(u32::from_be_bytes([data[0], data[1], data[2], data[3]])),
    }
}

/// Expands 5 bits to 8.
#[inline(always)]
const fn expand5(x: u32) -> u8 {
    ((x << 3) | (x >> 2)) as u8
}

/// Expands 6 bits to 8.
#[inline(always)]
const fn expand6(x: u32) -> u8 {
    ((x << 2) | (x >> 4)) as u8
}

/// Expands 4 bits to 8.
#[inline(always)]
const fn expand4(x: u32) -> u8 {
    (x * 0x11) as u8
}

/// Decodes a packed color into RGBA bytes. Packings without alpha, or colors declared as RGB,
/// are fully opaque.
pub fn color(packing: Packing, alpha: bool, data: &[u8]) -> [u8; 4] {
    let [r, g, b, a] = match packing {
        Packing::Rgb565 => {
            let v = u16::from_be_bytes([data[0], data[1]]) as u32;
            [
                expand5(v >> 11),
                expand6((v >> 5) & 0x3F),
                expand5(v & 0x1F),
                0xFF,
            ]
        }
        Packing::Rgb888 | Packing::Rgb888x => [data[0], data[1], data[2], 0xFF],
        Packing::Rgba4444 => {
            let v = u16::from_be_bytes([data[0], data[1]]) as u32;
            [
                expand4(v >> 12),
                expand4((v >> 8) & 0xF),
                expand4((v >> 4) & 0xF),
                expand4(v & 0xF),
            ]
        }
        Packing::Rgba6666 => {
            let v = u32::from_be_bytes([0, data[0], data[1], data[2]]);
            [
                expand6(v >> 18),
                expand6((v >> 12) & 0x3F),
                expand6((v >> 6) & 0x3F),
                expand6(v & 0x3F),
            ]
        }
        Packing::Rgba8888 => [data[0], data[1], data[2], data[3]],
    };

    [r, g, b, if alpha { a } else { 0xFF }]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fraction_table_is_exact() {
        for k in 0..32 {
            assert_eq!(FRACTION_TABLE[k], 2.0f32.powi(-(k as i32)));
            for v in [0u16, 1, 3, 255, 0x7FFF, 0xFFFF] {
                let decoded = component(Scalar::U16, &v.to_be_bytes(), FRACTION_TABLE[k]);
                assert_eq!(decoded as f64, v as f64 / (1u64 << k) as f64);
            }

            let decoded = component(Scalar::I8, &[0x80], FRACTION_TABLE[k]);
            assert_eq!(decoded as f64, -128.0 / (1u64 << k) as f64);
        }
    }

    #[test]
    fn floats_are_not_scaled() {
        let bytes = 1.5f32.to_be_bytes();
        assert_eq!(component(Scalar::F32, &bytes, FRACTION_TABLE[9]), 1.5);
    }

    #[test]
    fn white_565() {
        let white = ((0x1F << 11) | (0x3F << 5) | 0x1F) as u16;
        assert_eq!(
            color(Packing::Rgb565, true, &white.to_be_bytes()),
            [255, 255, 255, 255]
        );
        assert_eq!(color(Packing::Rgb565, false, &[0, 0]), [0, 0, 0, 255]);
    }

    #[test]
    fn packings_without_alpha_are_opaque() {
        assert_eq!(color(Packing::Rgb888, true, &[1, 2, 3]), [1, 2, 3, 255]);
        assert_eq!(color(Packing::Rgb888x, true, &[1, 2, 3, 0]), [1, 2, 3, 255]);
        assert_eq!(color(Packing::Rgba8888, false, &[1, 2, 3, 4]), [1, 2, 3, 255]);
        assert_eq!(color(Packing::Rgba8888, true, &[1, 2, 3, 4]), [1, 2, 3, 4]);
    }

    #[test]
    fn packed_channels_replicate() {
        assert_eq!(
            color(Packing::Rgba4444, true, &[0x12, 0x3F]),
            [0x11, 0x22, 0x33, 0xFF]
        );

        // 6666: r = 0b111111, g = 0, b = 0b100000, a = 0b000001
        let v: u32 = (0x3F << 18) | (0x20 << 6) | 0x01;
        let bytes = v.to_be_bytes();
        assert_eq!(
            color(Packing::Rgba6666, true, &bytes[1..]),
            [0xFF, 0x00, 0x82, 0x04]
        );
    }
}
