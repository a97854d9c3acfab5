//! Canonical identity of a vertex format.
use crate::descriptor::{VertexAttributeTable, VertexDescriptor};
use crate::format::VertexFormat;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

const FRACTION_MASK: [u32; 3] = [0x3E00_01F0, 0x07C3_E1F0, 0xF87C_3E1F];

const NORMAL_MASK: u32 = 0x8000_1E00;
const COLOR_MASK: [u32; 2] = [0x0001_E000, 0x001E_0000];
const TEX0_MASK: u32 = 0x3FE0_0000;
const TEX_B_MASK: [u32; 4] = [0x0000_01FF, 0x0003_FE00, 0x07FC_0000, 0x7800_0000];
const TEX_C_MASK: [u32; 4] = [0x0000_001F, 0x0000_3FE0, 0x007F_C000, 0xFF80_0000];

/// Masked projection of a vertex format that keeps only what determines the shape of its decode
/// program, together with a hash of it.
///
/// Word 0 holds the vertex descriptor without the position matrix flag, words 1 to 3 the attribute
/// tables. The position matrix flag lives in bit 31 of word 2.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalKey {
    words: [u32; 4],
    hash: u64,
}

impl CanonicalKey {
    pub fn new(format: &VertexFormat) -> Self {
        let vcd = &format.vcd;
        let [a, b, c] = format.vat.words();

        let mut mask = [!FRACTION_MASK[0], !FRACTION_MASK[1], !FRACTION_MASK[2]];
        if !vcd.normal().is_present() {
            mask[0] &= !NORMAL_MASK;
        }

        for (i, color_mask) in COLOR_MASK.into_iter().enumerate() {
            if !vcd.color(i).is_present() {
                mask[0] &= !color_mask;
            }
        }

        let unused = |i: usize| !vcd.tex_coord_mode(i).is_present();
        if unused(0) && !vcd.tex_matrix(0) {
            mask[0] &= !TEX0_MASK;
        }

        for i in 1..4 {
            if unused(i) {
                mask[1] &= !TEX_B_MASK[i - 1];
            }
        }

        if unused(4) {
            mask[1] &= !TEX_B_MASK[3];
            mask[2] &= !TEX_C_MASK[0];
        }

        for i in 5..8 {
            if unused(i) {
                mask[2] &= !TEX_C_MASK[i - 4];
            }
        }

        let w0 = (vcd.legacy() >> 1) as u32;
        let w2 = (b & mask[1] & 0x7FFF_FFFF) | ((vcd.pos_mat_index() as u32) << 31);

        Self::from_words([w0, a & mask[0], w2, c & mask[2]])
    }

    pub fn from_words(words: [u32; 4]) -> Self {
        let hash = words.iter().fold(u64::MAX, |h, &w| {
            h.wrapping_mul(137).wrapping_add(w as u64)
        });

        Self { words, hash }
    }

    #[inline(always)]
    pub fn words(&self) -> [u32; 4] {
        self.words
    }

    #[inline(always)]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// The fraction free format this key was derived from.
    pub fn format(&self) -> VertexFormat {
        let [w0, w1, w2, w3] = self.words;
        let legacy = ((w0 as u64) << 1) | (w2 >> 31) as u64;

        VertexFormat {
            vcd: VertexDescriptor::from_legacy(legacy),
            vat: VertexAttributeTable::from_words([w1, w2 & 0x7FFF_FFFF, w3]),
        }
    }
}

impl PartialEq for CanonicalKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.words == other.words
    }
}

impl Eq for CanonicalKey {}

impl Hash for CanonicalKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl PartialOrd for CanonicalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CanonicalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.words.cmp(&other.words)
    }
}

impl From<&VertexFormat> for CanonicalKey {
    fn from(format: &VertexFormat) -> Self {
        Self::new(format)
    }
}
