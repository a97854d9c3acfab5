//! A catalog of vertex formats covering every attribute shape, and random scenes to parse them in.
//! Used to cross-check parsers against each other.
use crate::convert::FRACTION_TABLE;
use crate::descriptor::{
    AttributeMode, ColorDescriptor, ColorFormat, ColorKind, CoordsFormat, NormalDescriptor,
    NormalKind, PositionDescriptor, PositionKind, TexCoordsDescriptor, TexCoordsKind,
    VertexAttributeTable, VertexDescriptor,
};
use crate::regs::{ArrayDescriptor, Arrays};
use crate::{CanonicalKey, ParseCtx, Scales, VertexFormat};
use nanorand::{Rng, WyRand};
use rustc_hash::FxHashSet;

const ADDRESSING: [AttributeMode; 3] = [
    AttributeMode::Direct,
    AttributeMode::Index8,
    AttributeMode::Index16,
];

const SCALARS: [CoordsFormat; 5] = [
    CoordsFormat::U8,
    CoordsFormat::I8,
    CoordsFormat::U16,
    CoordsFormat::I16,
    CoordsFormat::F32,
];

const PACKINGS: [ColorFormat; 6] = [
    ColorFormat::Rgb565,
    ColorFormat::Rgb888,
    ColorFormat::Rgb888x,
    ColorFormat::Rgba4444,
    ColorFormat::Rgba6666,
    ColorFormat::Rgba8888,
];

fn with_position(mode: AttributeMode, desc: PositionDescriptor) -> VertexFormat {
    let mut vat = VertexAttributeTable::default();
    vat.a = vat.a.with_position(desc);
    VertexFormat::new(VertexDescriptor::default().with_position(mode), vat)
}

fn float_position() -> VertexFormat {
    with_position(
        AttributeMode::Direct,
        PositionDescriptor::new(PositionKind::Vec3, CoordsFormat::F32, 0),
    )
}

fn everything() -> Vec<VertexFormat> {
    let mut formats = Vec::new();
    for (variant, position_mode) in ADDRESSING.into_iter().enumerate() {
        let scalar = |i: usize| SCALARS[(i + variant) % SCALARS.len()];
        let mut format = with_position(
            position_mode,
            PositionDescriptor::new(PositionKind::Vec3, scalar(0), 3),
        );

        format.vcd = format
            .vcd
            .with_pos_mat_index(variant != 1)
            .with_normal(ADDRESSING[(variant + 1) % 3])
            .with_diffuse(ADDRESSING[(variant + 2) % 3])
            .with_specular(ADDRESSING[variant]);
        format.vat.a = format
            .vat
            .a
            .with_normal(NormalDescriptor::new(NormalKind::N9, scalar(1)))
            .with_normal_index3(variant == 0)
            .with_diffuse(ColorDescriptor::new(ColorKind::Rgba, PACKINGS[variant]))
            .with_specular(ColorDescriptor::new(ColorKind::Rgb, PACKINGS[variant + 3]));

        for i in 0..8 {
            let kind = if i % 2 == 0 {
                TexCoordsKind::Vec2
            } else {
                TexCoordsKind::Vec1
            };

            format.vcd = format
                .vcd
                .with_tex_coord_mode(i, ADDRESSING[(i + variant) % 3])
                .with_tex_matrix(i, (i + variant) % 3 == 0);
            format.vat = format
                .vat
                .with_tex(i, TexCoordsDescriptor::new(kind, scalar(i), i as u8));
        }

        formats.push(format);
    }

    formats
}

/// Vertex formats covering every position, normal, color and texture coordinate shape, on their
/// own and all together.
pub fn formats() -> Vec<VertexFormat> {
    let mut formats = Vec::new();

    for mode in ADDRESSING {
        for format in SCALARS {
            for kind in [PositionKind::Vec2, PositionKind::Vec3] {
                for matrix in [false, true] {
                    let mut f = with_position(mode, PositionDescriptor::new(kind, format, 4));
                    f.vcd = f.vcd.with_pos_mat_index(matrix);
                    formats.push(f);
                }
            }
        }
    }

    for mode in ADDRESSING {
        for format in SCALARS {
            for kind in [NormalKind::N3, NormalKind::N9] {
                for index3 in [false, true] {
                    let mut f = float_position();
                    f.vcd = f.vcd.with_normal(mode);
                    f.vat.a = f
                        .vat
                        .a
                        .with_normal(NormalDescriptor::new(kind, format))
                        .with_normal_index3(index3);
                    formats.push(f);
                }
            }
        }
    }

    for slot in 0..2 {
        for mode in ADDRESSING {
            for packing in PACKINGS {
                for kind in [ColorKind::Rgb, ColorKind::Rgba] {
                    let mut f = float_position();
                    let desc = ColorDescriptor::new(kind, packing);
                    if slot == 0 {
                        f.vcd = f.vcd.with_diffuse(mode);
                        f.vat.a = f.vat.a.with_diffuse(desc);
                    } else {
                        f.vcd = f.vcd.with_specular(mode);
                        f.vat.a = f.vat.a.with_specular(desc);
                    }

                    formats.push(f);
                }
            }
        }
    }

    let mut slot = 0;
    for mode in [AttributeMode::None].into_iter().chain(ADDRESSING) {
        for format in SCALARS {
            for kind in [TexCoordsKind::Vec1, TexCoordsKind::Vec2] {
                for matrix in [false, true] {
                    if !mode.is_present() && !matrix {
                        continue;
                    }

                    let mut f = float_position();
                    f.vcd = f
                        .vcd
                        .with_tex_coord_mode(slot, mode)
                        .with_tex_matrix(slot, matrix);
                    f.vat = f
                        .vat
                        .with_tex(slot, TexCoordsDescriptor::new(kind, format, 7));
                    formats.push(f);

                    slot = (slot + 1) % 8;
                }
            }
        }
    }

    formats.extend(everything());

    // matrix only texture coordinates share a key regardless of their format
    let mut seen = FxHashSet::default();
    formats.retain(|f| seen.insert(CanonicalKey::new(f)));
    formats
}

/// Random memory and register state to parse vertices in.
pub struct Scene {
    pub ram: Vec<u8>,
    pub arrays: Arrays,
    pub scales: Scales,
    /// Position matrix index, with the bits above the low 6 set at random too.
    pub pos_matrix: u8,
}

impl Scene {
    /// Large enough that any 16 bit index into any array stays in bounds.
    pub const RAM_LEN: usize = 2 << 20;

    pub fn new(rng: &mut WyRand) -> Self {
        let mut ram = vec![0; Self::RAM_LEN];
        rng.fill_bytes(&mut ram);

        let mut scene = Self {
            ram,
            arrays: Arrays::default(),
            scales: Scales::default(),
            pos_matrix: 0,
        };

        scene.shuffle(rng);
        scene
    }

    /// Picks new arrays, scales and a new position matrix index.
    pub fn shuffle(&mut self, rng: &mut WyRand) {
        self.arrays = Arrays(std::array::from_fn(|_| ArrayDescriptor {
            address: rng.generate_range(0..0x8_0000u32),
            stride: rng.generate_range(0..=16u32),
        }));

        let mut fraction = || FRACTION_TABLE[rng.generate_range(0..32usize)];
        self.scales = Scales {
            position: fraction(),
            tex: std::array::from_fn(|_| fraction()),
        };

        self.pos_matrix = rng.generate::<u8>();
    }

    /// Random vertex stream of `count` vertices.
    pub fn stream(rng: &mut WyRand, input_stride: u32, count: u32) -> Vec<u8> {
        let mut src = vec![0; input_stride as usize * count as usize];
        rng.fill_bytes(&mut src);
        src
    }

    pub fn ctx(&self) -> ParseCtx<'_> {
        ParseCtx {
            ram: &self.ram,
            arrays: &self.arrays,
            scales: self.scales,
            pos_matrix: self.pos_matrix,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn catalog_formats_are_valid() {
        let formats = formats();
        assert!(formats.len() > 250);

        for format in &formats {
            assert!(format.shape().is_ok(), "{}", format.name());
        }
    }

    #[test]
    fn scenes_keep_indices_in_bounds() {
        let mut rng = WyRand::new_seed(1);
        let scene = Scene::new(&mut rng);
        for array in scene.arrays.0 {
            let last = array.address as usize + 0xFFFF * array.stride as usize + 36;
            assert!(last <= scene.ram.len());
        }
    }
}
