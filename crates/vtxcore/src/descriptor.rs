//! Raw vertex descriptor and attribute table registers.
use bitos::{bitos, integer::u5};

#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AttributeMode {
    /// Not present.
    #[default]
    None = 0b00,
    /// Present, stored inline in the vertex stream.
    Direct = 0b01,
    /// Present, stored in an array and referenced through an 8 bit index.
    Index8 = 0b10,
    /// Present, stored in an array and referenced through a 16 bit index.
    Index16 = 0b11,
}

impl AttributeMode {
    #[inline(always)]
    pub fn is_present(self) -> bool {
        self != Self::None
    }

    #[inline(always)]
    pub fn is_indexed(self) -> bool {
        matches!(self, Self::Index8 | Self::Index16)
    }

    /// Size of the index in the vertex stream, if this mode is indexed.
    #[inline(always)]
    pub fn index_size(self) -> Option<u32> {
        match self {
            Self::Index8 => Some(1),
            Self::Index16 => Some(2),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "Inv",
            Self::Direct => "Dir",
            Self::Index8 => "I8",
            Self::Index16 => "I16",
        }
    }
}

#[bitos(1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PositionKind {
    /// Two components (x, y).
    #[default]
    Vec2 = 0b0,
    /// Three components (x, y, z).
    Vec3 = 0b1,
}

#[bitos(3)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CoordsFormat {
    #[default]
    U8 = 0b000,
    I8 = 0b001,
    U16 = 0b010,
    I16 = 0b011,
    F32 = 0b100,
    Reserved0 = 0b101,
    Reserved1 = 0b110,
    Reserved2 = 0b111,
}

impl CoordsFormat {
    /// Size of a single component, or `None` for reserved formats.
    pub fn size(self) -> Option<u32> {
        match self {
            Self::U8 | Self::I8 => Some(1),
            Self::U16 | Self::I16 => Some(2),
            Self::F32 => Some(4),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::I8 => "s8",
            Self::U16 => "u16",
            Self::I16 => "s16",
            Self::F32 => "flt",
            _ => "Inv",
        }
    }
}

#[bitos(9)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PositionDescriptor {
    #[bits(0)]
    pub kind: PositionKind,
    #[bits(1..4)]
    pub format: CoordsFormat,
    #[bits(4..9)]
    pub shift: u5,
}

#[bitos(1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NormalKind {
    /// A single normal.
    #[default]
    N3 = 0b0,
    /// Normal, binormal and tangent.
    N9 = 0b1,
}

#[bitos(4)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NormalDescriptor {
    #[bits(0)]
    pub kind: NormalKind,
    #[bits(1..4)]
    pub format: CoordsFormat,
}

#[bitos(1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorKind {
    /// Three components (r, g, b).
    #[default]
    Rgb = 0b0,
    /// Four components (r, g, b, a).
    Rgba = 0b1,
}

#[bitos(3)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorFormat {
    #[default]
    Rgb565 = 0b000,
    Rgb888 = 0b001,
    Rgb888x = 0b010,
    Rgba4444 = 0b011,
    Rgba6666 = 0b100,
    Rgba8888 = 0b101,
    Reserved0 = 0b110,
    Reserved1 = 0b111,
}

impl ColorFormat {
    /// Size of a color in this format, or `None` for reserved formats.
    pub fn size(self) -> Option<u32> {
        match self {
            Self::Rgb565 | Self::Rgba4444 => Some(2),
            Self::Rgb888 | Self::Rgba6666 => Some(3),
            Self::Rgb888x | Self::Rgba8888 => Some(4),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rgb565 => "565",
            Self::Rgb888 => "888",
            Self::Rgb888x => "888x",
            Self::Rgba4444 => "4444",
            Self::Rgba6666 => "6666",
            Self::Rgba8888 => "8888",
            _ => "Inv",
        }
    }
}

#[bitos(4)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ColorDescriptor {
    #[bits(0)]
    pub kind: ColorKind,
    #[bits(1..4)]
    pub format: ColorFormat,
}

#[bitos(1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TexCoordsKind {
    /// One component (s).
    #[default]
    Vec1 = 0b0,
    /// Two components (s, t).
    Vec2 = 0b1,
}

#[bitos(9)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TexCoordsDescriptor {
    #[bits(0)]
    pub kind: TexCoordsKind,
    #[bits(1..4)]
    pub format: CoordsFormat,
    #[bits(4..9)]
    pub shift: u5,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VertexAttributeTableA {
    #[bits(0..9)]
    pub position: PositionDescriptor,
    #[bits(9..13)]
    pub normal: NormalDescriptor,
    #[bits(13..17)]
    pub diffuse: ColorDescriptor,
    #[bits(17..21)]
    pub specular: ColorDescriptor,
    #[bits(21..30)]
    pub tex0: TexCoordsDescriptor,
    #[bits(30)]
    pub byte_dequant: bool,
    /// Whether indexed N9 normals use one index per normal.
    #[bits(31)]
    pub normal_index3: bool,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VertexAttributeTableB {
    #[bits(0..27)]
    pub tex1to3: [TexCoordsDescriptor; 3],

    #[bits(27)]
    pub tex4_kind: TexCoordsKind,
    #[bits(28..31)]
    pub tex4_format: CoordsFormat,

    #[bits(31)]
    pub vcache_enhance: bool,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VertexAttributeTableC {
    #[bits(0..5)]
    pub tex4_shift: u5,
    #[bits(5..32)]
    pub tex5to7: [TexCoordsDescriptor; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VertexAttributeTable {
    pub a: VertexAttributeTableA,
    pub b: VertexAttributeTableB,
    pub c: VertexAttributeTableC,
}

impl VertexAttributeTable {
    pub fn from_words([a, b, c]: [u32; 3]) -> Self {
        Self {
            a: VertexAttributeTableA::from_bits(a),
            b: VertexAttributeTableB::from_bits(b),
            c: VertexAttributeTableC::from_bits(c),
        }
    }

    pub fn words(&self) -> [u32; 3] {
        [self.a.to_bits(), self.b.to_bits(), self.c.to_bits()]
    }

    /// Descriptor of texture coordinate `index`, which is split across registers for some indices.
    pub fn tex(&self, index: usize) -> Option<TexCoordsDescriptor> {
        Some(match index {
            0 => self.a.tex0(),
            1..4 => self.b.tex1to3_at(index - 1).unwrap_or_default(),
            4 => TexCoordsDescriptor::default()
                .with_kind(self.b.tex4_kind())
                .with_format(self.b.tex4_format())
                .with_shift(self.c.tex4_shift()),
            5..8 => self.c.tex5to7_at(index - 5).unwrap_or_default(),
            _ => return None,
        })
    }

    /// Returns this table with texture coordinate `index` replaced. Indices past 7 are ignored.
    pub fn with_tex(mut self, index: usize, desc: TexCoordsDescriptor) -> Self {
        match index {
            0 => self.a = self.a.with_tex0(desc),
            1..4 => {
                let mut tex: [TexCoordsDescriptor; 3] =
                    std::array::from_fn(|i| self.b.tex1to3_at(i).unwrap_or_default());
                tex[index - 1] = desc;
                self.b = self.b.with_tex1to3(tex);
            }
            4 => {
                self.b = self
                    .b
                    .with_tex4_kind(desc.kind())
                    .with_tex4_format(desc.format());
                self.c = self.c.with_tex4_shift(desc.shift());
            }
            5..8 => {
                let mut tex: [TexCoordsDescriptor; 3] =
                    std::array::from_fn(|i| self.c.tex5to7_at(i).unwrap_or_default());
                tex[index - 5] = desc;
                self.c = self.c.with_tex5to7(tex);
            }
            _ => (),
        }

        self
    }
}

/// Which attributes are present in a vertex and how they are stored.
#[bitos(64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VertexDescriptor {
    /// Whether the position/normal matrix index is present.
    #[bits(0)]
    pub pos_mat_index: bool,
    /// Whether the texture coordinate matrix N index is present.
    #[bits(1..9)]
    pub tex_coord_mat_index: [bool; 8],
    #[bits(9..11)]
    pub position: AttributeMode,
    #[bits(11..13)]
    pub normal: AttributeMode,
    #[bits(13..15)]
    pub diffuse: AttributeMode,
    #[bits(15..17)]
    pub specular: AttributeMode,
    #[bits(32..48)]
    pub tex_coord: [AttributeMode; 8],
}

impl VertexDescriptor {
    pub const LOW_MASK: u32 = 0x0001_FFFF;
    pub const HIGH_MASK: u32 = 0x0000_FFFF;

    pub fn low(&self) -> u32 {
        self.to_bits() as u32 & Self::LOW_MASK
    }

    pub fn high(&self) -> u32 {
        (self.to_bits() >> 32) as u32 & Self::HIGH_MASK
    }

    pub fn from_halves(low: u32, high: u32) -> Self {
        Self::from_bits(
            (low & Self::LOW_MASK) as u64 | (((high & Self::HIGH_MASK) as u64) << 32),
        )
    }

    /// The 33 bit packed form: the low half followed by the high half.
    pub fn legacy(&self) -> u64 {
        self.low() as u64 | ((self.high() as u64) << 17)
    }

    pub fn from_legacy(legacy: u64) -> Self {
        Self::from_halves(legacy as u32, (legacy >> 17) as u32)
    }

    pub fn color(&self, index: usize) -> AttributeMode {
        if index == 0 {
            self.diffuse()
        } else {
            self.specular()
        }
    }

    pub fn tex_coord_mode(&self, index: usize) -> AttributeMode {
        self.tex_coord_at(index).unwrap_or_default()
    }

    pub fn tex_matrix(&self, index: usize) -> bool {
        self.tex_coord_mat_index_at(index).unwrap_or_default()
    }

    pub fn with_tex_coord_mode(self, index: usize, mode: AttributeMode) -> Self {
        let mut modes: [AttributeMode; 8] = std::array::from_fn(|i| self.tex_coord_mode(i));
        if let Some(m) = modes.get_mut(index) {
            *m = mode;
        }

        self.with_tex_coord(modes)
    }

    pub fn with_tex_matrix(self, index: usize, present: bool) -> Self {
        let mut flags: [bool; 8] = std::array::from_fn(|i| self.tex_matrix(i));
        if let Some(f) = flags.get_mut(index) {
            *f = present;
        }

        self.with_tex_coord_mat_index(flags)
    }
}

impl ColorDescriptor {
    pub fn new(kind: ColorKind, format: ColorFormat) -> Self {
        Self::default().with_kind(kind).with_format(format)
    }
}

impl PositionDescriptor {
    pub fn new(kind: PositionKind, format: CoordsFormat, shift: u8) -> Self {
        Self::default()
            .with_kind(kind)
            .with_format(format)
            .with_shift(u5::new(shift & 0x1F))
    }
}

impl TexCoordsDescriptor {
    pub fn new(kind: TexCoordsKind, format: CoordsFormat, shift: u8) -> Self {
        Self::default()
            .with_kind(kind)
            .with_format(format)
            .with_shift(u5::new(shift & 0x1F))
    }
}

impl NormalDescriptor {
    pub fn new(kind: NormalKind, format: CoordsFormat) -> Self {
        Self::default().with_kind(kind).with_format(format)
    }
}
