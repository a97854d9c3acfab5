//! Validated view of a vertex format.
use crate::descriptor::{
    AttributeMode, ColorFormat, ColorKind, CoordsFormat, NormalKind, PositionKind, TexCoordsKind,
    VertexAttributeTable, VertexDescriptor,
};
use easyerr::Error;
use std::fmt::Write;

/// A vertex attribute, as named in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Position,
    Normal,
    Color(u8),
    TexCoord(u8),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("vertex format has no position")]
    MissingPosition,
    #[error("{attribute:?} uses a reserved format")]
    ReservedFormat { attribute: Attribute },
    #[error("native layout needs {attributes} attributes and {stride} bytes, which exceeds the slot budget")]
    LayoutBudget { attributes: u32, stride: u32 },
}

/// The descriptor and attribute table that together describe a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VertexFormat {
    pub vcd: VertexDescriptor,
    pub vat: VertexAttributeTable,
}

/// How the data of an attribute is located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Addressing {
    Direct,
    Index8,
    Index16,
}

impl Addressing {
    fn from_mode(mode: AttributeMode) -> Option<Self> {
        match mode {
            AttributeMode::None => None,
            AttributeMode::Direct => Some(Self::Direct),
            AttributeMode::Index8 => Some(Self::Index8),
            AttributeMode::Index16 => Some(Self::Index16),
        }
    }

    /// Size of the index in the vertex stream, zero when direct.
    #[inline(always)]
    pub fn index_size(self) -> u32 {
        match self {
            Self::Direct => 0,
            Self::Index8 => 1,
            Self::Index16 => 2,
        }
    }

    /// The index value that marks a vertex as having no data.
    #[inline(always)]
    pub fn sentinel(self) -> Option<u16> {
        match self {
            Self::Direct => None,
            Self::Index8 => Some(0xFF),
            Self::Index16 => Some(0xFFFF),
        }
    }
}

/// Numeric format of a coordinate component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scalar {
    U8,
    I8,
    U16,
    I16,
    F32,
}

impl Scalar {
    fn from_format(format: CoordsFormat) -> Option<Self> {
        Some(match format {
            CoordsFormat::U8 => Self::U8,
            CoordsFormat::I8 => Self::I8,
            CoordsFormat::U16 => Self::U16,
            CoordsFormat::I16 => Self::I16,
            CoordsFormat::F32 => Self::F32,
            _ => return None,
        })
    }

    #[inline(always)]
    pub fn size(self) -> u32 {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::F32 => 4,
        }
    }

    #[inline(always)]
    pub fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16)
    }
}

/// Packed format of a color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Packing {
    Rgb565,
    Rgb888,
    Rgb888x,
    Rgba4444,
    Rgba6666,
    Rgba8888,
}

impl Packing {
    fn from_format(format: ColorFormat) -> Option<Self> {
        Some(match format {
            ColorFormat::Rgb565 => Self::Rgb565,
            ColorFormat::Rgb888 => Self::Rgb888,
            ColorFormat::Rgb888x => Self::Rgb888x,
            ColorFormat::Rgba4444 => Self::Rgba4444,
            ColorFormat::Rgba6666 => Self::Rgba6666,
            ColorFormat::Rgba8888 => Self::Rgba8888,
            _ => return None,
        })
    }

    #[inline(always)]
    pub fn size(self) -> u32 {
        match self {
            Self::Rgb565 | Self::Rgba4444 => 2,
            Self::Rgb888 | Self::Rgba6666 => 3,
            Self::Rgb888x | Self::Rgba8888 => 4,
        }
    }
}

/// A coordinate attribute: a position or a texture coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coords {
    pub addressing: Addressing,
    pub scalar: Scalar,
    /// Number of components, 1 to 3.
    pub components: u32,
}

impl Coords {
    /// Size of the coordinate data itself, wherever it is stored.
    #[inline(always)]
    pub fn data_size(&self) -> u32 {
        self.components * self.scalar.size()
    }

    /// Bytes this attribute takes in the vertex stream.
    #[inline(always)]
    pub fn stream_size(&self) -> u32 {
        match self.addressing {
            Addressing::Direct => self.data_size(),
            other => other.index_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Normals {
    pub addressing: Addressing,
    pub scalar: Scalar,
    /// Number of normals, 1 or 3.
    pub count: u32,
    /// Whether each of the three normals has its own index.
    pub index3: bool,
}

impl Normals {
    /// Size of a single normal.
    #[inline(always)]
    pub fn normal_size(&self) -> u32 {
        3 * self.scalar.size()
    }

    #[inline(always)]
    pub fn stream_size(&self) -> u32 {
        match self.addressing {
            Addressing::Direct => self.count * self.normal_size(),
            other if self.index3 => 3 * other.index_size(),
            other => other.index_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub addressing: Addressing,
    pub packing: Packing,
    pub alpha: bool,
}

impl Color {
    #[inline(always)]
    pub fn stream_size(&self) -> u32 {
        match self.addressing {
            Addressing::Direct => self.packing.size(),
            other => other.index_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TexCoord {
    pub coords: Option<Coords>,
    /// Whether a matrix index precedes the vertex.
    pub matrix: bool,
}

impl TexCoord {
    #[inline(always)]
    pub fn is_present(&self) -> bool {
        self.coords.is_some() || self.matrix
    }
}

/// The decode shape of a vertex format: every present attribute with its addressing and numeric
/// format. Fractions are not part of the shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape {
    pub pos_matrix: bool,
    pub position: Coords,
    pub normals: Option<Normals>,
    pub colors: [Option<Color>; 2],
    pub tex: [TexCoord; 8],
}

impl Shape {
    /// Bytes a single vertex takes in the vertex stream.
    pub fn input_stride(&self) -> u32 {
        let matrices = self.pos_matrix as u32 + self.tex.iter().filter(|t| t.matrix).count() as u32;
        let normals = self.normals.map(|n| n.stream_size()).unwrap_or(0);
        let colors: u32 = self.colors.iter().flatten().map(Color::stream_size).sum();
        let tex: u32 = self
            .tex
            .iter()
            .filter_map(|t| t.coords)
            .map(|c| c.stream_size())
            .sum();

        matrices + self.position.stream_size() + normals + colors + tex
    }
}

impl VertexFormat {
    pub fn new(vcd: VertexDescriptor, vat: VertexAttributeTable) -> Self {
        Self { vcd, vat }
    }

    /// Validates this format and extracts its decode shape.
    pub fn shape(&self) -> Result<Shape, FormatError> {
        let vcd = &self.vcd;
        let a = &self.vat.a;

        let position = {
            let addressing =
                Addressing::from_mode(vcd.position()).ok_or(FormatError::MissingPosition)?;
            let desc = a.position();
            Coords {
                addressing,
                scalar: Scalar::from_format(desc.format()).ok_or(FormatError::ReservedFormat {
                    attribute: Attribute::Position,
                })?,
                components: match desc.kind() {
                    PositionKind::Vec2 => 2,
                    PositionKind::Vec3 => 3,
                },
            }
        };

        let normals = match Addressing::from_mode(vcd.normal()) {
            Some(addressing) => {
                let desc = a.normal();
                let count = match desc.kind() {
                    NormalKind::N3 => 1,
                    NormalKind::N9 => 3,
                };

                Some(Normals {
                    addressing,
                    scalar: Scalar::from_format(desc.format()).ok_or(
                        FormatError::ReservedFormat {
                            attribute: Attribute::Normal,
                        },
                    )?,
                    count,
                    index3: addressing != Addressing::Direct && count == 3 && a.normal_index3(),
                })
            }
            None => None,
        };

        let mut colors = [None; 2];
        for (i, color) in colors.iter_mut().enumerate() {
            let Some(addressing) = Addressing::from_mode(vcd.color(i)) else {
                continue;
            };

            let desc = if i == 0 { a.diffuse() } else { a.specular() };
            let packing =
                Packing::from_format(desc.format()).ok_or(FormatError::ReservedFormat {
                    attribute: Attribute::Color(i as u8),
                })?;

            *color = Some(Color {
                addressing,
                packing,
                alpha: desc.kind() == ColorKind::Rgba,
            });
        }

        let mut tex = [TexCoord {
            coords: None,
            matrix: false,
        }; 8];
        for (i, slot) in tex.iter_mut().enumerate() {
            slot.matrix = vcd.tex_matrix(i);

            let Some(addressing) = Addressing::from_mode(vcd.tex_coord_mode(i)) else {
                continue;
            };

            let desc = self.vat.tex(i).unwrap_or_default();
            slot.coords = Some(Coords {
                addressing,
                scalar: Scalar::from_format(desc.format()).ok_or(FormatError::ReservedFormat {
                    attribute: Attribute::TexCoord(i as u8),
                })?,
                components: match desc.kind() {
                    TexCoordsKind::Vec1 => 1,
                    TexCoordsKind::Vec2 => 2,
                },
            });
        }

        Ok(Shape {
            pos_matrix: vcd.pos_mat_index(),
            position,
            normals,
            colors,
            tex,
        })
    }

    /// Human readable name describing the shape of this format.
    pub fn name(&self) -> String {
        let vcd = &self.vcd;
        let a = &self.vat.a;
        let mut name = String::new();

        let position = a.position();
        _ = write!(
            name,
            "P_mtx{}_{}_{}_{}_",
            vcd.pos_mat_index() as u8,
            if position.kind() == PositionKind::Vec3 { 3 } else { 2 },
            vcd.position().name(),
            position.format().name(),
        );

        if vcd.normal().is_present() {
            let normal = a.normal();
            _ = write!(
                name,
                "Nrm_{}_{}_{}_{}_",
                normal.kind() as u8,
                a.normal_index3() as u8,
                vcd.normal().name(),
                normal.format().name(),
            );
        }

        for i in 0..2 {
            let mode = vcd.color(i);
            if !mode.is_present() {
                continue;
            }

            let desc = if i == 0 { a.diffuse() } else { a.specular() };
            _ = write!(
                name,
                "C{i}_{}_{}_{}_",
                desc.kind() as u8,
                mode.name(),
                desc.format().name(),
            );
        }

        for i in 0..8 {
            let mode = vcd.tex_coord_mode(i);
            let matrix = vcd.tex_matrix(i);
            if !mode.is_present() && !matrix {
                continue;
            }

            let desc = self.vat.tex(i).unwrap_or_default();
            _ = write!(
                name,
                "T{i}_mtx{}_{}_{}_{}_",
                matrix as u8,
                desc.kind() as u8,
                mode.name(),
                desc.format().name(),
            );
        }

        name
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::descriptor::{
        ColorDescriptor, NormalDescriptor, PositionDescriptor, TexCoordsDescriptor,
    };

    fn position_only(mode: AttributeMode, format: CoordsFormat) -> VertexFormat {
        let vcd = VertexDescriptor::default().with_position(mode);
        let mut vat = VertexAttributeTable::default();
        vat.a = vat
            .a
            .with_position(PositionDescriptor::new(PositionKind::Vec3, format, 0));

        VertexFormat::new(vcd, vat)
    }

    #[test]
    fn missing_position_is_rejected() {
        let format = position_only(AttributeMode::None, CoordsFormat::F32);
        assert_eq!(format.shape(), Err(FormatError::MissingPosition));
    }

    #[test]
    fn reserved_formats_are_rejected() {
        let format = position_only(AttributeMode::Direct, CoordsFormat::Reserved1);
        assert_eq!(
            format.shape(),
            Err(FormatError::ReservedFormat {
                attribute: Attribute::Position
            })
        );

        let mut format = position_only(AttributeMode::Direct, CoordsFormat::F32);
        format.vcd = format.vcd.with_specular(AttributeMode::Direct);
        format.vat.a = format.vat.a.with_specular(ColorDescriptor::new(
            ColorKind::Rgba,
            ColorFormat::Reserved0,
        ));
        assert_eq!(
            format.shape(),
            Err(FormatError::ReservedFormat {
                attribute: Attribute::Color(1)
            })
        );
    }

    #[test]
    fn reserved_formats_of_absent_attributes_are_ignored() {
        let mut format = position_only(AttributeMode::Direct, CoordsFormat::U8);
        format.vat = format.vat.with_tex(
            5,
            TexCoordsDescriptor::new(TexCoordsKind::Vec2, CoordsFormat::Reserved2, 0),
        );

        assert!(format.shape().is_ok());
    }

    #[test]
    fn input_stride() {
        let mut format = position_only(AttributeMode::Direct, CoordsFormat::I16);
        format.vcd = format
            .vcd
            .with_pos_mat_index(true)
            .with_normal(AttributeMode::Index16)
            .with_diffuse(AttributeMode::Direct)
            .with_tex_matrix(2, true)
            .with_tex_coord_mode(1, AttributeMode::Index8);
        format.vat.a = format
            .vat
            .a
            .with_normal(NormalDescriptor::new(NormalKind::N9, CoordsFormat::I8))
            .with_normal_index3(true)
            .with_diffuse(ColorDescriptor::new(ColorKind::Rgba, ColorFormat::Rgba6666));

        let shape = format.shape().unwrap();
        let normals = shape.normals.unwrap();
        assert!(normals.index3);

        // posmtx + texmtx + position + 3 normal indices + color + tex index
        assert_eq!(shape.input_stride(), 1 + 1 + 6 + 6 + 3 + 1);
    }

    #[test]
    fn index3_needs_indexed_nine_normals() {
        let mut format = position_only(AttributeMode::Direct, CoordsFormat::I16);
        format.vcd = format.vcd.with_normal(AttributeMode::Direct);
        format.vat.a = format
            .vat
            .a
            .with_normal(NormalDescriptor::new(NormalKind::N9, CoordsFormat::I16))
            .with_normal_index3(true);

        let normals = format.shape().unwrap().normals.unwrap();
        assert!(!normals.index3);
        assert_eq!(normals.stream_size(), 18);
    }

    #[test]
    fn names() {
        let mut format = position_only(AttributeMode::Index16, CoordsFormat::F32);
        format.vcd = format
            .vcd
            .with_diffuse(AttributeMode::Direct)
            .with_tex_matrix(3, true);
        format.vat.a = format
            .vat
            .a
            .with_diffuse(ColorDescriptor::new(ColorKind::Rgba, ColorFormat::Rgba8888));

        assert_eq!(
            format.name(),
            "P_mtx0_3_I16_flt_C0_1_Dir_8888_T3_mtx1_0_Inv_u8_"
        );
    }
}
