//! Native vertex layout produced by every parser.
use crate::format::{FormatError, Shape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ComponentType {
    #[default]
    F32,
    U8,
}

impl ComponentType {
    pub fn size(self) -> u32 {
        match self {
            Self::F32 => 4,
            Self::U8 => 1,
        }
    }
}

/// Placement of an attribute inside a native vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AttributeFormat {
    pub offset: u32,
    pub components: u32,
    pub ty: ComponentType,
    pub enabled: bool,
}

impl AttributeFormat {
    #[inline(always)]
    pub fn size(&self) -> u32 {
        self.components * self.ty.size()
    }
}

/// Byte layout of a decoded vertex. Fields are laid out in the order they are declared here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NativeLayout {
    pub stride: u32,
    pub position: AttributeFormat,
    pub normals: [AttributeFormat; 3],
    pub colors: [AttributeFormat; 2],
    pub tex: [AttributeFormat; 8],
    pub pos_matrix: AttributeFormat,
}

impl NativeLayout {
    pub const MAX_ATTRIBUTES: u32 = 16;
    pub const MAX_STRIDE: u32 = 256;

    pub fn new(shape: &Shape) -> Result<Self, FormatError> {
        let mut offset = 0;
        let mut attributes = 0;
        let mut push = |components: u32, ty: ComponentType| {
            let attr = AttributeFormat {
                offset,
                components,
                ty,
                enabled: true,
            };

            offset += attr.size();
            attributes += 1;
            attr
        };

        let position = push(3, ComponentType::F32);

        let mut normals = [AttributeFormat::default(); 3];
        if let Some(n) = shape.normals {
            for normal in normals.iter_mut().take(n.count as usize) {
                *normal = push(3, ComponentType::F32);
            }
        }

        let mut colors = [AttributeFormat::default(); 2];
        for (color, desc) in colors.iter_mut().zip(shape.colors) {
            if desc.is_some() {
                *color = push(4, ComponentType::U8);
            }
        }

        let mut tex = [AttributeFormat::default(); 8];
        for (attr, desc) in tex.iter_mut().zip(shape.tex) {
            *attr = match (desc.coords, desc.matrix) {
                (_, true) => push(3, ComponentType::F32),
                (Some(coords), false) => push(coords.components, ComponentType::F32),
                (None, false) => continue,
            };
        }

        let pos_matrix = push(4, ComponentType::U8);

        Self::check_budget(attributes, offset)?;

        Ok(Self {
            stride: offset,
            position,
            normals,
            colors,
            tex,
            pos_matrix,
        })
    }

    /// Fails if a layout with `attributes` attributes and `stride` bytes does not fit the
    /// vertex input limits of render backends. Formats the command processor can describe top
    /// out at 15 attributes and 156 bytes.
    pub fn check_budget(attributes: u32, stride: u32) -> Result<(), FormatError> {
        if attributes > Self::MAX_ATTRIBUTES || stride > Self::MAX_STRIDE {
            return Err(FormatError::LayoutBudget { attributes, stride });
        }

        Ok(())
    }

    /// Every enabled attribute, in layout order, with a short name.
    pub fn attributes(&self) -> impl Iterator<Item = (String, AttributeFormat)> + '_ {
        let normals = self
            .normals
            .iter()
            .enumerate()
            .map(|(i, a)| (format!("normal{i}"), *a));
        let colors = self
            .colors
            .iter()
            .enumerate()
            .map(|(i, a)| (format!("color{i}"), *a));
        let tex = self
            .tex
            .iter()
            .enumerate()
            .map(|(i, a)| (format!("tex{i}"), *a));

        std::iter::once(("position".to_owned(), self.position))
            .chain(normals)
            .chain(colors)
            .chain(tex)
            .chain(std::iter::once(("posmtx".to_owned(), self.pos_matrix)))
            .filter(|(_, a)| a.enabled)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::descriptor::{
        AttributeMode, ColorDescriptor, ColorFormat, ColorKind, CoordsFormat, NormalDescriptor,
        NormalKind, PositionDescriptor, PositionKind, TexCoordsDescriptor, TexCoordsKind,
        VertexAttributeTable, VertexDescriptor,
    };
    use crate::format::VertexFormat;

    fn layout(format: &VertexFormat) -> NativeLayout {
        NativeLayout::new(&format.shape().unwrap()).unwrap()
    }

    #[test]
    fn position_only() {
        let format = VertexFormat::new(
            VertexDescriptor::default().with_position(AttributeMode::Direct),
            VertexAttributeTable::default(),
        );

        let layout = layout(&format);
        assert_eq!(layout.stride, 16);
        assert_eq!(layout.position.components, 3);
        assert_eq!(layout.pos_matrix.offset, 12);
        assert_eq!(layout.pos_matrix.ty, ComponentType::U8);
        assert_eq!(layout.attributes().count(), 2);
    }

    #[test]
    fn field_order() {
        let vcd = VertexDescriptor::default()
            .with_position(AttributeMode::Index8)
            .with_normal(AttributeMode::Direct)
            .with_specular(AttributeMode::Direct)
            .with_tex_coord_mode(0, AttributeMode::Direct)
            .with_tex_coord_mode(2, AttributeMode::Direct)
            .with_tex_matrix(2, true)
            .with_tex_matrix(5, true);

        let mut vat = VertexAttributeTable::default()
            .with_tex(0, TexCoordsDescriptor::new(TexCoordsKind::Vec2, CoordsFormat::U8, 0))
            .with_tex(2, TexCoordsDescriptor::new(TexCoordsKind::Vec1, CoordsFormat::U8, 0));
        vat.a = vat
            .a
            .with_position(PositionDescriptor::new(PositionKind::Vec2, CoordsFormat::F32, 0))
            .with_normal(NormalDescriptor::new(NormalKind::N9, CoordsFormat::I8))
            .with_specular(ColorDescriptor::new(ColorKind::Rgb, ColorFormat::Rgb565));

        let layout = layout(&VertexFormat::new(vcd, vat));
        assert_eq!(layout.normals.map(|n| n.offset), [12, 24, 36]);
        assert!(!layout.colors[0].enabled);
        assert_eq!(layout.colors[1].offset, 48);
        assert_eq!(layout.tex[0].offset, 52);
        assert_eq!(layout.tex[0].components, 2);
        assert_eq!(layout.tex[2].offset, 60);
        assert_eq!(layout.tex[2].components, 3);
        assert_eq!(layout.tex[5].offset, 72);
        assert_eq!(layout.tex[5].components, 3);
        assert_eq!(layout.pos_matrix.offset, 84);
        assert_eq!(layout.stride, 88);

        let sum: u32 = layout.attributes().map(|(_, a)| a.size()).sum();
        assert_eq!(sum, layout.stride);
    }

    #[test]
    fn budget() {
        assert_eq!(NativeLayout::check_budget(16, 256), Ok(()));
        assert_eq!(
            NativeLayout::check_budget(17, 64),
            Err(FormatError::LayoutBudget {
                attributes: 17,
                stride: 64
            })
        );
        assert_eq!(
            NativeLayout::check_budget(4, 260),
            Err(FormatError::LayoutBudget {
                attributes: 4,
                stride: 260
            })
        );

        let mut widest = 0;
        for format in crate::catalog::formats() {
            let layout = layout(&format);
            widest = widest.max(layout.stride);
            assert!(layout.attributes().count() as u32 <= NativeLayout::MAX_ATTRIBUTES);
        }
        assert!(widest <= NativeLayout::MAX_STRIDE);
    }
}
