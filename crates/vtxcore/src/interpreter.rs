//! Portable vertex parser that runs a list of stages per vertex.
mod simd;

use crate::convert::{self, normal_scale};
use crate::cursor::{Cursor, Flow, array_data};
use crate::format::{Addressing, Color, Coords, FormatError, Normals, Shape};
use crate::layout::NativeLayout;
use crate::regs::ArrayDescriptor;
use crate::{ParseCtx, ParseError, ParserKind, VertexParser, check_buffers};

/// Locates the data of an attribute, either inline or through an index into `array`.
///
/// Returns `None` if `sentinel` is set and the index is the "no data" sentinel.
#[inline(always)]
fn fetch<'a>(
    cursor: &mut Cursor<'a>,
    ram: &'a [u8],
    addressing: Addressing,
    array: ArrayDescriptor,
    size: u32,
    sentinel: bool,
) -> Result<Option<&'a [u8]>, ParseError> {
    if addressing == Addressing::Direct {
        return Ok(Some(cursor.take(size as usize)));
    }

    let index = cursor.read_index(addressing);
    if sentinel && Some(index) == addressing.sentinel() {
        return Ok(None);
    }

    array_data(ram, array, index, 0, size).map(Some)
}

#[inline(always)]
fn write_coords(cursor: &mut Cursor, coords: &Coords, data: &[u8], scale: f32, out_len: usize) {
    let values = simd::coords(coords.scalar, coords.components, data, scale);
    for value in &values[..out_len] {
        cursor.write_f32(*value);
    }
}

#[inline(always)]
pub(crate) fn pos_matrix(cursor: &mut Cursor) {
    cursor.pos_matrix = cursor.read_u8() & 0x3F;
}

#[inline(always)]
pub(crate) fn tex_matrix(cursor: &mut Cursor, index: usize) {
    cursor.tex_matrices[index] = cursor.read_u8() & 0x3F;
}

#[inline(always)]
pub(crate) fn position<'a>(
    cursor: &mut Cursor<'a>,
    ctx: &ParseCtx<'a>,
    coords: &Coords,
) -> Result<Flow, ParseError> {
    let array = ctx.arrays.position();
    let Some(data) = fetch(cursor, ctx.ram, coords.addressing, array, coords.data_size(), true)?
    else {
        return Ok(Flow::Skip);
    };

    // two component positions have z = 0
    let scale = cursor.scales.position;
    write_coords(cursor, coords, data, scale, 3);

    Ok(Flow::Continue)
}

#[inline(always)]
pub(crate) fn normals<'a>(
    cursor: &mut Cursor<'a>,
    ctx: &ParseCtx<'a>,
    normals: &Normals,
) -> Result<(), ParseError> {
    let size = normals.normal_size();
    let scale = normal_scale(normals.scalar);
    let coords = Coords {
        addressing: normals.addressing,
        scalar: normals.scalar,
        components: 3,
    };

    if normals.index3 {
        let indices: [u16; 3] = std::array::from_fn(|_| cursor.read_index(normals.addressing));
        for (i, index) in indices.into_iter().enumerate() {
            let data = array_data(ctx.ram, ctx.arrays.normal(), index, i as u32 * size, size)?;
            write_coords(cursor, &coords, data, scale, 3);
        }

        return Ok(());
    }

    let array = ctx.arrays.normal();
    let total = normals.count * size;
    let Some(data) = fetch(cursor, ctx.ram, normals.addressing, array, total, false)? else {
        return Ok(());
    };

    for normal in data.chunks_exact(size as usize) {
        write_coords(cursor, &coords, normal, scale, 3);
    }

    Ok(())
}

#[inline(always)]
pub(crate) fn color<'a>(
    cursor: &mut Cursor<'a>,
    ctx: &ParseCtx<'a>,
    index: usize,
    color: &Color,
) -> Result<(), ParseError> {
    let array = ctx.arrays.color(index);
    let size = color.packing.size();
    if let Some(data) = fetch(cursor, ctx.ram, color.addressing, array, size, false)? {
        cursor.write(&convert::color(color.packing, color.alpha, data));
    }

    Ok(())
}

#[inline(always)]
pub(crate) fn tex_coord<'a>(
    cursor: &mut Cursor<'a>,
    ctx: &ParseCtx<'a>,
    index: usize,
    coords: Option<&Coords>,
    matrix: bool,
) -> Result<(), ParseError> {
    match coords {
        Some(coords) => {
            let array = ctx.arrays.tex(index);
            let size = coords.data_size();
            if let Some(data) = fetch(cursor, ctx.ram, coords.addressing, array, size, false)? {
                let scale = cursor.scales.tex[index];
                let len = if matrix { 2 } else { coords.components as usize };
                write_coords(cursor, coords, data, scale, len);
            }
        }
        None => {
            cursor.write_f32(0.0);
            cursor.write_f32(0.0);
        }
    }

    if matrix {
        let matrix = cursor.tex_matrices[index];
        cursor.write_f32(matrix as f32);
    }

    Ok(())
}

#[inline(always)]
pub(crate) fn write_pos_matrix(cursor: &mut Cursor) {
    let matrix = cursor.pos_matrix;
    cursor.write(&[matrix, 0, 0, 0]);
}

/// A step of the per vertex pipeline. Each stage reads and writes a fixed amount of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PosMatrix,
    TexMatrix(u8),
    Position(Coords),
    Normals(Normals),
    Color(u8, Color),
    TexCoord {
        index: u8,
        coords: Option<Coords>,
        matrix: bool,
    },
    WritePosMatrix,
}

impl Stage {
    /// Builds the stages of `shape`, in the order they run.
    pub fn list(shape: &Shape) -> Vec<Stage> {
        let mut stages = Vec::new();
        if shape.pos_matrix {
            stages.push(Stage::PosMatrix);
        }

        for (i, tex) in shape.tex.iter().enumerate() {
            if tex.matrix {
                stages.push(Stage::TexMatrix(i as u8));
            }
        }

        stages.push(Stage::Position(shape.position));

        if let Some(normals) = shape.normals {
            stages.push(Stage::Normals(normals));
        }

        for (i, color) in shape.colors.iter().enumerate() {
            if let Some(color) = color {
                stages.push(Stage::Color(i as u8, *color));
            }
        }

        for (i, tex) in shape.tex.iter().enumerate() {
            if tex.is_present() {
                stages.push(Stage::TexCoord {
                    index: i as u8,
                    coords: tex.coords,
                    matrix: tex.matrix,
                });
            }
        }

        stages.push(Stage::WritePosMatrix);
        stages
    }

    /// Bytes this stage consumes from the vertex stream.
    pub fn read_size(&self) -> u32 {
        match self {
            Self::PosMatrix | Self::TexMatrix(_) => 1,
            Self::Position(coords) => coords.stream_size(),
            Self::Normals(normals) => normals.stream_size(),
            Self::Color(_, color) => color.stream_size(),
            Self::TexCoord { coords, .. } => coords.map(|c| c.stream_size()).unwrap_or(0),
            Self::WritePosMatrix => 0,
        }
    }

    /// Bytes this stage writes to the native vertex.
    pub fn write_size(&self) -> u32 {
        match self {
            Self::PosMatrix | Self::TexMatrix(_) => 0,
            Self::Position(_) => 12,
            Self::Normals(normals) => 12 * normals.count,
            Self::Color(..) => 4,
            Self::TexCoord { coords, matrix, .. } => match (coords, matrix) {
                (_, true) => 12,
                (Some(coords), false) => 4 * coords.components,
                (None, false) => 0,
            },
            Self::WritePosMatrix => 4,
        }
    }

    #[inline(always)]
    fn run<'a>(&self, cursor: &mut Cursor<'a>, ctx: &ParseCtx<'a>) -> Result<Flow, ParseError> {
        match self {
            Self::PosMatrix => pos_matrix(cursor),
            Self::TexMatrix(index) => tex_matrix(cursor, *index as usize),
            Self::Position(coords) => return position(cursor, ctx, coords),
            Self::Normals(n) => normals(cursor, ctx, n)?,
            Self::Color(index, c) => color(cursor, ctx, *index as usize, c)?,
            Self::TexCoord {
                index,
                coords,
                matrix,
            } => tex_coord(cursor, ctx, *index as usize, coords.as_ref(), *matrix)?,
            Self::WritePosMatrix => write_pos_matrix(cursor),
        }

        Ok(Flow::Continue)
    }
}

/// The interpreter parser. Always available.
pub struct Interpreter {
    stages: Vec<Stage>,
    input_stride: u32,
    layout: NativeLayout,
}

impl Interpreter {
    pub fn new(shape: &Shape) -> Result<Self, FormatError> {
        let layout = NativeLayout::new(shape)?;
        let stages = Stage::list(shape);

        debug_assert_eq!(
            stages.iter().map(Stage::read_size).sum::<u32>(),
            shape.input_stride()
        );
        debug_assert_eq!(
            stages.iter().map(Stage::write_size).sum::<u32>(),
            layout.stride
        );

        Ok(Self {
            stages,
            input_stride: shape.input_stride(),
            layout,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}

impl VertexParser for Interpreter {
    fn kind(&self) -> ParserKind {
        ParserKind::Interpreter
    }

    fn input_stride(&self) -> u32 {
        self.input_stride
    }

    fn layout(&self) -> &NativeLayout {
        &self.layout
    }

    fn parse(
        &mut self,
        ctx: &ParseCtx<'_>,
        src: &[u8],
        dst: &mut [u8],
        count: u32,
    ) -> Result<u32, ParseError> {
        check_buffers(self.input_stride, self.layout.stride, src, dst, count)?;

        let ctx = *ctx;
        let mut cursor = Cursor::new(&ctx, src, dst, count);
        cursor.vertices(self.input_stride, |cursor| {
            for stage in &self.stages {
                if stage.run(cursor, &ctx)? == Flow::Skip {
                    return Ok(Flow::Skip);
                }
            }

            Ok(Flow::Continue)
        })
    }
}
