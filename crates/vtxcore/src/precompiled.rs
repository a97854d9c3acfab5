//! Vertex parsers monomorphised at compile time for known formats, looked up by canonical key.
use crate::cursor::{Cursor, Flow};
use crate::format::{FormatError, Shape};
use crate::interpreter;
use crate::layout::NativeLayout;
use crate::{CanonicalKey, ParseCtx, ParseError, ParserKind, VertexParser, check_buffers};
use rustc_hash::FxHashMap;
use seq_macro::seq;

/// A precompiled parsing routine.
pub type Routine = fn(&ParseCtx<'_>, &[u8], &mut [u8], u32) -> Result<u32, ParseError>;

#[inline(always)]
fn parse_shape(
    shape: &Shape,
    output_stride: u32,
    ctx: &ParseCtx<'_>,
    src: &[u8],
    dst: &mut [u8],
    count: u32,
) -> Result<u32, ParseError> {
    let input_stride = shape.input_stride();
    check_buffers(input_stride, output_stride, src, dst, count)?;

    let ctx = *ctx;
    let mut cursor = Cursor::new(&ctx, src, dst, count);
    cursor.vertices(input_stride, |cursor| {
        if shape.pos_matrix {
            interpreter::pos_matrix(cursor);
        }

        seq! {
            N in 0..8 {
                if shape.tex[N].matrix {
                    interpreter::tex_matrix(cursor, N);
                }
            }
        }

        if interpreter::position(cursor, &ctx, &shape.position)? == Flow::Skip {
            return Ok(Flow::Skip);
        }

        if let Some(normals) = &shape.normals {
            interpreter::normals(cursor, &ctx, normals)?;
        }

        seq! {
            N in 0..2 {
                if let Some(color) = &shape.colors[N] {
                    interpreter::color(cursor, &ctx, N, color)?;
                }
            }
        }

        seq! {
            N in 0..8 {
                let tex = &shape.tex[N];
                if tex.is_present() {
                    interpreter::tex_coord(cursor, &ctx, N, tex.coords.as_ref(), tex.matrix)?;
                }
            }
        }

        interpreter::write_pos_matrix(cursor);
        Ok(Flow::Continue)
    })
}

/// Parses vertices of the format with canonical words `W0` to `W3`.
///
/// The shape is decoded from the words once per call. The per vertex body calls the stage
/// helpers directly instead of dispatching over a stage list, and the optimizer may fold the
/// shape checks away since they only depend on the const parameters.
pub fn templated<const W0: u32, const W1: u32, const W2: u32, const W3: u32>(
    ctx: &ParseCtx<'_>,
    src: &[u8],
    dst: &mut [u8],
    count: u32,
) -> Result<u32, ParseError> {
    let format = CanonicalKey::from_words([W0, W1, W2, W3]).format();
    let shape = format.shape().map_err(|_| ParseError::UnsupportedFormat)?;
    let layout = NativeLayout::new(&shape).map_err(|_| ParseError::UnsupportedFormat)?;

    parse_shape(&shape, layout.stride, ctx, src, dst, count)
}

/// Canonical key hash to precompiled routine.
#[derive(Debug, Clone, Default)]
pub struct PrecompiledTable {
    routines: FxHashMap<u64, (CanonicalKey, Routine)>,
}

impl PrecompiledTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with routines for a few formats that are common in practice.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        let routines: [([u32; 4], Routine); 4] = [
            // P_mtx0_3_Dir_flt_
            (
                [0x0000_0100, 0x0000_0009, 0, 0],
                templated::<0x0000_0100, 0x0000_0009, 0, 0>,
            ),
            // P_mtx0_3_Dir_flt_C0_1_Dir_8888_
            (
                [0x0000_1100, 0x0001_6009, 0, 0],
                templated::<0x0000_1100, 0x0001_6009, 0, 0>,
            ),
            // P_mtx0_3_Dir_flt_C0_1_Dir_8888_T0_mtx0_1_Dir_flt_
            (
                [0x0001_1100, 0x0121_6009, 0, 0],
                templated::<0x0001_1100, 0x0121_6009, 0, 0>,
            ),
            // P_mtx0_3_I16_s16_Nrm_0_0_I16_s16_T0_mtx0_1_I16_s16_
            (
                [0x0003_0F00, 0x00E0_0C07, 0, 0],
                templated::<0x0003_0F00, 0x00E0_0C07, 0, 0>,
            ),
        ];

        for (words, routine) in routines {
            if let Err(e) = table.insert(words, routine) {
                tracing::error!("builtin precompiled routine {words:08X?} is invalid: {e}");
            }
        }

        table
    }

    /// Registers `routine` for the format with canonical `words`.
    pub fn insert(&mut self, words: [u32; 4], routine: Routine) -> Result<(), FormatError> {
        let key = CanonicalKey::from_words(words);
        NativeLayout::new(&key.format().shape()?)?;

        self.routines.insert(key.hash(), (key, routine));
        Ok(())
    }

    pub fn get(&self, key: &CanonicalKey) -> Option<Routine> {
        self.routines
            .get(&key.hash())
            .filter(|(k, _)| k == key)
            .map(|(_, routine)| *routine)
    }

    pub fn len(&self) -> usize {
        self.routines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }
}

/// A precompiled parser.
pub struct Precompiled {
    routine: Routine,
    input_stride: u32,
    layout: NativeLayout,
}

impl Precompiled {
    pub fn new(shape: &Shape, routine: Routine) -> Result<Self, FormatError> {
        Ok(Self {
            routine,
            input_stride: shape.input_stride(),
            layout: NativeLayout::new(shape)?,
        })
    }
}

impl VertexParser for Precompiled {
    fn kind(&self) -> ParserKind {
        ParserKind::Precompiled
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
        (self.routine)(ctx, src, dst, count)
    }
}
