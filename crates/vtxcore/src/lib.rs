//! Vertex formats of the GameCube command processor and the parsers that turn vertex streams in
//! those formats into a fixed native layout.
//!
//! A [`VertexFormat`] is validated into a [`Shape`], which determines both the input stride and
//! the [`NativeLayout`] of decoded vertices. Every [`VertexParser`] implementation produces the
//! exact same bytes for the same input.

pub mod catalog;
pub mod convert;
pub mod cursor;
pub mod descriptor;
pub mod format;
pub mod interpreter;
pub mod key;
pub mod layout;
pub mod precompiled;
pub mod regs;
pub mod tester;

pub use format::{FormatError, Shape, VertexFormat};
pub use interpreter::Interpreter;
pub use key::CanonicalKey;
pub use layout::NativeLayout;
pub use precompiled::{Precompiled, PrecompiledTable};
pub use regs::{CpState, Primitive};
pub use tester::Tester;

use crate::convert::FRACTION_TABLE;
use crate::descriptor::VertexAttributeTable;
use crate::regs::Arrays;
use easyerr::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("vertex data needs {required} bytes but only {available} are available")]
    InsufficientData { required: usize, available: usize },
    #[error("destination needs {required} bytes but only {available} are available")]
    DestinationTooSmall { required: usize, available: usize },
    #[error("indexed attribute read outside of RAM")]
    ArrayOutOfBounds,
    #[error("parser does not support this vertex format")]
    UnsupportedFormat,
}

/// Kind of a vertex parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserKind {
    Interpreter,
    Precompiled,
    Jit,
    Tester,
}

impl ParserKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Interpreter => "interpreter",
            Self::Precompiled => "precompiled",
            Self::Jit => "jit",
            Self::Tester => "tester",
        }
    }
}

/// Conditions of a single draw that parsers may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Environment {
    /// Whether generated native code may run for this draw.
    pub native_code: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self { native_code: true }
    }
}

/// Scale factors derived from the fraction bits of a vertex attribute table.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scales {
    pub position: f32,
    pub tex: [f32; 8],
}

impl Default for Scales {
    fn default() -> Self {
        Self {
            position: 1.0,
            tex: [1.0; 8],
        }
    }
}

impl Scales {
    pub fn new(vat: &VertexAttributeTable) -> Self {
        Self {
            position: FRACTION_TABLE[vat.a.position().shift().value() as usize],
            tex: std::array::from_fn(|i| {
                let shift = vat.tex(i).map(|t| t.shift().value()).unwrap_or(0);
                FRACTION_TABLE[shift as usize]
            }),
        }
    }
}

/// State outside of the vertex stream that a parse depends on.
#[derive(Debug, Clone, Copy)]
pub struct ParseCtx<'a> {
    /// Main memory, which indexed attributes are read from.
    pub ram: &'a [u8],
    pub arrays: &'a Arrays,
    pub scales: Scales,
    /// Position matrix index of vertices that do not carry one. Only the low 6 bits are used.
    pub pos_matrix: u8,
}

impl<'a> ParseCtx<'a> {
    pub fn new(ram: &'a [u8], arrays: &'a Arrays) -> Self {
        Self {
            ram,
            arrays,
            scales: Scales::default(),
            pos_matrix: 0,
        }
    }
}

/// A vertex parser: decodes a vertex stream of a single format into its native layout.
pub trait VertexParser: Send {
    fn kind(&self) -> ParserKind;

    /// Bytes a single vertex takes in the vertex stream.
    fn input_stride(&self) -> u32;

    fn layout(&self) -> &NativeLayout;

    /// Whether this parser can run under the given conditions.
    fn environment_is_supported(&self, env: &Environment) -> bool {
        _ = env;
        true
    }

    /// Parses `count` vertices from `src` into `dst`, returning how many vertices were written.
    /// Vertices whose indexed position is the "no data" sentinel are dropped.
    fn parse(
        &mut self,
        ctx: &ParseCtx<'_>,
        src: &[u8],
        dst: &mut [u8],
        count: u32,
    ) -> Result<u32, ParseError>;
}

/// Checks that `src` holds `count` input vertices and `dst` has room for `count` native ones.
pub fn check_buffers(
    input_stride: u32,
    output_stride: u32,
    src: &[u8],
    dst: &[u8],
    count: u32,
) -> Result<(), ParseError> {
    let required = count as usize * input_stride as usize;
    if src.len() < required {
        return Err(ParseError::InsufficientData {
            required,
            available: src.len(),
        });
    }

    let required = count as usize * output_stride as usize;
    if dst.len() < required {
        return Err(ParseError::DestinationTooSmall {
            required,
            available: dst.len(),
        });
    }

    Ok(())
}
