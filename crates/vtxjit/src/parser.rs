use jitalloc::{Allocation, Exec};
use static_assertions::const_assert_eq;
use std::mem::offset_of;
use vtxcore::layout::NativeLayout;
use vtxcore::regs::{ArrayDescriptor, Arrays};
use vtxcore::{
    Environment, ParseCtx, ParseError, ParserKind, Scales, VertexParser, check_buffers,
};

/// Everything compiled code reads besides the vertex stream.
#[repr(C)]
pub struct JitCtx {
    /// Address of RAM.
    pub ram: u64,
    pub ram_len: u64,
    pub arrays: Arrays,
    pub scales: Scales,
    /// Position matrix index of vertices that do not carry one.
    pub pos_matrix: u32,
}

const_assert_eq!(size_of::<ArrayDescriptor>(), 8);
const_assert_eq!(size_of::<Scales>(), 36);
const_assert_eq!(offset_of!(JitCtx, ram_len), 8);
const_assert_eq!(offset_of!(JitCtx, arrays), 16);
const_assert_eq!(offset_of!(JitCtx, scales), 112);
const_assert_eq!(offset_of!(JitCtx, pos_matrix), 148);

impl JitCtx {
    pub fn new(ctx: &ParseCtx<'_>) -> Self {
        Self {
            ram: ctx.ram.as_ptr() as u64,
            ram_len: ctx.ram.len() as u64,
            arrays: *ctx.arrays,
            scales: ctx.scales,
            pos_matrix: ctx.pos_matrix as u32 & 0x3F,
        }
    }
}

/// Returned by compiled code when an indexed read falls outside of RAM.
pub const OUT_OF_BOUNDS: u32 = u32::MAX;

// ctx, src, dst, count -> emitted vertices
pub type ParserFn = unsafe extern "C" fn(*const JitCtx, *const u8, *mut u8, u32) -> u32;

/// A parser compiled to native code.
pub struct JitParser {
    code: Allocation<Exec>,
    input_stride: u32,
    layout: NativeLayout,
}

impl JitParser {
    pub(crate) fn new(code: Allocation<Exec>, input_stride: u32, layout: NativeLayout) -> Self {
        Self {
            code,
            input_stride,
            layout,
        }
    }

    /// Size of the generated code, in bytes.
    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    fn as_ptr(&self) -> ParserFn {
        // SAFETY: the allocation holds a function with this signature
        unsafe { std::mem::transmute(self.code.as_ptr().cast::<u8>()) }
    }
}

impl VertexParser for JitParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Jit
    }

    fn input_stride(&self) -> u32 {
        self.input_stride
    }

    fn layout(&self) -> &NativeLayout {
        &self.layout
    }

    fn environment_is_supported(&self, env: &Environment) -> bool {
        env.native_code
    }

    fn parse(
        &mut self,
        ctx: &ParseCtx<'_>,
        src: &[u8],
        dst: &mut [u8],
        count: u32,
    ) -> Result<u32, ParseError> {
        check_buffers(self.input_stride, self.layout.stride, src, dst, count)?;

        let jit_ctx = JitCtx::new(ctx);
        let parser = self.as_ptr();

        // SAFETY: both buffers were checked to hold `count` vertices and every indexed read is
        // checked against the length of RAM by the generated code
        let emitted = unsafe { parser(&raw const jit_ctx, src.as_ptr(), dst.as_mut_ptr(), count) };
        if emitted == OUT_OF_BOUNDS {
            return Err(ParseError::ArrayOutOfBounds);
        }

        Ok(emitted)
    }
}
