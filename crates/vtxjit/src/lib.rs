//! Vertex parsers compiled to native code with Cranelift.
mod builder;
mod parser;

use crate::builder::ParserBuilder;
use cranelift::{
    codegen::{self, ir, settings::SetError},
    frontend, native,
    prelude::{Configurable, isa::TargetIsa},
};
use easyerr::{Error, ResultExt};
use jitalloc::{AllocError, Allocator, Exec};
use std::sync::{Arc, LazyLock};
use vtxcore::format::{FormatError, Shape};
use vtxcore::layout::NativeLayout;

pub use parser::{JitCtx, JitParser, OUT_OF_BOUNDS, ParserFn};

static SUPPORTED: LazyLock<bool> = LazyLock::new(|| {
    cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) && native::builder().is_ok()
});

/// Whether native code can be generated and run on this host. Checked once.
pub fn is_supported() -> bool {
    *SUPPORTED
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("host machine is not supported: {reason}")]
    Unsupported { reason: &'static str },
    #[error(transparent)]
    Settings { source: SetError },
    #[error(transparent)]
    Layout { source: FormatError },
    #[error(transparent)]
    Codegen { source: codegen::CodegenError },
    #[error(transparent)]
    Alloc { source: AllocError },
}

struct Compiler {
    isa: Arc<dyn TargetIsa>,
    allocator: Allocator<Exec>,
}

impl Compiler {
    fn new() -> Result<Self, BuildError> {
        let verifier = if cfg!(debug_assertions) {
            "true"
        } else {
            "false"
        };

        let mut codegen = codegen::settings::builder();
        let settings = [
            ("preserve_frame_pointers", "true"),
            ("use_colocated_libcalls", "false"),
            ("unwind_info", "false"),
            ("is_pic", "false"),
            // affect runtime performance
            ("opt_level", "speed"),
            ("enable_verifier", verifier),
            ("enable_alias_analysis", "true"),
            ("regalloc_algorithm", "backtracking"),
            ("regalloc_checker", "false"),
            ("enable_pinned_reg", "false"),
            ("enable_heap_access_spectre_mitigation", "false"),
            ("enable_table_access_spectre_mitigation", "false"),
        ];

        for (name, value) in settings {
            codegen.set(name, value).context(BuildCtx::Settings)?;
        }

        if !is_supported() {
            return Err(BuildError::Unsupported {
                reason: "architecture has no vertex parser backend",
            });
        }

        let isa_builder = native::builder().map_err(|reason| BuildError::Unsupported { reason })?;
        let isa = isa_builder
            .finish(codegen::settings::Flags::new(codegen))
            .context(BuildCtx::Codegen)?;

        Ok(Compiler {
            isa,
            allocator: Allocator::new(),
        })
    }

    fn parser_signature(&self) -> ir::Signature {
        let ptr = self.isa.pointer_type();
        ir::Signature {
            // ctx, src, dst, count
            params: vec![
                ir::AbiParam::new(ptr),
                ir::AbiParam::new(ptr),
                ir::AbiParam::new(ptr),
                ir::AbiParam::new(ir::types::I32),
            ],
            // emitted
            returns: vec![ir::AbiParam::new(ir::types::I32)],
            call_conv: self.isa.default_call_conv(),
        }
    }
}

/// A JIT context, producing [`JitParser`]s.
pub struct Jit {
    compiler: Compiler,
    code_ctx: codegen::Context,
    func_ctx: frontend::FunctionBuilderContext,
    compiled_count: u64,
}

impl Jit {
    pub fn new() -> Result<Self, BuildError> {
        Ok(Self {
            compiler: Compiler::new()?,
            code_ctx: codegen::Context::new(),
            func_ctx: frontend::FunctionBuilderContext::new(),
            compiled_count: 0,
        })
    }

    /// Number of parsers compiled so far.
    pub fn compiled_count(&self) -> u64 {
        self.compiled_count
    }

    /// Total bytes of executable memory mapped so far.
    pub fn mapped(&self) -> usize {
        self.compiler.allocator.mapped()
    }

    /// Compiles a parser for vertices of the given shape.
    pub fn compile(&mut self, shape: &Shape) -> Result<JitParser, BuildError> {
        let layout = NativeLayout::new(shape).context(BuildCtx::Layout)?;

        let mut func = ir::Function::new();
        func.signature = self.compiler.parser_signature();

        let func_builder = frontend::FunctionBuilder::new(&mut func, &mut self.func_ctx);
        let builder = ParserBuilder::new(
            self.compiler.isa.pointer_type(),
            func_builder,
            *shape,
            layout,
        );
        builder.build();

        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!("{}", func.display());
        }

        self.code_ctx.clear();
        self.code_ctx.func = func;
        let compiled = self
            .code_ctx
            .compile(&*self.compiler.isa, &mut Default::default())
            .map_err(|e| e.inner)
            .context(BuildCtx::Codegen)?;

        let code = self
            .compiler
            .allocator
            .allocate(64, compiled.code_buffer())
            .context(BuildCtx::Alloc)?;

        self.compiled_count += 1;
        tracing::debug!(
            "compiled vertex parser #{} ({} bytes)",
            self.compiled_count,
            code.len()
        );

        Ok(JitParser::new(code, shape.input_stride(), layout))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nanorand::WyRand;
    use vtxcore::catalog::{self, Scene};
    use vtxcore::descriptor::{
        AttributeMode, CoordsFormat, PositionDescriptor, PositionKind, VertexAttributeTable,
        VertexDescriptor,
    };
    use vtxcore::regs::{Arrays, array};
    use vtxcore::{Environment, Interpreter, ParseCtx, ParseError, VertexFormat, VertexParser};

    fn jit() -> Option<Jit> {
        if !is_supported() {
            return None;
        }

        Some(Jit::new().unwrap())
    }

    #[test]
    fn jit_matches_interpreter() {
        let Some(mut jit) = jit() else {
            return;
        };

        let mut rng = WyRand::new_seed(0xC0FFEE);
        let mut scene = Scene::new(&mut rng);

        for format in catalog::formats() {
            let shape = format.shape().unwrap();
            let mut interpreter = Interpreter::new(&shape).unwrap();
            let mut compiled = jit.compile(&shape).unwrap();

            assert_eq!(compiled.input_stride(), interpreter.input_stride());
            assert_eq!(compiled.layout(), interpreter.layout());

            for count in [0, 1, 2, 100] {
                scene.shuffle(&mut rng);
                let src = Scene::stream(&mut rng, interpreter.input_stride(), count);
                let len = count as usize * interpreter.layout().stride as usize;
                let mut expected = vec![0; len];
                let mut got = vec![0; len];

                let ctx = scene.ctx();
                let a = interpreter.parse(&ctx, &src, &mut expected, count);
                let b = compiled.parse(&ctx, &src, &mut got, count);
                assert_eq!(a, b, "{} x{count}", format.name());
                assert_eq!(expected, got, "{} x{count}", format.name());
            }
        }

        assert_eq!(jit.compiled_count(), catalog::formats().len() as u64);
    }

    #[test]
    fn sentinel_positions_are_dropped() {
        let Some(mut jit) = jit() else {
            return;
        };

        let mut vat = VertexAttributeTable::default();
        vat.a = vat
            .a
            .with_position(PositionDescriptor::new(PositionKind::Vec3, CoordsFormat::U8, 0));
        let format = VertexFormat::new(
            VertexDescriptor::default().with_position(AttributeMode::Index16),
            vat,
        );

        let ram = [1, 2, 3, 4, 5, 6];
        let mut arrays = Arrays::default();
        arrays.0[array::POSITION].stride = 3;

        let mut compiled = jit.compile(&format.shape().unwrap()).unwrap();
        let mut dst = vec![0; 3 * 16];
        let src = [0xFF, 0xFF, 0x00, 0x01, 0xFF, 0xFF];

        let ctx = ParseCtx::new(&ram, &arrays);
        assert_eq!(compiled.parse(&ctx, &src, &mut dst, 3), Ok(1));

        let position: Vec<f32> = dst[..12]
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(position, [4.0, 5.0, 6.0]);
    }

    #[test]
    fn out_of_bounds_reads_fail() {
        let Some(mut jit) = jit() else {
            return;
        };

        let format = VertexFormat::new(
            VertexDescriptor::default().with_position(AttributeMode::Index8),
            VertexAttributeTable::default(),
        );

        let ram = [0; 32];
        let mut arrays = Arrays::default();
        arrays.0[array::POSITION].stride = 8;

        let mut compiled = jit.compile(&format.shape().unwrap()).unwrap();
        let mut dst = vec![0; 2 * 16];
        let ctx = ParseCtx::new(&ram, &arrays);

        // element 3 ends at byte 26, element 4 starts at byte 32
        assert_eq!(compiled.parse(&ctx, &[2, 3], &mut dst, 2), Ok(2));
        assert_eq!(
            compiled.parse(&ctx, &[2, 4], &mut dst, 2),
            Err(ParseError::ArrayOutOfBounds)
        );
    }

    #[test]
    fn pos_matrix_uses_the_low_six_bits() {
        let Some(mut jit) = jit() else {
            return;
        };

        let format = catalog::formats()[0];
        let shape = format.shape().unwrap();
        let mut interpreter = Interpreter::new(&shape).unwrap();
        let mut compiled = jit.compile(&shape).unwrap();

        let arrays = Arrays::default();
        let ram = vec![0; Scene::RAM_LEN];
        let ctx = ParseCtx {
            pos_matrix: 0x7F,
            ..ParseCtx::new(&ram, &arrays)
        };

        let layout = *compiled.layout();
        let src = vec![0; interpreter.input_stride() as usize];
        let mut expected = vec![0; layout.stride as usize];
        let mut got = vec![0; layout.stride as usize];
        assert_eq!(interpreter.parse(&ctx, &src, &mut expected, 1), Ok(1));
        assert_eq!(compiled.parse(&ctx, &src, &mut got, 1), Ok(1));

        let offset = layout.pos_matrix.offset as usize;
        assert_eq!(&got[offset..offset + 4], &[0x3F, 0, 0, 0]);
        assert_eq!(expected, got);
    }

    #[test]
    fn native_code_can_be_disabled() {
        let Some(mut jit) = jit() else {
            return;
        };

        let compiled = jit.compile(&catalog::formats()[0].shape().unwrap()).unwrap();
        assert!(compiled.environment_is_supported(&Environment::default()));
        assert!(!compiled.environment_is_supported(&Environment { native_code: false }));
    }
}
