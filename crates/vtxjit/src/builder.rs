mod attr;

use crate::parser::{JitCtx, OUT_OF_BOUNDS};
use attr::Data;
use cranelift::{codegen::ir, frontend, prelude::InstBuilder};
use std::mem::offset_of;
use vtxcore::Scales;
use vtxcore::format::{Addressing, Shape};
use vtxcore::layout::NativeLayout;
use vtxcore::regs::{ARRAY_COUNT, ArrayDescriptor, array};

const MEMFLAGS: ir::MemFlags = ir::MemFlags::new().with_notrap().with_can_move();
const MEMFLAGS_READONLY: ir::MemFlags = ir::MemFlags::new()
    .with_notrap()
    .with_can_move()
    .with_readonly();

#[derive(Clone, Copy)]
struct Array {
    base: ir::Value,
    stride: ir::Value,
}

struct Consts {
    ptr_type: ir::Type,

    ctx_ptr: ir::Value,
    ram_ptr: ir::Value,
    ram_len: ir::Value,
    src_ptr: ir::Value,
    dst_ptr: ir::Value,
    count: ir::Value,
    default_pos: ir::Value,
}

struct Vars {
    arrays: [Option<Array>; ARRAY_COUNT],
    pos_scale: Option<ir::Value>,
    tex_scales: [Option<ir::Value>; 8],

    /// Start of the current vertex in the stream.
    src_ptr: ir::Value,
    /// Start of the current native vertex.
    dst_ptr: ir::Value,
    /// Offset of the next stream byte into the current vertex.
    read: u32,
    index: ir::Value,
    emitted: ir::Value,

    pos_matrix: ir::Value,
    tex_matrices: [Option<ir::Value>; 8],
}

/// Emits the parser of a single vertex shape.
pub struct ParserBuilder<'ctx> {
    bd: frontend::FunctionBuilder<'ctx>,
    shape: Shape,
    layout: NativeLayout,
    consts: Consts,
    vars: Vars,
    oob_bb: Option<ir::Block>,
    skip_bb: Option<ir::Block>,
}

impl<'ctx> ParserBuilder<'ctx> {
    pub fn new(
        ptr_type: ir::Type,
        mut bd: frontend::FunctionBuilder<'ctx>,
        shape: Shape,
        layout: NativeLayout,
    ) -> Self {
        let entry_bb = bd.create_block();
        bd.append_block_params_for_function_params(entry_bb);
        bd.switch_to_block(entry_bb);
        bd.seal_block(entry_bb);

        let params = bd.block_params(entry_bb);
        let ctx_ptr = params[0];
        let src_ptr = params[1];
        let dst_ptr = params[2];
        let count = params[3];

        let ram_ptr = bd.ins().load(
            ptr_type,
            MEMFLAGS_READONLY,
            ctx_ptr,
            offset_of!(JitCtx, ram) as i32,
        );
        let ram_len = bd.ins().load(
            ir::types::I64,
            MEMFLAGS_READONLY,
            ctx_ptr,
            offset_of!(JitCtx, ram_len) as i32,
        );
        let default_pos = bd.ins().load(
            ir::types::I32,
            MEMFLAGS_READONLY,
            ctx_ptr,
            offset_of!(JitCtx, pos_matrix) as i32,
        );

        let consts = Consts {
            ptr_type,

            ctx_ptr,
            ram_ptr,
            ram_len,
            src_ptr,
            dst_ptr,
            count,
            default_pos,
        };

        let vars = Vars {
            arrays: [None; ARRAY_COUNT],
            pos_scale: None,
            tex_scales: [None; 8],

            src_ptr,
            dst_ptr,
            read: 0,
            index: count,
            emitted: count,

            pos_matrix: default_pos,
            tex_matrices: [None; 8],
        };

        Self {
            bd,
            shape,
            layout,
            consts,
            vars,
            oob_bb: None,
            skip_bb: None,
        }
    }

    /// Block that exits the parser because of an out of bounds array access.
    fn oob_bb(&mut self) -> ir::Block {
        *self.oob_bb.get_or_insert_with(|| {
            let bb = self.bd.create_block();
            self.bd.set_cold_block(bb);
            bb
        })
    }

    /// Block that drops the current vertex.
    fn skip_bb(&mut self) -> ir::Block {
        *self.skip_bb.get_or_insert_with(|| self.bd.create_block())
    }

    fn shift_mask(&mut self, value: ir::Value, shift: i64, mask: i64) -> ir::Value {
        let shifted = self.bd.ins().ushr_imm(value, shift);
        self.bd.ins().band_imm(shifted, mask)
    }

    /// Stores `value` at `offset` into the current native vertex.
    fn store(&mut self, value: ir::Value, offset: u32) {
        self.bd
            .ins()
            .store(MEMFLAGS, value, self.vars.dst_ptr, offset as i32);
    }

    /// Stores a little endian `value` at `offset` into the current native vertex.
    fn store_le(&mut self, value: ir::Value, offset: u32) {
        let flags = MEMFLAGS.with_endianness(ir::Endianness::Little);
        self.bd
            .ins()
            .store(flags, value, self.vars.dst_ptr, offset as i32);
    }

    /// Reads a byte of the stream.
    fn read_u8(&mut self) -> ir::Value {
        let value = self.bd.ins().load(
            ir::types::I8,
            MEMFLAGS_READONLY,
            self.vars.src_ptr,
            self.vars.read as i32,
        );

        self.vars.read += 1;
        value
    }

    /// Reads a big endian index of the stream, zero extended to 64 bits.
    fn read_index(&mut self, addressing: Addressing) -> ir::Value {
        let ty = match addressing {
            Addressing::Index16 => ir::types::I16,
            _ => ir::types::I8,
        };

        let index = self.bd.ins().load(
            ty,
            MEMFLAGS_READONLY,
            self.vars.src_ptr,
            self.vars.read as i32,
        );

        let index = if ty.bytes() == 1 {
            index
        } else {
            self.bd.ins().bswap(index)
        };

        self.vars.read += ty.bytes();
        self.bd.ins().uextend(ir::types::I64, index)
    }

    /// Bounds checks and locates `size` bytes of element `index` of `array`, `offset` bytes into
    /// the element. Exits the parser if they fall outside of RAM.
    fn element(&mut self, array: usize, index: ir::Value, offset: u32, size: u32) -> Data {
        let Array { base, stride } = self.load_array(array);

        // compute address
        let addr = self.bd.ins().imul(index, stride);
        let addr = self.bd.ins().iadd(addr, base);
        let addr = self.bd.ins().iadd_imm(addr, offset as i64);

        // check bounds
        let end = self.bd.ins().iadd_imm(addr, size as i64);
        let out_of_bounds = self.bd.ins().icmp(
            ir::condcodes::IntCC::UnsignedGreaterThan,
            end,
            self.consts.ram_len,
        );

        let oob_bb = self.oob_bb();
        let in_bounds_bb = self.bd.create_block();
        self.bd
            .ins()
            .brif(out_of_bounds, oob_bb, &[], in_bounds_bb, &[]);
        self.bd.seal_block(in_bounds_bb);
        self.bd.switch_to_block(in_bounds_bb);

        // compute ptr
        let addr = if self.consts.ptr_type == ir::types::I64 {
            addr
        } else {
            self.bd.ins().ireduce(self.consts.ptr_type, addr)
        };

        Data {
            ptr: self.bd.ins().iadd(self.consts.ram_ptr, addr),
            offset: 0,
        }
    }

    /// Locates `size` bytes of attribute data, either inline or through an index into `array`.
    fn locate(&mut self, addressing: Addressing, array: usize, size: u32) -> Data {
        if addressing == Addressing::Direct {
            let data = Data {
                ptr: self.vars.src_ptr,
                offset: self.vars.read as i32,
            };

            self.vars.read += size;
            return data;
        }

        let index = self.read_index(addressing);
        self.element(array, index, 0, size)
    }

    /// Loads the base and stride of vertex array `index`, once.
    fn load_array(&mut self, index: usize) -> Array {
        if let Some(array) = self.vars.arrays[index] {
            return array;
        }

        let offset = offset_of!(JitCtx, arrays) + index * size_of::<ArrayDescriptor>();

        // load base
        let base = self.bd.ins().load(
            ir::types::I32,
            MEMFLAGS_READONLY,
            self.consts.ctx_ptr,
            (offset + offset_of!(ArrayDescriptor, address)) as i32,
        );

        // load stride
        let stride = self.bd.ins().load(
            ir::types::I32,
            MEMFLAGS_READONLY,
            self.consts.ctx_ptr,
            (offset + offset_of!(ArrayDescriptor, stride)) as i32,
        );

        let base = self.bd.ins().uextend(ir::types::I64, base);
        let stride = self.bd.ins().uextend(ir::types::I64, stride);
        let array = Array { base, stride };
        self.vars.arrays[index] = Some(array);

        array
    }

    fn load_indexed_array(&mut self, index: usize, addressing: Addressing) {
        if addressing != Addressing::Direct {
            self.load_array(index);
        }
    }

    fn load_scale(&mut self, offset: usize) -> ir::Value {
        self.bd.ins().load(
            ir::types::F32,
            MEMFLAGS_READONLY,
            self.consts.ctx_ptr,
            (offset_of!(JitCtx, scales) + offset) as i32,
        )
    }

    /// Loads everything the body needs that does not change between vertices.
    fn head(&mut self) {
        let shape = self.shape;

        self.load_indexed_array(array::POSITION, shape.position.addressing);
        if shape.position.scalar.size() < 4 {
            self.vars.pos_scale = Some(self.load_scale(offset_of!(Scales, position)));
        }

        if let Some(normals) = shape.normals {
            self.load_indexed_array(array::NORMAL, normals.addressing);
        }

        for (i, color) in shape.colors.iter().enumerate() {
            if let Some(color) = color {
                self.load_indexed_array(array::COLOR0 + i, color.addressing);
            }
        }

        for (i, tex) in shape.tex.iter().enumerate() {
            if let Some(coords) = tex.coords {
                self.load_indexed_array(array::TEX0 + i, coords.addressing);
                if coords.scalar.size() < 4 {
                    let offset = offset_of!(Scales, tex) + i * size_of::<f32>();
                    self.vars.tex_scales[i] = Some(self.load_scale(offset));
                }
            }
        }
    }

    /// Emits the parsing of a single vertex. Branches to the skip block if the vertex is dropped.
    fn body(&mut self) {
        let shape = self.shape;
        self.vars.read = 0;
        self.vars.pos_matrix = self.consts.default_pos;
        self.bd.set_srcloc(ir::SourceLoc::new(0));

        // matrix indices
        if shape.pos_matrix {
            let index = self.read_u8();
            let index = self.bd.ins().band_imm(index, 0x3F);
            self.vars.pos_matrix = self.bd.ins().uextend(ir::types::I32, index);
        }

        for i in 0..8 {
            if shape.tex[i].matrix {
                let index = self.read_u8();
                let index = self.bd.ins().band_imm(index, 0x3F);
                self.vars.tex_matrices[i] = Some(self.bd.ins().uextend(ir::types::I32, index));
            }
        }

        self.increment_srcloc();
        self.position();

        if let Some(normals) = shape.normals {
            self.increment_srcloc();
            self.normals(&normals);
        }

        for i in 0..2 {
            if let Some(color) = shape.colors[i] {
                self.increment_srcloc();
                self.color(i, &color);
            }
        }

        for i in 0..8 {
            if shape.tex[i].is_present() {
                self.increment_srcloc();
                self.tex_coord(i);
            }
        }

        // trailing position matrix index
        let offset = self.layout.pos_matrix.offset;
        self.store_le(self.vars.pos_matrix, offset);

        debug_assert_eq!(self.vars.read, shape.input_stride());
        self.bd.set_srcloc(ir::SourceLoc::default());
    }

    fn increment_srcloc(&mut self) {
        let curr = self.bd.srcloc().bits();
        self.bd.set_srcloc(ir::SourceLoc::new(curr + 1));
    }

    /// Jumps back to the loop header for the next vertex, emitting the current one if `emit`.
    fn next_vertex(&mut self, header_bb: ir::Block, emit: bool) {
        let src_ptr = self
            .bd
            .ins()
            .iadd_imm(self.vars.src_ptr, self.shape.input_stride() as i64);
        let (dst_ptr, emitted) = if emit {
            let dst_ptr = self
                .bd
                .ins()
                .iadd_imm(self.vars.dst_ptr, self.layout.stride as i64);
            let emitted = self.bd.ins().iadd_imm(self.vars.emitted, 1);
            (dst_ptr, emitted)
        } else {
            (self.vars.dst_ptr, self.vars.emitted)
        };

        let index = self.bd.ins().iadd_imm(self.vars.index, 1);
        self.bd.ins().jump(
            header_bb,
            &[
                ir::BlockArg::Value(src_ptr),
                ir::BlockArg::Value(dst_ptr),
                ir::BlockArg::Value(index),
                ir::BlockArg::Value(emitted),
            ],
        );
    }

    pub fn build(mut self) {
        // setup everything needed before the loop
        self.head();

        // setup the loop
        let header_bb = self.bd.create_block();
        let body_bb = self.bd.create_block();
        let exit_bb = self.bd.create_block();

        self.bd.append_block_param(header_bb, self.consts.ptr_type); // src ptr
        self.bd.append_block_param(header_bb, self.consts.ptr_type); // dst ptr
        self.bd.append_block_param(header_bb, ir::types::I32); // loop iter
        self.bd.append_block_param(header_bb, ir::types::I32); // emitted
        self.bd.append_block_param(exit_bb, ir::types::I32); // emitted

        let zero = self.bd.ins().iconst(ir::types::I32, 0);
        self.bd.ins().jump(
            header_bb,
            &[
                ir::BlockArg::Value(self.consts.src_ptr),
                ir::BlockArg::Value(self.consts.dst_ptr),
                ir::BlockArg::Value(zero),
                ir::BlockArg::Value(zero),
            ],
        );

        // loop header: check if loop iter < count, otherwise exit
        self.bd.switch_to_block(header_bb);
        let params = self.bd.block_params(header_bb);
        self.vars.src_ptr = params[0];
        self.vars.dst_ptr = params[1];
        self.vars.index = params[2];
        self.vars.emitted = params[3];

        let loop_cond = self.bd.ins().icmp(
            ir::condcodes::IntCC::UnsignedLessThan,
            self.vars.index,
            self.consts.count,
        );
        self.bd.ins().brif(
            loop_cond,
            body_bb,
            &[],
            exit_bb,
            &[ir::BlockArg::Value(self.vars.emitted)],
        );

        self.bd.seal_block(body_bb);
        self.bd.seal_block(exit_bb);

        // loop body: parse a single vertex, then start the next iteration
        self.bd.switch_to_block(body_bb);
        self.body();
        self.next_vertex(header_bb, true);

        // dropped vertices advance the stream only
        if let Some(skip_bb) = self.skip_bb {
            self.bd.switch_to_block(skip_bb);
            self.next_vertex(header_bb, false);
            self.bd.seal_block(skip_bb);
        }

        self.bd.seal_block(header_bb);

        // out of bounds array access
        if let Some(oob_bb) = self.oob_bb {
            self.bd.switch_to_block(oob_bb);
            let status = self.bd.ins().iconst(ir::types::I32, OUT_OF_BOUNDS as i64);
            self.bd.ins().return_(&[status]);
            self.bd.seal_block(oob_bb);
        }

        // exit
        self.bd.switch_to_block(exit_bb);
        let emitted = self.bd.block_params(exit_bb)[0];
        self.bd.ins().return_(&[emitted]);
        self.bd.finalize();
    }
}
