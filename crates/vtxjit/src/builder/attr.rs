use cranelift::codegen::ir;
use cranelift::prelude::InstBuilder;
use vtxcore::convert::normal_scale;
use vtxcore::format::{Addressing, Color, Coords, Normals, Packing, Scalar};
use vtxcore::regs::array;

use crate::builder::{MEMFLAGS_READONLY, ParserBuilder};

/// Location of attribute data: either inside the current vertex of the stream or in RAM.
#[derive(Clone, Copy)]
pub struct Data {
    pub ptr: ir::Value,
    pub offset: i32,
}

impl Data {
    fn at(self, offset: u32) -> Self {
        Self {
            ptr: self.ptr,
            offset: self.offset + offset as i32,
        }
    }
}

impl ParserBuilder<'_> {
    fn load(&mut self, ty: ir::Type, data: Data) -> ir::Value {
        self.bd
            .ins()
            .load(ty, MEMFLAGS_READONLY, data.ptr, data.offset)
    }

    /// Parses a single big endian component. Integers are converted to F32 and multiplied by
    /// `scale`, floats are only byteswapped and returned as their bits.
    fn component(&mut self, scalar: Scalar, data: Data, scale: Option<ir::Value>) -> ir::Value {
        // 01. load the value
        let (ty, signed) = match scalar {
            Scalar::U8 => (ir::types::I8, false),
            Scalar::I8 => (ir::types::I8, true),
            Scalar::U16 => (ir::types::I16, false),
            Scalar::I16 => (ir::types::I16, true),
            Scalar::F32 => (ir::types::I32, false),
        };

        let value = self.load(ty, data);

        // 02. byteswap
        let value = if ty.bytes() == 1 {
            value
        } else {
            self.bd.ins().bswap(value)
        };

        if scalar == Scalar::F32 {
            return value;
        }

        // 03. extend and convert to F32
        let value = if signed {
            let value = self.bd.ins().sextend(ir::types::I32, value);
            self.bd.ins().fcvt_from_sint(ir::types::F32, value)
        } else {
            let value = self.bd.ins().uextend(ir::types::I32, value);
            self.bd.ins().fcvt_from_uint(ir::types::F32, value)
        };

        // 04. multiply by scale
        match scale {
            Some(scale) => self.bd.ins().fmul(value, scale),
            None => value,
        }
    }

    /// Parses `coords` from `data` and writes `len` floats at `offset`. Missing components are
    /// zero.
    fn coords(
        &mut self,
        coords: &Coords,
        data: Data,
        scale: Option<ir::Value>,
        offset: u32,
        len: u32,
    ) {
        let size = coords.scalar.size();
        for i in 0..len {
            let value = if i < coords.components {
                self.component(coords.scalar, data.at(i * size), scale)
            } else {
                self.bd.ins().f32const(0.0)
            };

            self.store(value, offset + 4 * i);
        }
    }

    pub(super) fn position(&mut self) {
        let coords = self.shape.position;
        let size = coords.data_size();

        let data = if coords.addressing == Addressing::Direct {
            self.locate(coords.addressing, array::POSITION, size)
        } else {
            let index = self.read_index(coords.addressing);

            // the "no data" index drops the vertex
            let sentinel = match coords.addressing {
                Addressing::Index16 => 0xFFFF,
                _ => 0xFF,
            };

            let is_sentinel = self
                .bd
                .ins()
                .icmp_imm(ir::condcodes::IntCC::Equal, index, sentinel);

            let skip_bb = self.skip_bb();
            let valid_bb = self.bd.create_block();
            self.bd.ins().brif(is_sentinel, skip_bb, &[], valid_bb, &[]);
            self.bd.seal_block(valid_bb);
            self.bd.switch_to_block(valid_bb);

            self.element(array::POSITION, index, 0, size)
        };

        let offset = self.layout.position.offset;
        self.coords(&coords, data, self.vars.pos_scale, offset, 3);
    }

    pub(super) fn normals(&mut self, normals: &Normals) {
        let size = normals.normal_size();
        let coords = Coords {
            addressing: normals.addressing,
            scalar: normals.scalar,
            components: 3,
        };

        let scale = if normals.scalar == Scalar::F32 {
            None
        } else {
            Some(self.bd.ins().f32const(normal_scale(normals.scalar)))
        };

        let data: Vec<Data> = if normals.index3 {
            let indices: Vec<_> = (0..3)
                .map(|_| self.read_index(normals.addressing))
                .collect();

            indices
                .into_iter()
                .enumerate()
                .map(|(i, index)| self.element(array::NORMAL, index, i as u32 * size, size))
                .collect()
        } else {
            let data = self.locate(normals.addressing, array::NORMAL, normals.count * size);
            (0..normals.count).map(|i| data.at(i * size)).collect()
        };

        for (i, data) in data.into_iter().enumerate() {
            let offset = self.layout.normals[i].offset;
            self.coords(&coords, data, scale, offset, 3);
        }
    }

    /// Expands the low `bits` bits of `value` to 8 by replicating the top bits.
    fn expand(&mut self, value: ir::Value, bits: i64) -> ir::Value {
        match bits {
            4 => self.bd.ins().imul_imm(value, 0x11),
            _ => {
                let high = self.bd.ins().ishl_imm(value, 8 - bits);
                let low = self.bd.ins().ushr_imm(value, 2 * bits - 8);
                self.bd.ins().bor(high, low)
            }
        }
    }

    /// Packs four I32 channels into a little endian RGBA word.
    fn rgba(&mut self, [r, g, b, a]: [ir::Value; 4]) -> ir::Value {
        let g = self.bd.ins().ishl_imm(g, 8);
        let b = self.bd.ins().ishl_imm(b, 16);
        let a = self.bd.ins().ishl_imm(a, 24);

        let rg = self.bd.ins().bor(r, g);
        let ba = self.bd.ins().bor(b, a);
        self.bd.ins().bor(rg, ba)
    }

    fn load_u8(&mut self, data: Data, offset: u32) -> ir::Value {
        let value = self.load(ir::types::I8, data.at(offset));
        self.bd.ins().uextend(ir::types::I32, value)
    }

    fn load_be16(&mut self, data: Data) -> ir::Value {
        let value = self.load(ir::types::I16, data);
        let value = self.bd.ins().bswap(value);
        self.bd.ins().uextend(ir::types::I32, value)
    }

    fn read_rgba(&mut self, packing: Packing, data: Data) -> ir::Value {
        match packing {
            Packing::Rgb565 => {
                let value = self.load_be16(data);
                let r = self.shift_mask(value, 11, 0x1F);
                let g = self.shift_mask(value, 5, 0x3F);
                let b = self.shift_mask(value, 0, 0x1F);

                let r = self.expand(r, 5);
                let g = self.expand(g, 6);
                let b = self.expand(b, 5);
                let a = self.bd.ins().iconst(ir::types::I32, 0xFF);
                self.rgba([r, g, b, a])
            }
            Packing::Rgb888 | Packing::Rgb888x => {
                let r = self.load_u8(data, 0);
                let g = self.load_u8(data, 1);
                let b = self.load_u8(data, 2);
                let a = self.bd.ins().iconst(ir::types::I32, 0xFF);
                self.rgba([r, g, b, a])
            }
            Packing::Rgba4444 => {
                let value = self.load_be16(data);
                let channels = [12, 8, 4, 0].map(|shift| {
                    let channel = self.shift_mask(value, shift, 0xF);
                    self.expand(channel, 4)
                });

                self.rgba(channels)
            }
            Packing::Rgba6666 => {
                let high = self.load_u8(data, 0);
                let mid = self.load_u8(data, 1);
                let low = self.load_u8(data, 2);

                let high = self.bd.ins().ishl_imm(high, 16);
                let mid = self.bd.ins().ishl_imm(mid, 8);
                let value = self.bd.ins().bor(high, mid);
                let value = self.bd.ins().bor(value, low);

                let channels = [18, 12, 6, 0].map(|shift| {
                    let channel = self.shift_mask(value, shift, 0x3F);
                    self.expand(channel, 6)
                });

                self.rgba(channels)
            }
            Packing::Rgba8888 => {
                // bytes are already in RGBA order
                let flags = MEMFLAGS_READONLY.with_endianness(ir::Endianness::Little);
                self.bd
                    .ins()
                    .load(ir::types::I32, flags, data.ptr, data.offset)
            }
        }
    }

    pub(super) fn color(&mut self, index: usize, color: &Color) {
        let data = self.locate(color.addressing, array::COLOR0 + index, color.packing.size());
        let rgba = self.read_rgba(color.packing, data);

        // colors without alpha are opaque
        let rgba = if color.alpha {
            rgba
        } else {
            let alpha = self.bd.ins().iconst(ir::types::I32, 0xFF00_0000u32 as i64);
            self.bd.ins().bor(rgba, alpha)
        };

        let offset = self.layout.colors[index].offset;
        self.store_le(rgba, offset);
    }

    pub(super) fn tex_coord(&mut self, index: usize) {
        let tex = self.shape.tex[index];
        let offset = self.layout.tex[index].offset;

        match tex.coords {
            Some(coords) => {
                let data = self.locate(coords.addressing, array::TEX0 + index, coords.data_size());
                let len = if tex.matrix { 2 } else { coords.components };
                let scale = self.vars.tex_scales[index];
                self.coords(&coords, data, scale, offset, len);
            }
            None => {
                let zero = self.bd.ins().f32const(0.0);
                self.store(zero, offset);
                self.store(zero, offset + 4);
            }
        }

        if let Some(matrix) = self.vars.tex_matrices[index] {
            let matrix = self.bd.ins().fcvt_from_uint(ir::types::F32, matrix);
            self.store(matrix, offset + 8);
        }
    }
}
