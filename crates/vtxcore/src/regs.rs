//! Command processor registers that control vertex loading.
use crate::descriptor::{
    VertexAttributeTable, VertexAttributeTableA, VertexAttributeTableB, VertexAttributeTableC,
    VertexDescriptor,
};
use crate::format::VertexFormat;
use bitos::{bitos, integer::u6};
use std::sync::atomic::{AtomicU64, Ordering};
use strum::{FromRepr, VariantArray};

/// Number of vertex formats the command processor can hold at once.
pub const SLOT_COUNT: usize = 8;
/// Number of vertex arrays.
pub const ARRAY_COUNT: usize = 12;

// shared by every register state, so equal generations always mean equal bases
static NEXT_ARRAYS_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Vertex arrays: position, normal, two colors and eight texture coordinates.
pub mod array {
    pub const POSITION: usize = 0;
    pub const NORMAL: usize = 1;
    pub const COLOR0: usize = 2;
    pub const TEX0: usize = 4;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ArrayDescriptor {
    pub address: u32,
    pub stride: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Arrays(pub [ArrayDescriptor; ARRAY_COUNT]);

impl Arrays {
    #[inline(always)]
    pub fn position(&self) -> ArrayDescriptor {
        self.0[array::POSITION]
    }

    #[inline(always)]
    pub fn normal(&self) -> ArrayDescriptor {
        self.0[array::NORMAL]
    }

    #[inline(always)]
    pub fn color(&self, index: usize) -> ArrayDescriptor {
        self.0[array::COLOR0 + index]
    }

    #[inline(always)]
    pub fn tex(&self, index: usize) -> ArrayDescriptor {
        self.0[array::TEX0 + index]
    }
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatrixIndexA {
    #[bits(0..6)]
    pub pos: u6,
    #[bits(6..12)]
    pub tex0: u6,
    #[bits(12..18)]
    pub tex1: u6,
    #[bits(18..24)]
    pub tex2: u6,
    #[bits(24..30)]
    pub tex3: u6,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatrixIndexB {
    #[bits(0..6)]
    pub tex4: u6,
    #[bits(6..12)]
    pub tex5: u6,
    #[bits(12..18)]
    pub tex6: u6,
    #[bits(18..24)]
    pub tex7: u6,
}

/// Register groups, selected by the high nibble of a register address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
enum Group {
    MatIndexA = 0x3,
    MatIndexB = 0x4,
    VcdLow = 0x5,
    VcdHigh = 0x6,
    VatA = 0x7,
    VatB = 0x8,
    VatC = 0x9,
    ArrayBase = 0xA,
    ArrayStride = 0xB,
}

/// A command processor register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    MatIndexA,
    MatIndexB,
    VcdLow,
    VcdHigh,
    VatA(u8),
    VatB(u8),
    VatC(u8),
    ArrayBase(u8),
    ArrayStride(u8),
}

impl Reg {
    pub fn new(addr: u8) -> Option<Self> {
        let index = addr & 0xF;
        let group = Group::from_repr(addr >> 4)?;

        Some(match group {
            Group::MatIndexA => Self::MatIndexA,
            Group::MatIndexB => Self::MatIndexB,
            Group::VcdLow => Self::VcdLow,
            Group::VcdHigh => Self::VcdHigh,
            Group::VatA if (index as usize) < SLOT_COUNT => Self::VatA(index),
            Group::VatB if (index as usize) < SLOT_COUNT => Self::VatB(index),
            Group::VatC if (index as usize) < SLOT_COUNT => Self::VatC(index),
            Group::ArrayBase if (index as usize) < ARRAY_COUNT => Self::ArrayBase(index),
            Group::ArrayStride if (index as usize) < ARRAY_COUNT => Self::ArrayStride(index),
            _ => return None,
        })
    }

    pub fn addr(self) -> u8 {
        match self {
            Self::MatIndexA => 0x30,
            Self::MatIndexB => 0x40,
            Self::VcdLow => 0x50,
            Self::VcdHigh => 0x60,
            Self::VatA(n) => 0x70 | n,
            Self::VatB(n) => 0x80 | n,
            Self::VatC(n) => 0x90 | n,
            Self::ArrayBase(n) => 0xA0 | n,
            Self::ArrayStride(n) => 0xB0 | n,
        }
    }
}

/// Which cached state a register write invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dirty {
    /// Bit N set means format slot N changed.
    pub slots: u8,
    /// Whether an array base changed.
    pub arrays: bool,
}

impl Dirty {
    pub const ALL_SLOTS: u8 = 0xFF;

    pub fn merge(self, other: Self) -> Self {
        Self {
            slots: self.slots | other.slots,
            arrays: self.arrays || other.arrays,
        }
    }

    pub fn slot(&self, slot: usize) -> bool {
        slot < SLOT_COUNT && self.slots & (1 << slot) != 0
    }
}

/// Kind of primitive a draw command assembles its vertices into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, VariantArray)]
#[repr(u8)]
pub enum Primitive {
    Quads = 0x80,
    QuadsAlt = 0x88,
    Triangles = 0x90,
    TriangleStrip = 0x98,
    TriangleFan = 0xA0,
    Lines = 0xA8,
    LineStrip = 0xB0,
    Points = 0xB8,
}

impl Primitive {
    /// Decodes the primitive of a draw opcode. The low three bits select the format slot.
    pub fn from_opcode(opcode: u8) -> Option<(Self, usize)> {
        Some((Self::from_repr(opcode & 0xF8)?, (opcode & 0x7) as usize))
    }
}

/// Register state of the command processor relevant to vertex loading.
#[derive(Debug, Clone, Default)]
pub struct CpState {
    pub vcd: VertexDescriptor,
    pub vats: [VertexAttributeTable; SLOT_COUNT],
    pub mat_index_a: MatrixIndexA,
    pub mat_index_b: MatrixIndexB,
    arrays: Arrays,
    // replaced on every array base write, 0 while every base is 0
    arrays_generation: u64,
}

impl CpState {
    /// Writes `value` to the register at `addr` and returns what the write invalidated.
    pub fn write(&mut self, addr: u8, value: u32) -> Dirty {
        let Some(reg) = Reg::new(addr) else {
            tracing::debug!("write to unknown cp register {addr:02X}: {value:08X}");
            return Dirty::default();
        };

        let mut dirty = Dirty::default();
        match reg {
            Reg::MatIndexA => self.mat_index_a = MatrixIndexA::from_bits(value),
            Reg::MatIndexB => self.mat_index_b = MatrixIndexB::from_bits(value),
            Reg::VcdLow => {
                self.vcd = VertexDescriptor::from_halves(value, self.vcd.high());
                dirty.slots = Dirty::ALL_SLOTS;
            }
            Reg::VcdHigh => {
                self.vcd = VertexDescriptor::from_halves(self.vcd.low(), value);
                dirty.slots = Dirty::ALL_SLOTS;
            }
            Reg::VatA(n) => {
                self.vats[n as usize].a = VertexAttributeTableA::from_bits(value);
                dirty.slots = 1 << n;
            }
            Reg::VatB(n) => {
                self.vats[n as usize].b = VertexAttributeTableB::from_bits(value);
                dirty.slots = 1 << n;
            }
            Reg::VatC(n) => {
                self.vats[n as usize].c = VertexAttributeTableC::from_bits(value);
                dirty.slots = 1 << n;
            }
            Reg::ArrayBase(n) => {
                self.arrays.0[n as usize].address = value & 0x3FFF_FFFF;
                self.arrays_generation = NEXT_ARRAYS_GENERATION.fetch_add(1, Ordering::Relaxed);
                dirty.arrays = true;
            }
            Reg::ArrayStride(n) => self.arrays.0[n as usize].stride = value & 0xFF,
        }

        dirty
    }

    /// Reads back the register at `addr`.
    pub fn read(&self, addr: u8) -> Option<u32> {
        Some(match Reg::new(addr)? {
            Reg::MatIndexA => self.mat_index_a.to_bits(),
            Reg::MatIndexB => self.mat_index_b.to_bits(),
            Reg::VcdLow => self.vcd.low(),
            Reg::VcdHigh => self.vcd.high(),
            Reg::VatA(n) => self.vats[n as usize].a.to_bits(),
            Reg::VatB(n) => self.vats[n as usize].b.to_bits(),
            Reg::VatC(n) => self.vats[n as usize].c.to_bits(),
            Reg::ArrayBase(n) => self.arrays.0[n as usize].address,
            Reg::ArrayStride(n) => self.arrays.0[n as usize].stride,
        })
    }

    /// Writes every register describing `format` into `slot`.
    pub fn set_format(&mut self, slot: usize, format: &VertexFormat) -> Dirty {
        let slot = (slot % SLOT_COUNT) as u8;
        let [a, b, c] = format.vat.words();

        [
            (Reg::VcdLow, format.vcd.low()),
            (Reg::VcdHigh, format.vcd.high()),
            (Reg::VatA(slot), a),
            (Reg::VatB(slot), b),
            (Reg::VatC(slot), c),
        ]
        .into_iter()
        .fold(Dirty::default(), |dirty, (reg, value)| {
            dirty.merge(self.write(reg.addr(), value))
        })
    }

    pub fn set_array(&mut self, index: usize, address: u32, stride: u32) -> Dirty {
        let index = (index % ARRAY_COUNT) as u8;
        let dirty = self.write(Reg::ArrayBase(index).addr(), address);
        self.write(Reg::ArrayStride(index).addr(), stride);
        dirty
    }

    /// The current format of `slot`.
    pub fn format(&self, slot: usize) -> VertexFormat {
        VertexFormat::new(self.vcd, self.vats[slot % SLOT_COUNT])
    }

    /// The position matrix index used by vertices that do not carry one.
    pub fn pos_matrix(&self) -> u8 {
        self.mat_index_a.pos().value()
    }

    /// The vertex arrays. They can only be changed through register writes.
    pub fn arrays(&self) -> &Arrays {
        &self.arrays
    }

    /// Identifies the current array bases. Every base write picks a new generation, unique across
    /// every `CpState`, so consumers holding a copy of the bases only need to compare it against
    /// the generation they copied.
    pub fn arrays_generation(&self) -> u64 {
        self.arrays_generation
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vcd_writes_dirty_every_slot() {
        let mut regs = CpState::default();
        assert_eq!(regs.write(0x50, 0x200).slots, 0xFF);
        assert_eq!(regs.write(0x60, 0x1).slots, 0xFF);
        assert_eq!(regs.vcd.low(), 0x200);
        assert_eq!(regs.vcd.high(), 0x1);
    }

    #[test]
    fn vat_writes_dirty_their_slot() {
        let mut regs = CpState::default();
        for n in 0..8u8 {
            assert_eq!(regs.write(0x70 + n, 1).slots, 1 << n);
            assert_eq!(regs.write(0x80 + n, 1).slots, 1 << n);
            assert_eq!(regs.write(0x90 + n, 1).slots, 1 << n);
        }

        assert_eq!(regs.write(0x78, 1), Dirty::default());
    }

    #[test]
    fn other_writes_do_not_dirty_slots() {
        let mut regs = CpState::default();
        assert_eq!(regs.write(0x30, 0x3F), Dirty::default());
        assert_eq!(regs.write(0xB0, 0x1FF), Dirty::default());
        assert_eq!(regs.write(0x12, 5), Dirty::default());

        let dirty = regs.write(0xA3, 0x8000_1000);
        assert_eq!(dirty.slots, 0);
        assert!(dirty.arrays);
        let generation = regs.arrays_generation();
        assert_ne!(generation, CpState::default().arrays_generation());
        regs.write(0xB3, 4);
        assert_eq!(regs.arrays_generation(), generation);
        assert_eq!(regs.clone().arrays_generation(), generation);

        let mut other = CpState::default();
        other.write(0xA3, 0x8000_1000);
        assert_ne!(other.arrays_generation(), generation);

        assert_eq!(regs.pos_matrix(), 0x3F);
        assert_eq!(regs.read(0xB0), Some(0xFF));
        assert_eq!(regs.arrays().color(1).address, 0x1000);
    }

    #[test]
    fn registers_read_back() {
        let mut regs = CpState::default();
        regs.write(0x92, 0xDEAD_BEEF);
        regs.write(0x40, 0x0000_0041);

        assert_eq!(regs.read(0x92), Some(0xDEAD_BEEF));
        assert_eq!(regs.mat_index_b.tex4().value(), 1);
        assert_eq!(regs.mat_index_b.tex5().value(), 1);
        assert_eq!(regs.read(0x20), None);
    }

    #[test]
    fn primitives() {
        assert_eq!(Primitive::from_opcode(0x9A), Some((Primitive::TriangleStrip, 2)));
        assert_eq!(Primitive::from_opcode(0x20), None);
        for primitive in Primitive::VARIANTS {
            assert_eq!(Primitive::from_repr(*primitive as u8), Some(*primitive));
        }
    }
}
