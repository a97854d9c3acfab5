//! Per call state of a parse.
use crate::format::Addressing;
use crate::regs::ArrayDescriptor;
use crate::{ParseCtx, ParseError, Scales};

/// What to do with the rest of the vertex after a stage ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Drop this vertex.
    Skip,
}

/// Reads `size` bytes of element `index` of `array`, `offset` bytes into the element.
#[inline(always)]
pub fn array_data<'r>(
    ram: &'r [u8],
    array: ArrayDescriptor,
    index: u16,
    offset: u32,
    size: u32,
) -> Result<&'r [u8], ParseError> {
    let start = array.address as u64 + index as u64 * array.stride as u64 + offset as u64;
    let end = start + size as u64;

    ram.get(start as usize..end as usize)
        .ok_or(ParseError::ArrayOutOfBounds)
}

/// Cursor over the source and destination of a parse.
///
/// Callers check the bounds of both buffers for the whole call before creating a cursor, so
/// stages never observe a short buffer.
pub struct Cursor<'a> {
    src: &'a [u8],
    read: usize,
    dst: &'a mut [u8],
    write: usize,
    /// Vertices left to parse.
    pub remaining: u32,
    pub scales: Scales,
    /// Position matrix index of the current vertex.
    pub pos_matrix: u8,
    /// Texture matrix indices of the current vertex.
    pub tex_matrices: [u8; 8],
    /// Whether the current vertex is being dropped.
    pub skip: bool,
}

impl<'a> Cursor<'a> {
    pub fn new(ctx: &ParseCtx<'_>, src: &'a [u8], dst: &'a mut [u8], count: u32) -> Self {
        Self {
            src,
            read: 0,
            dst,
            write: 0,
            remaining: count,
            scales: ctx.scales,
            pos_matrix: ctx.pos_matrix & 0x3F,
            tex_matrices: [0; 8],
            skip: false,
        }
    }

    #[inline(always)]
    pub fn read_offset(&self) -> usize {
        self.read
    }

    #[inline(always)]
    pub fn write_offset(&self) -> usize {
        self.write
    }

    /// Takes the next `n` bytes of the source.
    #[inline(always)]
    pub fn take(&mut self, n: usize) -> &'a [u8] {
        let src: &'a [u8] = self.src;
        let data = &src[self.read..self.read + n];
        self.read += n;
        data
    }

    #[inline(always)]
    pub fn read_u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    /// Reads an index of the given addressing mode. Direct addressing has no index.
    #[inline(always)]
    pub fn read_index(&mut self, addressing: Addressing) -> u16 {
        match addressing {
            Addressing::Direct => 0,
            Addressing::Index8 => self.read_u8() as u16,
            Addressing::Index16 => {
                let data = self.take(2);
                u16::from_be_bytes([data[0], data[1]])
            }
        }
    }

    #[inline(always)]
    pub fn write(&mut self, bytes: &[u8]) {
        self.dst[self.write..self.write + bytes.len()].copy_from_slice(bytes);
        self.write += bytes.len();
    }

    #[inline(always)]
    pub fn write_f32(&mut self, value: f32) {
        self.write(&value.to_ne_bytes());
    }

    /// Runs `body` once per remaining vertex and returns how many vertices were written.
    ///
    /// When `body` drops a vertex the source skips to the next vertex and the destination is
    /// rewound to where the vertex started.
    pub fn vertices(
        &mut self,
        input_stride: u32,
        mut body: impl FnMut(&mut Self) -> Result<Flow, ParseError>,
    ) -> Result<u32, ParseError> {
        let mut written = 0;
        while self.remaining > 0 {
            let read = self.read;
            let write = self.write;

            self.skip = body(self)? == Flow::Skip;
            if self.skip {
                self.read = read + input_stride as usize;
                self.write = write;
            } else {
                debug_assert_eq!(self.read, read + input_stride as usize);
                written += 1;
            }

            self.remaining -= 1;
        }

        Ok(written)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::regs::Arrays;

    #[test]
    fn skipped_vertices_rewind_the_destination() {
        let arrays = Arrays::default();
        let ctx = ParseCtx::new(&[], &arrays);
        let src = [1, 2, 3, 4, 5, 6];
        let mut dst = [0; 6];

        let mut cursor = Cursor::new(&ctx, &src, &mut dst, 3);
        let written = cursor
            .vertices(2, |c| {
                let value = c.take(2)[0];
                c.write(&[value, value]);
                Ok(if value == 3 { Flow::Skip } else { Flow::Continue })
            })
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(cursor.read_offset(), 6);
        assert_eq!(cursor.write_offset(), 4);
        assert_eq!(dst, [1, 1, 5, 5, 0, 0]);
    }

    #[test]
    fn array_reads_are_bounds_checked() {
        let ram = [0u8; 64];
        let array = ArrayDescriptor {
            address: 32,
            stride: 8,
        };

        assert_eq!(array_data(&ram, array, 3, 0, 8).unwrap().len(), 8);
        assert_eq!(
            array_data(&ram, array, 3, 4, 8),
            Err(ParseError::ArrayOutOfBounds)
        );
        assert_eq!(
            array_data(&ram, array, 0xFFFF, 0, 1),
            Err(ParseError::ArrayOutOfBounds)
        );
    }
}
