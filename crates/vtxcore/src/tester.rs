//! Cross-validation of a candidate parser against a reference one.
use crate::{
    CanonicalKey, Environment, NativeLayout, ParseCtx, ParseError, ParserKind, VertexFormat,
    VertexParser, check_buffers,
};

/// Runs a reference and a candidate parser on every call and reports any divergence between
/// them. The caller always receives the output of the reference.
pub struct Tester {
    format: VertexFormat,
    key: CanonicalKey,
    reference: Box<dyn VertexParser>,
    candidate: Box<dyn VertexParser>,
    comparable: bool,
    scratch: [Vec<u8>; 2],
    mismatches: u64,
}

impl Tester {
    pub fn new(
        format: VertexFormat,
        reference: Box<dyn VertexParser>,
        candidate: Box<dyn VertexParser>,
    ) -> Self {
        let key = CanonicalKey::new(&format);
        let comparable = reference.input_stride() == candidate.input_stride()
            && reference.layout() == candidate.layout();

        if !comparable {
            tracing::error!(
                "{} parser for {} is incompatible with the {} parser: stride {} vs {}, layouts differ: {}",
                candidate.kind().name(),
                format.name(),
                reference.kind().name(),
                candidate.input_stride(),
                reference.input_stride(),
                reference.layout() != candidate.layout(),
            );
        }

        Self {
            format,
            key,
            reference,
            candidate,
            comparable,
            scratch: [Vec::new(), Vec::new()],
            mismatches: 0,
        }
    }

    /// Number of calls in which the parsers disagreed.
    pub fn mismatches(&self) -> u64 {
        self.mismatches
    }

    pub fn reference(&self) -> &dyn VertexParser {
        &*self.reference
    }

    pub fn candidate(&self) -> &dyn VertexParser {
        &*self.candidate
    }

    fn report(&mut self, what: std::fmt::Arguments) {
        self.mismatches += 1;
        tracing::error!(
            "{} parser diverges from {} on {} ({:08X?}, vcd {:08X}:{:08X}, vat {:08X?}): {what}",
            self.candidate.kind().name(),
            self.reference.kind().name(),
            self.format.name(),
            self.key.words(),
            self.format.vcd.low(),
            self.format.vcd.high(),
            self.format.vat.words(),
        );
    }

    fn compare(&mut self, reference: &Result<u32, ParseError>, candidate: &Result<u32, ParseError>) {
        let stride = self.reference.layout().stride as usize;
        match (reference, candidate) {
            (Ok(a), Ok(b)) => {
                if a != b {
                    self.report(format_args!("emitted {b} vertices instead of {a}"));
                }

                let len = *a.min(b) as usize * stride;
                let [expected, got] = &self.scratch;
                let first = expected[..len]
                    .iter()
                    .zip(&got[..len])
                    .position(|(x, y)| x != y);

                if let Some(offset) = first {
                    let vertex = offset / stride;
                    let expected = &expected[vertex * stride..(vertex + 1) * stride];
                    let got = &got[vertex * stride..(vertex + 1) * stride];
                    let what = format!(
                        "vertex {vertex} differs at byte {offset}: expected {expected:02X?}, got {got:02X?}"
                    );

                    self.report(format_args!("{what}"));
                }
            }
            (a, b) if a != b => {
                self.report(format_args!("returned {b:?} instead of {a:?}"));
            }
            _ => (),
        }
    }
}

impl VertexParser for Tester {
    fn kind(&self) -> ParserKind {
        ParserKind::Tester
    }

    fn input_stride(&self) -> u32 {
        self.reference.input_stride()
    }

    fn layout(&self) -> &NativeLayout {
        self.reference.layout()
    }

    fn environment_is_supported(&self, env: &Environment) -> bool {
        self.reference.environment_is_supported(env) && self.candidate.environment_is_supported(env)
    }

    fn parse(
        &mut self,
        ctx: &ParseCtx<'_>,
        src: &[u8],
        dst: &mut [u8],
        count: u32,
    ) -> Result<u32, ParseError> {
        if !self.comparable {
            return self.reference.parse(ctx, src, dst, count);
        }

        let stride = self.reference.layout().stride;
        check_buffers(self.input_stride(), stride, src, dst, count)?;

        let len = count as usize * stride as usize;
        for buffer in &mut self.scratch {
            buffer.clear();
            buffer.resize(len, 0);
        }

        let [expected, got] = &mut self.scratch;
        let reference = self.reference.parse(ctx, src, expected, count);
        let candidate = self.candidate.parse(ctx, src, got, count);
        self.compare(&reference, &candidate);

        let emitted = reference?;
        let len = emitted as usize * stride as usize;
        dst[..len].copy_from_slice(&self.scratch[0][..len]);

        Ok(emitted)
    }
}
