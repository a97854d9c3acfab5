//! A cache of vertex loaders keyed by canonical vertex format.
//!
//! Each of the eight format slots of the command processor resolves to a [`Loader`], which is
//! shared by every slot whose format has the same canonical key. Loaders pick the fastest parser
//! available: JIT compiled code, then precompiled routines, then the interpreter.

use easyerr::Error;
use rustc_hash::FxHashMap;
use std::fmt::Write;
use vtxcore::regs::{Arrays, Dirty, SLOT_COUNT};
use vtxcore::{
    CanonicalKey, CpState, Environment, FormatError, Interpreter, NativeLayout, ParseCtx,
    ParseError, ParserKind, Precompiled, PrecompiledTable, Primitive, Scales, Shape, Tester,
    VertexFormat, VertexParser,
};
use vtxjit::Jit;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("draw needs {required} bytes of vertex data but only {available} are available")]
    InsufficientData { required: usize, available: usize },
    #[error("no such format slot: {slot}")]
    InvalidSlot { slot: usize },
    #[error("unsupported vertex descriptor")]
    UnsupportedDescriptor { source: FormatError },
    #[error(transparent)]
    Parse { source: ParseError },
}

/// Which parsers the cache may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Compile parsers to native code when the host supports it.
    pub jit: bool,
    /// Use precompiled routines for the formats that have one.
    pub precompiled: bool,
    /// Run the interpreter alongside every other parser and report any divergence.
    pub compare_parsers: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jit: true,
            precompiled: true,
            compare_parsers: false,
        }
    }
}

/// Identifies a loader within a [`LoaderCache`]. Stays valid until the cache is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderId(usize);

/// A vertex loader: the parser for a single canonical format.
pub struct Loader {
    name: String,
    key: CanonicalKey,
    strategy: ParserKind,
    parser: Box<dyn VertexParser>,
    /// Used whenever `parser` does not support the environment of a draw.
    fallback: Option<Interpreter>,
    vertices: u64,
}

impl Loader {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &CanonicalKey {
        &self.key
    }

    /// Kind of the parser selected for this loader, even if wrapped for cross-validation.
    pub fn strategy(&self) -> ParserKind {
        self.strategy
    }

    pub fn parser(&self) -> &dyn VertexParser {
        &*self.parser
    }

    pub fn input_stride(&self) -> u32 {
        self.parser.input_stride()
    }

    pub fn layout(&self) -> &NativeLayout {
        self.parser.layout()
    }

    /// Vertices emitted by this loader so far.
    pub fn vertices(&self) -> u64 {
        self.vertices
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Vertices decoded by a single draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub primitive: Primitive,
    /// Vertices appended to the output.
    pub vertices: u32,
    /// Bytes of vertex data consumed.
    pub consumed: usize,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    loader: Option<LoaderId>,
    dirty: bool,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            loader: None,
            dirty: true,
        }
    }
}

/// Resolves format slots to loaders and decodes draws with them.
///
/// `H` is a backend handle created once per distinct native layout, such as an input layout
/// object of a graphics API.
pub struct LoaderCache<H = ()> {
    settings: Settings,
    // parsers must go before the JIT which owns their code
    loaders: Vec<Loader>,
    jit: Option<Jit>,
    jit_failed: bool,
    precompiled: PrecompiledTable,
    lookup: FxHashMap<CanonicalKey, LoaderId>,
    layouts: FxHashMap<NativeLayout, H>,
    slots: [Slot; SLOT_COUNT],
    arrays: Arrays,
    // array generation of the registers `arrays` was copied from
    arrays_generation: Option<u64>,
}

impl<H> LoaderCache<H> {
    pub fn new(settings: Settings, precompiled: PrecompiledTable) -> Self {
        Self {
            settings,
            loaders: Vec::new(),
            jit: None,
            jit_failed: false,
            precompiled,
            lookup: FxHashMap::default(),
            layouts: FxHashMap::default(),
            slots: [Slot::default(); SLOT_COUNT],
            arrays: Arrays::default(),
            arrays_generation: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Number of loaders in the cache.
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    pub fn loader(&self, id: LoaderId) -> &Loader {
        &self.loaders[id.0]
    }

    pub fn loaders(&self) -> impl Iterator<Item = &Loader> {
        self.loaders.iter()
    }

    /// Forces `slot` to be resolved again on its next use.
    pub fn mark_dirty(&mut self, slot: usize) {
        if let Some(slot) = self.slots.get_mut(slot) {
            slot.dirty = true;
        }
    }

    pub fn mark_all_dirty(&mut self) {
        for slot in &mut self.slots {
            slot.dirty = true;
        }
    }

    /// Marks the slots invalidated by a register write.
    pub fn invalidate(&mut self, dirty: Dirty) {
        for slot in 0..SLOT_COUNT {
            if dirty.slot(slot) {
                self.mark_dirty(slot);
            }
        }
    }

    fn jit(&mut self) -> Option<&mut Jit> {
        if !self.settings.jit || !vtxjit::is_supported() || self.jit_failed {
            return None;
        }

        if self.jit.is_none() {
            match Jit::new() {
                Ok(jit) => self.jit = Some(jit),
                Err(e) => {
                    tracing::error!("failed to create vertex parser JIT: {e}");
                    self.jit_failed = true;
                }
            }
        }

        self.jit.as_mut()
    }

    fn select(
        &mut self,
        key: &CanonicalKey,
        shape: &Shape,
    ) -> Result<Box<dyn VertexParser>, FormatError> {
        if let Some(jit) = self.jit() {
            match jit.compile(shape) {
                Ok(parser) => return Ok(Box::new(parser)),
                Err(e) => tracing::debug!("failed to compile vertex parser, falling back: {e}"),
            }
        }

        if self.settings.precompiled
            && let Some(routine) = self.precompiled.get(key)
        {
            return Ok(Box::new(Precompiled::new(shape, routine)?));
        }

        Ok(Box::new(Interpreter::new(shape)?))
    }

    fn create(&mut self, format: VertexFormat, key: CanonicalKey) -> Result<Loader, FormatError> {
        let name = format.name();
        let shape = format.shape()?;
        let parser = self.select(&key, &shape)?;
        let strategy = parser.kind();

        let (parser, fallback) = if strategy == ParserKind::Interpreter {
            (parser, None)
        } else {
            let parser: Box<dyn VertexParser> = if self.settings.compare_parsers {
                let reference = Box::new(Interpreter::new(&shape)?);
                Box::new(Tester::new(format, reference, parser))
            } else {
                parser
            };

            (parser, Some(Interpreter::new(&shape)?))
        };

        tracing::debug!(
            "created {} loader for {name} ({} -> {} bytes)",
            strategy.name(),
            parser.input_stride(),
            parser.layout().stride,
        );

        Ok(Loader {
            name,
            key,
            strategy,
            parser,
            fallback,
            vertices: 0,
        })
    }

    /// Returns the loader for the current format of `slot`, creating it if needed.
    pub fn resolve(&mut self, regs: &CpState, slot: usize) -> Result<LoaderId, DecodeError> {
        let Some(state) = self.slots.get(slot) else {
            return Err(DecodeError::InvalidSlot { slot });
        };

        if !state.dirty
            && let Some(id) = state.loader
        {
            return Ok(id);
        }

        let format = regs.format(slot);
        let key = CanonicalKey::new(&format);
        let id = match self.lookup.get(&key) {
            Some(id) => *id,
            None => {
                tracing::debug!("loader cache miss for {} ({:08X?})", format.name(), key.words());
                let loader = match self.create(format, key) {
                    Ok(loader) => loader,
                    Err(e) => {
                        tracing::error!(
                            "unsupported vertex format in slot {slot} (vcd {:08X}:{:08X}, vat {:08X?}): {e}",
                            format.vcd.low(),
                            format.vcd.high(),
                            format.vat.words(),
                        );

                        return Err(DecodeError::UnsupportedDescriptor { source: e });
                    }
                };

                let id = LoaderId(self.loaders.len());
                self.loaders.push(loader);
                self.lookup.insert(key, id);
                id
            }
        };

        self.slots[slot] = Slot {
            loader: Some(id),
            dirty: false,
        };

        Ok(id)
    }

    /// Input stride of the current format of `slot`, without creating a loader for it. Invalid
    /// formats report a stride of 0 and are rejected once resolved.
    fn current_input_stride(&self, regs: &CpState, slot: usize) -> Result<u32, DecodeError> {
        let Some(state) = self.slots.get(slot) else {
            return Err(DecodeError::InvalidSlot { slot });
        };

        if !state.dirty
            && let Some(id) = state.loader
        {
            return Ok(self.loaders[id.0].input_stride());
        }

        let format = regs.format(slot);
        Ok(match self.lookup.get(&CanonicalKey::new(&format)) {
            Some(id) => self.loaders[id.0].input_stride(),
            None => format.shape().map_or(0, |shape| shape.input_stride()),
        })
    }

    /// Input stride, output stride and native layout of the current format of `slot`.
    pub fn peek_size(
        &mut self,
        regs: &CpState,
        slot: usize,
    ) -> Result<(u32, u32, NativeLayout), DecodeError> {
        let id = self.resolve(regs, slot)?;
        let loader = self.loader(id);
        let layout = *loader.layout();

        Ok((loader.input_stride(), layout.stride, layout))
    }

    /// Decodes a draw of `count` vertices in the format of `slot`, appending them to `dst`. On
    /// error `dst` is left as it was.
    #[expect(clippy::too_many_arguments, reason = "mirrors the draw command")]
    pub fn decode(
        &mut self,
        regs: &mut CpState,
        env: &Environment,
        ram: &[u8],
        slot: usize,
        primitive: Primitive,
        count: u32,
        src: &[u8],
        dst: &mut Vec<u8>,
    ) -> Result<Batch, DecodeError> {
        // a short draw must not compile anything
        let required = count as usize * self.current_input_stride(regs, slot)? as usize;
        if src.len() < required {
            return Err(DecodeError::InsufficientData {
                required,
                available: src.len(),
            });
        }

        let id = self.resolve(regs, slot)?;

        let generation = regs.arrays_generation();
        if self.arrays_generation != Some(generation) {
            for (cached, array) in self.arrays.0.iter_mut().zip(&regs.arrays().0) {
                cached.address = array.address;
            }

            self.arrays_generation = Some(generation);
        }

        // strides are cheap to read and never marked dirty
        for (cached, array) in self.arrays.0.iter_mut().zip(&regs.arrays().0) {
            cached.stride = array.stride;
        }

        let loader = &mut self.loaders[id.0];
        let output_stride = loader.layout().stride as usize;

        let ctx = ParseCtx {
            ram,
            arrays: &self.arrays,
            scales: Scales::new(&regs.format(slot).vat),
            pos_matrix: regs.pos_matrix(),
        };

        let parser: &mut dyn VertexParser = match &mut loader.fallback {
            Some(fallback) if !loader.parser.environment_is_supported(env) => {
                tracing::trace!(
                    "{} parser of {} does not support {env:?}, using the interpreter",
                    loader.strategy.name(),
                    loader.name,
                );
                fallback as &mut dyn VertexParser
            }
            _ => loader.parser.as_mut(),
        };

        let start = dst.len();
        dst.resize(start + count as usize * output_stride, 0);

        match parser.parse(&ctx, &src[..required], &mut dst[start..], count) {
            Ok(emitted) => {
                dst.truncate(start + emitted as usize * output_stride);
                loader.vertices += emitted as u64;

                Ok(Batch {
                    primitive,
                    vertices: emitted,
                    consumed: required,
                })
            }
            Err(e) => {
                dst.truncate(start);
                tracing::error!("failed to decode {count} vertices of {}: {e}", loader.name);
                Err(DecodeError::Parse { source: e })
            }
        }
    }

    /// Returns the backend handle for `layout`, creating it with `create` the first time.
    pub fn input_layout(
        &mut self,
        layout: &NativeLayout,
        create: impl FnOnce(&NativeLayout) -> H,
    ) -> &H {
        self.layouts
            .entry(*layout)
            .or_insert_with(|| create(layout))
    }

    fn by_usage(&self) -> Vec<&Loader> {
        let mut loaders: Vec<_> = self.loaders.iter().collect();
        loaders.sort_by(|a, b| b.vertices.cmp(&a.vertices).then_with(|| a.key.cmp(&b.key)));
        loaders
    }

    /// One line per loader with its name and emitted vertex count, most used first.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for loader in self.by_usage() {
            _ = writeln!(out, "{} - {} v", loader.name, loader.vertices);
        }

        out
    }

    /// Rust source registering a precompiled routine for every loader that does not use one,
    /// most used first.
    pub fn dump_precompiled(&self) -> String {
        let mut out = String::new();
        _ = writeln!(
            out,
            "pub fn register(table: &mut PrecompiledTable) -> Result<(), FormatError> {{"
        );

        for loader in self.by_usage() {
            if loader.strategy == ParserKind::Precompiled {
                continue;
            }

            let [w0, w1, w2, w3] = loader.key.words();
            _ = writeln!(out, "    // {} - {} v", loader.name, loader.vertices);
            _ = writeln!(
                out,
                "    table.insert(\n        [{w0:#010X}, {w1:#010X}, {w2:#010X}, {w3:#010X}],\n        templated::<{w0:#010X}, {w1:#010X}, {w2:#010X}, {w3:#010X}>,\n    )?;"
            );
        }

        _ = writeln!(out, "    Ok(())\n}}");
        out
    }

    /// Drops every loader and layout handle. Compiled code is kept mapped until the cache is
    /// dropped.
    pub fn clear(&mut self) {
        tracing::debug!("clearing {} vertex loaders", self.loaders.len());
        self.loaders.clear();
        self.lookup.clear();
        self.layouts.clear();
        self.slots = [Slot::default(); SLOT_COUNT];
        self.arrays_generation = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nanorand::WyRand;
    use vtxcore::catalog::{self, Scene};
    use vtxcore::descriptor::{
        AttributeMode, CoordsFormat, PositionDescriptor, PositionKind, TexCoordsDescriptor,
        TexCoordsKind, VertexAttributeTable, VertexDescriptor,
    };
    use vtxcore::precompiled::templated;
    use vtxcore::regs::array;
    use zerocopy::big_endian::{F32, U16};
    use zerocopy::{Immutable, IntoBytes};

    const INTERPRETER_ONLY: Settings = Settings {
        jit: false,
        precompiled: false,
        compare_parsers: false,
    };

    fn position(mode: AttributeMode, format: CoordsFormat, shift: u8) -> VertexFormat {
        let mut vat = VertexAttributeTable::default();
        vat.a = vat
            .a
            .with_position(PositionDescriptor::new(PositionKind::Vec3, format, shift));
        VertexFormat::new(VertexDescriptor::default().with_position(mode), vat)
    }

    fn float_position() -> VertexFormat {
        position(AttributeMode::Direct, CoordsFormat::F32, 0)
    }

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn decode(
        cache: &mut LoaderCache,
        regs: &mut CpState,
        slot: usize,
        count: u32,
        src: &[u8],
        dst: &mut Vec<u8>,
    ) -> Result<Batch, DecodeError> {
        cache.decode(
            regs,
            &Environment::default(),
            &[],
            slot,
            Primitive::Triangles,
            count,
            src,
            dst,
        )
    }

    #[test]
    fn resolve_is_idempotent() {
        let mut cache = LoaderCache::<()>::new(INTERPRETER_ONLY, PrecompiledTable::new());
        let mut regs = CpState::default();
        regs.set_format(0, &float_position());

        // same shape, different fraction
        let mut scaled = float_position();
        scaled.vat.a = scaled.vat.a.with_position(PositionDescriptor::new(
            PositionKind::Vec3,
            CoordsFormat::F32,
            5,
        ));
        regs.set_format(1, &scaled);

        let id = cache.resolve(&regs, 0).unwrap();
        assert_eq!(cache.resolve(&regs, 0).unwrap(), id);
        assert_eq!(cache.resolve(&regs, 1).unwrap(), id);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.loader(id).name(), "P_mtx0_3_Dir_flt_");

        assert!(matches!(
            cache.resolve(&regs, 8),
            Err(DecodeError::InvalidSlot { slot: 8 })
        ));
    }

    #[test]
    fn dirty_slots_are_resolved_again() {
        let mut cache = LoaderCache::<()>::new(INTERPRETER_ONLY, PrecompiledTable::new());
        let mut regs = CpState::default();
        regs.set_format(0, &float_position());
        let a = cache.resolve(&regs, 0).unwrap();

        let dirty = regs.set_format(
            0,
            &position(AttributeMode::Direct, CoordsFormat::U16, 0),
        );

        // not marked yet
        assert_eq!(cache.resolve(&regs, 0).unwrap(), a);

        cache.invalidate(dirty);
        let b = cache.resolve(&regs, 0).unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.loader(b).input_stride(), 6);
        assert_eq!(cache.len(), 2);

        // back to the first format
        regs.set_format(0, &float_position());
        cache.mark_all_dirty();
        assert_eq!(cache.resolve(&regs, 0).unwrap(), a);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn insufficient_data_leaves_output_untouched() {
        let mut cache = LoaderCache::<()>::new(INTERPRETER_ONLY, PrecompiledTable::new());
        let mut regs = CpState::default();
        regs.set_format(0, &float_position());

        let mut dst = vec![0xAA; 5];
        let result = decode(&mut cache, &mut regs, 0, 2, &[0; 12], &mut dst);
        assert!(matches!(
            result,
            Err(DecodeError::InsufficientData {
                required: 24,
                available: 12
            })
        ));
        assert_eq!(dst, [0xAA; 5]);
        // nothing was resolved for the short draw
        assert!(cache.is_empty());

        decode(&mut cache, &mut regs, 0, 1, &[0; 12], &mut dst).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn unsupported_descriptors_do_not_affect_later_draws() {
        let mut cache = LoaderCache::<()>::new(INTERPRETER_ONLY, PrecompiledTable::new());
        let mut regs = CpState::default();
        regs.set_format(
            0,
            &position(AttributeMode::Direct, CoordsFormat::Reserved0, 0),
        );

        let mut dst = vec![1, 2, 3];
        let result = decode(&mut cache, &mut regs, 0, 1, &[0; 64], &mut dst);
        assert!(matches!(
            result,
            Err(DecodeError::UnsupportedDescriptor { .. })
        ));
        assert_eq!(dst, [1, 2, 3]);
        assert!(cache.is_empty());

        let dirty = regs.set_format(0, &float_position());
        cache.invalidate(dirty);

        let src: Vec<u8> = [1.0f32, 2.0, 3.0]
            .into_iter()
            .flat_map(f32::to_be_bytes)
            .collect();
        let batch = decode(&mut cache, &mut regs, 0, 1, &src, &mut dst).unwrap();
        assert_eq!(batch.vertices, 1);
        assert_eq!(batch.consumed, 12);
        assert_eq!(floats(&dst[3..15]), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn dropped_vertices_consume_their_input() {
        let mut cache = LoaderCache::<()>::new(INTERPRETER_ONLY, PrecompiledTable::new());
        let mut regs = CpState::default();
        regs.set_format(0, &position(AttributeMode::Index8, CoordsFormat::U8, 0));
        regs.set_array(array::POSITION, 2, 3);

        let ram = [0, 0, 10, 20, 30, 40, 50, 60];
        let mut dst = Vec::new();
        let batch = cache
            .decode(
                &mut regs,
                &Environment::default(),
                &ram,
                0,
                Primitive::TriangleStrip,
                4,
                &[0, 0xFF, 1, 0xFF],
                &mut dst,
            )
            .unwrap();

        assert_eq!(
            batch,
            Batch {
                primitive: Primitive::TriangleStrip,
                vertices: 2,
                consumed: 4,
            }
        );

        assert_eq!(dst.len(), 2 * 16);
        assert_eq!(floats(&dst[0..12]), [10.0, 20.0, 30.0]);
        assert_eq!(floats(&dst[16..28]), [40.0, 50.0, 60.0]);
    }

    #[test]
    fn array_bases_are_refreshed() {
        let mut cache = LoaderCache::<()>::new(INTERPRETER_ONLY, PrecompiledTable::new());
        let mut regs = CpState::default();
        regs.set_format(0, &position(AttributeMode::Index8, CoordsFormat::U8, 0));
        regs.set_array(array::POSITION, 0, 3);

        let ram = [1, 2, 3, 4, 5, 6];
        let env = Environment::default();
        let mut dst = Vec::new();
        let draw = |cache: &mut LoaderCache, regs: &mut CpState, dst: &mut Vec<u8>| {
            cache
                .decode(regs, &env, &ram, 0, Primitive::Points, 1, &[0], dst)
                .unwrap()
        };

        draw(&mut cache, &mut regs, &mut dst);
        regs.set_array(array::POSITION, 3, 3);
        draw(&mut cache, &mut regs, &mut dst);

        assert_eq!(floats(&dst[0..12]), [1.0, 2.0, 3.0]);
        assert_eq!(floats(&dst[16..28]), [4.0, 5.0, 6.0]);
    }

    #[test]
    fn caches_sharing_registers_see_the_same_arrays() {
        let mut regs = CpState::default();
        regs.set_format(0, &position(AttributeMode::Index8, CoordsFormat::U8, 0));
        regs.set_array(array::POSITION, 3, 3);

        let ram = [1, 2, 3, 4, 5, 6];
        let env = Environment::default();
        let draw = |cache: &mut LoaderCache, regs: &mut CpState| {
            let mut dst = Vec::new();
            cache
                .decode(regs, &env, &ram, 0, Primitive::Points, 1, &[0], &mut dst)
                .unwrap();
            floats(&dst[0..12])
        };

        let mut first = LoaderCache::<()>::new(INTERPRETER_ONLY, PrecompiledTable::new());
        let mut second = LoaderCache::<()>::new(INTERPRETER_ONLY, PrecompiledTable::new());
        assert_eq!(draw(&mut first, &mut regs), [4.0, 5.0, 6.0]);
        assert_eq!(draw(&mut second, &mut regs), [4.0, 5.0, 6.0]);

        regs.set_array(array::POSITION, 0, 3);
        assert_eq!(draw(&mut second, &mut regs), [1.0, 2.0, 3.0]);
        assert_eq!(draw(&mut first, &mut regs), [1.0, 2.0, 3.0]);

        // a cleared cache starts from the current bases too
        first.clear();
        assert_eq!(draw(&mut first, &mut regs), [1.0, 2.0, 3.0]);

        // another register state with the same number of writes but different bases
        let mut other = CpState::default();
        other.set_format(0, &position(AttributeMode::Index8, CoordsFormat::U8, 0));
        other.set_array(array::POSITION, 3, 3);
        assert_eq!(draw(&mut first, &mut other), [4.0, 5.0, 6.0]);
        assert_eq!(draw(&mut first, &mut regs), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn dump_is_sorted_by_usage() {
        let mut cache = LoaderCache::<()>::new(INTERPRETER_ONLY, PrecompiledTable::new());
        let mut regs = CpState::default();
        regs.set_format(0, &float_position());
        regs.set_format(1, &position(AttributeMode::Direct, CoordsFormat::U8, 0));

        let mut dst = Vec::new();
        decode(&mut cache, &mut regs, 0, 1, &[0; 12], &mut dst).unwrap();
        decode(&mut cache, &mut regs, 1, 3, &[0; 9], &mut dst).unwrap();
        decode(&mut cache, &mut regs, 0, 1, &[0; 12], &mut dst).unwrap();
        decode(&mut cache, &mut regs, 1, 1, &[0; 3], &mut dst).unwrap();

        assert_eq!(
            cache.dump(),
            "P_mtx0_3_Dir_u8_ - 4 v\nP_mtx0_3_Dir_flt_ - 2 v\n"
        );

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.dump(), "");
    }

    #[test]
    fn precompiled_dump_round_trips() {
        let format = float_position();
        assert_eq!(CanonicalKey::new(&format).words(), [0x100, 0x9, 0, 0]);

        let mut regs = CpState::default();
        regs.set_format(0, &format);
        let src: Vec<u8> = [1.5f32, -2.0, 8.25, 0.0, f32::NAN, -0.0]
            .into_iter()
            .flat_map(f32::to_be_bytes)
            .collect();

        let mut interpreted = LoaderCache::<()>::new(INTERPRETER_ONLY, PrecompiledTable::new());
        let mut expected = Vec::new();
        decode(&mut interpreted, &mut regs, 0, 2, &src, &mut expected).unwrap();

        let dump = interpreted.dump_precompiled();
        assert!(dump.contains("// P_mtx0_3_Dir_flt_ - 2 v"));
        assert!(dump.contains("templated::<0x00000100, 0x00000009, 0x00000000, 0x00000000>"));

        let mut table = PrecompiledTable::new();
        table.insert([0x100, 0x9, 0, 0], templated::<0x100, 0x9, 0, 0>).unwrap();

        let settings = Settings {
            jit: false,
            ..Settings::default()
        };
        let mut precompiled = LoaderCache::<()>::new(settings, table);
        let mut got = Vec::new();
        decode(&mut precompiled, &mut regs, 0, 2, &src, &mut got).unwrap();

        let id = precompiled.resolve(&regs, 0).unwrap();
        assert_eq!(precompiled.loader(id).strategy(), ParserKind::Precompiled);
        assert!(precompiled.loader(id).has_fallback());
        assert_eq!(expected, got);
        assert!(!precompiled.dump_precompiled().contains("table.insert"));
    }

    #[test]
    fn compared_parsers_keep_their_strategy() {
        let settings = Settings {
            jit: false,
            precompiled: true,
            compare_parsers: true,
        };

        let mut cache = LoaderCache::<()>::new(settings, PrecompiledTable::builtin());
        let mut regs = CpState::default();
        regs.set_format(0, &float_position());

        let id = cache.resolve(&regs, 0).unwrap();
        let loader = cache.loader(id);
        assert_eq!(loader.strategy(), ParserKind::Precompiled);
        assert_eq!(loader.parser().kind(), ParserKind::Tester);

        let mut dst = Vec::new();
        let src = [0x3F, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let batch = decode(&mut cache, &mut regs, 0, 1, &src, &mut dst).unwrap();
        assert_eq!(batch.vertices, 1);
        assert_eq!(floats(&dst[0..12]), [1.0, 0.0, 0.0]);
    }

    #[test]
    fn unsupported_environments_use_the_fallback() {
        if !vtxjit::is_supported() {
            return;
        }

        let mut rng = WyRand::new_seed(0x5EED);
        let scene = Scene::new(&mut rng);
        let env = Environment { native_code: false };

        let mut jit = LoaderCache::<()>::new(Settings::default(), PrecompiledTable::new());
        let mut interpreter = LoaderCache::<()>::new(INTERPRETER_ONLY, PrecompiledTable::new());

        for format in catalog::formats().into_iter().step_by(11) {
            let mut regs = CpState::default();
            regs.set_format(3, &format);
            for (i, array) in scene.arrays.0.iter().enumerate() {
                regs.set_array(i, array.address, array.stride);
            }

            let (input_stride, ..) = interpreter.peek_size(&regs, 3).unwrap();
            let src = Scene::stream(&mut rng, input_stride, 8);

            let mut expected = Vec::new();
            let mut got = Vec::new();
            for (cache, dst) in [(&mut interpreter, &mut expected), (&mut jit, &mut got)] {
                cache
                    .decode(&mut regs, &env, &scene.ram, 3, Primitive::Quads, 8, &src, dst)
                    .unwrap();
            }

            assert_eq!(expected, got, "{}", format.name());

            let id = jit.resolve(&regs, 3).unwrap();
            assert_eq!(jit.loader(id).strategy(), ParserKind::Jit);
            assert!(jit.loader(id).has_fallback());
        }
    }

    #[test]
    fn layout_handles_are_created_once() {
        let mut cache = LoaderCache::<usize>::new(INTERPRETER_ONLY, PrecompiledTable::new());
        let mut regs = CpState::default();
        regs.set_format(0, &float_position());
        regs.set_format(1, &position(AttributeMode::Direct, CoordsFormat::I16, 3));

        let mut created = 0;
        for slot in [0, 1, 0] {
            let (_, _, layout) = cache.peek_size(&regs, slot).unwrap();
            let handle = *cache.input_layout(&layout, |_| {
                created += 1;
                created
            });
            assert_eq!(handle, 1);
        }

        assert_eq!(created, 1);
    }

    #[derive(IntoBytes, Immutable)]
    #[repr(C)]
    struct Vertex {
        pos_matrix: u8,
        position: [U16; 3],
        tex: [F32; 2],
    }

    #[test]
    fn draw_with_matrix_and_texture() {
        let vcd = VertexDescriptor::default()
            .with_pos_mat_index(true)
            .with_position(AttributeMode::Direct)
            .with_tex_coord_mode(0, AttributeMode::Direct);
        let mut format = position(AttributeMode::Direct, CoordsFormat::U16, 8);
        format.vcd = vcd;
        format.vat = format.vat.with_tex(
            0,
            TexCoordsDescriptor::new(TexCoordsKind::Vec2, CoordsFormat::F32, 0),
        );

        let mut regs = CpState::default();
        regs.set_format(2, &format);

        let vertices = [
            Vertex {
                pos_matrix: 3,
                position: [U16::new(256), U16::new(512), U16::new(768)],
                tex: [F32::new(0.5), F32::new(-1.0)],
            },
            Vertex {
                pos_matrix: 0xC5,
                position: [U16::new(128), U16::new(0), U16::new(0xFFFF)],
                tex: [F32::new(2.0), F32::new(0.25)],
            },
        ];
        let src = vertices.as_bytes();
        assert_eq!(src.len(), 2 * 15);

        let mut cache = LoaderCache::<()>::new(INTERPRETER_ONLY, PrecompiledTable::new());
        let (input_stride, output_stride, layout) = cache.peek_size(&regs, 2).unwrap();
        assert_eq!(input_stride, 15);

        let mut dst = Vec::new();
        let batch = decode(&mut cache, &mut regs, 2, 2, src, &mut dst).unwrap();
        assert_eq!(batch.vertices, 2);
        assert_eq!(batch.consumed, 30);
        assert_eq!(dst.len(), 2 * output_stride as usize);

        let vertex = |i: usize| &dst[i * output_stride as usize..][..output_stride as usize];
        let field = |i: usize, offset: u32, len: u32| {
            vertex(i)[offset as usize..][..len as usize].to_vec()
        };

        assert_eq!(floats(&field(0, layout.position.offset, 12)), [1.0, 2.0, 3.0]);
        assert_eq!(floats(&field(0, layout.tex[0].offset, 8)), [0.5, -1.0]);
        assert_eq!(field(0, layout.pos_matrix.offset, 4), [3, 0, 0, 0]);

        assert_eq!(
            floats(&field(1, layout.position.offset, 12)),
            [0.5, 0.0, 65535.0 / 256.0]
        );
        assert_eq!(floats(&field(1, layout.tex[0].offset, 8)), [2.0, 0.25]);
        assert_eq!(field(1, layout.pos_matrix.offset, 4), [5, 0, 0, 0]);
    }
}
