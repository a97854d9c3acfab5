use crate::Strategy;
use eyre_pretty::{Context, Result, bail};
use std::path::PathBuf;
use vtxcache::{LoaderCache, Settings};
use vtxcore::layout::{AttributeFormat, ComponentType};
use vtxcore::regs::Reg;
use vtxcore::{CpState, Environment, ParserKind, PrecompiledTable, Primitive, VertexFormat};

pub struct Request {
    pub format: VertexFormat,
    pub input: PathBuf,
    pub count: u32,
    pub strategy: Strategy,
    pub compare: bool,
    pub pos_matrix: u8,
    pub ram: Option<PathBuf>,
    pub arrays: Vec<(usize, u32, u32)>,
}

fn settings(strategy: Strategy, compare: bool) -> Settings {
    let (jit, precompiled) = match strategy {
        Strategy::Auto => (true, true),
        Strategy::Interpreter => (false, false),
        Strategy::Precompiled => (false, true),
        Strategy::Jit => (true, false),
    };

    Settings {
        jit,
        precompiled,
        compare_parsers: compare,
    }
}

fn print_attribute(name: &str, attr: &AttributeFormat, data: &[u8]) {
    let data = &data[attr.offset as usize..][..attr.size() as usize];
    match attr.ty {
        ComponentType::F32 => {
            let values: Vec<f32> = data
                .chunks_exact(4)
                .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            println!("  {name}: {values:?}");
        }
        ComponentType::U8 => println!("  {name}: {data:02X?}"),
    }
}

pub fn decode(request: Request) -> Result<()> {
    let src = std::fs::read(&request.input).context("reading vertex stream")?;
    let ram = match &request.ram {
        Some(path) => std::fs::read(path).context("reading RAM image")?,
        None => Vec::new(),
    };

    let mut regs = CpState::default();
    regs.set_format(0, &request.format);
    // the position matrix index is the low 6 bits of MATINDEX_A
    regs.write(Reg::MatIndexA.addr(), (request.pos_matrix & 0x3F) as u32);
    for &(index, base, stride) in &request.arrays {
        regs.set_array(index, base, stride);
    }

    let settings = settings(request.strategy, request.compare);
    let mut cache = LoaderCache::<()>::new(settings, PrecompiledTable::builtin());

    let id = cache.resolve(&regs, 0)?;
    let loader = cache.loader(id);
    let wanted = match request.strategy {
        Strategy::Precompiled => Some(ParserKind::Precompiled),
        Strategy::Jit => Some(ParserKind::Jit),
        _ => None,
    };

    if let Some(wanted) = wanted
        && loader.strategy() != wanted
    {
        bail!(
            "no {} parser is available for {}",
            wanted.name(),
            loader.name()
        );
    }

    tracing::info!(
        "decoding {} vertices of {} with the {} parser",
        request.count,
        loader.name(),
        loader.strategy().name()
    );

    let layout = *loader.layout();
    let mut dst = Vec::new();
    let batch = cache.decode(
        &mut regs,
        &Environment::default(),
        &ram,
        0,
        Primitive::Points,
        request.count,
        &src,
        &mut dst,
    )?;

    for (i, vertex) in dst.chunks_exact(layout.stride as usize).enumerate() {
        println!("vertex {i}:");
        for (name, attr) in layout.attributes() {
            print_attribute(&name, &attr, vertex);
        }
    }

    println!(
        "{} vertices emitted ({} bytes consumed)",
        batch.vertices, batch.consumed
    );

    if batch.consumed < src.len() {
        tracing::info!(
            "{} trailing bytes of the stream were not decoded",
            src.len() - batch.consumed
        );
    }

    Ok(())
}
