use eyre_pretty::{Result, bail};
use nanorand::WyRand;
use vtxcore::catalog::{self, Scene};
use vtxcore::{
    CanonicalKey, Interpreter, Precompiled, PrecompiledTable, Tester, VertexFormat, VertexParser,
};
use vtxjit::Jit;

const COUNTS: [u32; 4] = [0, 1, 2, 100];

/// Runs `candidate` against the interpreter over random scenes and returns the mismatch count.
fn check(
    rng: &mut WyRand,
    scene: &mut Scene,
    format: VertexFormat,
    candidate: Box<dyn VertexParser>,
) -> Result<u64> {
    let shape = format.shape()?;
    let mut tester = Tester::new(format, Box::new(Interpreter::new(&shape)?), candidate);

    for count in COUNTS {
        scene.shuffle(rng);
        let src = Scene::stream(rng, tester.input_stride(), count);
        let mut dst = vec![0; count as usize * tester.layout().stride as usize];
        tester.parse(&scene.ctx(), &src, &mut dst, count)?;
    }

    Ok(tester.mismatches())
}

pub fn verify(seed: u64) -> Result<()> {
    let mut rng = WyRand::new_seed(seed);
    let mut scene = Scene::new(&mut rng);
    let table = PrecompiledTable::builtin();

    let mut jit = if vtxjit::is_supported() {
        Some(Jit::new()?)
    } else {
        tracing::info!("native code is not supported on this host, skipping the JIT");
        None
    };

    let formats = catalog::formats();
    let mut mismatches = 0;
    let mut compiled = 0;
    let mut precompiled = 0;

    for format in &formats {
        let shape = format.shape()?;

        if let Some(jit) = &mut jit {
            let parser = jit.compile(&shape)?;
            mismatches += check(&mut rng, &mut scene, *format, Box::new(parser))?;
            compiled += 1;
        }

        if let Some(routine) = table.get(&CanonicalKey::new(format)) {
            let parser = Precompiled::new(&shape, routine)?;
            mismatches += check(&mut rng, &mut scene, *format, Box::new(parser))?;
            precompiled += 1;
        }
    }

    println!(
        "checked {} formats: {compiled} against the jit, {precompiled} against precompiled routines",
        formats.len()
    );

    if mismatches > 0 {
        bail!("{mismatches} mismatches between parsers");
    }

    println!("no mismatches");
    Ok(())
}
