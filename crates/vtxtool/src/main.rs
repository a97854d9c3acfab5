mod decode;
mod inspect;
mod verify;

use clap::{Parser, Subcommand, ValueEnum};
use eyre_pretty::{Result, eyre};
use std::path::PathBuf;
use vtxcore::VertexFormat;
use vtxcore::descriptor::{VertexAttributeTable, VertexDescriptor};

fn parse_hex(value: &str) -> std::result::Result<u64, String> {
    let value = value.replace('_', "");
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(&value);

    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid hexadecimal value: {e}"))
}

fn parse_word(value: &str) -> std::result::Result<u32, String> {
    let value = parse_hex(value)?;
    u32::try_from(value).map_err(|_| format!("{value:#X} does not fit in 32 bits"))
}

/// Parses an array assignment of the form `n=base:stride`.
fn parse_array(value: &str) -> std::result::Result<(usize, u32, u32), String> {
    let (index, base, stride) = value
        .split_once('=')
        .and_then(|(index, rest)| Some((index, rest.split_once(':')?)))
        .map(|(index, (base, stride))| (index, base, stride))
        .ok_or("expected n=base:stride")?;

    let index: usize = index
        .parse()
        .map_err(|e| format!("invalid array index: {e}"))?;
    if index >= vtxcore::regs::ARRAY_COUNT {
        return Err(format!("array index {index} is out of range"));
    }

    Ok((index, parse_word(base)?, parse_word(stride)?))
}

/// A vertex format, as the values of its registers.
#[derive(Debug, Clone, clap::Args)]
struct FormatArgs {
    /// Vertex descriptor, in the 33 bit packed form (low half followed by the high half)
    #[arg(long, value_parser = parse_hex)]
    vcd: u64,
    /// Vertex attribute table words A, B and C
    #[arg(long, num_args = 3, value_names = ["A", "B", "C"], value_parser = parse_word)]
    vat: Vec<u32>,
}

impl FormatArgs {
    fn format(&self) -> Result<VertexFormat> {
        let [a, b, c] = self.vat[..] else {
            return Err(eyre!("expected three attribute table words"));
        };

        Ok(VertexFormat::new(
            VertexDescriptor::from_legacy(self.vcd),
            VertexAttributeTable::from_words([a, b, c]),
        ))
    }
}

/// Which parser decodes the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Strategy {
    /// The fastest parser available
    Auto,
    Interpreter,
    Precompiled,
    Jit,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Describe a vertex format: its loader name, canonical key and native layout.
    Name {
        #[command(flatten)]
        format: FormatArgs,
    },
    /// Decode a raw big endian vertex stream and print its vertices.
    Decode {
        #[command(flatten)]
        format: FormatArgs,
        /// Path to the vertex stream
        #[arg(short, long)]
        input: PathBuf,
        /// Number of vertices in the stream
        #[arg(short, long)]
        count: u32,
        /// Parser to decode with
        #[arg(long, value_enum, default_value_t = Strategy::Auto)]
        parser: Strategy,
        /// Check the parser against the interpreter
        #[arg(long, default_value_t = false)]
        compare: bool,
        /// Position matrix index of vertices that do not carry one
        #[arg(long, default_value_t = 0)]
        pos_matrix: u8,
        /// Path to a RAM image that indexed attributes are read from
        #[arg(long)]
        ram: Option<PathBuf>,
        /// Attribute array, as n=base:stride (base is an offset into the RAM image)
        #[arg(long = "array", value_parser = parse_array)]
        arrays: Vec<(usize, u32, u32)>,
    },
    /// Check every available parser against the interpreter over a catalog of vertex formats.
    Verify {
        /// Seed of the random vertex data
        #[arg(long, default_value_t = 0x5EED)]
        seed: u64,
    },
}

/// A CLI to inspect GameCube vertex formats and decode vertex streams.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Action to take
    #[command(subcommand)]
    command: Command,
}

fn setup_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vtxtool=info,vtxcache=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn main() -> Result<()> {
    eyre_pretty::install()?;
    setup_tracing();

    let args = Args::parse();
    match args.command {
        Command::Name { format } => inspect::describe(&format.format()?),
        Command::Decode {
            format,
            input,
            count,
            parser,
            compare,
            pos_matrix,
            ram,
            arrays,
        } => decode::decode(decode::Request {
            format: format.format()?,
            input,
            count,
            strategy: parser,
            compare,
            pos_matrix,
            ram,
            arrays,
        }),
        Command::Verify { seed } => verify::verify(seed),
    }
}
