//! Purpose: `fragbuf` CLI entry point: pack, unpack, and inspect fragment files.
//! Role: Binary crate root; parses args, runs one command, emits JSON on stdout.
//! Invariants: Errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `core::error::to_exit_code`.
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use fragbuf::core::container::ContainerFragment;
use fragbuf::core::error::{to_exit_code, Error, ErrorKind};
use fragbuf::core::fragment::{Fragment, CONTAINER_FRAGMENT_TYPE, EMPTY_FRAGMENT_TYPE};
use fragbuf::core::loader::ContainerFragmentLoader;

#[derive(Parser)]
#[command(
    name = "fragbuf",
    version,
    about = "Pack, unpack, and inspect fragment container files"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pack fragment image files into one container fragment file.
    Pack {
        /// Output container file.
        #[arg(long)]
        out: PathBuf,
        /// Sequence id stamped on the container and all packed children.
        #[arg(long)]
        sequence_id: u64,
        /// Fragment id of the originating source.
        #[arg(long, default_value_t = 0)]
        fragment_id: u32,
        /// Expected child type; by default the first child's type is adopted.
        #[arg(long)]
        fragment_type: Option<u8>,
        /// Fragment image files to pack, in order.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Extract the children of a container fragment file, one file each.
    Unpack {
        /// Directory receiving the child image files.
        #[arg(long)]
        out_dir: PathBuf,
        input: PathBuf,
    },
    /// Summarize a fragment file as JSON.
    Inspect { input: PathBuf },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match run(cli.command) {
        Ok(()) => 0,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run(command: Command) -> Result<(), Error> {
    match command {
        Command::Pack {
            out,
            sequence_id,
            fragment_id,
            fragment_type,
            inputs,
        } => {
            let mut container = ContainerFragmentLoader::container_shell(sequence_id, fragment_id);
            let expected_type = fragment_type.unwrap_or(EMPTY_FRAGMENT_TYPE);
            let mut loader = ContainerFragmentLoader::new(&mut container, expected_type)?;
            for input in &inputs {
                let fragment = read_fragment(input)?;
                loader.add_owned_fragment(fragment)?;
            }
            drop(loader);
            fs::write(&out, container.as_bytes())
                .map_err(|err| Error::new(ErrorKind::Io).with_path(&out).with_source(err))?;
            println!(
                "{}",
                json!({
                    "packed": inputs.len(),
                    "out": out.display().to_string(),
                    "word_count": container.word_count(),
                })
            );
            Ok(())
        }
        Command::Unpack { out_dir, input } => {
            let fragment = read_fragment(&input)?;
            let view = ContainerFragment::new(&fragment)?;
            fs::create_dir_all(&out_dir)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(&out_dir).with_source(err))?;
            let stem = input
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "fragment".to_string());
            let mut written = Vec::new();
            for i in 0..view.block_count() {
                let child = view.fragment_at(i)?;
                let path = out_dir.join(format!("{stem}-{i:03}.frag"));
                fs::write(&path, child.as_bytes())
                    .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;
                written.push(path.display().to_string());
            }
            println!(
                "{}",
                json!({
                    "unpacked": written.len(),
                    "out_dir": out_dir.display().to_string(),
                    "files": written,
                })
            );
            Ok(())
        }
        Command::Inspect { input } => {
            let fragment = read_fragment(&input)?;
            let summary = summarize(&fragment)?;
            let text = serde_json::to_string_pretty(&summary)
                .map_err(|err| Error::new(ErrorKind::Io).with_source(err))?;
            println!("{text}");
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct FragmentSummary {
    sequence_id: u64,
    fragment_id: u32,
    #[serde(rename = "type")]
    fragment_type: u8,
    version: u8,
    word_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    container: Option<ContainerSummary>,
}

#[derive(Serialize)]
struct ContainerSummary {
    block_count: usize,
    fragment_type: u8,
    missing_data: bool,
    index_offset: usize,
    children: Vec<ChildSummary>,
}

#[derive(Serialize)]
struct ChildSummary {
    index: usize,
    offset: usize,
    size_bytes: usize,
    #[serde(rename = "type")]
    fragment_type: u8,
    sequence_id: u64,
    word_count: u64,
}

fn summarize(fragment: &Fragment) -> Result<FragmentSummary, Error> {
    let container = if fragment.fragment_type() == CONTAINER_FRAGMENT_TYPE {
        let view = ContainerFragment::new(fragment)?;
        let mut children = Vec::with_capacity(view.block_count());
        for i in 0..view.block_count() {
            let header = view.fragment_header(i)?;
            children.push(ChildSummary {
                index: i,
                offset: view.fragment_index(i)?,
                size_bytes: view.fragment_size_bytes(i)?,
                fragment_type: header.fragment_type,
                sequence_id: header.sequence_id,
                word_count: header.word_count,
            });
        }
        Some(ContainerSummary {
            block_count: view.block_count(),
            fragment_type: view.fragment_type(),
            missing_data: view.missing_data(),
            index_offset: view.index_offset(),
            children,
        })
    } else {
        None
    };
    Ok(FragmentSummary {
        sequence_id: fragment.sequence_id(),
        fragment_id: fragment.fragment_id(),
        fragment_type: fragment.fragment_type(),
        version: fragment.version(),
        word_count: fragment.word_count(),
        container,
    })
}

fn read_fragment(path: &Path) -> Result<Fragment, Error> {
    let bytes = fs::read(path)
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    Fragment::from_bytes(bytes).map_err(|err| err.with_path(path))
}

fn emit_error(err: &Error) {
    let mut body = json!({
        "kind": format!("{:?}", err.kind()),
        "message": err.to_string(),
    });
    if let Some(hint) = err.hint() {
        body["hint"] = json!(hint);
    }
    eprintln!("{}", json!({ "error": body }));
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}
