//! Ahead-of-time template compiler.
//!
//! Reads a template file, compiles it, and prints the IR text plus the
//! discovered block names. Exit codes: 0 on success, 1 on a
//! lex/parse/compile error (the message carries the template span), 2 on
//! an I/O error.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser;

use tessera::{CompileOptions, ErrorKind};

#[derive(Parser, Debug)]
#[command(
    name = "tessera-precompile",
    about = "Compile a template to its IR text",
    version
)]
struct Args {
    /// Template file to compile.
    filename: PathBuf,

    /// Template name recorded in error messages; defaults to the file
    /// name.
    #[arg(long)]
    name: Option<String>,

    /// Fail renders on undefined output values.
    #[arg(long)]
    throw_on_undefined: bool,

    /// Disable HTML autoescaping.
    #[arg(long)]
    no_autoescape: bool,

    /// Filter names to treat as asynchronous (repeatable).
    #[arg(long = "async-filter", value_name = "NAME")]
    async_filters: Vec<String>,

    /// Write the IR here instead of stdout.
    #[arg(long, short)]
    out: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let source = std::fs::read_to_string(&args.filename)
        .with_context(|| format!("cannot read {}", args.filename.display()))?;
    let name = args.name.clone().unwrap_or_else(|| {
        args.filename
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "template".to_string())
    });

    let opts = CompileOptions {
        autoescape: !args.no_autoescape,
        throw_on_undefined: args.throw_on_undefined,
        async_filters: args.async_filters.iter().cloned().collect(),
        extension_tags: Vec::new(),
    };

    let precompiled = match tessera::precompile(&source, &opts) {
        Ok(p) => p,
        Err(e) => {
            debug_assert!(matches!(
                e.kind,
                ErrorKind::Lex | ErrorKind::Parse | ErrorKind::Compile
            ));
            let e = e.in_template(&name);
            eprintln!("{}", e.format_with_source(&source));
            return Ok(ExitCode::from(1));
        }
    };

    let mut output = String::new();
    output.push_str(&format!("// template: {}\n", name));
    output.push_str(&format!(
        "// blocks: {}\n",
        if precompiled.blocks.is_empty() {
            "(none)".to_string()
        } else {
            precompiled.blocks.join(", ")
        }
    ));
    output.push_str(&precompiled.ir);

    match &args.out {
        Some(path) => std::fs::write(path, output)
            .with_context(|| format!("cannot write {}", path.display()))?,
        None => print!("{}", output),
    }
    Ok(ExitCode::SUCCESS)
}
