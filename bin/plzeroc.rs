// plzeroc FILE [--emit ssa|opt|rv64|dot|alloc|json]
//
// Compiles a source file and prints the requested artifact (the allocated
// RV64 SSA by default). Exits non-zero with a message naming the failing
// component.

use std::env;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use plzero::front_end::{parser, sema};
use plzero::middle_end::{build, ir, opt};
use plzero::pipeline::{allocation_summary, compile};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let (file, emit) = match args.as_slice() {
        [_, file] => (file, "rv64"),
        [_, file, flag, kind] if flag == "--emit" => (file, kind.as_str()),
        _ => bail!("usage: plzeroc FILE [--emit ssa|opt|rv64|dot|alloc|json]"),
    };

    let source = read_from(file)?;
    let output = run(&source, emit)?;
    println!("{output}");
    Ok(())
}

fn read_from(path: &str) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("could not read the input file {path}"))?;
    String::from_utf8(bytes).context("the input file does not contain valid utf-8 text")
}

fn run(source: &str, emit: &str) -> Result<String> {
    // the early artifacts don't need the whole pipeline.
    if emit == "ssa" || emit == "opt" {
        let ast = parser::parse(source)?;
        let symbols = sema::analyze(&ast)?;
        let mut ssa = build::build(&ast, &symbols)?;
        if emit == "opt" {
            opt::optimise(&mut ssa);
        }
        return Ok(format!("{ssa}"));
    }

    let comp = compile(source)?;
    match emit {
        "rv64" => Ok(format!("{}", comp.rv64)),
        "dot" => Ok(ir::dump_cfg_of_program(&comp.rv64)),
        "alloc" => {
            let summary = allocation_summary(&comp);
            let mut out = String::new();
            for proc in &summary.procedures {
                out.push_str(&format!("{}:\n", proc.label));
                for (block, values) in &proc.blocks {
                    out.push_str(&format!("{block}:\n"));
                    for (value, reg) in values {
                        out.push_str(&format!("\t{value} -> {reg}\n"));
                    }
                }
            }
            Ok(out)
        }
        "json" => Ok(serde_json::to_string_pretty(&allocation_summary(&comp))?),
        other => bail!("unknown --emit kind `{other}`"),
    }
}
