//! Operator CLI for building and inspecting CDB64 files.
//!
//! Usage:
//!   wayfinder-cdb64 build <input.tsv> <output.cdb>
//!   wayfinder-cdb64 lookup <file.cdb> <key>
//!
//! `input.tsv` has one `key\tvalue` pair per line, both UTF-8 text.

use std::env;
use std::process::ExitCode;

use wayfinder_core::cdb64::{build_cdb64, CdbReader};

fn usage() -> ExitCode {
    eprintln!("usage: wayfinder-cdb64 build <input.tsv> <output.cdb>");
    eprintln!("       wayfinder-cdb64 lookup <file.cdb> <key>");
    ExitCode::FAILURE
}

async fn build(input_path: &str, output_path: &str) -> anyhow::Result<()> {
    let input = std::fs::read_to_string(input_path)?;
    let pairs = input.lines().filter_map(|line| {
        let (key, value) = line.split_once('\t')?;
        Some((key.as_bytes().to_vec(), value.as_bytes().to_vec()))
    });
    let bytes = build_cdb64(pairs);
    std::fs::write(output_path, bytes)?;
    println!("wrote {output_path}");
    Ok(())
}

async fn lookup(file_path: &str, key: &str) -> anyhow::Result<()> {
    let reader = CdbReader::open_file(file_path).await?;
    match reader.lookup(key.as_bytes()).await? {
        Some(value) => println!("{}", String::from_utf8_lossy(&value)),
        None => println!("(absent)"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let result = match args.get(1).map(String::as_str) {
        Some("build") => match (args.get(2), args.get(3)) {
            (Some(input), Some(output)) => build(input, output).await,
            _ => return usage(),
        },
        Some("lookup") => match (args.get(2), args.get(3)) {
            (Some(file), Some(key)) => lookup(file, key).await,
            _ => return usage(),
        },
        _ => return usage(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
