#![cfg(not(tarpaulin_include))]

use chemviz::loader::{TableFormat, load_table};
use chemviz::projection::ChartProjection;
use chemviz::summarizer::summarize;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// Summarize an equipment CSV or XLSX file without running the server
#[derive(Parser)]
struct Opts {
    /// File to summarize; the extension selects the format
    file: PathBuf,

    /// Print the chart projection instead of the raw summary
    #[clap(long)]
    charts: bool,

    /// Pretty-print the JSON output
    #[clap(long)]
    pretty: bool,
}

fn run(opts: &Opts) -> Result<String, Box<dyn std::error::Error>> {
    let filename = opts
        .file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = TableFormat::from_filename(&filename)?;
    let bytes = std::fs::read(&opts.file)?;
    let summary = summarize(&load_table(format, &bytes)?)?;

    let json = if opts.charts {
        let projection = ChartProjection::from_summary(&summary);
        if opts.pretty {
            serde_json::to_string_pretty(&projection)?
        } else {
            serde_json::to_string(&projection)?
        }
    } else if opts.pretty {
        serde_json::to_string_pretty(&summary)?
    } else {
        serde_json::to_string(&summary)?
    };
    Ok(json)
}

fn main() -> ExitCode {
    let opts = Opts::parse();
    match run(&opts) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
