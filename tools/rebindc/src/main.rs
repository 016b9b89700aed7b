// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
mod args;

use crate::args::{Args, Emit};
use clap::Parser;
use eyre::WrapErr;
use rebind_compiler::{Pipeline, PipelineOptions, unparse, wrap_for_loading};
use rebind_iseq::InstructionSequence;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};
use tracing_subscriber::fmt::format::FmtSpan;

fn read_input(path: &Path) -> Result<serde_json::Value, eyre::Report> {
    let text = if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        text
    } else {
        std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Unable to read {}", path.display()))?
    };
    serde_json::from_str(&text).wrap_err("Input is not JSON")
}

/// Run the pipeline over `json` and render whatever `emit` asks for.
fn compile(
    json: &serde_json::Value,
    options: PipelineOptions,
    emit: Emit,
    wrap: bool,
    pretty: bool,
) -> Result<String, eyre::Report> {
    let iseq = InstructionSequence::from_json(json)?;
    debug!(
        kind = %iseq.kind,
        label = %iseq.label,
        elements = iseq.body.len(),
        "decoded instruction sequence"
    );
    let mut pipeline = Pipeline::new(options);
    let output = match emit {
        Emit::Source => unparse(&pipeline.tree(&iseq)?),
        Emit::Tree => format!("{:#?}", pipeline.tree(&iseq)?),
        Emit::Iseq | Emit::Disasm => {
            let mut lowered = pipeline.run(&iseq)?;
            if wrap {
                lowered = wrap_for_loading(lowered, &pipeline.options().codegen);
            }
            match emit {
                Emit::Disasm => lowered.to_string(),
                _ if pretty => serde_json::to_string_pretty(&lowered.to_json())?,
                _ => lowered.to_json().to_string(),
            }
        }
    };
    Ok(output)
}

fn main() -> Result<(), eyre::Report> {
    color_eyre::install()?;
    let args: Args = Args::parse();

    let main_subscriber = tracing_subscriber::fmt()
        .compact()
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_thread_names(false)
        .with_span_events(FmtSpan::NONE)
        .with_max_level(if args.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(main_subscriber).unwrap_or_else(|e| {
        eprintln!("Unable to set configure logging: {e}");
        std::process::exit(1);
    });

    info!("rebindc {}", env!("CARGO_PKG_VERSION"));

    let options = args.load_config()?;
    debug!(?options, "pipeline configuration");
    let json = read_input(&args.input)?;
    let output = compile(&json, options, args.emit, args.wrap, args.pretty)?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, output)
                .wrap_err_with(|| format!("Unable to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{output}")?;
        }
    }
    Ok(())
}
