//! erftrace CLI entry point.

use std::io::{self, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use erftrace::cli::{format_timestamp, Args, SummaryFormatter};
use erftrace::erf::build_index;
use erftrace::format::{help_text, InputFormat, OutputFormat, OutputOption, Registry, TraceUri};
use erftrace::io::FileFlags;
use erftrace::packet::{Packet, RecordFormat};

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Set up logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    if args.is_info_only() {
        print!("{}", help_text());
        return Ok(());
    }

    let uri = args
        .input
        .as_deref()
        .context("Input URI required. Use --help for usage, --help-formats for URIs.")?;

    if args.build_index {
        return index_trace(uri);
    }

    let registry = Registry::new();
    let mut input = registry
        .open_input(uri)
        .with_context(|| format!("Failed to open input: {uri}"))?;
    input
        .start()
        .with_context(|| format!("Failed to start input: {uri}"))?;

    if let Some(ts) = args.seek {
        input
            .seek_erf(ts)
            .with_context(|| format!("Failed to seek {uri} to {}", format_timestamp(ts)))?;
    }

    match &args.output {
        Some(output_uri) => {
            let mut output = registry
                .open_output(output_uri)
                .with_context(|| format!("Failed to open output: {output_uri}"))?;
            output.configure(&OutputOption::CompressionLevel(args.compress_level))?;
            output.configure(&OutputOption::FileFlags(FileFlags {
                append: args.append,
                truncate: !args.append,
                create_new: false,
            }))?;
            output.configure(&OutputOption::WriteIndex(args.index))?;
            output
                .start()
                .with_context(|| format!("Failed to create output: {output_uri}"))?;

            let written = copy(input.as_mut(), output.as_mut(), args.count)?;
            output.finish()?;
            eprintln!("Wrote {written} packets to {output_uri}");
        }
        None => summarise(input.as_mut(), &args)?,
    }

    input.pause()?;
    Ok(())
}

fn index_trace(uri: &str) -> Result<()> {
    let parsed = TraceUri::parse(uri)?;
    if parsed.scheme != "erf" {
        bail!("--build-index needs an erf: input, got {uri}");
    }
    let entries = build_index(Path::new(parsed.data))
        .with_context(|| format!("Failed to index {}", parsed.data))?;
    eprintln!("Indexed {entries} records of {}", parsed.data);
    Ok(())
}

fn within(done: u64, limit: Option<u64>) -> bool {
    limit.map_or(true, |limit| done < limit)
}

/// Copy data packets from `input` to `output`; clock-sync and control
/// records have no ERF form and are skipped.
fn copy(input: &mut dyn InputFormat, output: &mut dyn OutputFormat, count: Option<u64>) -> Result<u64> {
    let mut packet = Packet::new();
    let mut written = 0;
    while within(written, count) && input.read_packet(&mut packet)?.is_some() {
        match packet.format() {
            RecordFormat::Duck | RecordFormat::Status | RecordFormat::Control => {
                tracing::debug!("Skipping {} record", packet.format().name());
            }
            _ => {
                output.write_packet(&packet)?;
                written += 1;
            }
        }
    }
    Ok(written)
}

fn summarise(input: &mut dyn InputFormat, args: &Args) -> Result<()> {
    let mut formatter = SummaryFormatter::new(args.format);
    let mut stdout = io::stdout().lock();
    let mut packet = Packet::new();
    while within(formatter.rows(), args.count) && input.read_packet(&mut packet)?.is_some() {
        formatter.write(&packet, &mut stdout)?;
    }
    formatter.finish(&mut stdout)?;
    stdout.flush()?;
    Ok(())
}
