//! Command-line argument definitions.

use clap::Parser;

use super::SummaryFormat;

/// Copy, inspect and index ERF traces.
#[derive(Parser, Debug)]
#[command(name = "erftrace")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Input URI, e.g. erf:/tmp/trace.erf or rt:localhost
    #[arg(value_name = "INPUT")]
    pub input: Option<String>,

    /// Output URI; packets are summarised on stdout when omitted
    #[arg(value_name = "OUTPUT")]
    pub output: Option<String>,

    /// Skip to the first packet at or after this ERF timestamp
    #[arg(long = "seek", value_name = "TS", value_parser = parse_erf_timestamp)]
    pub seek: Option<u64>,

    /// Stop after this many packets
    #[arg(short = 'c', long = "count", value_name = "N")]
    pub count: Option<u64>,

    /// Output gzip level, 0 (uncompressed) to 9
    #[arg(short = 'z', long = "compress-level", default_value = "1")]
    pub compress_level: u32,

    /// Append to the output instead of replacing it
    #[arg(long = "append")]
    pub append: bool,

    /// Write a timestamp index next to the output
    #[arg(long = "index")]
    pub index: bool,

    /// Build the timestamp index for an erf: input and exit
    #[arg(long = "build-index")]
    pub build_index: bool,

    /// Summary layout on stdout
    #[arg(long = "format", value_enum, default_value = "table")]
    pub format: SummaryFormat,

    /// Print the URIs and options of every trace format
    #[arg(long = "help-formats", alias = "list-formats")]
    pub help_formats: bool,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Check if this is an info-only command (no input needed).
    pub fn is_info_only(&self) -> bool {
        self.help_formats
    }

    /// Check if packets are written to a trace rather than summarised.
    pub fn is_copy(&self) -> bool {
        self.output.is_some()
    }
}

/// Accept either a raw 32.32 value or `seconds[.fraction]`.
fn parse_erf_timestamp(s: &str) -> Result<u64, String> {
    if let Some(hex) = s.strip_prefix("0x") {
        return u64::from_str_radix(hex, 16).map_err(|e| e.to_string());
    }
    match s.split_once('.') {
        None => s
            .parse::<u32>()
            .map(|secs| (secs as u64) << 32)
            .map_err(|e| e.to_string()),
        Some((secs, frac)) => {
            let secs: u32 = secs.parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
            let frac: f64 = format!("0.{}", frac)
                .parse()
                .map_err(|e: std::num::ParseFloatError| e.to_string())?;
            let frac = (frac * (1u64 << 32) as f64) as u64;
            Ok(((secs as u64) << 32) + frac.min(u32::MAX as u64))
        }
    }
}
