//! URI scheme dispatch and per-format help.

use std::path::Path;

use crate::dag::{DagDriver, DagInput, DagOptions};
use crate::erf::{ErfInput, ErfOutput};
use crate::error::{Error, Result};
use crate::rt::RtInput;

use super::{InputFormat, OutputFormat};

/// A URI split into scheme and format-specific data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceUri<'a> {
    pub scheme: &'a str,
    pub data: &'a str,
}

impl<'a> TraceUri<'a> {
    /// Split `scheme:data`.
    pub fn parse(uri: &'a str) -> Result<Self> {
        match uri.split_once(':') {
            Some((scheme, data)) if !scheme.is_empty() => Ok(Self { scheme, data }),
            _ => Err(Error::InvalidUri {
                uri: uri.to_string(),
                reason: "expected <format>:<location>".to_string(),
            }),
        }
    }
}

/// Description of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub name: &'static str,
    pub input: bool,
    pub output: bool,
    pub help: &'static str,
}

/// Every backend this crate provides.
pub const FORMATS: &[FormatInfo] = &[
    FormatInfo {
        name: "erf",
        input: true,
        output: true,
        help: "\
erf format module
Supported input URIs:
\terf:/path/to/file\t(uncompressed)
\terf:/path/to/file.gz\t(gzip-compressed)
\terf:-\t(stdin, either compressed or not)

\te.g.: erf:/tmp/trace

Supported output URIs:
\terf:path/to/file\t(uncompressed)
\terf:/path/to/file.gz\t(gzip-compressed)
\terf:-\t(stdout, either compressed or not)

\te.g.: erf:/tmp/trace

Supported output options:
\t-z\tSpecify the gzip compression, ranging from 0 (uncompressed) to 9 - defaults to 1
",
    },
    FormatInfo {
        name: "dag",
        input: true,
        output: false,
        help: "\
dag format module
Supported input URIs:
\tdag:/dev/dagn

\te.g.: dag:/dev/dag0

Supported input options:
\tduck frequency\tseconds between clock-sync snapshots (0 disables)
",
    },
    FormatInfo {
        name: "rt",
        input: true,
        output: false,
        help: "\
rt format module
Supported input URIs:
\trt:hostname:port
\trt:hostname (connects on default port)

\te.g.: rt:localhost
\te.g.: rt:localhost:32500
",
    },
];

/// Help for every format, one block each.
pub fn help_text() -> String {
    FORMATS
        .iter()
        .map(|f| f.help)
        .collect::<Vec<_>>()
        .join("\n")
}

type DagOpener = Box<dyn Fn(&Path, DagOptions) -> Result<Box<dyn InputFormat>>>;

/// Opens backends by URI.
///
/// DAG inputs need a driver for the card; without one, `dag:` URIs are
/// rejected.
#[derive(Default)]
pub struct Registry {
    dag: Option<DagOpener>,
    dag_options: DagOptions,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `driver` for `dag:` URIs.
    pub fn with_dag_driver<Dr>(mut self, driver: Dr) -> Self
    where
        Dr: DagDriver + 'static,
        Dr::Device: 'static,
    {
        self.dag = Some(Box::new(move |path: &Path, options: DagOptions| {
            let input = DagInput::open(&driver, path, options)?;
            Ok(Box::new(input) as Box<dyn InputFormat>)
        }));
        self
    }

    /// Settings handed to every DAG input this registry opens.
    pub fn with_dag_options(mut self, options: DagOptions) -> Self {
        self.dag_options = options;
        self
    }

    pub fn formats(&self) -> &'static [FormatInfo] {
        FORMATS
    }

    pub fn info(&self, name: &str) -> Option<&'static FormatInfo> {
        FORMATS.iter().find(|f| f.name == name)
    }

    /// Open an input URI.
    pub fn open_input(&self, uri: &str) -> Result<Box<dyn InputFormat>> {
        let parsed = TraceUri::parse(uri)?;
        tracing::debug!("Opening {} input {}", parsed.scheme, parsed.data);
        match parsed.scheme {
            "erf" => Ok(Box::new(ErfInput::open(parsed.data)?)),
            "rt" => Ok(Box::new(RtInput::open(parsed.data)?)),
            "dag" => match &self.dag {
                Some(open) => open(Path::new(parsed.data), self.dag_options),
                None => Err(Error::InvalidUri {
                    uri: uri.to_string(),
                    reason: "no DAG driver available".to_string(),
                }),
            },
            other => Err(Self::unknown(uri, other)),
        }
    }

    /// Prepare an output URI; call `start` on the result to open it.
    pub fn open_output(&self, uri: &str) -> Result<Box<dyn OutputFormat>> {
        let parsed = TraceUri::parse(uri)?;
        match parsed.scheme {
            "erf" => Ok(Box::new(ErfOutput::new(parsed.data))),
            other => match self.info(other) {
                Some(_) => Err(Error::InvalidUri {
                    uri: uri.to_string(),
                    reason: format!("{} does not support output", other),
                }),
                None => Err(Self::unknown(uri, other)),
            },
        }
    }

    fn unknown(uri: &str, scheme: &str) -> Error {
        Error::InvalidUri {
            uri: uri.to_string(),
            reason: format!("unknown format '{}'", scheme),
        }
    }
}
