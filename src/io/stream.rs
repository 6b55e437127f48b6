//! Byte streams backing file traces.
//!
//! [`TraceInput`] opens a path (or `-` for stdin) for reading, detecting gzip
//! compression from the first bytes. It tracks the uncompressed offset so the
//! seek engine can `tell()` before a record and return to it later.
//!
//! [`TraceOutput`] writes plain or gzip-compressed bytes to a file or stdout.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Stdin, Stdout, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;

use crate::error::{Error, Result};

use super::decompress::{read_full, Compression, DecompressReader};

/// Path that selects stdin or stdout instead of a file.
pub const STDIO_PATH: &str = "-";

/// Raw byte source before decompression.
enum Source {
    File(BufReader<File>),
    Stdin(BufReader<Stdin>),
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::File(r) => r.read(buf),
            Source::Stdin(r) => r.read(buf),
        }
    }
}

impl BufRead for Source {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            Source::File(r) => r.fill_buf(),
            Source::Stdin(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            Source::File(r) => r.consume(amt),
            Source::Stdin(r) => r.consume(amt),
        }
    }
}

/// Readable, tellable and (for files) seekable trace input.
pub struct TraceInput {
    /// `None` for stdin
    path: Option<PathBuf>,
    reader: DecompressReader<Source>,
    /// Offset into the uncompressed stream
    offset: u64,
}

impl TraceInput {
    /// Open `path` for reading; `-` reads stdin.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str() == STDIO_PATH {
            return Self::stdin();
        }
        let source = Self::open_file(path)?;
        Self::from_source(Some(path.to_path_buf()), source)
    }

    /// Read the trace from stdin.
    pub fn stdin() -> Result<Self> {
        let source = Source::Stdin(BufReader::new(io::stdin()));
        Self::from_source(None, source)
    }

    fn open_file(path: &Path) -> Result<Source> {
        let file = File::open(path).map_err(|e| Error::file(path, e))?;
        Ok(Source::File(BufReader::new(file)))
    }

    fn from_source(path: Option<PathBuf>, mut source: Source) -> Result<Self> {
        let compression = {
            let head = source.fill_buf().map_err(|e| Self::wrap(&path, e))?;
            Compression::detect(head)
        };
        if compression.is_compressed() {
            tracing::debug!("Detected {} compressed trace", compression);
        }
        Ok(Self {
            path,
            reader: DecompressReader::new(source, compression),
            offset: 0,
        })
    }

    fn wrap(path: &Option<PathBuf>, e: io::Error) -> Error {
        match path {
            Some(p) => Error::file(p, e),
            None => Error::Io(e),
        }
    }

    /// Path of the trace file, `None` for stdin.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether this input reads stdin.
    pub fn is_stdin(&self) -> bool {
        self.path.is_none()
    }

    /// Compression detected when the input was opened.
    pub fn compression(&self) -> Compression {
        self.reader.compression()
    }

    /// Current offset in the uncompressed stream.
    #[inline]
    pub fn tell(&self) -> u64 {
        self.offset
    }

    /// Fill `buf` as far as the stream allows.
    ///
    /// Returns fewer bytes than requested only at end of stream.
    pub fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = read_full(&mut self.reader, buf).map_err(|e| Self::wrap(&self.path, e))?;
        self.offset += n as u64;
        Ok(n)
    }

    /// Position the stream at `offset` bytes into the uncompressed data.
    ///
    /// Plain files seek directly. Compressed files reopen when moving
    /// backwards and decompress forward. Stdin can only skip forward.
    pub fn seek(&mut self, offset: u64) -> Result<u64> {
        if let Some(file) = self.reader.passthrough_mut() {
            if let Source::File(file) = file {
                let pos = file
                    .seek(SeekFrom::Start(offset))
                    .map_err(|e| Self::wrap(&self.path, e))?;
                self.offset = pos;
                return Ok(pos);
            }
        }

        if offset < self.offset {
            self.reopen()?;
        }
        let skip = offset - self.offset;
        let skipped = io::copy(&mut (&mut self.reader).take(skip), &mut io::sink())
            .map_err(|e| Self::wrap(&self.path, e))?;
        self.offset += skipped;
        Ok(self.offset)
    }

    /// Start reading the trace again from the first byte.
    pub fn reopen(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Err(Error::SeekUnsupported { format: "stdin" });
        };
        let source = Self::open_file(&path)?;
        *self = Self::from_source(Some(path), source)?;
        Ok(())
    }
}

/// How an output file is opened.
///
/// The default creates the file if needed and opens it write-only, leaving
/// existing contents in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileFlags {
    /// Write at the end of an existing file
    pub append: bool,
    /// Discard existing contents
    pub truncate: bool,
    /// Fail if the file already exists
    pub create_new: bool,
}

impl FileFlags {
    fn open_options(&self) -> OpenOptions {
        let mut options = OpenOptions::new();
        options.write(true);
        if self.create_new {
            options.create_new(true);
        } else {
            options.create(true);
        }
        if self.append {
            options.append(true);
        } else if self.truncate {
            options.truncate(true);
        }
        options
    }
}

enum Sink {
    File(BufWriter<File>),
    Stdout(BufWriter<Stdout>),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::File(w) => w.write(buf),
            Sink::Stdout(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::File(w) => w.flush(),
            Sink::Stdout(w) => w.flush(),
        }
    }
}

enum Writer {
    Plain(Sink),
    Gzip(GzEncoder<Sink>),
}

impl Writer {
    fn get_mut(&mut self) -> &mut dyn Write {
        match self {
            Writer::Plain(w) => w as &mut dyn Write,
            Writer::Gzip(w) => w as &mut dyn Write,
        }
    }
}

/// Writable trace output.
pub struct TraceOutput {
    path: Option<PathBuf>,
    writer: Option<Writer>,
    /// Uncompressed bytes written so far
    written: u64,
}

impl TraceOutput {
    /// Open `path` for writing; `-` writes stdout.
    ///
    /// Level 0 writes plain bytes, 1 to 9 write gzip at that level.
    pub fn create<P: AsRef<Path>>(path: P, level: u32, flags: FileFlags) -> Result<Self> {
        let path = path.as_ref();
        let (path, sink) = if path.as_os_str() == STDIO_PATH {
            (None, Sink::Stdout(BufWriter::new(io::stdout())))
        } else {
            let file = flags
                .open_options()
                .open(path)
                .map_err(|e| Error::file(path, e))?;
            (Some(path.to_path_buf()), Sink::File(BufWriter::new(file)))
        };

        let writer = match level {
            0 => Writer::Plain(sink),
            level => Writer::Gzip(GzEncoder::new(
                sink,
                flate2::Compression::new(level.min(9)),
            )),
        };

        Ok(Self {
            path,
            writer: Some(writer),
            written: 0,
        })
    }

    /// Path of the output file, `None` for stdout.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Uncompressed bytes written so far.
    #[inline]
    pub fn position(&self) -> u64 {
        self.written
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(Self::closed)?;
        writer
            .get_mut()
            .write_all(data)
            .map_err(|e| Self::wrap(&self.path, e))?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Flush buffered bytes and finish the gzip stream.
    ///
    /// Further writes fail; calling it twice is harmless.
    pub fn finish(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let mut sink = match writer {
            Writer::Plain(sink) => sink,
            Writer::Gzip(gz) => gz.finish().map_err(|e| Self::wrap(&self.path, e))?,
        };
        sink.flush().map_err(|e| Self::wrap(&self.path, e))
    }

    fn closed() -> Error {
        Error::Io(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "trace output already finished",
        ))
    }

    fn wrap(path: &Option<PathBuf>, e: io::Error) -> Error {
        match path {
            Some(p) => Error::file(p, e),
            None => Error::Io(e),
        }
    }
}

impl Drop for TraceOutput {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!("Failed to finish trace output: {}", e);
        }
    }
}
