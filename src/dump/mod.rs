//! The input dump: a read-only SQL file, optionally compressed.

use crate::parser::{determine_buffer_size, Tokenizer};
use crate::progress::ProgressReader;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Compression format detected from file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Compression {
    /// Detect compression format from file extension
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("gz" | "gzip") => Compression::Gzip,
            Some("bz2" | "bzip2") => Compression::Bzip2,
            Some("xz" | "lzma") => Compression::Xz,
            Some("zst" | "zstd") => Compression::Zstd,
            _ => Compression::None,
        }
    }

    /// Wrap a reader with the appropriate decompressor
    pub fn wrap_reader<'a>(
        &self,
        reader: Box<dyn Read + 'a>,
    ) -> std::io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::None => reader,
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
            Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
        })
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Bzip2 => write!(f, "bzip2"),
            Compression::Xz => write!(f, "xz"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

/// A SQL dump on disk. Opening checks that the file exists and records its
/// size; statements are streamed on demand and the file is never modified.
#[derive(Debug, Clone)]
pub struct Dump {
    path: PathBuf,
    size: u64,
    compression: Compression,
}

impl Dump {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let metadata = std::fs::metadata(&path)?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            ));
        }
        let compression = Compression::from_path(&path);
        Ok(Self {
            path,
            size: metadata.len(),
            compression,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size on disk in bytes (compressed size for compressed dumps).
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn size_mb(&self) -> f64 {
        self.size as f64 / (1024.0 * 1024.0)
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Starts a fresh pass over the dump's statements.
    pub fn statements(&self) -> std::io::Result<Tokenizer<Box<dyn Read>>> {
        let reader = self.open_reader(None::<fn(u64)>)?;
        Ok(Tokenizer::new(reader, determine_buffer_size(self.size)))
    }

    /// Like [`Dump::statements`], reporting raw bytes read from disk.
    pub fn statements_with_progress<F>(
        &self,
        progress: F,
    ) -> std::io::Result<Tokenizer<Box<dyn Read>>>
    where
        F: Fn(u64) + 'static,
    {
        let reader = self.open_reader(Some(progress))?;
        Ok(Tokenizer::new(reader, determine_buffer_size(self.size)))
    }

    fn open_reader<F>(&self, progress: Option<F>) -> std::io::Result<Box<dyn Read>>
    where
        F: Fn(u64) + 'static,
    {
        let file = File::open(&self.path)?;
        let reader: Box<dyn Read> = match progress {
            Some(cb) => Box::new(ProgressReader::new(file, cb)),
            None => Box::new(file),
        };
        self.compression.wrap_reader(reader)
    }
}
