//! Shared progress tracking utilities.
//!
//! `ProgressReader` drives byte-based progress bars while a dump is being
//! tokenized; `Eta` turns a completion ratio into a remaining-time estimate
//! for upload progress. Log output is routed through the same
//! `MultiProgress` as the bars so lines never tear a bar mid-draw.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Read, Write};
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

static MULTI_PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

fn multi_progress() -> &'static MultiProgress {
    MULTI_PROGRESS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

/// A byte-counting bar for the planning pass.
pub fn bytes_bar(total: u64) -> ProgressBar {
    let pb = multi_progress().add(ProgressBar::new(total));
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg}",
    ) {
        pb.set_style(
            style
                .progress_chars("█▓▒░  ")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// A counting bar for chunks or statements.
pub fn count_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = multi_progress().add(ProgressBar::new(total));
    if let Ok(style) = ProgressStyle::with_template(
        "{prefix:>10.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    ) {
        pb.set_style(style.progress_chars("█▓▒░  "));
    }
    pb.set_prefix(prefix.to_string());
    pb
}

/// `MakeWriter` for `tracing-subscriber` that prints above active bars.
#[derive(Default, Clone)]
pub struct LogWriterFactory;

pub struct LogWriter {
    buffer: String,
}

impl LogWriter {
    fn emit(line: &str) {
        let mp = multi_progress();
        if mp.is_hidden() {
            // Hidden targets swallow println; fall back to plain stderr.
            let _ = writeln!(io::stderr(), "{}", line);
        } else {
            let _ = mp.println(line);
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.push_str(&String::from_utf8_lossy(buf));
        while let Some(idx) = self.buffer.find('\n') {
            Self::emit(self.buffer[..idx].trim_end_matches('\r'));
            self.buffer.drain(..idx + 1);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            Self::emit(self.buffer.trim_end_matches(['\r', '\n']));
            self.buffer.clear();
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            buffer: String::new(),
        }
    }
}

/// A reader wrapper that tracks bytes read and calls a progress callback.
pub struct ProgressReader<R: Read> {
    reader: R,
    callback: Box<dyn Fn(u64)>,
    bytes_read: u64,
}

impl<R: Read> ProgressReader<R> {
    /// The callback receives the total bytes read so far after every read.
    pub fn new<F>(reader: R, callback: F) -> Self
    where
        F: Fn(u64) + 'static,
    {
        Self {
            reader,
            callback: Box::new(callback),
            bytes_read: 0,
        }
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.bytes_read += n as u64;
        (self.callback)(self.bytes_read);
        Ok(n)
    }
}

/// Remaining-time estimate from elapsed time and work done.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Eta {
    pub done: u64,
    pub total: u64,
    pub elapsed: Duration,
}

impl Eta {
    pub fn new(done: u64, total: u64, elapsed: Duration) -> Self {
        Self {
            done,
            total,
            elapsed,
        }
    }

    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.done.min(self.total)) as f64 / self.total as f64
    }

    /// `None` until at least one unit of work is done.
    pub fn remaining(&self) -> Option<Duration> {
        if self.done == 0 {
            return None;
        }
        let left = self.total.saturating_sub(self.done);
        let per_unit = self.elapsed.as_secs_f64() / self.done as f64;
        Some(Duration::from_secs_f64(per_unit * left as f64))
    }

    /// Formats as `ETA: 3m 07s`, or `ETA: --:--` when unknown.
    pub fn label(&self) -> String {
        match self.remaining() {
            Some(d) => {
                let secs = d.as_secs();
                format!("ETA: {}m {:02}s", secs / 60, secs % 60)
            }
            None => "ETA: --:--".to_string(),
        }
    }
}
