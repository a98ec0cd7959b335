use crate::cancel::CancelToken;
use crate::config::LoaderConfig;
use crate::error::{join_numbers, LoadError};
use crate::loader::Loader;
use crate::progress::{bytes_bar, count_bar};
use crate::target::{AnyConnector, Connector};
use crate::uploader::{ChunkState, RunSummary, UploadEvent, WaitReason};
use indicatif::ProgressBar;
use std::time::Instant;
use tracing::warn;

pub fn run(config: &LoaderConfig, progress: bool, json: bool) -> anyhow::Result<()> {
    let file = super::dump_path(config)?;
    if !file.is_file() {
        return Err(LoadError::InputNotFound(file.to_path_buf()).into());
    }
    let descriptor = config.connection()?;
    let connector = AnyConnector::open(&descriptor.backend, config.connect_timeout)
        .map_err(LoadError::Connect)?;

    if !json {
        println!("Uploading SQL file: {}", file.display());
        println!("Target: {}", connector.describe());
        println!(
            "Profile: {} ({} MB chunks, pre-flight {})",
            config.profile,
            config.chunk_budget / crate::planner::BYTES_PER_MB,
            config.preflight
        );
        println!();
    }

    let cancel = CancelToken::new();
    install_interrupt_handler(cancel.clone());

    let start_time = Instant::now();
    let summary = if progress && !json {
        let size = std::fs::metadata(file)?.len();
        let scan_bar = bytes_bar(size);
        scan_bar.set_message("planning");
        let bars = UploadBars::new(scan_bar.clone());

        let scan_bar_cb = scan_bar.clone();
        let loader = Loader::new(&connector, config)
            .with_cancel(cancel)
            .with_scan_progress(move |bytes| scan_bar_cb.set_position(bytes))
            .with_observer(|event| bars.on_event(event));
        let result = loader.run(file);
        bars.finish();
        result?
    } else {
        Loader::new(&connector, config).with_cancel(cancel).run(file)?
    };
    let elapsed = start_time.elapsed();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, elapsed);
    }

    match summary.failure() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// Cancels the run on Ctrl-C. The signal listener gets its own thread and
/// runtime because the upload itself is blocking.
fn install_interrupt_handler(cancel: CancelToken) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                warn!("Ctrl-C handling unavailable: {}", e);
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; stopping after rolling back the current chunk");
                cancel.cancel();
            }
        });
    });
}

struct UploadBars {
    scan: ProgressBar,
    chunks: ProgressBar,
    statements: ProgressBar,
}

impl UploadBars {
    fn new(scan: ProgressBar) -> Self {
        Self {
            scan,
            chunks: count_bar(0, "chunks"),
            statements: count_bar(0, "statements"),
        }
    }

    fn on_event(&self, event: &UploadEvent) {
        match event {
            UploadEvent::RunStarted { chunks } => {
                self.scan.finish_and_clear();
                self.chunks.set_length(*chunks as u64);
            }
            UploadEvent::ChunkStarted {
                number,
                attempt,
                statements,
            } => {
                self.statements.set_length(*statements as u64);
                self.statements.set_position(0);
                let retry = if *attempt > 1 { " (retry)" } else { "" };
                self.chunks.set_message(format!("chunk {}{}", number, retry));
            }
            UploadEvent::Progress(p) => {
                self.statements.set_position(p.done as u64);
                self.statements.set_message(p.eta.label());
            }
            UploadEvent::ChunkFinished { state, .. } => {
                if *state == ChunkState::Committed {
                    self.chunks.inc(1);
                }
            }
            UploadEvent::RetryScheduled { pass, chunks, .. } => {
                self.chunks
                    .set_message(format!("retry pass {} ({} chunk(s))", pass, chunks.len()));
            }
            UploadEvent::Waiting { delay, reason } => {
                let what = match reason {
                    WaitReason::NextChunk => "next chunk",
                    WaitReason::Retry => "retry",
                };
                self.chunks
                    .set_message(format!("waiting {:.0}s before {}", delay.as_secs_f64(), what));
            }
        }
    }

    fn finish(&self) {
        self.scan.finish_and_clear();
        self.statements.finish_and_clear();
        self.chunks.finish();
    }
}

fn print_summary(summary: &RunSummary, elapsed: std::time::Duration) {
    if summary.is_success() {
        println!("\n✓ Upload completed successfully!");
    } else if summary.cancelled {
        println!("\n✗ Upload cancelled");
    } else {
        println!("\n✗ Upload finished with failures");
    }

    println!("\nStatistics:");
    println!(
        "  Chunks uploaded: {}/{}",
        summary.chunks_uploaded, summary.chunks_total
    );
    println!("  Statements executed: {}", summary.statements_executed);
    println!("  Statement errors: {}", summary.statement_errors);
    if !summary.retried.is_empty() {
        println!("  Retried chunks: {}", join_numbers(&summary.retried));
    }
    if !summary.failed.is_empty() {
        println!("  Permanently failed chunks: {}", join_numbers(&summary.failed));
    }
    if let Some(critical) = &summary.critical {
        println!(
            "  Critical failure in chunk {}: {}",
            critical.chunk, critical.message
        );
    }
    println!("  Elapsed time: {:.3?}", elapsed);

    let with_errors: Vec<_> = summary
        .chunks
        .iter()
        .filter(|c| !c.samples.is_empty())
        .collect();
    if !with_errors.is_empty() {
        println!("\nError samples:");
        for chunk in with_errors {
            println!("  Chunk {} ({} error(s)):", chunk.number, chunk.errors);
            for sample in &chunk.samples {
                println!("    - statement {}: {}", sample.ordinal, sample.message);
            }
        }
    }
}
