use crate::config::LoaderConfig;
use crate::dump::Dump;
use crate::error::LoadError;
use crate::loader::{plan_dump, PlanSummary};
use crate::progress::bytes_bar;
use crate::spool::ChunkSpool;

pub fn run(config: &LoaderConfig, progress: bool, json: bool) -> anyhow::Result<()> {
    let file = super::dump_path(config)?;
    let dump = Dump::open(file).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => LoadError::InputNotFound(file.to_path_buf()).into(),
        _ => anyhow::Error::from(e),
    })?;

    let bar = (progress && !json).then(|| bytes_bar(dump.size()));
    let mut statements = match &bar {
        Some(bar) => {
            let bar = bar.clone();
            dump.statements_with_progress(move |n| bar.set_position(n))?
        }
        None => dump.statements()?,
    };

    let mut spool = match &config.keep_chunks {
        Some(dir) => Some(ChunkSpool::kept(dir)?),
        None => None,
    };
    let plan = plan_dump(&dump, config, &mut statements, |chunk| match spool.as_mut() {
        Some(spool) => spool.store(chunk).map(|_| ()),
        None => Ok(()),
    })?;

    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
        if let Some(spool) = &spool {
            println!("\nChunk files written to {}", spool.dir().display());
        }
    }
    Ok(())
}

fn print_plan(plan: &PlanSummary) {
    println!("Dump: {} ({})", plan.dump.display(), plan.compression);
    println!(
        "Size: {:.2} MB, policy: {}, budget: {:.2} MB",
        plan.dump_size as f64 / (1024.0 * 1024.0),
        plan.policy,
        plan.budget as f64 / (1024.0 * 1024.0)
    );
    println!("Statements: {}", plan.statements);
    if plan.discarded_tail > 0 {
        println!(
            "Unterminated tail: {} byte(s) (will not be executed)",
            plan.discarded_tail
        );
    }

    println!();
    println!(
        "{:>6}  {:>10}  {:>12}  {:>20}",
        "CHUNK", "STATEMENTS", "BYTES", "ORDINALS"
    );
    for chunk in &plan.chunks {
        let ordinals = match (chunk.first_statement, chunk.last_statement) {
            (Some(first), Some(last)) => format!("{}..{}", first, last),
            _ => "-".to_string(),
        };
        println!(
            "{:>6}  {:>10}  {:>12}  {:>20}",
            chunk.number, chunk.statements, chunk.bytes, ordinals
        );
    }
    println!("\n{} chunk(s)", plan.chunks.len());
}
