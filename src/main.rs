use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::PathBuf;

use cfarchive::fetch::{FetchConfig, FetchManager};
use cfarchive::{constants, reconcile, Archive, HttpFetcher, Ledger, Outcome};

mod cli;

#[derive(Parser, Debug)]
#[command(name = "cfarchive")]
#[command(version)]
#[command(about = "Fetch, archive and reconcile corporate filing blobs", long_about = None)]
struct Args {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a fetch campaign over a worklist, resuming from the ledger
    Fetch {
        /// Archive root directory
        #[arg(short, long)]
        root: PathBuf,

        /// Worklist file (JSON lines: key, url, partition)
        #[arg(short, long)]
        worklist: PathBuf,

        /// Ledger file (default: <root>/downloads.jsonl)
        #[arg(short, long)]
        ledger: Option<PathBuf>,

        /// Maximum items to attempt this run
        #[arg(long, default_value_t = constants::DEFAULT_MAX_ITEMS)]
        max_items: usize,

        /// Flush archives and ledger after this many successes
        #[arg(long, default_value_t = constants::DEFAULT_CHECKPOINT_INTERVAL)]
        checkpoint_interval: usize,

        /// Requests per minute
        #[arg(long, default_value_t = constants::DEFAULT_RATE_LIMIT)]
        rate_limit: usize,
    },

    /// Cross-check archives against the ledger
    Reconcile {
        /// Archive root directory
        #[arg(short, long)]
        root: PathBuf,

        /// Ledger file (default: <root>/downloads.jsonl)
        #[arg(short, long)]
        ledger: Option<PathBuf>,

        /// Remove archived keys the ledger does not account for
        #[arg(long)]
        purge_stale: bool,
    },

    /// List archives under a root
    Ls {
        /// Archive root directory
        #[arg(short, long)]
        root: PathBuf,
    },

    /// Print the blob stored for a key to stdout
    Get {
        /// Archive root directory
        #[arg(short, long)]
        root: PathBuf,

        /// Ledger file (default: <root>/downloads.jsonl)
        #[arg(short, long)]
        ledger: Option<PathBuf>,

        /// Worklist key to look up
        key: String,
    },
}

fn default_ledger(root: &PathBuf, ledger: Option<PathBuf>) -> PathBuf {
    ledger.unwrap_or_else(|| root.join(constants::DEFAULT_LEDGER_FILENAME))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    cli::logger::init_logger(args.verbose, args.quiet);

    match args.command {
        Command::Fetch {
            root,
            worklist,
            ledger,
            max_items,
            checkpoint_interval,
            rate_limit,
        } => {
            let ledger_path = default_ledger(&root, ledger);
            let items = cfarchive::load_worklist(&worklist)?;

            let fetcher = HttpFetcher::new(rate_limit)?;
            let mut manager = FetchManager::new(
                &root,
                &ledger_path,
                Box::new(fetcher),
                FetchConfig {
                    checkpoint_interval,
                },
            )?;

            let planned = manager.what_to_fetch(&items).len().min(max_items);
            eprintln!(
                "{} worklist items, {} to fetch this run",
                items.len(),
                planned
            );

            let pb = ProgressBar::new(planned as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{bar:40} {pos}/{len} {msg}")?
                    .progress_chars("█▓░"),
            );
            let pb_clone = pb.clone();
            manager.set_progress(Box::new(move |_, report| {
                pb_clone.set_position(report.attempted as u64);
                pb_clone.set_message(format!(
                    "{} ok, {} failed",
                    report.succeeded, report.failed
                ));
            }));

            let report = manager.run(&items, max_items).await?;
            pb.finish_and_clear();

            eprintln!(
                "attempted {}, succeeded {}, failed {} (ledger: {} rows)",
                report.attempted, report.succeeded, report.failed, report.ledger_rows
            );
            if report.failed > 0 {
                eprintln!("rerun to retry failed items");
            }
        }

        Command::Reconcile {
            root,
            ledger,
            purge_stale,
        } => {
            let ledger_path = default_ledger(&root, ledger);
            let mut report = reconcile::reconcile(&root, &ledger_path)?;

            println!(
                "checked {} archives and {} ledger rows",
                report.archives_checked, report.rows_checked
            );
            for s in &report.stale {
                println!("stale: {} in {}", s.key, s.archive);
            }
            for m in &report.missing {
                println!("missing: {} ({}): {}", m.key, m.archive, m.reason);
            }

            if purge_stale && !report.stale.is_empty() {
                let removed = reconcile::purge_stale(&root, &report.stale)?;
                println!("purged {} stale keys", removed);
                report = reconcile::reconcile(&root, &ledger_path)?;
            }

            if report.is_clean() {
                println!("clean");
            } else {
                anyhow::bail!(
                    "{} stale keys, {} missing blobs",
                    report.stale.len(),
                    report.missing.len()
                );
            }
        }

        Command::Ls { root } => {
            for path in reconcile::scan_archives(&root)? {
                let archive = Archive::open_read(&path)
                    .with_context(|| format!("opening {}", path.display()))?;
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    println!("{}\t{} entries", name, archive.size());
                }
            }
        }

        Command::Get { root, ledger, key } => {
            let ledger_path = default_ledger(&root, ledger);
            let ledger = Ledger::load(&ledger_path)?;

            let row = ledger
                .get(&key)
                .with_context(|| format!("key {} not in ledger", key))?;
            if row.outcome != Outcome::Success {
                anyhow::bail!(
                    "key {} failed to download: {}",
                    key,
                    row.error_message.as_deref().unwrap_or("unknown error")
                );
            }
            let rel = row
                .archive_path
                .as_deref()
                .with_context(|| format!("no archive recorded for key {}", key))?;

            let archive = Archive::open_read(root.join(rel))?;
            let blob = archive
                .get(&key)?
                .with_context(|| format!("key {} missing from {}", key, rel))?;
            std::io::stdout().write_all(blob)?;
        }
    }

    Ok(())
}
