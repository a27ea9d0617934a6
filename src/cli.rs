use std::collections::HashSet;
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use clap::{ArgGroup, Parser};
use quickmatch::web::{self, AppState, WebConfig};
use quickmatch::{
    Database, DatabaseBuilder, DatabaseOptions, Dataset, DatasetError, LineId, LineRef, NgramSize,
    StorageMode,
};
use tokio::runtime::Builder as TokioRuntimeBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(
    name = "quickmatch",
    about = "Fuzzy, exact and completion lookup over NDJSON datasets",
    version
)]
#[command(group(ArgGroup::new("ngram").args(["bigram", "trigram", "tetragram"])))]
struct Cli {
    /// NDJSON dataset files to index, in order.
    #[arg(required = true)]
    datasets: Vec<PathBuf>,

    /// Port to listen on.
    #[arg(short = 'p', long, default_value_t = 8080, value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// JSON field whose value is indexed as the record name.
    #[arg(short = 'n', long = "name-field", default_value = "name")]
    name_field: String,

    /// Per-page result cap for exact and completion queries; 0 or negative
    /// means unlimited.
    #[arg(short = 'l', long, default_value_t = 100, allow_negative_numbers = true)]
    limit: i64,

    /// Drop n-gram buckets holding more elements than this at build time;
    /// 0 or negative disables pruning.
    #[arg(short = 'b', long = "bucket-cap", default_value_t = 0, allow_negative_numbers = true)]
    bucket_cap: i64,

    /// Index bigrams (the default).
    #[arg(long)]
    bigram: bool,

    /// Index trigrams.
    #[arg(long)]
    trigram: bool,

    /// Index tetragrams.
    #[arg(long)]
    tetragram: bool,

    /// Skip fuzzy candidates whose first letter differs from the query's.
    #[arg(short = 'f', long = "first-letter")]
    first_letter: bool,

    /// Keep only line offsets in memory and re-read payloads from disk.
    #[arg(long)]
    disk: bool,

    /// Skip lines whose full text was already ingested.
    #[arg(short = 'd', long = "duplicate-check")]
    duplicate_check: bool,
}

impl Cli {
    fn ngram_size(&self) -> NgramSize {
        if self.tetragram {
            NgramSize::Tetragram
        } else if self.trigram {
            NgramSize::Trigram
        } else {
            NgramSize::Bigram
        }
    }

    fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            ngram_size: self.ngram_size(),
            first_letter: self.first_letter,
            max_bucket_size: (self.bucket_cap > 0).then_some(self.bucket_cap as u64),
            result_limit: self.limit.max(0) as usize,
        }
    }

    fn storage_mode(&self) -> StorageMode {
        if self.disk {
            StorageMode::Disk
        } else {
            StorageMode::Memory
        }
    }
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging();

    let options = cli.database_options();
    let mode = cli.storage_mode();
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let abort = Arc::new(AtomicBool::new(false));

    let runtime = TokioRuntimeBuilder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async {
        // One watcher covers the load phase; the serve loop registers its own
        // listener for graceful shutdown.
        let watcher = tokio::spawn(flag_on_shutdown(abort.clone()));

        let loaded = {
            let paths = cli.datasets.clone();
            let name_field = cli.name_field.clone();
            let duplicate_check = cli.duplicate_check;
            let abort = abort.clone();
            tokio::task::spawn_blocking(move || {
                load_datasets(&paths, &name_field, mode, options, duplicate_check, &abort)
            })
            .await?
        }?;

        if abort.load(Ordering::Relaxed) {
            info!("interrupted during dataset load, exiting");
            return Ok(());
        }

        let state = Arc::new(AppState {
            database: loaded.database,
            datasets: loaded.datasets,
            name_field: cli.name_field.clone(),
        });
        web::serve(state, WebConfig { addr }, abort).await?;
        watcher.abort();
        Ok(())
    })
}

async fn flag_on_shutdown(abort: Arc<AtomicBool>) {
    let _ = tokio::signal::ctrl_c().await;
    abort.store(true, Ordering::Relaxed);
}

struct Loaded {
    database: Database<LineRef>,
    datasets: Vec<Dataset>,
}

/// Reads every dataset in order, indexing the nominated name field of each
/// parsable line.
///
/// Unreadable files are skipped; an I/O failure mid-file is fatal because
/// already-assigned ids cannot be safely unwound.
fn load_datasets(
    paths: &[PathBuf],
    name_field: &str,
    mode: StorageMode,
    options: DatabaseOptions,
    duplicate_check: bool,
    abort: &AtomicBool,
) -> Result<Loaded, DatasetError> {
    let mut builder = DatabaseBuilder::new(options);
    let mut datasets = Vec::new();
    let mut seen = duplicate_check.then(HashSet::new);

    for path in paths {
        if abort.load(Ordering::Relaxed) {
            break;
        }
        let dataset_id = datasets.len();
        let before = builder.len();
        let started = Instant::now();
        let result = Dataset::open(path, mode, abort, |line, text| {
            ingest_line(&mut builder, seen.as_mut(), name_field, dataset_id, line, text);
        });
        match result {
            Ok(dataset) => {
                info!(
                    path = %path.display(),
                    lines = dataset.len(),
                    records = builder.len() - before,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "dataset loaded"
                );
                datasets.push(dataset);
            }
            Err(DatasetError::Open(err)) => {
                error!(path = %path.display(), %err, "skipping unreadable dataset");
            }
            Err(err) => {
                error!(path = %path.display(), %err, "dataset read failed mid-stream");
                return Err(err);
            }
        }
    }

    // The duplicate set is only needed while loading.
    drop(seen);

    let started = Instant::now();
    let database = builder.build();
    info!(
        records = database.len(),
        tokens = database.token_count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "index built"
    );
    Ok(Loaded { database, datasets })
}

fn ingest_line(
    builder: &mut DatabaseBuilder<LineRef>,
    seen: Option<&mut HashSet<String>>,
    name_field: &str,
    dataset: usize,
    line: LineId,
    text: &str,
) {
    if text.trim().is_empty() {
        return;
    }
    if let Some(seen) = seen
        && !seen.insert(text.to_owned())
    {
        return;
    }
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => match value.get(name_field).and_then(|v| v.as_str()) {
            Some(name) => builder.add(name, LineRef { dataset, line }),
            None => warn!(line, field = name_field, "record has no string name field"),
        },
        Err(err) => warn!(line, %err, "skipping malformed record"),
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init();
}
