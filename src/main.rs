mod batch;
mod cli;
mod collector;
mod config;
mod error;
mod governor;
mod llm;
mod metadata;
mod orchestrator;
mod stats;
mod ui;

use std::path::PathBuf;
use std::pin::pin;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;

use crate::batch::{DocumentRef, ExtractionMode, Outcome};
use crate::cli::{Cli, Command};
use crate::config::PapermetaConfig;
use crate::llm::ExtractionClient;
use crate::orchestrator::{BatchHandle, BatchOrchestrator};
use crate::ui::BatchProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = PapermetaConfig::load()?;
    if let Some(concurrency) = cli.concurrency {
        config.max_concurrency = concurrency;
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.max_attempts = max_attempts;
    }
    let mode = cli.mode.map(ExtractionMode::from).unwrap_or(ExtractionMode::Sn);

    match cli.command {
        Command::Extract { paths, output } => {
            run_extract(config, mode, &paths, output, cli.verbose).await
        }
        Command::Demo => demo::run(config).await,
    }
}

async fn run_extract(
    config: PapermetaConfig,
    mode: ExtractionMode,
    paths: &[PathBuf],
    output: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    config.validate()?;
    if config.api_key.is_empty() {
        bail!("no API key configured; set LLM_API_KEY or api_key in papermeta.toml");
    }

    let documents = gather_documents(paths)?;
    if documents.is_empty() {
        return Err(error::PapermetaError::NoDocuments(
            "no .txt files in the given paths".into(),
        )
        .into());
    }
    let filenames: Vec<String> = documents.iter().map(|d| d.filename.clone()).collect();
    if verbose {
        println!("processing {} documents in {mode} mode", documents.len());
    }

    let client = ExtractionClient::with_base_url(
        config.api_key.clone(),
        config.model.clone(),
        config.endpoint.clone(),
    )
    .max_tokens(config.max_tokens)
    .temperature(config.temperature);

    let orchestrator = BatchOrchestrator::new(client, config.batch_config())?;
    let inputs = documents.into_iter().map(|doc| (doc, mode)).collect();
    let handle = orchestrator.submit_batch(inputs)?;

    let progress = BatchProgress::start(handle.total());
    let results = watch_batch(&handle, &progress).await;
    progress.finish(&handle.get_stats());
    progress.print_failures(&filenames, &results);

    let path = write_report(&handle, mode, &filenames, &results, output)?;
    println!("report written to {}", path.display());
    Ok(())
}

/// Await the batch while refreshing the progress bar from live stats.
async fn watch_batch(handle: &BatchHandle, progress: &BatchProgress) -> Vec<Outcome> {
    let mut results = pin!(handle.get_results());
    loop {
        tokio::select! {
            outcomes = &mut results => break outcomes,
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                progress.update(&handle.get_stats());
            }
        }
    }
}

/// Collect document text files. A directory contributes every `.txt` file
/// inside it, sorted by name; the filename stem becomes the document id.
fn gather_documents(paths: &[PathBuf]) -> Result<Vec<DocumentRef>> {
    let mut files: Vec<PathBuf> = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("reading directory {}", path.display()))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "txt"))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }

    files
        .iter()
        .map(|path| {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let filename = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(DocumentRef { filename, text })
        })
        .collect()
}

/// Serialize the batch report. Results keep submission order and pair each
/// filename with its outcome (the outcome tag is `status`).
fn write_report(
    handle: &BatchHandle,
    mode: ExtractionMode,
    filenames: &[String],
    results: &[Outcome],
    output: Option<PathBuf>,
) -> Result<PathBuf> {
    let entries: Vec<serde_json::Value> = filenames
        .iter()
        .zip(results)
        .map(|(filename, outcome)| {
            let mut value = serde_json::to_value(outcome)?;
            if let Some(obj) = value.as_object_mut() {
                obj.insert("filename".into(), serde_json::Value::String(filename.clone()));
            }
            Ok(value)
        })
        .collect::<Result<_>>()?;

    let report = serde_json::json!({
        "batch_id": handle.id,
        "mode": mode,
        "generated_at": Utc::now(),
        "stats": handle.get_stats(),
        "results": entries,
    });

    let path = match output {
        Some(path) => path,
        None => {
            let stamp = Utc::now().format("%Y%m%d_%H%M%S");
            PathBuf::from(format!("results/{mode}_metadata_{stamp}.json"))
        }
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
    Ok(path)
}

/// Built-in demonstration against a simulated extraction service: varied
/// latencies, one flaky document, and one that is persistently rate
/// limited, so ordering, retries, and failure accounting are all visible
/// without network access or an API key.
mod demo {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::Result;

    use crate::batch::{DocumentRef, ExtractionMode, FieldSet, Job, RetryPolicy};
    use crate::config::PapermetaConfig;
    use crate::llm::{ExtractError, ExtractionBackend};
    use crate::orchestrator::{BatchConfig, BatchOrchestrator};

    struct SimulatedService {
        attempts: Mutex<HashMap<usize, u32>>,
    }

    impl ExtractionBackend for SimulatedService {
        async fn extract(&self, job: &Job) -> Result<FieldSet, ExtractError> {
            let attempt = {
                let mut attempts = self.attempts.lock().expect("attempt map poisoned");
                let n = attempts.entry(job.index).or_insert(0);
                *n += 1;
                *n
            };

            // Later documents respond faster, so completion order is the
            // reverse of submission order.
            let latency = 400u64.saturating_sub(job.index as u64 * 60);
            tokio::time::sleep(Duration::from_millis(latency)).await;

            match (job.index, attempt) {
                // Document 1 is flaky: two transient failures, then fine.
                (1, a) if a <= 2 => Err(ExtractError::Network("connection reset".into())),
                // Document 3 is rate limited on every attempt.
                (3, _) => Err(ExtractError::RateLimited { retry_after_ms: 500 }),
                _ => {
                    let mut fields = FieldSet::new();
                    fields.insert("Number".into(), Some(job.document.filename.clone()));
                    fields.insert(
                        "Title".into(),
                        Some(format!("Simulated Paper {}", job.index)),
                    );
                    fields.insert("Author 1".into(), Some("Wei Zhang".into()));
                    fields.insert(
                        "Affiliation 1".into(),
                        Some("Tsinghua University".into()),
                    );
                    Ok(fields)
                }
            }
        }
    }

    pub async fn run(config: PapermetaConfig) -> Result<()> {
        println!("papermeta demo: 6 documents against a simulated service");
        println!("  document 1 fails twice before succeeding");
        println!("  document 3 is rate limited until its attempts run out");
        println!();

        let batch_config = BatchConfig {
            max_concurrency: config.max_concurrency.min(3),
            max_requests_per_window: 10,
            window: Duration::from_secs(1),
            batch_timeout: Duration::from_secs(30),
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                base_backoff: Duration::from_millis(200),
                jitter: Duration::from_millis(50),
            },
        };

        let backend = SimulatedService {
            attempts: Mutex::new(HashMap::new()),
        };
        let orchestrator = BatchOrchestrator::new(backend, batch_config)?;

        let inputs = (0..6)
            .map(|i| {
                (
                    DocumentRef {
                        filename: format!("demo-{i:03}"),
                        text: format!("Simulated Paper {i}\nWei Zhang, Tsinghua University"),
                    },
                    ExtractionMode::Sn,
                )
            })
            .collect();
        let filenames: Vec<String> = (0..6).map(|i| format!("demo-{i:03}")).collect();

        let handle = orchestrator.submit_batch(inputs)?;
        let progress = crate::ui::BatchProgress::start(handle.total());
        let results = super::watch_batch(&handle, &progress).await;
        progress.finish(&handle.get_stats());
        progress.print_failures(&filenames, &results);

        println!();
        println!("results in submission order:");
        for (filename, outcome) in filenames.iter().zip(&results) {
            println!("  {filename}: {}", serde_json::to_string(outcome)?);
        }
        Ok(())
    }
}
