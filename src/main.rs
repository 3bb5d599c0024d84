//! taskeval - evaluate LLM task extraction against a labeled CSV dataset

mod core;
mod error;
mod eval;
mod extract;
mod report;

use crate::core::{
    compute_dataset_hash, APIConfig, ApiClient, ChatMessage, GenKwargs, GoldRow, Prediction,
};
use crate::error::Result;
use crate::eval::{EvalAccumulator, Metrics};
use clap::Parser;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Instant;
use tracing::warn;

/// Evaluate LLM task extraction on a CSV dataset through an OpenAI-compatible API
#[derive(Parser, Debug)]
#[command(name = "taskeval")]
#[command(version = "0.1.0")]
#[command(about = "Evaluate LLM task extraction against a labeled CSV dataset")]
struct Args {
    /// Path to input CSV with at least a text column
    #[arg(long, required = true)]
    input: PathBuf,

    /// Column name for the input message text
    #[arg(long, default_value = "text")]
    text_col: String,

    /// Binary label column (0/1) for task presence; set to '' to disable
    #[arg(long, default_value = "label")]
    label_col: String,

    /// Reference task text column; set to '' to disable
    #[arg(long, default_value = "gold_task")]
    gold_task_col: String,

    /// Model configuration: model=name,base_url=url[,seed=N,timeout=N,max_retries=N,api_key=key]
    #[arg(long, required = true)]
    model_args: String,

    /// Generation kwargs: temperature=N,max_tokens=N,top_p=N,...
    #[arg(long, default_value = "")]
    gen_kwargs: String,

    /// Maximum rows to evaluate
    #[arg(long)]
    max_rows: Option<usize>,

    /// Random seed passed to the API for reproducibility
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Optional path to write a predictions CSV
    #[arg(long)]
    output: Option<PathBuf>,

    /// Optional path to write an HTML report
    #[arg(long)]
    report: Option<PathBuf>,
}

/// Overall evaluation results printed to stdout
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EvalSummary {
    metrics: Metrics,
    dataset_hash: String,
    model_failures: u64,
    avg_extract_ms: f64,
    total_seconds: f64,
    config: ConfigOutput,
}

/// Configuration output
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigOutput {
    model: String,
    dataset: String,
    rows: usize,
    seed: u64,
}

/// Dataset loaded from CSV: raw records for passthrough plus typed gold rows
struct Dataset {
    headers: StringRecord,
    records: Vec<StringRecord>,
    gold_rows: Vec<GoldRow>,
}

/// Read the dataset, resolving configured column names by position.
/// Absent optional columns are treated as "not provided", not as errors.
fn read_dataset(args: &Args) -> Result<Dataset> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(&args.input)?;
    let headers = reader.headers()?.clone();

    let column = |name: &str| -> Option<usize> {
        if name.is_empty() {
            return None;
        }
        headers.iter().position(|h| h == name)
    };
    let text_idx = column(&args.text_col);
    let label_idx = column(&args.label_col);
    let gold_task_idx = column(&args.gold_task_col);

    let mut records = Vec::new();
    for record in reader.records() {
        if let Some(max) = args.max_rows {
            if records.len() >= max {
                break;
            }
        }
        records.push(record?);
    }

    let cell = |record: &StringRecord, idx: Option<usize>| -> Option<String> {
        idx.and_then(|i| record.get(i)).map(str::to_string)
    };

    let gold_rows = records
        .iter()
        .map(|record| GoldRow {
            text: cell(record, text_idx).unwrap_or_default(),
            label: cell(record, label_idx),
            gold_task: cell(record, gold_task_idx),
        })
        .collect();

    Ok(Dataset {
        headers,
        records,
        gold_rows,
    })
}

/// Run the model over every row sequentially and fold predictions into the
/// evaluator. A failed model call is logged, counted, and scored as empty
/// output so the batch always completes.
async fn evaluate(
    dataset: &Dataset,
    config: &APIConfig,
    gen_kwargs: &GenKwargs,
) -> (Vec<Prediction>, EvalAccumulator, Vec<f64>, u64) {
    let client = ApiClient::new(config.clone());
    let mut acc = EvalAccumulator::default();
    let mut predictions = Vec::with_capacity(dataset.gold_rows.len());
    let mut durations_ms = Vec::with_capacity(dataset.gold_rows.len());
    let mut model_failures = 0u64;

    for gold in &dataset.gold_rows {
        let started = Instant::now();
        let messages = vec![
            ChatMessage::system(extract::EXTRACTION_PROMPT),
            ChatMessage::user(&gold.text),
        ];
        let raw = match client.complete(messages, gen_kwargs).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "model call failed; scoring empty output");
                model_failures += 1;
                String::new()
            }
        };
        durations_ms.push(started.elapsed().as_secs_f64() * 1000.0);

        let prediction = extract::normalize_response(&raw);
        acc.fold(&prediction, gold);
        predictions.push(prediction);
    }

    (predictions, acc, durations_ms, model_failures)
}

/// Write the predictions CSV: original columns plus pred_is_task,
/// pred_confidence, pred_task
fn write_predictions_csv(path: &PathBuf, dataset: &Dataset, predictions: &[Prediction]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header: Vec<&str> = dataset.headers.iter().collect();
    header.extend(["pred_is_task", "pred_confidence", "pred_task"]);
    writer.write_record(&header)?;

    for (record, prediction) in dataset.records.iter().zip(predictions) {
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        // Flexible CSVs can have short rows; pad so columns stay aligned
        row.resize(dataset.headers.len(), String::new());
        row.push(prediction.is_task.to_string());
        row.push(format!("{:.2}", prediction.confidence));
        row.push(prediction.task.clone());
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

fn write_html_report(
    path: &PathBuf,
    args: &Args,
    metrics: &Metrics,
    durations_ms: &[f64],
    avg_ms: f64,
) -> Result<()> {
    let dataset_name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| args.input.display().to_string());
    let html = report::build_html_report(&dataset_name, metrics, durations_ms, avg_ms);
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    use std::io::Write;
    writer.write_all(html.as_bytes())?;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let start = Instant::now();

    let mut config = APIConfig::from_model_args(&args.model_args)?;
    config.seed = args.seed;

    let gen_kwargs = if args.gen_kwargs.is_empty() {
        GenKwargs::default()
    } else {
        GenKwargs::from_str(&args.gen_kwargs)?
    };

    let dataset = read_dataset(&args)?;
    let dataset_hash = compute_dataset_hash(&dataset.gold_rows);

    let (predictions, acc, durations_ms, model_failures) =
        evaluate(&dataset, &config, &gen_kwargs).await;
    let metrics = acc.finalize();

    let avg_extract_ms = if durations_ms.is_empty() {
        0.0
    } else {
        durations_ms.iter().sum::<f64>() / durations_ms.len() as f64
    };

    if let Some(ref path) = args.output {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        write_predictions_csv(path, &dataset, &predictions)?;
    }

    if let Some(ref path) = args.report {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        write_html_report(path, &args, &metrics, &durations_ms, avg_extract_ms)?;
    }

    let summary = EvalSummary {
        metrics,
        dataset_hash,
        model_failures,
        avg_extract_ms,
        total_seconds: start.elapsed().as_secs_f64(),
        config: ConfigOutput {
            model: config.model.clone(),
            dataset: args.input.display().to_string(),
            rows: dataset.gold_rows.len(),
            seed: config.seed,
        },
    };

    let json = serde_json::to_string_pretty(&summary)?;
    println!("{}", json);

    Ok(())
}
