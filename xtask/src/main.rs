use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "stencil-flow workspace automation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the benchmarks once per worker count and compare them
    Bench {
        /// Run quickly (lower sample size/time)
        #[arg(long, default_value_t = false)]
        quick: bool,

        /// Generate report only (skip running benchmarks)
        #[arg(long, default_value_t = false)]
        report_only: bool,

        /// Worker counts to compare; the first one is the baseline
        #[arg(long, value_delimiter = ',', default_values_t = [1usize, 2, 4])]
        workers: Vec<usize>,
    },
}

const BENCHES: &[&str] = &["sync_benchmark", "stencil_benchmark"];

/// Throughput per workload, keyed by baseline name.
type Results = BTreeMap<String, BTreeMap<String, f64>>;

#[derive(Serialize)]
struct Summary<'a> {
    baselines: Vec<String>,
    results: &'a Results,
}

fn baseline(workers: usize) -> String {
    format!("workers-{workers}")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Bench {
            quick,
            report_only,
            workers,
        } => {
            if workers.is_empty() {
                anyhow::bail!("at least one worker count is required");
            }
            if !report_only {
                run_benchmarks(quick, &workers)?;
            }
            generate_report(&workers)?;
        }
    }

    Ok(())
}

fn run_benchmarks(quick: bool, workers: &[usize]) -> Result<()> {
    println!("Compiling benchmarks...");
    let status = Command::new("cargo")
        .args(["bench", "--no-run"])
        .status()?;
    if !status.success() {
        anyhow::bail!("Failed to compile benchmarks");
    }

    for &count in workers {
        let name = baseline(count);
        for bench in BENCHES {
            println!("\n>>> {bench} with {count} worker(s)");
            let start = Instant::now();

            let mut cmd = Command::new("cargo");
            cmd.env("STENCIL_WORKERS", count.to_string())
                .arg("bench")
                .arg("--bench")
                .arg(bench);

            // Args for the test runner (Criterion) go after --
            cmd.arg("--");
            cmd.arg("--save-baseline").arg(&name);

            if quick {
                cmd.arg("--measurement-time").arg("0.1");
                cmd.arg("--noplot");
                cmd.arg("--sample-size").arg("10");
            }

            let status = cmd
                .status()
                .with_context(|| format!("Failed to run {bench} for {name}"))?;

            if status.success() {
                println!("Finished {bench} ({name}) in {:.2?}", start.elapsed());
            } else {
                eprintln!("Warning: {bench} failed for {name}");
            }
        }
    }

    Ok(())
}

fn generate_report(workers: &[usize]) -> Result<()> {
    println!("\n>>> Generating Report...");
    let criterion_dir = Path::new("target/criterion");
    if !criterion_dir.exists() {
        eprintln!("No criterion output found at {}", criterion_dir.display());
        return Ok(());
    }

    let mut results = Results::new();
    collect_results(criterion_dir, &mut results)?;

    let out_dir = Path::new("benchmark_results");
    fs::create_dir_all(out_dir)?;

    let baselines: Vec<String> = workers.iter().map(|&w| baseline(w)).collect();
    let reference = &baselines[0];

    use std::fmt::Write as _;
    let mut report = String::new();
    writeln!(report, "# Scaling Report")?;
    writeln!(report)?;

    write!(report, "| Workload |")?;
    for name in &baselines {
        write!(report, " {name} (ops/s) | vs {reference} |")?;
    }
    writeln!(report)?;
    write!(report, "|---|")?;
    for _ in &baselines {
        write!(report, "---|---|")?;
    }
    writeln!(report)?;

    for (workload, by_baseline) in &results {
        write!(report, "| {workload} |")?;
        let reference_ops = by_baseline.get(reference).copied().unwrap_or(0.0);
        for name in &baselines {
            match by_baseline.get(name) {
                Some(&ops) => {
                    let rel = if reference_ops > 0.0 { ops / reference_ops } else { 0.0 };
                    write!(report, " {} | **{rel:.2}x** |", format_ops(ops))?;
                }
                None => write!(report, " N/A | - |")?,
            }
        }
        writeln!(report)?;
    }

    let report_path = out_dir.join("report.md");
    fs::write(&report_path, report)?;
    let summary = Summary {
        baselines,
        results: &results,
    };
    fs::write(
        out_dir.join("summary.json"),
        serde_json::to_string_pretty(&summary)?,
    )?;

    println!("Report written to {}", report_path.display());
    Ok(())
}

fn format_ops(ops: f64) -> String {
    if ops > 1_000_000.0 {
        format!("{:.2}M", ops / 1_000_000.0)
    } else if ops > 1_000.0 {
        format!("{:.2}K", ops / 1_000.0)
    } else {
        format!("{ops:.0}")
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()?.to_str().map(str::to_owned)
}

fn read_json(path: &Path) -> Option<serde_json::Value> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Walks criterion's output: `<group>/<workload>/<baseline>/estimates.json`.
fn collect_results(dir: &Path, results: &mut Results) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_results(&path, results)?;
            continue;
        }
        if file_name(&path).as_deref() != Some("estimates.json") {
            continue;
        }

        let Some(baseline_dir) = path.parent() else { continue };
        let Some(workload_dir) = baseline_dir.parent() else { continue };
        let (Some(baseline_name), Some(workload_name)) =
            (file_name(baseline_dir), file_name(workload_dir))
        else {
            continue;
        };
        if !baseline_name.starts_with("workers-") || workload_name == "report" {
            continue;
        }
        let workload = match workload_dir.parent().and_then(file_name) {
            Some(group) => format!("{group}/{workload_name}"),
            None => workload_name,
        };

        let elements = read_json(&workload_dir.join(&baseline_name).join("benchmark.json"))
            .and_then(|json| json.get("throughput")?.get("Elements")?.as_f64());
        let mean_ns = read_json(&path)
            .and_then(|json| json.get("mean")?.get("point_estimate")?.as_f64())
            .unwrap_or(0.0);
        if mean_ns > 0.0 {
            let metric = elements.unwrap_or(1.0) * 1e9 / mean_ns;
            results
                .entry(workload)
                .or_default()
                .insert(baseline_name, metric);
        }
    }
    Ok(())
}
