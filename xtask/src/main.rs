use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use consentry::{config::Config, engine::Engine};
use std::{fs, path::PathBuf, process::ExitCode};

#[derive(Parser)]
#[command(name = "xtask", about = "consentry workspace tasks")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Write the response schema of the default configuration, every catalog plugin enabled
    ExportSchema { out: PathBuf },
    /// Validate an assistant response JSON file against that schema
    ValidateResponse { file: PathBuf },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::ExportSchema { out } => export_schema(&out).map(|()| ExitCode::SUCCESS),
        Cmd::ValidateResponse { file } => validate_response(&file),
    }
}

fn full_schema() -> Result<serde_json::Value> {
    let mut engine = Engine::new();
    let mut config = Config::default();
    for p in engine.plugin_summaries(&Config::default()) {
        config.enable_plugin(&p.name);
    }
    Ok(engine.refresh(&config)?.schema().clone())
}

fn export_schema(out: &PathBuf) -> Result<()> {
    let schema = full_schema()?;
    if let Some(dir) = out.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    fs::write(out, serde_json::to_string_pretty(&schema)?).with_context(|| format!("write {}", out.display()))?;
    println!("wrote {}", out.display());
    Ok(())
}

fn validate_response(path: &PathBuf) -> Result<ExitCode> {
    let schema = full_schema()?;
    let compiled = jsonschema::validator_for(&schema)?;
    let data_text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let data: serde_json::Value = serde_json::from_str(&data_text).with_context(|| "parse json")?;
    let errors: Vec<_> = compiled.iter_errors(&data).collect();
    if !errors.is_empty() {
        eprintln!("Invalid: {}", path.display());
        for e in errors {
            eprintln!("- {}", e);
        }
        return Ok(ExitCode::FAILURE);
    }
    println!("OK: {}", path.display());
    Ok(ExitCode::SUCCESS)
}
