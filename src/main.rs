//! CLI for proving circom circuits against published artifacts.
//!
//! Usage examples:
//!   cargo run --release -- prove multiply --schema schema.json --inputs inputs.json
//!   cargo run --release -- --artifacts-dir ./build prove multiply --schema schema.json --inputs inputs.json
//!   cargo run --release -- fetch multiply
//!   cargo run --release -- coerce --schema schema.json --inputs inputs.json
//!   cargo run --release -- circuits
//!
//! Settings come from `--config` (TOML), overridden by `--base-url`. The exit
//! status of `prove` is 0 only when the proof verified.

use std::{
    fs,
    path::{Path, PathBuf},
    process,
    sync::Arc,
    time::Instant,
};

use anyhow::{Context, Result};
use circom_prover::{
    coerce, utils::format_size, ArtifactKind, ArtifactSource, DirArtifactSource,
    HttpArtifactSource, InputSchema, PipelineConfig, ProofPipeline, ProofResult, RawInputs,
};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "circom-prover", version, about = "Prove and verify circom circuits")]
struct Cli {
    /// TOML file with pipeline settings.
    #[arg(long, global = true, env = "CIRCOM_PROVER_CONFIG")]
    config: Option<PathBuf>,

    /// Artifact host base URL.
    #[arg(long, global = true, env = "CIRCOM_PROVER_BASE_URL", conflicts_with = "artifacts_dir")]
    base_url: Option<String>,

    /// Read artifacts from a local build directory instead of the artifact host.
    #[arg(long, global = true, env = "CIRCOM_PROVER_ARTIFACTS_DIR")]
    artifacts_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Coerce inputs, prove, verify and print the result as JSON.
    Prove {
        circuit: String,
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        inputs: PathBuf,
        /// Also write the result to this file.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Download a circuit's artifacts and report their sizes and digests.
    Fetch { circuit: String },
    /// Print the canonical inputs a schema produces from raw values.
    Coerce {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        inputs: PathBuf,
    },
    /// List the circuits the artifact source publishes.
    Circuits,
}

#[derive(Debug)]
struct RunSummary {
    circuit: String,
    fetch_ms: u128,
    total_ms: u128,
    artifact_bytes: [u64; 3],
    proof_bytes: u64,
    public_signals: usize,
    is_valid: bool,
}

impl RunSummary {
    fn print_summary(&self) {
        println!("\n╔════════════════════════════════════════════════╗");
        println!("║        PROOF SUMMARY                           ║");
        println!("╠════════════════════════════════════════════════╣");
        println!("║ Circuit:                {:>20}   ║", self.circuit);
        println!("║ Fetch Artifacts:        {:>17} ms   ║", self.fetch_ms);
        println!("║ Total:                  {:>17} ms   ║", self.total_ms);
        println!("╠════════════════════════════════════════════════╣");
        println!(
            "║ Witness Program:        {:>20}   ║",
            format_size(self.artifact_bytes[0])
        );
        println!(
            "║ Proving Key:            {:>20}   ║",
            format_size(self.artifact_bytes[1])
        );
        println!(
            "║ Verification Key:       {:>20}   ║",
            format_size(self.artifact_bytes[2])
        );
        println!("║ Proof:                  {:>20}   ║", format_size(self.proof_bytes));
        println!("║ Public Signals:         {:>20}   ║", self.public_signals);
        println!("║ Valid:                  {:>20}   ║", self.is_valid);
        println!("╚════════════════════════════════════════════════╝\n");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_ansi(true)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Prove {
            ref circuit,
            ref schema,
            ref inputs,
            ref output,
        } => {
            let schema = read_schema(schema)?;
            let raw = read_inputs(inputs)?;
            let pipeline = build_pipeline(&cli, &config)?;

            let t0 = Instant::now();
            let canonical = coerce(&schema, &raw).context("invalid inputs")?;
            let fetched = pipeline.fetch_artifacts(circuit).await;
            let fetch_ms = t0.elapsed().as_millis();

            let (result, artifact_bytes) = match &fetched {
                Ok(artifacts) => (
                    pipeline.prove_and_verify(artifacts, &canonical).await?,
                    ArtifactKind::ALL.map(|kind| artifacts.get(kind).len() as u64),
                ),
                Err(err) => {
                    warn!(circuit, error = %err, "artifacts unavailable");
                    (ProofResult::artifacts_unavailable(err), [0; 3])
                }
            };
            let rendered = serde_json::to_string_pretty(&result)?;
            println!("{rendered}");
            if let Some(path) = output {
                fs::write(path, &rendered)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }

            RunSummary {
                circuit: circuit.clone(),
                fetch_ms,
                total_ms: t0.elapsed().as_millis(),
                artifact_bytes,
                proof_bytes: result.proof.as_ref().map_or(0, |p| p.len() as u64),
                public_signals: result.public_signals.as_ref().map_or(0, Vec::len),
                is_valid: result.is_valid,
            }
            .print_summary();

            if !result.is_valid {
                process::exit(1);
            }
        }
        Command::Fetch { ref circuit } => {
            let pipeline = build_pipeline(&cli, &config)?;
            let t0 = Instant::now();
            let artifacts = pipeline.fetch_artifacts(circuit).await?;
            for kind in ArtifactKind::ALL {
                println!(
                    "{:<18} {:>12}  sha256:{}",
                    kind.to_string(),
                    format_size(artifacts.get(kind).len() as u64),
                    hex::encode(artifacts.digest(kind))
                );
            }
            info!(
                circuit,
                content_hash = %hex::encode(artifacts.content_hash()),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "Fetched artifacts"
            );
        }
        Command::Coerce {
            ref schema,
            ref inputs,
        } => {
            let schema = read_schema(schema)?;
            let raw = read_inputs(inputs)?;
            let canonical = coerce(&schema, &raw).context("invalid inputs")?;
            println!("{}", serde_json::to_string_pretty(&canonical)?);
        }
        Command::Circuits => {
            let circuits = match &cli.artifacts_dir {
                Some(dir) => DirArtifactSource::new(dir)
                    .list_circuits()
                    .with_context(|| format!("failed to read {}", dir.display()))?,
                None => HttpArtifactSource::from_config(&config)?
                    .list_circuits()
                    .await
                    .context("failed to list circuits")?,
            };
            for circuit in circuits {
                println!("{circuit}");
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    config.validate()?;
    Ok(config)
}

fn build_source(cli: &Cli, config: &PipelineConfig) -> Result<Arc<dyn ArtifactSource>> {
    Ok(match &cli.artifacts_dir {
        Some(dir) => Arc::new(DirArtifactSource::new(dir)),
        None => Arc::new(HttpArtifactSource::from_config(config)?),
    })
}

fn build_pipeline(cli: &Cli, config: &PipelineConfig) -> Result<ProofPipeline> {
    Ok(ProofPipeline::with_source(build_source(cli, config)?, config)?)
}

fn read_schema(path: &Path) -> Result<InputSchema> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    InputSchema::from_json_str(&text).with_context(|| format!("invalid schema {}", path.display()))
}

fn read_inputs(path: &Path) -> Result<RawInputs> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid inputs {}", path.display()))
}
