//! RiskAlign command-line driver.
//!
//! Ingests an optional artifact or the service's sample findings, requests
//! the chosen stages against the analytics service and prints each result
//! as JSON.

mod args;

use args::Args;
use clap::Parser;
use riskalign_client::AnalyticsClient;
use riskalign_core::{PipelineConfig, PipelineError, PipelineResult, RawArtifact, StageOutcome, StageParams};
use riskalign_pipeline::Pipeline;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> PipelineResult<()> {
    init_tracing()?;

    let args = Args::parse();
    let config = PipelineConfig::load(args.config.as_deref())?;
    let client = AnalyticsClient::new(&config)?;
    let pipeline = Pipeline::builder(config)
        .with_stages(client.stage_functions())
        .with_parser(Arc::new(client.clone()))
        .with_chat_backend(Arc::new(client.clone()))
        .start()?;

    pipeline.subscribe_failures_fn(|notice| {
        tracing::warn!(provider = %notice.provider, status = ?notice.status, "{}", notice);
    });

    if args.reconcile() {
        if let Some(change) = pipeline.reconcile_provider(&client).await? {
            tracing::info!(provider = %change.context.provider_id(), "switched to an offered provider");
        }
    }
    let patch = args.patch();
    if !patch.is_empty() {
        pipeline.update_context(&patch)?;
    }

    let artifact = if args.sample {
        Some(sample_artifact(&pipeline, &client).await?)
    } else {
        match &args.ingest {
            Some(path) => Some(read_artifact(path).await?),
            None => None,
        }
    };
    if let Some(artifact) = artifact {
        let report = pipeline.ingest(artifact).await?;
        tracing::info!(
            batch = %report.batch.id,
            accepted = report.accepted,
            rejected = report.rejected,
            "artifact ingested"
        );
    }

    for stage in args.stages() {
        let line = match pipeline.request(stage, StageParams::new()).await {
            Ok(StageOutcome::Ready(artifact)) => serde_json::json!({
                "stage": stage.as_str(),
                "fingerprint": artifact.fingerprint.short(),
                "output": artifact.output,
            }),
            Ok(StageOutcome::NotApplicable { reason, .. }) => serde_json::json!({
                "stage": stage.as_str(),
                "not_applicable": reason,
            }),
            Err(e) => {
                tracing::error!(stage = %stage, kind = ?e.kind(), error = %e, "stage failed");
                serde_json::json!({ "stage": stage.as_str(), "error": e.to_string() })
            }
        };
        println!("{}", line);
    }

    pipeline.shutdown()
}

async fn read_artifact(path: &Path) -> PipelineResult<RawArtifact> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        PipelineError::validation("ingest", format!("cannot read {}: {}", path.display(), e))
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(RawArtifact::new(file_name, bytes))
}

/// The service's demo dataset, re-encoded as an uploadable artifact.
async fn sample_artifact(pipeline: &Pipeline, client: &AnalyticsClient) -> PipelineResult<RawArtifact> {
    let findings = client.fetch_sample_findings(pipeline.context().provider_id()).await?;
    let bytes = serde_json::to_vec(&findings)
        .map_err(|e| PipelineError::internal(format!("cannot encode sample findings: {}", e)))?;
    Ok(RawArtifact::new("sample_findings.json", bytes))
}

fn init_tracing() -> PipelineResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("riskalign=info,riskalign_pipeline=info,riskalign_client=info,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| PipelineError::internal(format!("Failed to init subscriber: {}", e)))
}
