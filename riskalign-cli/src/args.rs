//! Command-line arguments.

use clap::Parser;
use riskalign_core::{ContextPatch, ProviderId, StageName};
use std::path::PathBuf;

/// Run the RiskAlign stage pipeline against the analytics service
#[derive(Parser, Debug)]
#[command(name = "riskalign")]
#[command(about = "Cached, dependency-ordered risk pipeline", long_about = None)]
#[command(version)]
pub struct Args {
    /// TOML configuration file
    #[arg(long, env = "RISKALIGN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Artifact to ingest before any stage is requested
    pub ingest: Option<PathBuf>,

    /// Ingest the service's sample findings instead of a file
    #[arg(long, conflicts_with = "ingest")]
    pub sample: bool,

    /// Stage to print, repeatable. Every stage when omitted.
    #[arg(long = "stage", value_parser = parse_stage)]
    pub stages: Vec<StageName>,

    /// AI provider (local or online)
    #[arg(long, value_parser = parse_provider)]
    pub provider: Option<ProviderId>,

    /// Remediation hours per wave
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_hours: Option<u32>,

    /// Compliance framework for control mappings
    #[arg(long)]
    pub framework: Option<String>,

    /// Skip asking the service which providers it offers
    #[arg(long)]
    pub offline: bool,
}

impl Args {
    pub fn reconcile(&self) -> bool {
        !self.offline
    }

    /// Context changes requested on the command line.
    pub fn patch(&self) -> ContextPatch {
        let mut patch = ContextPatch::new();
        if let Some(provider) = self.provider {
            patch = patch.provider(provider);
        }
        if let Some(hours) = self.max_hours {
            patch = patch.max_hours_per_wave(hours);
        }
        if let Some(framework) = &self.framework {
            patch = patch.framework(framework.clone());
        }
        patch
    }

    pub fn stages(&self) -> Vec<StageName> {
        if self.stages.is_empty() {
            StageName::ALL.to_vec()
        } else {
            self.stages.clone()
        }
    }
}

fn parse_stage(value: &str) -> Result<StageName, String> {
    value.parse::<StageName>().map_err(|e| e.to_string())
}

fn parse_provider(value: &str) -> Result<ProviderId, String> {
    value.parse::<ProviderId>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("riskalign").chain(args.iter().copied()))
    }

    #[test]
    fn test_command_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]).unwrap();
        assert!(args.reconcile());
        assert!(!args.sample);
        assert!(args.patch().is_empty());
        assert_eq!(args.stages(), StageName::ALL.to_vec());
    }

    #[test]
    fn test_full_command_line() {
        let args = parse(&[
            "--config", "riskalign.toml", "scan.json", "--stage", "plan", "--stage", "impact",
            "--provider", "online", "--max-hours", "8", "--framework", "NIST", "--offline",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("riskalign.toml")));
        assert_eq!(args.ingest, Some(PathBuf::from("scan.json")));
        assert_eq!(args.stages(), vec![StageName::Waves, StageName::Impact]);
        assert_eq!(
            args.patch(),
            ContextPatch::new()
                .provider(ProviderId::Online)
                .max_hours_per_wave(8)
                .framework("NIST")
        );
        assert!(!args.reconcile());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse(&["--stage", "risk"]).is_err());
        assert!(parse(&["--max-hours", "lots"]).is_err());
        assert!(parse(&["--max-hours", "0"]).is_err());
        assert!(parse(&["--provider"]).is_err());
        assert!(parse(&["--provider", "gemini"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
        assert!(parse(&["--sample", "scan.json"]).is_err());
    }
}
