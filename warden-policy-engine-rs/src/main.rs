// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Warden Policy CLI
//!
//! Operator tooling for checking policy files and evaluating admission
//! reviews offline.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use warden_policy_engine::admission::AdmissionReview;
use warden_policy_engine::decision::synthesize;
use warden_policy_engine::policy::{CancelFlag, EvaluationEngine, Policy, PolicySet};
use warden_policy_engine::FailSafeMode;

#[derive(Debug, Parser)]
#[command(name = "warden-policy", version, about = "Check and evaluate Warden admission policies")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compile and dry-run policy files
    Check {
        /// Policy files (one policy per file, id = file stem)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Evaluate an AdmissionReview JSON file against policy files
    Evaluate {
        /// Policy file, may be repeated
        #[arg(short = 'p', long = "policy", required = true)]
        policies: Vec<PathBuf>,

        /// Resolution of evaluation errors
        #[arg(long, default_value = "deny")]
        fail_safe: FailSafeMode,

        /// AdmissionReview request body
        review: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Check { files } => run_check(&files),
        Command::Evaluate {
            policies,
            fail_safe,
            review,
        } => run_evaluate(&policies, fail_safe, &review),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn policy_id(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn load_policy(path: &Path) -> Result<Policy> {
    let yaml = fs::read_to_string(path)
        .with_context(|| format!("Failed to read policy file {}", path.display()))?;
    let policy = Policy::compile(&policy_id(path), "local", &yaml)
        .with_context(|| format!("Invalid policy {}", path.display()))?;
    policy
        .validate()
        .with_context(|| format!("Invalid policy {}", path.display()))?;
    Ok(policy)
}

fn run_check(files: &[PathBuf]) -> Result<bool> {
    let mut all_valid = true;

    for path in files {
        match load_policy(path) {
            Ok(policy) => println!(
                "OK: {} ({} rules, severity {:?}{})",
                policy.id,
                policy.rules.len(),
                policy.severity,
                if policy.enabled { "" } else { ", disabled" }
            ),
            Err(e) => {
                all_valid = false;
                eprintln!("FAIL: {:#}", e);
            }
        }
    }

    Ok(all_valid)
}

fn run_evaluate(policy_files: &[PathBuf], fail_safe: FailSafeMode, review_path: &Path) -> Result<bool> {
    let policies = policy_files
        .iter()
        .map(|path| load_policy(path))
        .collect::<Result<Vec<_>>>()?;
    let snapshot = PolicySet::new(1, policies);

    let body = fs::read_to_string(review_path)
        .with_context(|| format!("Failed to read review {}", review_path.display()))?;
    let review: AdmissionReview =
        serde_json::from_str(&body).context("Failed to parse AdmissionReview")?;
    let request = review
        .request
        .context("AdmissionReview carries no request")?;

    let verdicts = EvaluationEngine::default().evaluate(&request, &snapshot, &CancelFlag::new());
    let decision = synthesize(&verdicts, fail_safe, snapshot.generation());

    let mut answer = AdmissionReview::for_response(decision.to_response(&request.uid));
    answer.api_version = review.api_version;
    println!("{}", serde_json::to_string_pretty(&answer)?);

    Ok(decision.allowed)
}
