//! Toon format report for bootstrap results
//!
//! Every best-effort step produces a `StepOutcome`. The report collects
//! them so a swallowed failure is still visible in the log, on stdout and
//! in the report file left on the volume.

use crate::bootstrap::seed::SeedStatus;
use crate::bootstrap::skeleton::SkeletonResult;
use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::Path;

/// Bootstrap step a best-effort outcome belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Credentials,
    Patch,
    Extensions,
    Models,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Credentials => "credentials",
            Step::Patch => "patch",
            Step::Extensions => "extensions",
            Step::Models => "models",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Ok(String),
    Skipped(String),
    Failed(String),
}

impl StepStatus {
    fn label(&self) -> &'static str {
        match self {
            StepStatus::Ok(_) => "ok",
            StepStatus::Skipped(_) => "skipped",
            StepStatus::Failed(_) => "failed",
        }
    }

    fn message(&self) -> &str {
        match self {
            StepStatus::Ok(m) | StepStatus::Skipped(m) | StepStatus::Failed(m) => m,
        }
    }
}

/// Result of one item inside a best-effort step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: Step,
    /// Item the outcome is about (secret, extension, model, file)
    pub item: String,
    pub status: StepStatus,
}

impl StepOutcome {
    pub fn ok(step: Step, item: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(step, item, StepStatus::Ok(message.into()))
    }

    pub fn skipped(step: Step, item: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(step, item, StepStatus::Skipped(reason.into()))
    }

    pub fn failed(step: Step, item: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(step, item, StepStatus::Failed(error.into()))
    }

    fn new(step: Step, item: impl Into<String>, status: StepStatus) -> Self {
        let outcome = Self {
            step,
            item: item.into(),
            status,
        };
        outcome.log();
        outcome
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, StepStatus::Failed(_))
    }

    fn log(&self) {
        match &self.status {
            StepStatus::Ok(m) => tracing::info!(step = %self.step, item = %self.item, "{m}"),
            StepStatus::Skipped(m) => {
                tracing::info!(step = %self.step, item = %self.item, "skipped: {m}");
            }
            StepStatus::Failed(m) => {
                tracing::warn!(step = %self.step, item = %self.item, "failed: {m}");
            }
        }
    }
}

/// Bootstrap report encompassing all steps before launch
#[derive(Debug)]
pub struct BootstrapReport {
    pub timestamp: String,
    pub seed: SeedStatus,
    pub skeleton: SkeletonResult,
    pub outcomes: Vec<StepOutcome>,
}

impl BootstrapReport {
    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    pub fn outcomes_for(&self, step: Step) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes.iter().filter(move |o| o.step == step)
    }
}

/// Write Toon format report, creating the parent directory if needed
pub fn generate_toon_report(report: &BootstrapReport, output_path: &Path) -> Result<()> {
    let toon_content = serialize_to_toon(report);

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {}", parent.display()))?;
    }

    fs::write(output_path, toon_content)
        .with_context(|| format!("Failed to write Toon report to {}", output_path.display()))?;

    Ok(())
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Serialize bootstrap report to Toon format
fn serialize_to_toon(report: &BootstrapReport) -> String {
    use std::fmt::Write;

    let mut toon = String::new();
    let failures = report.failures().count();

    toon.push_str("# webui-boot bootstrap report\n\n");
    toon.push_str("[meta]\n");
    let _ = writeln!(toon, "timestamp = \"{}\"", report.timestamp);
    toon.push_str("format = \"toon\"\n\n");

    toon.push_str("[summary]\n");
    match report.seed {
        SeedStatus::AlreadySeeded => toon.push_str("seeded_this_run = false\n"),
        SeedStatus::Copied { files } => {
            toon.push_str("seeded_this_run = true\n");
            let _ = writeln!(toon, "seed_files_copied = {files}");
        }
    }
    let _ = writeln!(toon, "directories_created = {}", report.skeleton.created.len());
    let _ = writeln!(
        toon,
        "directories_existed = {}",
        report.skeleton.already_existed.len()
    );
    let _ = writeln!(toon, "directory_errors = {}", report.skeleton.errors.len());
    let _ = writeln!(toon, "steps_failed = {failures}\n");

    if !report.outcomes.is_empty() {
        toon.push_str("[[steps]]\n");
        for outcome in &report.outcomes {
            let _ = writeln!(toon, "step = \"{}\"", outcome.step);
            let _ = writeln!(toon, "item = \"{}\"", escape(&outcome.item));
            let _ = writeln!(toon, "status = \"{}\"", outcome.status.label());
            let _ = writeln!(toon, "message = \"{}\"\n", escape(outcome.status.message()));
        }
    }

    if !report.skeleton.errors.is_empty() {
        toon.push_str("[[directory_errors]]\n");
        for (path, error) in &report.skeleton.errors {
            let _ = writeln!(toon, "path = \"{}\"", escape(&path.display().to_string()));
            let _ = writeln!(toon, "error = \"{}\"\n", escape(error));
        }
    }

    toon
}

/// Print report to stdout in human-readable format
pub fn print_report(report: &BootstrapReport) {
    println!("🖼️  webui-boot bootstrap report");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Generated: {}", report.timestamp);
    println!();

    match report.seed {
        SeedStatus::AlreadySeeded => println!("📦 Volume already seeded"),
        SeedStatus::Copied { files } => println!("📦 Seeded volume ({files} files copied)"),
    }

    if !report.skeleton.created.is_empty() || !report.skeleton.errors.is_empty() {
        println!();
        println!("📁 Directories:");
        for dir in &report.skeleton.created {
            println!("  ✨ Created: {}", dir.display());
        }
        for (path, error) in &report.skeleton.errors {
            println!("  ❌ {}: {}", path.display(), error);
        }
    }

    if !report.outcomes.is_empty() {
        println!();
        println!("🔧 Steps:");
        for outcome in &report.outcomes {
            let icon = match outcome.status {
                StepStatus::Ok(_) => "✅",
                StepStatus::Skipped(_) => "⏭️ ",
                StepStatus::Failed(_) => "❌",
            };
            println!(
                "  {} [{}] {}: {}",
                icon,
                outcome.step,
                outcome.item,
                outcome.status.message()
            );
        }
    }

    let failures = report.failures().count();
    println!();
    if failures == 0 {
        println!("✅ Volume ready");
    } else {
        println!("⚠️  Volume ready with {failures} degraded step(s)");
    }
}
