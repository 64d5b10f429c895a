//! slm run command - run a range of pipeline stages.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use slm_prep::{IssueSeverity, Pipeline, PipelinePlan, PipelineReport, Stage};

use crate::commands::load_config;
use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct RunSummary {
    model_dir: String,
    stages: Vec<Stage>,
    layers: Vec<StageLayers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    support_blocks: Option<usize>,
    warnings: usize,
    errors: usize,
    issues: Vec<IssueInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Vec<(String, String)>>,
    log: Vec<String>,
}

#[derive(Serialize)]
struct StageLayers {
    stage: Stage,
    layers: usize,
}

#[derive(Serialize)]
struct IssueInfo {
    layer: usize,
    code: &'static str,
    message: String,
}

pub fn run(input: Option<&Path>, model_dir: &Path, from: Stage, to: Stage, cli: &Cli) -> Result<()> {
    let mut plan = PipelinePlan::new(model_dir).starting_at(from).ending_at(to);
    if let Some(input) = input {
        plan = plan.with_input(input);
    }
    execute(&plan, cli)
}

/// Run a plan with the configured pipeline and print what it did.
pub fn execute(plan: &PipelinePlan, cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let report = Pipeline::new(config)
        .run(plan)
        .with_context(|| format!("Pipeline failed for {:?}", plan.model_dir))?;
    print_report(plan, &report, cli);
    Ok(())
}

fn print_report(plan: &PipelinePlan, report: &PipelineReport, cli: &Cli) {
    let summary = RunSummary {
        model_dir: plan.model_dir.display().to_string(),
        stages: report.stages_executed.clone(),
        layers: report
            .layer_counts
            .iter()
            .map(|&(stage, layers)| StageLayers { stage, layers })
            .collect(),
        support_blocks: report.support_blocks,
        warnings: report.batch.count(IssueSeverity::Warning),
        errors: report.batch.count(IssueSeverity::Error),
        issues: report
            .batch
            .issues
            .iter()
            .map(|i| IssueInfo {
                layer: i.layer_index(),
                code: i.code(),
                message: i.to_string(),
            })
            .collect(),
        report: report
            .parameters
            .as_ref()
            .map(|(path, _)| path.display().to_string()),
        parameters: report
            .parameters
            .as_ref()
            .map(|(_, params)| params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
        log: report.operation_log.clone(),
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&summary, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if cli.quiet {
                return;
            }
            println!("{}", "Build Preparation".bold().underline());
            println!("  {}: {}", "Model".cyan(), summary.model_dir);
            for line in &summary.log {
                println!("  {} {}", "✓".green(), line);
            }
            if let Some(blocks) = summary.support_blocks {
                println!("  {}: {}", "Support blocks".cyan(), blocks);
            }
            for l in &summary.layers {
                println!("  {}: {}", format!("{} layers", l.stage).cyan(), l.layers);
            }

            if summary.issues.is_empty() {
                println!("  {}: {}", "Issues".cyan(), "none".green());
            } else {
                println!(
                    "  {}: {} warnings, {} errors",
                    "Issues".cyan(),
                    summary.warnings.to_string().yellow(),
                    summary.errors.to_string().red()
                );
                for issue in &summary.issues {
                    println!("    [{}] {}", issue.code, issue.message);
                }
            }

            if let Some(path) = &summary.report {
                println!("  {}: {}", "Parameter report".cyan(), path);
            }
        }
    }
}
