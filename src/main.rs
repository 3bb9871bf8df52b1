use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;

use phasegate::config::Config;
use phasegate::{plog, Orchestrator, ProjectId, Result, TransitionOutcome};

/// Phasegate - gated software lifecycle orchestrator
#[derive(Parser, Debug)]
#[command(name = "phasegate")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    PHASEGATE_DEBUG=1        Enable debug logging (alternative to --debug)\n    PHASEGATE_WORKSPACE=dir  Workspace root (overridden by --workspace)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.phasegate/phasegate.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Workspace root holding one directory per project
    #[arg(short = 'w', long, global = true)]
    pub workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a project in the planning phase
    Init {
        /// Project id (lowercase letters, digits, '-' and '_')
        project: String,

        /// Display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,

        /// Free-text requirements planning starts from
        #[arg(long, short = 'm')]
        description: String,
    },

    /// Run the current phase and move on if its gate passes
    Advance {
        #[arg(long)]
        project: String,
    },

    /// Approve the QA report of a project awaiting approval
    ApproveQa {
        #[arg(long)]
        project: String,
    },

    /// Reject the QA report and send the project back to coding
    RejectQa {
        #[arg(long)]
        project: String,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Show project status (all projects if none given)
    Status {
        #[arg(long)]
        project: Option<String>,
    },

    /// List registered workers and their capabilities
    Workers,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    phasegate::log::init(cli.debug);

    let config = Config::load()?;
    let orchestrator = match &cli.workspace {
        Some(root) => Orchestrator::at(root.clone(), config),
        None => Orchestrator::new(config)?,
    };
    plog!(
        "phasegate starting: workspace={}",
        orchestrator.workspace().root().display()
    );

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Init {
            project,
            name,
            description,
        } => {
            let id: ProjectId = project.parse()?;
            let name = name.unwrap_or_else(|| id.to_string());
            let manifest = rt.block_on(orchestrator.create_project(&id, &name, &description))?;
            println!("Created {} in {}", manifest.project_id, manifest.current_phase);
        }
        Command::Advance { project } => {
            let id: ProjectId = project.parse()?;
            let outcome = rt.block_on(orchestrator.advance(&id))?;
            let output = match &outcome {
                TransitionOutcome::Advanced { from, to, artifact } => json!({
                    "outcome": "advanced",
                    "from": from,
                    "to": to,
                    "artifact": artifact,
                }),
                TransitionOutcome::Blocked(reason) => json!({
                    "outcome": "blocked",
                    "reason": reason,
                }),
                TransitionOutcome::Failed(error) => json!({
                    "outcome": "failed",
                    "error": error.to_string(),
                }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            if !outcome.is_advanced() {
                std::process::exit(2);
            }
        }
        Command::ApproveQa { project } => {
            let id: ProjectId = project.parse()?;
            if rt.block_on(orchestrator.approve_qa(&id))? {
                println!("QA approved for {}", id);
            } else {
                println!("QA was already approved for {}", id);
            }
        }
        Command::RejectQa { project, reason } => {
            let id: ProjectId = project.parse()?;
            rt.block_on(orchestrator.reject_qa(&id, reason.as_deref()))?;
            println!("QA rejected for {}; back to coding", id);
        }
        Command::Status { project } => {
            let ids = match project {
                Some(project) => vec![project.parse::<ProjectId>()?],
                None => orchestrator.list_projects()?,
            };
            let statuses = ids
                .iter()
                .map(|id| orchestrator.status(id))
                .collect::<Result<Vec<_>>>()?;
            println!("{}", serde_json::to_string_pretty(&statuses)?);
        }
        Command::Workers => {
            println!(
                "{}",
                serde_json::to_string_pretty(&orchestrator.capability_matrix())?
            );
        }
    }
    Ok(())
}
