//! Review Coordinator - command line client
//!
//! Runs generation jobs and reviews deletion requests against the live
//! services configured in `review-coordinator.yaml` / the environment.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use review_coordinator::{
    channel::WsChannel,
    events::{EventBus, EventKind},
    job::{format_elapsed, AsyncJobController, JobRequest, JobState},
    overlay::OverlayReconciler,
    requests::{EntityType, HttpReviewBackend, NewDeletionRequest, ReviewBackend},
    tree::Project,
    Config,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "review-coordinator")]
#[command(about = "Generation jobs and deletion-request review")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a project and print it as JSON
    Generate {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        target: String,
    },

    /// Inspect or submit deletion requests
    Requests {
        #[command(subcommand)]
        command: RequestCommands,
    },

    /// Approve or reject a deletion request against a project file
    Review {
        /// JSON file holding one project or an array of projects
        #[arg(long)]
        project_file: PathBuf,

        /// Subject domain to list requests for (repeatable). Needed when
        /// the projects carry no subject_domain of their own
        #[arg(long = "subject-domain")]
        subject_domains: Vec<String>,

        #[command(subcommand)]
        command: ReviewCommands,
    },
}

#[derive(Subcommand)]
enum RequestCommands {
    /// List deletion requests for a subject domain
    List {
        #[arg(long)]
        subject_domain: String,
    },
    /// Ask for an entity to be deleted
    Submit {
        #[arg(long)]
        entity_type: EntityType,
        #[arg(long)]
        project_id: String,
        #[arg(long)]
        stage_id: Option<String>,
        #[arg(long)]
        task_id: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
enum ReviewCommands {
    Approve {
        request_id: String,
        #[arg(long)]
        entity_type: EntityType,
    },
    Reject {
        request_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,review_coordinator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_yaml_and_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Generate {
            subject,
            message,
            target,
        } => run_generate(config, JobRequest::new(subject, message, target)).await,
        Commands::Requests { command } => run_requests(config, command).await,
        Commands::Review {
            project_file,
            subject_domains,
            command,
        } => run_review(config, &project_file, subject_domains, command).await,
    }
}

async fn run_generate(config: Config, request: JobRequest) -> Result<()> {
    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.kind {
                EventKind::JobTick { elapsed_secs, .. } if elapsed_secs % 5 == 0 => {
                    tracing::info!("Generating... {}", format_elapsed(elapsed_secs));
                }
                EventKind::JobWarning { remaining_secs, .. } => {
                    tracing::warn!("Still working, will time out in {} seconds", remaining_secs);
                }
                EventKind::JobRetryScheduled {
                    attempt,
                    max_auto_retries,
                    delay_secs,
                    ..
                } => {
                    tracing::warn!(
                        "Connection lost, retrying in {}s ({}/{})",
                        delay_secs,
                        attempt,
                        max_auto_retries
                    );
                }
                _ => {}
            }
        }
    });

    let mut controller =
        AsyncJobController::new(config.job, Arc::new(WsChannel::new())).with_emitter(bus.clone());
    let job_id = controller.start(request)?;
    tracing::info!(%job_id, "Job submitted");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let outcome = loop {
        match controller.run_until_settled().await {
            JobState::TimedOut => {
                eprint!("Generation timed out. Type 'retry' or 'cancel': ");
                let answer = stdin.next_line().await?.unwrap_or_default();
                if answer.trim().eq_ignore_ascii_case("retry") {
                    controller.retry()?;
                    continue;
                }
                controller.cancel();
                break Err(anyhow::anyhow!("job timed out"));
            }
            JobState::Succeeded => {
                let result = controller
                    .result()
                    .context("succeeded job has no result")?;
                break Ok(serde_json::to_string_pretty(&result.value)?);
            }
            state => {
                let reason = controller
                    .last_error()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| state.to_string());
                break Err(anyhow::anyhow!("job ended {}: {}", state, reason));
            }
        }
    };

    drop(controller);
    drop(bus);
    progress.abort();

    println!("{}", outcome?);
    Ok(())
}

async fn run_requests(config: Config, command: RequestCommands) -> Result<()> {
    let backend = HttpReviewBackend::new(&config.review)?;
    match command {
        RequestCommands::List { subject_domain } => {
            let requests = backend.list_deletion_requests(&subject_domain).await?;
            tracing::info!("{} deletion requests for {}", requests.len(), subject_domain);
            println!("{}", serde_json::to_string_pretty(&requests)?);
        }
        RequestCommands::Submit {
            entity_type,
            project_id,
            stage_id,
            task_id,
            reason,
        } => {
            let request = NewDeletionRequest {
                entity_type,
                project_id,
                stage_id,
                task_id,
                reason,
            };
            let message = backend.submit_deletion_request(&request).await?.into_result()?;
            println!("{}", message.unwrap_or_else(|| "Deletion request submitted".into()));
        }
    }
    Ok(())
}

async fn run_review(
    config: Config,
    project_file: &Path,
    subject_domains: Vec<String>,
    command: ReviewCommands,
) -> Result<()> {
    let projects = load_projects(project_file)?;
    if subject_domains.is_empty() && projects.iter().all(|p| p.subject_domain.is_none()) {
        bail!(
            "{} has no subject_domain; pass --subject-domain",
            project_file.display()
        );
    }
    let backend = Arc::new(HttpReviewBackend::new(&config.review)?);

    let mut reconciler = OverlayReconciler::new(backend).with_subject_domains(subject_domains);
    reconciler.load_projects(projects);
    reconciler
        .refresh()
        .await
        .context("failed to fetch deletion requests")?;

    let resolution = match command {
        ReviewCommands::Approve {
            request_id,
            entity_type,
        } => reconciler.approve(&request_id, entity_type).await,
        ReviewCommands::Reject { request_id } => reconciler.reject(&request_id).await,
    };
    match resolution {
        Ok(resolution) => tracing::info!(
            request_id = %resolution.request_id,
            entity_type = %resolution.entity_type,
            "Resolved {}",
            resolution.entity_id
        ),
        // The request was already settled elsewhere; show the fresh state.
        Err(e) if e.is_notice() => tracing::warn!("{}", e),
        Err(e) => return Err(e.into()),
    }

    reconciler.settle_resync().await;
    println!("{}", serde_json::to_string_pretty(&reconciler.queue())?);
    Ok(())
}

fn load_projects(path: &Path) -> Result<Vec<Project>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    let projects = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        serde_json::Value::Object(_) => vec![serde_json::from_value(value)?],
        _ => bail!("{} must hold a project or an array of projects", path.display()),
    };
    Ok(projects)
}
