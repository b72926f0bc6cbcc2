use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use ballot_core::{
    event_channel, load_settings, BallotEvent, BallotSession, HttpBallotApi, NoAuth,
    PresignedSignature, ScoreOutcome, StaticToken, TokenProvider,
};
use clap::{Parser, Subcommand};
use shared::domain::{CategoryId, DistributionMethod, Identity, ImpactScore, ProjectId, WalletAddress};
use storage::SqliteLocalStore;
use tokio::sync::broadcast::Receiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    /// Overrides the configured ballot API base url.
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    round: Option<u32>,
    #[arg(long)]
    address: String,
    #[arg(long)]
    category: String,
    /// Bearer token sent with every request.
    #[arg(long)]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Show,
    Export {
        #[arg(long)]
        template: bool,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Import {
        path: PathBuf,
    },
    SetBudget {
        amount: u64,
    },
    SetCategory {
        category: String,
        amount: f64,
        #[arg(long)]
        unlock: bool,
    },
    SetMethod {
        method: DistributionMethod,
    },
    Score {
        project_id: String,
        score: u16,
        /// Required to record a conflict of interest (score 0).
        #[arg(long)]
        confirm: bool,
    },
    /// Returns a skipped project to the unscored pile.
    Unskip {
        project_id: String,
    },
    Submit {
        #[arg(long)]
        signature: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings();
    if let Some(api_url) = cli.api_url {
        settings.api_url = api_url;
    }
    if let Some(round) = cli.round {
        settings.round_id = round;
    }

    let tokens: Arc<dyn TokenProvider> = match cli.token {
        Some(token) => Arc::new(StaticToken(token)),
        None => Arc::new(NoAuth),
    };
    let api = Arc::new(HttpBallotApi::new(
        settings.api_base()?.as_str(),
        settings.round_id,
        tokens,
    )?);
    let store = Arc::new(
        SqliteLocalStore::new(&settings.local_store_url)
            .await
            .with_context(|| format!("failed to open local store {}", settings.local_store_url))?,
    );
    let identity = Identity {
        address: WalletAddress::new(cli.address),
        is_badgeholder: true,
        category: Some(CategoryId::new(cli.category)),
        siwe: None,
    };
    let events = event_channel();
    let mut rx = events.subscribe();

    let mut session = BallotSession::connect(&identity, api, store, events, &settings).await?;
    info!(
        "ballot: session ready round={} address={}",
        settings.round_id, identity.address
    );

    match cli.command {
        Command::Show => print_ballot(&session),
        Command::Export { template, out } => {
            let csv = session.export_csv(template);
            match out {
                Some(path) => {
                    fs::write(&path, csv)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("wrote {}", path.display());
                }
                None => print!("{csv}"),
            }
        }
        Command::Import { path } => {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let report = session.import_csv(&text).await?;
            println!(
                "imported {} project(s), {} warning(s)",
                report.imported.len(),
                report.warnings.len()
            );
            for pending in &report.pending_conflicts {
                println!(
                    "{} marked as conflict of interest; run `score {} 0 --confirm` to record it",
                    pending.project_id, pending.project_id
                );
            }
        }
        Command::SetBudget { amount } => {
            session.set_budget(amount);
            println!("budget set to {amount}");
        }
        Command::SetCategory {
            category,
            amount,
            unlock,
        } => {
            let category = CategoryId::new(category);
            if session.categories().get(&category).is_none() {
                session.categories_mut().add(&category, amount);
            }
            session.categories_mut().set(&category, amount, unlock);
            for allocation in session.categories().snapshot() {
                println!(
                    "{:<24} {:>6.2}%{}",
                    allocation.category_slug,
                    allocation.allocation,
                    if allocation.locked { " (locked)" } else { "" }
                );
            }
        }
        Command::SetMethod { method } => match session.request_method_change(method) {
            Some(change) => {
                if change.discards_custom_allocations {
                    warn!("ballot: custom allocations are replaced by {method}");
                }
                session.confirm_method_change(change).await?;
                print_ballot(&session);
            }
            None => println!("distribution method is already {method}"),
        },
        Command::Score {
            project_id,
            score,
            confirm,
        } => {
            let project_id = ProjectId::new(project_id);
            let score = ImpactScore::try_from(score)?;
            match session.score_project(&project_id, score).await? {
                ScoreOutcome::ConfirmationRequired(pending) if confirm => {
                    session.confirm_conflict(pending).await?;
                    println!("{project_id} recorded as conflict of interest");
                }
                ScoreOutcome::ConfirmationRequired(_) => {
                    bail!("scoring {project_id} as a conflict of interest needs --confirm")
                }
                ScoreOutcome::Skipped => println!("{project_id} skipped"),
                ScoreOutcome::Scored(score) => {
                    println!("{project_id} scored {}", score.value())
                }
            }
            match session.next_project(Some(&project_id)).await? {
                Some(next) => println!("next project: {next}"),
                None => println!("no projects left to review"),
            }
        }
        Command::Unskip { project_id } => {
            let project_id = ProjectId::new(project_id);
            if session.clear_skip(&project_id).await? {
                println!("{project_id} is unscored again");
            } else {
                println!("{project_id} was not skipped");
            }
        }
        Command::Submit { signature } => {
            let submitted = session.submit(&PresignedSignature(signature)).await?;
            println!(
                "ballot submitted at {}",
                submitted
                    .submitted_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "an unknown time".into())
            );
        }
    }

    session.disconnect().await;
    report_events(&mut rx);
    Ok(())
}

fn print_ballot(session: &BallotSession) {
    let ballot = session.current_ballot();
    println!(
        "ballot {} status={:?} method={} scored={}/{}",
        ballot.address,
        ballot.status,
        session
            .distribution_method()
            .map(|method| method.to_string())
            .unwrap_or_else(|| "none".into()),
        session.scoring().voted_count(),
        session.scoring().total()
    );
    if let Some(budget) = session.budget() {
        println!("budget {budget}");
    }
    for allocation in &ballot.category_allocations {
        println!(
            "  category {:<20} {:>6.2}% amount={}",
            allocation.category_slug,
            allocation.allocation,
            session
                .category_amount(&allocation.category_slug)
                .unwrap_or_default()
        );
    }
    for row in session.reconciler().project_list() {
        println!(
            "  {:>3}. {:<40} {:>6}%",
            row.position_input, row.project.name, row.allocation_input
        );
    }
    for row in session.reconciler().conflicts() {
        println!("       {:<40} conflict of interest", row.project.name);
    }
    for issue in session.validate() {
        println!("  ! {issue}");
    }
}

fn report_events(rx: &mut Receiver<BallotEvent>) {
    while let Ok(event) = rx.try_recv() {
        match event {
            BallotEvent::PersistFailed { target, message } => {
                eprintln!("failed to save {target}: {message}")
            }
            BallotEvent::ImportWarning(message) => eprintln!("import warning: {message}"),
            BallotEvent::UnlockBallotRequested => {
                println!("every project is scored; the ballot can be unlocked")
            }
            _ => {}
        }
    }
}
