use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sentinel::api::logging::init_tracing;
use sentinel::api::ApiClient;
use sentinel::config::Config;
use sentinel::state::{SessionStore, TimelineEvent};
use sentinel::{SessionUpdate, Workbench, WorkbenchSettings};
use std::io::Write;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(about = "Adverse-media adjudication workbench")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List customer profiles.
    Customers,
    /// Show one customer profile with address metadata applied.
    Profile { id: String },
    /// Stream fresh adjudications for one or more subjects, in order.
    Adjudicate {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing()?;
    let config = Config::load()?;
    config.validate()?;
    let client = ApiClient::new(&config)?;

    match cli.command {
        Command::Customers => {
            let customers = client.fetch_customers().await?;
            for customer in &customers {
                let rating = customer.risk_rating.as_deref().unwrap_or("-");
                println!("{}\t{}\t{}", customer.id, customer.display_name(), rating);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Profile { id } => {
            let profile = client
                .fetch_customer(&id)
                .await
                .with_context(|| format!("failed to load profile '{id}'"))?;
            println!("{}", serde_json::to_string_pretty(&profile.view())?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Adjudicate { ids } => adjudicate(client, &config, ids).await,
    }
}

/// Each invocation starts from an empty store, so every subject is streamed.
async fn adjudicate(client: ApiClient, config: &Config, ids: Vec<String>) -> Result<ExitCode> {
    let mut workbench = Workbench::new(client, SessionStore::new(), WorkbenchSettings::from(config));
    let mut updates = workbench.subscribe();
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(update) = updates.recv().await {
            let _ = print_update(&mut stdout, &update);
        }
    });

    let results = workbench.run_batch(&ids).await;

    let views: Vec<_> = results
        .iter()
        .map(|outcome| (outcome.subject_id.clone(), workbench.projection(&outcome.subject_id)))
        .collect();
    // Closing the last sender lets the printer drain and exit.
    drop(workbench);
    let _ = printer.await;

    for (subject_id, view) in views {
        let Some(view) = view else {
            continue;
        };
        println!("\n== {subject_id} ({:?}) ==", view.verdict_status);
        println!("{}", serde_json::to_string_pretty(&view.verdict)?);
    }

    let failed = results.iter().any(|outcome| outcome.result.is_err());
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_update(out: &mut impl Write, update: &SessionUpdate) -> std::io::Result<()> {
    match update {
        SessionUpdate::StreamOpened { subject_id } => writeln!(out, "\n* {subject_id}: streaming"),
        SessionUpdate::TextAppended { delta, .. } => {
            write!(out, "{delta}")?;
            out.flush()
        }
        SessionUpdate::TextReplaced { text, .. } => writeln!(out, "\n{text}"),
        SessionUpdate::TimelineChanged {
            latest: Some(TimelineEvent::Tool { title, .. }),
            ..
        } => writeln!(out, "\n  > {title}"),
        SessionUpdate::TimelineChanged { .. } | SessionUpdate::VerdictChanged { .. } => Ok(()),
        SessionUpdate::StreamClosed { subject_id, error } => match error {
            Some(error) => writeln!(out, "\n* {subject_id}: failed: {error}"),
            None => writeln!(out, "\n* {subject_id}: done"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjudicate_takes_ids_in_order() {
        let cli = Cli::try_parse_from(["sentinel", "adjudicate", "B", "A"]).unwrap();
        match cli.command {
            Command::Adjudicate { ids } => assert_eq!(ids, vec!["B", "A"]),
            _ => panic!("expected adjudicate"),
        }
    }

    #[test]
    fn test_adjudicate_rejects_force_flag_and_empty_ids() {
        assert!(Cli::try_parse_from(["sentinel", "adjudicate", "A", "--force"]).is_err());
        assert!(Cli::try_parse_from(["sentinel", "adjudicate"]).is_err());
    }
}
