//! inlink — drive the InlinkAI extension protocol from a terminal.

use std::path::PathBuf;

use inlink_extension::{ExtractionOutcome, PopupView};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod session;

use session::Session;

fn resolve_data_dir() -> PathBuf {
    std::env::var("INLINK_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

fn print_help() {
    println!("inlink — InlinkAI profile extraction");
    println!();
    println!("Usage: inlink <command>");
    println!();
    println!("Commands:");
    println!("  login <email>            Send a code to <email>, then read it from stdin");
    println!("  logout                   Clear the stored session");
    println!("  status                   Show connection and last extraction");
    println!("  extract <html> <url>     Extract a saved profile page and submit it");
    println!("  sweep                    Drop extraction results older than an hour");
    println!("  config                   Write the effective config to the data directory");
    println!("  help                     Show this help message");
}

async fn read_code() -> anyhow::Result<String> {
    println!("Enter the 6-digit code:");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    if matches!(command, "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }

    let session = Session::open(&resolve_data_dir()).await?;

    match command {
        "login" => {
            let Some(email) = args.get(2) else {
                eprintln!("Usage: inlink login <email>");
                std::process::exit(1);
            };
            let popup = session.popup().await?;
            if !popup.submit_email(email).await {
                let message = popup.status().map(|s| s.message).unwrap_or_default();
                anyhow::bail!(message);
            }

            let code = read_code().await?;
            popup.paste_code(&code).await;
            match popup.view() {
                PopupView::Connected { email } => {
                    println!("Connected as {}", email.unwrap_or_default());
                }
                _ => {
                    let message = popup
                        .status()
                        .map(|s| s.message)
                        .unwrap_or_else(|| "Please enter the complete 6-digit code".into());
                    anyhow::bail!(message);
                }
            }
            popup.close();
        }
        "logout" => {
            let popup = session.popup().await?;
            popup.disconnect().await?;
            println!("Disconnected");
        }
        "status" => {
            let report = session.status().await?;
            match (report.authenticated, &report.email) {
                (true, Some(email)) => println!("Connected as {}", email),
                (true, None) => println!("Connected"),
                (false, _) => println!("Not connected"),
            }
            let record = &report.extraction;
            println!("Extraction: {}", record.status);
            if let Some(data) = &record.data {
                println!("{}", serde_json::to_string_pretty(data)?);
            }
            if let Some(failure) = &record.error {
                println!("Last error: {}", failure.error);
            }
        }
        "extract" => {
            let (Some(file), Some(url)) = (args.get(2), args.get(3)) else {
                eprintln!("Usage: inlink extract <html-file> <url>");
                std::process::exit(1);
            };
            let html = std::fs::read_to_string(file)?;
            match session.extract(&html, url).await? {
                ExtractionOutcome::Saved(data) => {
                    println!("{}", serde_json::to_string_pretty(&data)?);
                }
                ExtractionOutcome::Empty => anyhow::bail!("No profile data found"),
                ExtractionOutcome::Failed(failure) => anyhow::bail!(failure.error),
                ExtractionOutcome::AlreadyRunning => anyhow::bail!("Extraction already running"),
            }
        }
        "sweep" => {
            if session.background.sweep().await? {
                println!("Cleared stale extraction data");
            } else {
                println!("Nothing to clear");
            }
        }
        "config" => {
            session.config.save()?;
            println!("{}", serde_json::to_string_pretty(&session.config)?);
        }
        other => {
            eprintln!("Unknown command: {}. Use 'inlink help' for usage.", other);
            std::process::exit(1);
        }
    }

    Ok(())
}
