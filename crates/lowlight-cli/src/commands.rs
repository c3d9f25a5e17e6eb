//! Subcommand implementations. The client context is built and the session
//! restored once, then the command runs and background tasks are stopped.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing::warn;

use lowlight_core::{Config, EnhancementRecord, ImageUpload, Lowlight, SessionStatus, SweepReport};

use crate::prompt;
use crate::Command;

pub async fn run(command: Command, mut config: Config) -> Result<()> {
    let mut client = Lowlight::from_config(&config)?;
    let mut reports = None;
    if matches!(command, Command::Watch) {
        let (tx, rx) = mpsc::channel(16);
        client = client.with_sweep_reports(tx);
        reports = Some(rx);
    }
    let status = client.start().await;

    let result = match command {
        Command::Login { email, password } => {
            let email = prompt::or_line(email, "Email", config.last_email.as_deref())?;
            let password = prompt::or_password(password)?;
            let user = client.login(&email, &password).await?;
            remember_email(&mut config, &email);
            println!("Logged in as {} <{}>", user.display_name(), user.email);
            Ok(())
        }
        Command::Register { email, name, password } => {
            let email = prompt::or_line(email, "Email", None)?;
            let name = prompt::or_line(name, "Name", None)?;
            let password = prompt::or_password(password)?;
            let user = client.register(&email, &password, &name).await?;
            remember_email(&mut config, &email);
            println!("Welcome, {}! You are logged in.", user.display_name());
            Ok(())
        }
        Command::Logout => {
            client.logout().await;
            println!("Logged out");
            Ok(())
        }
        Command::Whoami => {
            let state = client.session().snapshot().await;
            match (status, state.user) {
                (SessionStatus::Authenticated, Some(user)) => {
                    println!("{} <{}> (id {})", user.display_name(), user.email, user.id)
                }
                (_, Some(user)) => println!(
                    "Not logged in (last seen as {} <{}>)",
                    user.display_name(),
                    user.email
                ),
                _ => println!("Not logged in"),
            }
            Ok(())
        }
        Command::Enhance { path, output } => enhance(&client, &path, output.as_deref()).await,
        Command::List => {
            list(&client).await;
            Ok(())
        }
        Command::Remove { id } => {
            if client.remove(&id).await? {
                println!("Removed {}", id);
            } else {
                println!("No result with id {}", id);
            }
            Ok(())
        }
        Command::Download { id, output } => download(&client, &id, &output).await,
        Command::Models => {
            for model in client.models().await? {
                match model.description {
                    Some(description) => println!("{:<12} {} - {}", model.id, model.name, description),
                    None => println!("{:<12} {}", model.id, model.name),
                }
            }
            Ok(())
        }
        Command::Watch => watch(&client, status, reports).await,
    };

    client.shutdown().await;
    result
}

fn remember_email(config: &mut Config, email: &str) {
    config.last_email = Some(email.trim().to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

async fn enhance(client: &Lowlight, path: &Path, output: Option<&Path>) -> Result<()> {
    let upload = ImageUpload::from_path(path)?;
    println!("Enhancing {} ({})...", upload.file_name, format_size(upload.size_bytes()));

    let record = client.enhance(&upload).await?;
    println!(
        "Done: {} (available for {})",
        record.id,
        client.time_remaining(record.uploaded_at)
    );

    if let Some(output) = output {
        download(client, &record.id, output).await?;
    }
    Ok(())
}

async fn download(client: &Lowlight, id: &str, output: &Path) -> Result<()> {
    match client.download(id).await? {
        Some(bytes) => {
            std::fs::write(output, &bytes)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Saved {} to {}", format_size(bytes.len() as u64), output.display());
            Ok(())
        }
        None => bail!("Result {} is no longer available", id),
    }
}

async fn list(client: &Lowlight) {
    let records = client.records().await;
    if records.is_empty() {
        println!("No results");
        return;
    }

    println!("{:<38} {:<28} {:>9} {:>9}", "ID", "FILE", "SIZE", "EXPIRES");
    for record in &records {
        print_record(client, record);
    }
}

fn print_record(client: &Lowlight, record: &EnhancementRecord) {
    println!(
        "{:<38} {:<28} {:>9} {:>9}",
        record.id,
        truncate(&record.original_name, 28),
        format_size(record.size_bytes),
        client.time_remaining(record.uploaded_at)
    );
}

async fn watch(
    client: &Lowlight,
    status: SessionStatus,
    reports: Option<mpsc::Receiver<SweepReport>>,
) -> Result<()> {
    if status != SessionStatus::Authenticated {
        bail!("Not logged in");
    }
    let Some(mut rx) = reports else {
        bail!("Sweep reports are not enabled");
    };
    println!(
        "Watching {} result(s); press Ctrl-C to stop",
        client.records().await.len()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            report = rx.recv() => match report {
                Some(report) => {
                    for record in &report.removed {
                        println!("Expired: {} ({})", record.id, record.original_name);
                    }
                    println!("{} result(s) remaining", report.remaining);
                }
                None => break,
            },
        }
    }
    Ok(())
}

/// Format a byte count for display
fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Truncate a string to a maximum length, adding ellipsis if needed
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}
