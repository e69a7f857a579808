//! Command handlers for cosup CLI

use crate::{OutputFormat, UploadArgs};
use anyhow::{anyhow, Result};
use clap::Command;
use clap_complete::{generate, Shell};
use console::style;
use cosup_core::config::{BUCKET_VAR, ENDPOINT_VAR, REGION_VAR, SECRET_ID_VAR, SECRET_KEY_VAR};
use cosup_core::{ConfigError, Error, Payload, UploadOptions, UploadResult, Uploader};
use futures::stream::{self, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};
use tracing::debug;

/// Handle upload command
pub async fn handle_upload(args: UploadArgs) -> Result<()> {
    let uploader = Uploader::global();

    // Report configuration problems once instead of once per file
    uploader.provisioner().load_config().map_err(config_failure)?;

    let multi = MultiProgress::new();
    let total = args.files.len();
    debug!(files = total, jobs = args.jobs, "starting uploads");

    let mut indexed: Vec<(usize, PathBuf, std::result::Result<UploadResult, String>)> =
        stream::iter(args.files.iter().cloned().enumerate())
            .map(|(index, path)| {
                let uploader = uploader.clone();
                let bar = args.progress.then(|| add_bar(&multi, &path));
                let args = &args;
                async move {
                    let outcome = upload_one(&uploader, &path, args, bar).await;
                    (index, path, outcome)
                }
            })
            .buffer_unordered(args.jobs as usize)
            .collect()
            .await;

    // Keep the order the files were given in
    indexed.sort_unstable_by_key(|(index, _, _)| *index);
    let outcomes: Vec<(PathBuf, std::result::Result<UploadResult, String>)> = indexed
        .into_iter()
        .map(|(_, path, outcome)| (path, outcome))
        .collect();

    let failed = outcomes.iter().filter(|(_, outcome)| outcome.is_err()).count();

    match args.output {
        OutputFormat::Table => print_table(&outcomes),
        OutputFormat::Json => print_json(&outcomes)?,
    }

    if failed > 0 {
        return Err(anyhow!("{} of {} uploads failed", failed, total));
    }

    Ok(())
}

async fn upload_one(
    uploader: &Uploader,
    path: &Path,
    args: &UploadArgs,
    bar: Option<ProgressBar>,
) -> std::result::Result<UploadResult, String> {
    if !path.is_file() {
        return Err(format!("File not found: {}", path.display()));
    }

    let payload = Payload::from_file(path)
        .await
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;

    let mut options = UploadOptions::new(payload);
    options.folder = args.folder.clone();
    options.custom_name = args.name.clone();
    options.max_size = args.max_size;
    if !args.allow_types.is_empty() {
        options = options.allowed_types(args.allow_types.iter().cloned());
    }
    if let Some(bar) = &bar {
        let bar = bar.clone();
        options = options.on_progress(move |percent| {
            bar.set_position(u64::from(percent));
            Ok(())
        });
    }

    let outcome = uploader.upload(&options).await.map_err(|err| describe(&err));

    if let Some(bar) = bar {
        match &outcome {
            Ok(_) => bar.finish_with_message(format!("{} {}", style("✔").green(), path.display())),
            Err(_) => bar.abandon_with_message(format!("{} {}", style("✘").red(), path.display())),
        }
    }

    outcome
}

fn add_bar(multi: &MultiProgress, path: &Path) -> ProgressBar {
    let bar = multi.add(ProgressBar::new(100));
    if let Ok(bar_style) = ProgressStyle::default_bar().template("{bar:30.cyan/blue} {pos:>3}% {msg}") {
        bar.set_style(bar_style);
    }
    bar.set_message(path.display().to_string());
    bar
}

/// Human readable failure, with a hint when one is known
fn describe(err: &Error) -> String {
    match err {
        Error::Config(err) => err.to_string(),
        Error::Upload(err) => match err.kind().hint() {
            Some(hint) => format!("{} ({})", err, hint),
            None => err.to_string(),
        },
    }
}

fn config_failure(err: ConfigError) -> anyhow::Error {
    anyhow!(
        "{}\n\
         Set them in the environment before running cosup, e.g.:\n  {}",
        err,
        err.missing()
            .iter()
            .map(|name| format!("export {}=...", name))
            .collect::<Vec<_>>()
            .join("\n  ")
    )
}

fn print_table(outcomes: &[(PathBuf, std::result::Result<UploadResult, String>)]) {
    #[derive(Tabled)]
    struct UploadRow {
        file: String,
        status: String,
        key: String,
        url: String,
    }

    let rows: Vec<UploadRow> = outcomes
        .iter()
        .map(|(path, outcome)| match outcome {
            Ok(result) => UploadRow {
                file: path.display().to_string(),
                status: "uploaded".to_string(),
                key: result.key.clone(),
                url: result.url.clone(),
            },
            Err(message) => UploadRow {
                file: path.display().to_string(),
                status: "failed".to_string(),
                key: String::new(),
                url: message.clone(),
            },
        })
        .collect();

    println!("{}", Table::new(rows));
}

fn print_json(outcomes: &[(PathBuf, std::result::Result<UploadResult, String>)]) -> Result<()> {
    let entries: Vec<serde_json::Value> = outcomes
        .iter()
        .map(|(path, outcome)| match outcome {
            Ok(result) => serde_json::json!({
                "file": path.display().to_string(),
                "ok": true,
                "url": result.url,
                "key": result.key,
                "location": result.location,
            }),
            Err(message) => serde_json::json!({
                "file": path.display().to_string(),
                "ok": false,
                "error": message,
            }),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

/// Handle `config show`
pub fn handle_config_show() -> Result<()> {
    let config = cosup_core::load_from_env().map_err(config_failure)?;

    #[derive(Tabled)]
    struct SettingRow {
        variable: &'static str,
        value: String,
    }

    let rows = vec![
        SettingRow {
            variable: SECRET_ID_VAR,
            value: config.secret_id.clone(),
        },
        SettingRow {
            variable: SECRET_KEY_VAR,
            value: config.masked_secret_key(),
        },
        SettingRow {
            variable: BUCKET_VAR,
            value: config.bucket.clone(),
        },
        SettingRow {
            variable: REGION_VAR,
            value: config.region.clone(),
        },
        SettingRow {
            variable: ENDPOINT_VAR,
            value: match &config.endpoint {
                Some(endpoint) => endpoint.clone(),
                None => format!("{} (default)", config.endpoint()),
            },
        },
    ];

    println!("{}", Table::new(rows));
    Ok(())
}

/// Handle `config check`
pub fn handle_config_check() -> Result<()> {
    println!("Checking storage configuration...");

    match cosup_core::load_from_env() {
        Ok(config) => {
            println!(
                "  {} Configuration complete (bucket {} in {})",
                style("✅").green(),
                config.bucket,
                config.region
            );
            Ok(())
        }
        Err(err) => {
            for name in err.missing() {
                println!("  {} {} is not set", style("❌").red(), name);
            }
            Err(config_failure(err))
        }
    }
}

/// Handle completion command
pub fn handle_completion(shell: Shell, cmd: &mut Command) -> Result<()> {
    generate(shell, cmd, "cosup", &mut std::io::stdout());
    Ok(())
}
