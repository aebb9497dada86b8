use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use serde_json::json;

use crate::cli::{EngineArgs, MergeArgs};
use crate::common::{paths, progress};
use crate::config::MergeConfig;
use crate::engine::{self, EngineSearch, EngineStatus};
use crate::merge::request::{MUSIC_EXTENSIONS, VIDEO_EXTENSIONS, has_supported_extension};
use crate::merge::{
    JobEvent, JobOptions, MergeJobHandle, MergeRequest, Outcome, submit, suggest_output_path,
};
use crate::ui::prelude::*;

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CANCELLED: i32 = 130;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub async fn handle_merge(args: MergeArgs, config: &MergeConfig) -> Result<i32> {
    let engine = engine::engine_status(&EngineSearch::with_configured(config.engine_path.clone()));

    warn_on_unusual_extension(&args.video, VIDEO_EXTENSIONS, "video");
    warn_on_unusual_extension(&args.music, MUSIC_EXTENSIONS, "music");

    let output = args
        .out_file
        .clone()
        .unwrap_or_else(|| suggest_output_path(&args.video));

    let request = MergeRequest::new(&args.video, &args.music, output)
        .with_ducking(args.duck_with_default(config.keep_original_audio))
        .with_music_level(args.music_level.unwrap_or(config.music_level))
        .with_original_level(args.original_level.unwrap_or(config.original_level));

    let request = match request.validate(engine) {
        Ok(request) => request,
        Err(err) => {
            emit(
                Level::Error,
                "merge.invalid",
                &err.to_string(),
                Some(json!({ "kind": err.kind() })),
            );
            if !engine.is_available() {
                emit(Level::Info, "engine.install_hint", engine::install_hint(), None);
            }
            return Ok(EXIT_FAILURE);
        }
    };

    if request.output_path().exists() && !args.force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            request.output_path().display()
        );
    }

    emit(
        Level::Debug,
        "merge.engine",
        &format!("Using {}: {}", engine.label(), engine.diagnostic()),
        None,
    );

    let options = JobOptions {
        profile: config.encode_profile(),
        verbose: args.verbose,
    };
    let handle = submit(request, engine, options)?;

    drive(handle, args.timeout.map(Duration::from_secs)).await
}

/// Keep the front end responsive while the worker runs: render progress,
/// forward Ctrl-C and the optional timeout as cancellation.
async fn drive(mut handle: MergeJobHandle, timeout: Option<Duration>) -> Result<i32> {
    let bar = matches!(get_output_format(), OutputFormat::Text).then(|| {
        progress::create_merge_bar(format!(
            "merging into {}",
            handle.request().output_path().display()
        ))
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let deadline = tokio::time::sleep(timeout.unwrap_or_default());
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !cancel_requested => {
                cancel_requested = true;
                handle.cancel();
                warn_over_bar(bar.as_ref(), "merge.cancelling", "Cancelling merge…");
            }
            _ = &mut deadline, if timeout.is_some() && !cancel_requested => {
                cancel_requested = true;
                handle.cancel();
                warn_over_bar(bar.as_ref(), "merge.timeout", "Merge timed out, cancelling…");
            }
            _ = ticker.tick() => {
                for event in handle.poll() {
                    match (&bar, event) {
                        (None, JobEvent::Progress(percent)) => emit(
                            Level::Info,
                            "merge.progress",
                            &format!("{percent}%"),
                            Some(json!({ "percent": percent })),
                        ),
                        (bar, JobEvent::Warning(message)) => {
                            warn_over_bar(bar.as_ref(), "merge.warning", &message)
                        }
                        _ => {}
                    }
                }
                if let Some(bar) = &bar {
                    bar.set_position(u64::from(handle.progress()));
                }
            }
        }

        if handle.is_finished() {
            break;
        }
    }

    Ok(render_outcome(bar, handle.wait()))
}

/// The bar is hidden while the warning prints so the two do not interleave.
fn warn_over_bar(bar: Option<&ProgressBar>, code: &str, message: &str) {
    let print = || emit(Level::Warn, code, message, None);
    match bar {
        Some(bar) => bar.suspend(print),
        None => print(),
    }
}

fn render_outcome(bar: Option<ProgressBar>, outcome: &Outcome) -> i32 {
    match outcome {
        Outcome::Succeeded(path) => {
            let message = format!("Merged video saved to {}", path.display());
            match bar {
                Some(bar) => progress::finish_with_success(bar, message),
                None => emit(
                    Level::Success,
                    "merge.succeeded",
                    &message,
                    Some(json!({ "output": path })),
                ),
            }
            0
        }
        Outcome::Failed { kind, detail } => {
            if let Some(bar) = bar {
                bar.abandon();
            }
            emit(
                Level::Error,
                "merge.failed",
                &format!("Merge failed ({}): {}", kind.as_str(), detail),
                Some(json!({ "kind": kind, "detail": detail })),
            );
            EXIT_FAILURE
        }
        Outcome::Cancelled | Outcome::Pending => {
            if let Some(bar) = bar {
                bar.abandon();
            }
            emit(Level::Warn, "merge.cancelled", "Merge cancelled", None);
            EXIT_CANCELLED
        }
    }
}

fn warn_on_unusual_extension(path: &std::path::Path, supported: &[&str], label: &str) {
    if !has_supported_extension(path, supported) {
        emit(
            Level::Warn,
            "merge.unusual_extension",
            &format!(
                "{} is not a typical {label} file ({}); ffmpeg will decide whether it can be read",
                path.display(),
                supported.join(", ")
            ),
            None,
        );
    }
}

pub fn handle_engine(args: EngineArgs, config: &MergeConfig) -> Result<i32> {
    let search = EngineSearch::with_configured(config.engine_path.clone());
    let status = if args.refresh {
        engine::locate(&search)
    } else {
        engine::engine_status(&search).clone()
    };

    let data = serde_json::to_value(&status).context("serializing engine status")?;
    emit(
        Level::Info,
        "engine.status",
        &format!("Engine: {}: {}", status.label(), status.diagnostic()),
        Some(data),
    );

    match &status {
        EngineStatus::System { .. } => Ok(0),
        EngineStatus::Bundled { .. } => {
            emit(
                Level::Warn,
                "engine.speed_tip",
                &format!("Speed tip: {}", engine::install_hint()),
                None,
            );
            Ok(0)
        }
        EngineStatus::Unavailable { .. } => {
            emit(Level::Warn, "engine.install_hint", engine::install_hint(), None);
            Ok(EXIT_FAILURE)
        }
    }
}

pub fn handle_config(config: &MergeConfig) -> Result<i32> {
    let path = paths::config_file()?;
    emit(
        Level::Info,
        "config.path",
        &format!("Config file: {}", path.display()),
        Some(json!({ "path": path })),
    );
    separator();
    let contents = toml::to_string_pretty(config).context("serializing config")?;
    emit(
        Level::Info,
        "config.values",
        contents.trim_end(),
        Some(serde_json::to_value(config).context("serializing config")?),
    );
    Ok(0)
}
