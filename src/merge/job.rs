use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tempfile::{Builder, NamedTempFile};

use super::compose::{AudioMix, EncodeProfile, audio_mix_args, mux_args};
use super::error::{MergeError, Outcome};
use super::request::{ValidatedRequest, output_parent};
use crate::engine::runner::{EngineRunner, RunWatch};
use crate::ui::prelude::*;

// Progress checkpoints. Engine progress is spread over the ranges between them.
const PROBED: u8 = 5;
const AUDIO_STARTED: u8 = 10;
const ENCODE_STARTED: u8 = 50;
const ENCODE_FINISHED: u8 = 99;
const COMPLETE: u8 = 100;

/// Cooperative cancellation flag shared between the owner and the worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Knobs that are not part of the request itself.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub profile: EncodeProfile,
    /// Echo raw engine output to stderr.
    pub verbose: bool,
}

/// Forwards strictly increasing percentages and checks for cancellation on
/// every report.
struct Progress<'a> {
    last: u8,
    cancel: &'a CancelToken,
    sink: &'a mut dyn FnMut(u8),
}

impl<'a> Progress<'a> {
    fn new(cancel: &'a CancelToken, sink: &'a mut dyn FnMut(u8)) -> Self {
        Self {
            last: 0,
            cancel,
            sink,
        }
    }

    fn checkpoint(&self) -> Result<(), MergeError> {
        if self.cancel.is_cancelled() {
            return Err(MergeError::Cancelled);
        }
        Ok(())
    }

    fn report(&mut self, percent: u8) -> Result<(), MergeError> {
        self.checkpoint()?;
        self.forward(percent);
        Ok(())
    }

    fn report_within(&mut self, start: u8, end: u8, fraction: f64) -> Result<(), MergeError> {
        let span = f64::from(end - start) * fraction.clamp(0.0, 1.0);
        self.report(start + span.floor() as u8)
    }

    /// The encode is done; cancellation can no longer change the result.
    fn complete(&mut self) {
        self.forward(COMPLETE);
    }

    fn forward(&mut self, percent: u8) {
        let percent = percent.min(COMPLETE);
        if percent > self.last {
            self.last = percent;
            (self.sink)(percent);
        }
    }
}

/// Run one merge to completion on the calling thread.
///
/// Every failure is folded into the returned [`Outcome`]; partial output is
/// never left at the destination. Non-fatal problems go to `on_warning` so
/// the owner decides how to show them.
pub fn execute(
    request: &ValidatedRequest,
    runner: &dyn EngineRunner,
    options: &JobOptions,
    on_progress: &mut dyn FnMut(u8),
    on_warning: &mut dyn FnMut(String),
    cancel: &CancelToken,
) -> Outcome {
    let mut progress = Progress::new(cancel, on_progress);
    let result = merge(request, runner, options, &mut progress, on_warning);

    match &result {
        Ok(path) => emit(
            Level::Debug,
            "merge.finished",
            &format!("Merged video written to {}", path.display()),
            None,
        ),
        Err(err) => emit(
            Level::Debug,
            "merge.stopped",
            &format!("Merge stopped ({}): {}", err.kind().as_str(), err),
            None,
        ),
    }

    Outcome::from(result)
}

fn merge(
    request: &ValidatedRequest,
    runner: &dyn EngineRunner,
    options: &JobOptions,
    progress: &mut Progress<'_>,
    on_warning: &mut dyn FnMut(String),
) -> Result<PathBuf, MergeError> {
    progress.checkpoint()?;

    let info = runner.probe(request.video_path())?;
    if !info.has_video {
        return Err(MergeError::InvalidInput(format!(
            "{} has no video stream",
            request.video_path().display()
        )));
    }
    progress.report(PROBED)?;
    let duration = info.target_duration();

    let keep_original = request.duck_original_audio() && info.has_audio;
    if request.duck_original_audio() && !info.has_audio {
        on_warning(format!(
            "{} has no audio track; using the music only",
            request.video_path().display()
        ));
    }

    let mix = AudioMix {
        duration,
        music_level: request.music_level(),
        original_level: keep_original.then(|| request.original_level()),
    };

    let workdir = Builder::new()
        .prefix("musicmerge-")
        .tempdir()
        .map_err(|err| MergeError::io("Failed to create a temporary directory", err))?;
    let audio_bed = workdir.path().join("audio.wav");

    progress.report(AUDIO_STARTED)?;
    let args = audio_mix_args(request.music_path(), request.video_path(), &mix, &audio_bed);
    run_stage(runner, &args, duration, (AUDIO_STARTED, ENCODE_STARTED), options, progress)?;

    progress.report(ENCODE_STARTED)?;
    let output = request.output_path();
    let partial = partial_output(output)?;
    let args = mux_args(
        request.video_path(),
        &audio_bed,
        duration,
        &options.profile,
        partial.path(),
    );
    run_stage(runner, &args, duration, (ENCODE_STARTED, ENCODE_FINISHED), options, progress)?;

    partial.persist(output).map_err(|err| {
        MergeError::io(format!("Failed to write {}", output.display()), err.error)
    })?;
    progress.complete();

    Ok(output.to_path_buf())
}

fn run_stage(
    runner: &dyn EngineRunner,
    args: &[String],
    duration: f64,
    (start, end): (u8, u8),
    options: &JobOptions,
    progress: &mut Progress<'_>,
) -> Result<(), MergeError> {
    let cancel = progress.cancel;
    let mut on_progress = |fraction: f64| progress.report_within(start, end, fraction);
    runner.run(
        args,
        RunWatch {
            total_duration: Some(duration),
            cancel,
            on_progress: &mut on_progress,
            verbose: options.verbose,
        },
    )
}

/// Temporary file next to the destination; it disappears unless persisted.
fn partial_output(output: &Path) -> Result<NamedTempFile, MergeError> {
    let mut builder = Builder::new();
    builder.prefix(".musicmerge-").suffix(".mp4");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o644));
    }

    let parent = output_parent(output);
    builder.tempfile_in(parent).map_err(|err| {
        MergeError::io(
            format!("Failed to create a temporary file in {}", parent.display()),
            err,
        )
    })
}
