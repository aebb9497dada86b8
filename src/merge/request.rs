use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use super::error::MergeError;
use crate::engine::EngineStatus;

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi"];
pub const MUSIC_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "aac", "flac"];
pub const OUTPUT_EXTENSION: &str = "mp4";

/// One user-initiated merge: which video, which music, where to and how loud.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRequest {
    video_path: PathBuf,
    music_path: PathBuf,
    output_path: PathBuf,
    duck_original_audio: bool,
    music_level: f64,
    original_level: f64,
}

impl MergeRequest {
    pub fn new(
        video_path: impl Into<PathBuf>,
        music_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            video_path: video_path.into(),
            music_path: music_path.into(),
            output_path: output_path.into(),
            duck_original_audio: true,
            music_level: 1.0,
            original_level: 0.2,
        }
    }

    pub fn with_ducking(mut self, duck: bool) -> Self {
        self.duck_original_audio = duck;
        self
    }

    pub fn with_music_level(mut self, level: f64) -> Self {
        self.music_level = level;
        self
    }

    pub fn with_original_level(mut self, level: f64) -> Self {
        self.original_level = level;
        self
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    pub fn music_path(&self) -> &Path {
        &self.music_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn duck_original_audio(&self) -> bool {
        self.duck_original_audio
    }

    pub fn music_level(&self) -> f64 {
        self.music_level
    }

    pub fn original_level(&self) -> f64 {
        self.original_level
    }

    /// Check the request against the filesystem and the located engine.
    ///
    /// Levels are clamped rather than rejected. An output path without an
    /// `.mp4` extension gets one appended.
    pub fn validate(self, engine: &EngineStatus) -> Result<ValidatedRequest, MergeError> {
        if let EngineStatus::Unavailable { reason } = engine {
            return Err(MergeError::EngineUnavailable(reason.clone()));
        }

        ensure_readable_file(&self.video_path, "Video")?;
        ensure_readable_file(&self.music_path, "Music")?;

        let output_path = with_output_extension(&self.output_path);
        ensure_writable_parent(&output_path)?;

        if same_file(&self.video_path, &output_path) {
            return Err(MergeError::InvalidInput(format!(
                "Output {} would overwrite the source video",
                output_path.display()
            )));
        }

        Ok(ValidatedRequest(MergeRequest {
            output_path,
            music_level: clamp_level(self.music_level),
            original_level: clamp_level(self.original_level),
            ..self
        }))
    }
}

/// A request that passed [`MergeRequest::validate`]; the only kind a job accepts.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest(MergeRequest);

impl Deref for ValidatedRequest {
    type Target = MergeRequest;

    fn deref(&self) -> &MergeRequest {
        &self.0
    }
}

pub fn clamp_level(level: f64) -> f64 {
    if level.is_finite() {
        level.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// `<video stem>_with_music.mp4` next to the video.
pub fn suggest_output_path(video_path: &Path) -> PathBuf {
    let stem = video_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    video_path.with_file_name(format!("{stem}_with_music.{OUTPUT_EXTENSION}"))
}

pub fn has_supported_extension(path: &Path, supported: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| supported.iter().any(|s| ext.eq_ignore_ascii_case(s)))
}

fn with_output_extension(path: &Path) -> PathBuf {
    if has_supported_extension(path, &[OUTPUT_EXTENSION]) {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(OUTPUT_EXTENSION);
    PathBuf::from(name)
}

fn ensure_readable_file(path: &Path, label: &str) -> Result<(), MergeError> {
    if !path.is_file() {
        return Err(MergeError::InvalidInput(format!(
            "{label} file {} does not exist",
            path.display()
        )));
    }
    File::open(path).map_err(|err| {
        MergeError::InvalidInput(format!(
            "{label} file {} is not readable: {err}",
            path.display()
        ))
    })?;
    Ok(())
}

pub(crate) fn output_parent(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn ensure_writable_parent(output: &Path) -> Result<(), MergeError> {
    let parent = output_parent(output);
    if !parent.is_dir() {
        return Err(MergeError::InvalidInput(format!(
            "Output directory {} does not exist",
            parent.display()
        )));
    }
    // An anonymous temp file leaves nothing behind once dropped.
    tempfile::tempfile_in(parent).map_err(|err| {
        MergeError::InvalidInput(format!(
            "Output directory {} is not writable: {err}",
            parent.display()
        ))
    })?;
    Ok(())
}

fn same_file(video: &Path, output: &Path) -> bool {
    let Ok(video) = video.canonicalize() else {
        return false;
    };
    let Some(name) = output.file_name() else {
        return false;
    };
    output_parent(output)
        .canonicalize()
        .map(|parent| parent.join(name) == video)
        .unwrap_or(false)
}
