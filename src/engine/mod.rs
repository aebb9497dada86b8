//! Locating the ffmpeg binary the merge job delegates to.
//!
//! The system binary on `PATH` is preferred. A bundled copy shipped next to
//! the application is the fallback, and when neither exists merging is
//! disabled.

pub mod probe;
pub mod runner;

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use serde::Serialize;

pub const ENGINE_ENV_VAR: &str = "MUSICMERGE_FFMPEG";

#[cfg(windows)]
const ENGINE_BINARY: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const ENGINE_BINARY: &str = "ffmpeg";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "engine", rename_all = "snake_case")]
pub enum EngineStatus {
    System { binary: PathBuf, version: String },
    Bundled { binary: PathBuf },
    Unavailable { reason: String },
}

impl EngineStatus {
    pub fn binary(&self) -> Option<&Path> {
        match self {
            EngineStatus::System { binary, .. } | EngineStatus::Bundled { binary } => {
                Some(binary)
            }
            EngineStatus::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.binary().is_some()
    }

    pub fn label(&self) -> &'static str {
        match self {
            EngineStatus::System { .. } => "system-ffmpeg",
            EngineStatus::Bundled { .. } => "bundled-ffmpeg",
            EngineStatus::Unavailable { .. } => "disabled",
        }
    }

    pub fn diagnostic(&self) -> String {
        match self {
            EngineStatus::System { binary, version } => {
                format!("{} ({})", version, binary.display())
            }
            EngineStatus::Bundled { binary } => format!(
                "Bundled FFmpeg at {} (slower). Install system FFmpeg for better speed.",
                binary.display()
            ),
            EngineStatus::Unavailable { reason } => reason.clone(),
        }
    }
}

/// Where to look for a bundled engine when none is on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct EngineSearch {
    /// Explicit binary from the configuration file, tried first.
    pub configured: Option<PathBuf>,
    /// Skip the `PATH` lookup entirely.
    pub skip_system: bool,
}

impl EngineSearch {
    pub fn with_configured(configured: Option<PathBuf>) -> Self {
        Self {
            configured,
            skip_system: false,
        }
    }

    fn bundled_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(path) = &self.configured {
            candidates.push(path.clone());
        }

        if let Some(value) = env::var_os(ENGINE_ENV_VAR) {
            if !value.is_empty() {
                candidates.push(PathBuf::from(value));
            }
        }

        if let Some(exe_dir) = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            candidates.push(exe_dir.join(ENGINE_BINARY));
            candidates.push(exe_dir.join("bin").join(ENGINE_BINARY));
        }

        if let Some(data) = dirs::data_dir() {
            candidates.push(data.join("musicmerge").join(ENGINE_BINARY));
        }

        candidates
    }
}

/// Determine which engine is usable right now. Never fails.
pub fn locate(search: &EngineSearch) -> EngineStatus {
    if !search.skip_system {
        if let Ok(binary) = which::which(ENGINE_BINARY) {
            if let Some(version) = probe_version(&binary) {
                return EngineStatus::System { binary, version };
            }
        }
    }

    if let Some(binary) = search
        .bundled_candidates()
        .into_iter()
        .find(|candidate| candidate.is_file())
    {
        return EngineStatus::Bundled { binary };
    }

    EngineStatus::Unavailable {
        reason: "No FFmpeg executable found. Install FFmpeg to enable merging.".to_string(),
    }
}

static ENGINE_STATUS: OnceLock<EngineStatus> = OnceLock::new();

/// Process-wide engine status, located on first use.
pub fn engine_status(search: &EngineSearch) -> &'static EngineStatus {
    ENGINE_STATUS.get_or_init(|| locate(search))
}

fn probe_version(binary: &Path) -> Option<String> {
    let output = Command::new(binary).arg("-version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .next()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
}

/// Platform specific hint shown when no engine could be found.
pub fn install_hint() -> &'static str {
    if cfg!(target_os = "windows") {
        "Install FFmpeg with winget, choco or scoop (e.g. `winget install ffmpeg`)."
    } else if cfg!(target_os = "macos") {
        "Install FFmpeg with Homebrew: `brew install ffmpeg`."
    } else {
        "Install the `ffmpeg` package with your distribution's package manager."
    }
}
