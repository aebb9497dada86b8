use std::path::Path;
use std::process::{Command, Stdio};

use super::runner::parse_progress_time;
use crate::merge::error::MergeError;

/// What the merge job needs to know about an input file.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// Container duration; the longest stream.
    pub duration: f64,
    /// Length of the first video stream when it could be measured.
    pub video_duration: Option<f64>,
    pub has_video: bool,
    pub has_audio: bool,
}

impl MediaInfo {
    /// Length the output is cut to. The picture decides, never the container.
    pub fn target_duration(&self) -> f64 {
        match self.video_duration {
            Some(video) if video > 0.0 => video.min(self.duration),
            _ => self.duration,
        }
    }
}

/// Probe `path` with the engine binary itself, so a bundled ffmpeg without
/// ffprobe is enough.
pub fn probe_media(binary: &Path, path: &Path) -> Result<MediaInfo, MergeError> {
    // Without an output file ffmpeg exits non-zero after printing the input
    // summary, so the exit status is not checked here.
    let output = Command::new(binary)
        .arg("-hide_banner")
        .arg("-nostdin")
        .arg("-i")
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|err| {
            MergeError::io(format!("Failed to run ffmpeg to probe {}", path.display()), err)
        })?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut info = parse_media_info(&stderr).ok_or_else(|| {
        let tail = stderr.lines().last().unwrap_or("no output").trim().to_string();
        MergeError::InvalidInput(format!(
            "Unable to read media information from {}: {}",
            path.display(),
            tail
        ))
    })?;

    if info.has_video {
        info.video_duration = video_stream_duration(binary, path);
    }
    Ok(info)
}

/// Measure the first video stream by remuxing it into the null muxer. `None`
/// when ffmpeg does not report a final time, in which case the container
/// duration is used.
fn video_stream_duration(binary: &Path, path: &Path) -> Option<f64> {
    let output = Command::new(binary)
        .args(["-hide_banner", "-nostdin", "-i"])
        .arg(path)
        .args(["-map", "0:v:0", "-c", "copy", "-f", "null", "-"])
        .stdin(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_final_time(&String::from_utf8_lossy(&output.stderr))
}

/// Last `time=` value of an ffmpeg run.
pub fn parse_final_time(stderr: &str) -> Option<f64> {
    stderr
        .split(['\r', '\n'])
        .filter_map(parse_progress_time)
        .last()
        .filter(|seconds| *seconds > 0.0)
}

pub fn parse_media_info(stderr: &str) -> Option<MediaInfo> {
    let duration = stderr.lines().find_map(parse_duration_line)?;

    let mut has_video = false;
    let mut has_audio = false;
    for line in stderr.lines().map(str::trim_start) {
        if !line.starts_with("Stream #") {
            continue;
        }
        if line.contains(": Video:") && !line.contains("(attached pic)") {
            has_video = true;
        } else if line.contains(": Audio:") {
            has_audio = true;
        }
    }

    Some(MediaInfo {
        duration,
        video_duration: None,
        has_video,
        has_audio,
    })
}

fn parse_duration_line(line: &str) -> Option<f64> {
    let rest = line.trim_start().strip_prefix("Duration:")?;
    let value = rest.split(',').next()?.trim();
    let seconds = parse_timestamp(value)?;
    (seconds > 0.0).then_some(seconds)
}

/// Parse an ffmpeg `HH:MM:SS.ss` timestamp into seconds.
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
