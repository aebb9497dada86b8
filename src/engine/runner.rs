use std::collections::VecDeque;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use super::probe::{MediaInfo, parse_timestamp, probe_media};
use crate::merge::error::MergeError;
use crate::merge::job::CancelToken;
use crate::ui::prelude::*;

/// How often a running engine is checked for cancellation when it is quiet.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DIAGNOSTIC_LINES: usize = 12;

/// Everything the merge job needs from the multimedia engine.
pub trait EngineRunner: Send {
    fn probe(&self, path: &Path) -> Result<MediaInfo, MergeError>;

    fn run(&self, args: &[String], watch: RunWatch<'_>) -> Result<(), MergeError>;
}

/// Progress and cancellation plumbing for a single engine invocation.
pub struct RunWatch<'a> {
    /// Length of the media being produced, used to turn `time=` into a fraction.
    pub total_duration: Option<f64>,
    pub cancel: &'a CancelToken,
    /// Receives a completion fraction in [0, 1]. Returning an error stops the run.
    pub on_progress: &'a mut dyn FnMut(f64) -> Result<(), MergeError>,
    pub verbose: bool,
}

/// Runs a real ffmpeg binary as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    binary: PathBuf,
}

impl ProcessRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl EngineRunner for ProcessRunner {
    fn probe(&self, path: &Path) -> Result<MediaInfo, MergeError> {
        probe_media(&self.binary, path)
    }

    fn run(&self, args: &[String], mut watch: RunWatch<'_>) -> Result<(), MergeError> {
        emit(
            Level::Debug,
            "engine.command",
            &format!("{} {}", self.binary.display(), args.join(" ")),
            None,
        );

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(&self.binary, err))?;

        let stderr = child.stderr.take().ok_or_else(|| {
            MergeError::io("Failed to capture ffmpeg stderr", io::Error::other("not piped"))
        })?;

        let (line_tx, line_rx) = mpsc::channel();
        let reader = thread::spawn(move || read_stderr_lines(stderr, line_tx));

        let mut log = StderrLog::default();
        let watched = loop {
            if watch.cancel.is_cancelled() {
                break Err(MergeError::Cancelled);
            }

            match line_rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    if watch.verbose {
                        eprintln!("{}", line);
                    }

                    let Some(time) = parse_progress_time(&line) else {
                        log.push(line);
                        continue;
                    };

                    if let Some(total) = watch.total_duration.filter(|total| *total > 0.0) {
                        if let Err(err) = (watch.on_progress)((time / total).clamp(0.0, 1.0)) {
                            break Err(err);
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break Ok(()),
            }
        };

        if let Err(err) = watched {
            // The reader thread ends on its own once the pipe closes.
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }

        let status = child
            .wait()
            .map_err(|err| MergeError::io("Failed to wait for ffmpeg", err))?;
        let _ = reader.join();

        exit_result(status, watch.cancel, &log)
    }
}

/// A failed exit counts as cancellation when a cancel was already pending;
/// Ctrl-C reaches ffmpeg too and makes it exit with an error.
fn exit_result(status: ExitStatus, cancel: &CancelToken, log: &StderrLog) -> Result<(), MergeError> {
    if status.success() {
        return Ok(());
    }
    if cancel.is_cancelled() {
        return Err(MergeError::Cancelled);
    }
    Err(MergeError::EngineExecutionFailed {
        code: status.code(),
        detail: log.detail(),
    })
}

fn spawn_error(binary: &Path, err: io::Error) -> MergeError {
    if err.kind() == io::ErrorKind::NotFound {
        MergeError::EngineUnavailable(format!("{} could not be started: {}", binary.display(), err))
    } else {
        MergeError::io(format!("Failed to spawn {}", binary.display()), err)
    }
}

/// Split ffmpeg's stderr on both `\r` and `\n`; stats lines use carriage returns.
fn read_stderr_lines<R: Read>(mut stderr: R, lines: Sender<String>) {
    let mut buffer = [0u8; 4096];
    let mut accumulated = String::new();

    loop {
        let bytes_read = match stderr.read(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        accumulated.push_str(&String::from_utf8_lossy(&buffer[..bytes_read]));

        while let Some(pos) = accumulated.find(['\r', '\n']) {
            let line = accumulated[..pos].trim().to_string();
            accumulated.drain(..=pos);

            if line.is_empty() {
                continue;
            }
            if lines.send(line).is_err() {
                return;
            }
        }
    }

    let rest = accumulated.trim();
    if !rest.is_empty() {
        let _ = lines.send(rest.to_string());
    }
}

/// Extract the `time=HH:MM:SS.ss` field from an ffmpeg stats line.
pub fn parse_progress_time(line: &str) -> Option<f64> {
    let time_start = line.find("time=")?;
    let time_str = &line[time_start + 5..];
    let time_val = time_str.split_whitespace().next()?;

    parse_timestamp(time_val)
}

/// Keeps the last diagnostic lines of a run for error reporting.
#[derive(Debug, Default)]
struct StderrLog {
    lines: VecDeque<String>,
}

impl StderrLog {
    fn push(&mut self, line: String) {
        if self.lines.len() == DIAGNOSTIC_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn detail(&self) -> String {
        if self.lines.is_empty() {
            return "ffmpeg produced no diagnostic output".to_string();
        }
        self.lines
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stats_line() {
        let line = "frame=  250 fps=120 q=28.0 size=    1024kB time=00:00:05.00 bitrate=1677.7kbits/s speed=2.4x";
        assert_eq!(parse_progress_time(line), Some(5.0));
    }

    #[test]
    fn unknown_time_is_not_progress() {
        assert_eq!(parse_progress_time("size=N/A time=N/A bitrate=N/A speed=N/A"), None);
        assert_eq!(parse_progress_time("Unknown encoder 'libx264'"), None);
    }

    #[test]
    fn splits_carriage_return_stats() {
        let input: &[u8] = b"size=1kB time=00:00:01.00 bitrate=1\rsize=2kB time=00:00:02.00 bitrate=1\rdone\n";
        let (tx, rx) = mpsc::channel();
        read_stderr_lines(input, tx);
        let lines: Vec<String> = rx.iter().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "done");
    }

    #[test]
    fn detail_keeps_only_recent_lines() {
        let mut log = StderrLog::default();
        for i in 0..30 {
            log.push(format!("line {i}"));
        }
        let detail = log.detail();
        assert!(detail.starts_with("line 18"));
        assert!(detail.ends_with("line 29"));
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::{TempDir, tempdir};

        fn fake_engine(script: &str) -> (TempDir, ProcessRunner) {
            let temp = tempdir().unwrap();
            let path = temp.path().join("ffmpeg");
            fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            (temp, ProcessRunner::new(path))
        }

        #[test]
        fn non_zero_exit_reports_stderr() {
            let (_temp, runner) = fake_engine("echo 'Unknown encoder libx264' >&2\nexit 1");
            let cancel = CancelToken::new();
            let mut on_progress = |_: f64| Ok(());
            let err = runner
                .run(
                    &[],
                    RunWatch {
                        total_duration: Some(10.0),
                        cancel: &cancel,
                        on_progress: &mut on_progress,
                        verbose: false,
                    },
                )
                .unwrap_err();

            match err {
                MergeError::EngineExecutionFailed { code, detail } => {
                    assert_eq!(code, Some(1));
                    assert!(detail.contains("Unknown encoder libx264"));
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[test]
        fn stats_lines_become_fractions() {
            let (_temp, runner) = fake_engine(
                "printf 'time=00:00:02.50 bitrate=1\\rtime=00:00:05.00 bitrate=1\\r' >&2\nexit 0",
            );
            let cancel = CancelToken::new();
            let mut seen = Vec::new();
            let mut on_progress = |fraction: f64| {
                seen.push(fraction);
                Ok(())
            };
            runner
                .run(
                    &[],
                    RunWatch {
                        total_duration: Some(10.0),
                        cancel: &cancel,
                        on_progress: &mut on_progress,
                        verbose: false,
                    },
                )
                .unwrap();

            assert_eq!(seen, vec![0.25, 0.5]);
        }

        #[test]
        fn cancellation_kills_a_quiet_engine() {
            let (_temp, runner) = fake_engine("exec sleep 30");
            let cancel = CancelToken::new();
            let trigger = cancel.clone();
            let canceller = std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(200));
                trigger.cancel();
            });

            let started = std::time::Instant::now();
            let mut on_progress = |_: f64| Ok(());
            let err = runner
                .run(
                    &[],
                    RunWatch {
                        total_duration: None,
                        cancel: &cancel,
                        on_progress: &mut on_progress,
                        verbose: false,
                    },
                )
                .unwrap_err();
            canceller.join().unwrap();

            assert!(matches!(err, MergeError::Cancelled));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[test]
        fn failed_exit_during_cancel_is_cancelled() {
            let (_temp, runner) = fake_engine("exec 2>&-\nsleep 1\nexit 255");
            let cancel = CancelToken::new();
            let trigger = cancel.clone();
            let canceller = std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(200));
                trigger.cancel();
            });

            let mut on_progress = |_: f64| Ok(());
            let err = runner
                .run(
                    &[],
                    RunWatch {
                        total_duration: None,
                        cancel: &cancel,
                        on_progress: &mut on_progress,
                        verbose: false,
                    },
                )
                .unwrap_err();
            canceller.join().unwrap();

            assert!(matches!(err, MergeError::Cancelled));
        }

        #[test]
        fn failed_exit_without_cancel_is_an_engine_failure() {
            use std::os::unix::process::ExitStatusExt;

            let mut log = StderrLog::default();
            log.push("Conversion failed!".to_string());
            let status = ExitStatus::from_raw(255 << 8);

            let err = exit_result(status, &CancelToken::new(), &log).unwrap_err();
            assert!(matches!(
                err,
                MergeError::EngineExecutionFailed { code: Some(255), .. }
            ));

            let cancel = CancelToken::new();
            cancel.cancel();
            assert!(matches!(
                exit_result(status, &cancel, &log),
                Err(MergeError::Cancelled)
            ));
        }

        #[test]
        fn missing_binary_is_engine_unavailable() {
            let runner = ProcessRunner::new("/nonexistent/ffmpeg");
            let cancel = CancelToken::new();
            let mut on_progress = |_: f64| Ok(());
            let err = runner
                .run(
                    &[],
                    RunWatch {
                        total_duration: None,
                        cancel: &cancel,
                        on_progress: &mut on_progress,
                        verbose: false,
                    },
                )
                .unwrap_err();
            assert!(matches!(err, MergeError::EngineUnavailable(_)));
        }
    }
}
