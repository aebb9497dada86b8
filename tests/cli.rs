use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::{TempDir, tempdir};

/// Command for the built binary with a private home and no system ffmpeg.
fn musicmerge(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_musicmerge"));
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("PATH", home.join("empty-path"))
        .env_remove("MUSICMERGE_FFMPEG")
        .arg("--output")
        .arg("json");
    cmd
}

fn events(output: &Output) -> Vec<Value> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    stdout
        .lines()
        .chain(stderr.lines())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

fn find_event<'a>(events: &'a [Value], code: &str) -> Option<&'a Value> {
    events.iter().find(|event| event["code"] == code)
}

#[cfg(unix)]
fn write_fake_engine(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    // Prints a media summary when probed and a final time when the video
    // track is measured; otherwise reports some progress and creates its last
    // argument, like a successful encode.
    let script = r#"#!/bin/sh
probe=1
measure=0
last=""
for arg in "$@"; do
    if [ "$arg" = "-y" ]; then probe=0; fi
    if [ "$arg" = "null" ]; then measure=1; fi
    last="$arg"
done
if [ "$measure" = "1" ]; then
    printf 'frame=   50 fps=0.0 q=-1.0 Lsize=N/A time=00:00:02.00 bitrate=N/A speed= 900x\n' >&2
    exit 0
fi
if [ "$probe" = "1" ]; then
    printf '  Duration: 00:00:02.00, start: 0.000000, bitrate: 100 kb/s\n' >&2
    printf '  Stream #0:0: Video: h264, yuv420p, 320x240\n' >&2
    printf '  Stream #0:1: Audio: aac, 44100 Hz, stereo\n' >&2
    printf 'At least one output file must be specified\n' >&2
    exit 1
fi
printf 'size=       0kB time=00:00:01.00 bitrate=N/A speed=1x\r' >&2
printf 'merged' > "$last"
exit 0
"#;
    let path = dir.join("fake-ffmpeg");
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn setup() -> (TempDir, PathBuf) {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(home.join("empty-path")).unwrap();
    (temp, home)
}

#[test]
fn engine_reports_disabled_without_ffmpeg() {
    let (_temp, home) = setup();

    let output = musicmerge(&home).arg("engine").output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    let events = events(&output);
    let status = find_event(&events, "engine.status").expect("engine.status event");
    assert_eq!(status["data"]["engine"], "unavailable");
    assert!(find_event(&events, "engine.install_hint").is_some());
}

#[test]
fn merge_without_engine_fails_before_touching_files() {
    let (temp, home) = setup();
    let video = temp.path().join("clip.mp4");
    let music = temp.path().join("song.mp3");
    fs::write(&video, b"video").unwrap();
    fs::write(&music, b"music").unwrap();

    let output = musicmerge(&home)
        .arg("merge")
        .arg(&video)
        .arg(&music)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let events = events(&output);
    let invalid = find_event(&events, "merge.invalid").expect("merge.invalid event");
    assert_eq!(invalid["data"]["kind"], "engine_unavailable");
    assert!(!temp.path().join("clip_with_music.mp4").exists());
}

#[cfg(unix)]
#[test]
fn engine_reports_bundled_binary_from_env() {
    let (temp, home) = setup();
    let fake = write_fake_engine(temp.path());

    let output = musicmerge(&home)
        .env("MUSICMERGE_FFMPEG", &fake)
        .arg("engine")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0));
    let events = events(&output);
    let status = find_event(&events, "engine.status").expect("engine.status event");
    assert_eq!(status["data"]["engine"], "bundled");
    assert_eq!(status["data"]["binary"], fake.to_string_lossy().as_ref());
    assert!(find_event(&events, "engine.speed_tip").is_some());
}

#[cfg(unix)]
#[test]
fn merge_with_missing_music_is_invalid_input() {
    let (temp, home) = setup();
    let fake = write_fake_engine(temp.path());
    let video = temp.path().join("clip.mp4");
    fs::write(&video, b"video").unwrap();

    let output = musicmerge(&home)
        .env("MUSICMERGE_FFMPEG", &fake)
        .arg("merge")
        .arg(&video)
        .arg(temp.path().join("missing.mp3"))
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let events = events(&output);
    let invalid = find_event(&events, "merge.invalid").expect("merge.invalid event");
    assert_eq!(invalid["data"]["kind"], "invalid_input");
}

#[cfg(unix)]
#[test]
fn merge_writes_suggested_output_with_fake_engine() {
    let (temp, home) = setup();
    let fake = write_fake_engine(temp.path());
    let video = temp.path().join("clip.mov");
    let music = temp.path().join("song.mp3");
    fs::write(&video, b"video").unwrap();
    fs::write(&music, b"music").unwrap();

    let output = musicmerge(&home)
        .env("MUSICMERGE_FFMPEG", &fake)
        .arg("merge")
        .arg(&video)
        .arg(&music)
        .output()
        .unwrap();

    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let merged = temp.path().join("clip_with_music.mp4");
    assert_eq!(fs::read_to_string(&merged).unwrap(), "merged");

    let events = events(&output);
    let succeeded = find_event(&events, "merge.succeeded").expect("merge.succeeded event");
    assert_eq!(succeeded["data"]["output"], merged.to_string_lossy().as_ref());

    let percents: Vec<u64> = events
        .iter()
        .filter(|event| event["code"] == "merge.progress")
        .filter_map(|event| event["data"]["percent"].as_u64())
        .collect();
    assert!(percents.windows(2).all(|pair| pair[0] < pair[1]));

    let leftovers: Vec<_> = fs::read_dir(temp.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(".musicmerge-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[cfg(unix)]
#[test]
fn merge_refuses_to_overwrite_without_force() {
    let (temp, home) = setup();
    let fake = write_fake_engine(temp.path());
    let video = temp.path().join("clip.mp4");
    let music = temp.path().join("song.mp3");
    let out = temp.path().join("out.mp4");
    fs::write(&video, b"video").unwrap();
    fs::write(&music, b"music").unwrap();
    fs::write(&out, b"keep me").unwrap();

    let output = musicmerge(&home)
        .env("MUSICMERGE_FFMPEG", &fake)
        .arg("merge")
        .arg(&video)
        .arg(&music)
        .arg("-o")
        .arg(&out)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(fs::read_to_string(&out).unwrap(), "keep me");

    let output = musicmerge(&home)
        .env("MUSICMERGE_FFMPEG", &fake)
        .arg("merge")
        .arg(&video)
        .arg(&music)
        .arg("-o")
        .arg(&out)
        .arg("--force")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(fs::read_to_string(&out).unwrap(), "merged");
}

#[test]
fn config_prints_defaults() {
    let (_temp, home) = setup();

    let output = musicmerge(&home).arg("config").output().unwrap();

    assert_eq!(output.status.code(), Some(0));
    let events = events(&output);
    let values = find_event(&events, "config.values").expect("config.values event");
    assert_eq!(values["data"]["music_level"], 1.0);
    assert_eq!(values["data"]["original_level"], 0.2);
    assert!(home.join("config/musicmerge/config.toml").exists());
}
