//! ffmpeg argument builders for the two engine invocations of a merge:
//! composing the audio bed and muxing it under the re-encoded video.

use std::path::Path;

/// Sample rate and layout every audio branch is converted to before mixing.
const MIX_FORMAT: &str = "aformat=sample_fmts=fltp:sample_rates=48000:channel_layouts=stereo";

/// Fixed output codecs for the final container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeProfile {
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub pixel_format: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for EncodeProfile {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "medium".to_string(),
            crf: 23,
            pixel_format: "yuv420p".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
        }
    }
}

impl EncodeProfile {
    pub fn push_to(&self, args: &mut Vec<String>) {
        args.extend(
            [
                "-c:v",
                self.video_codec.as_str(),
                "-preset",
                self.preset.as_str(),
                "-crf",
                self.crf.to_string().as_str(),
                "-pix_fmt",
                self.pixel_format.as_str(),
                "-c:a",
                self.audio_codec.as_str(),
                "-b:a",
                self.audio_bitrate.as_str(),
                "-movflags",
                "+faststart",
            ]
            .map(String::from),
        );
    }
}

/// How the audio bed for the output is put together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioMix {
    /// Target length in seconds; the video's duration.
    pub duration: f64,
    pub music_level: f64,
    /// Gain for the video's own audio, `None` when it is dropped.
    pub original_level: Option<f64>,
}

impl AudioMix {
    /// Filter graph producing `[outa]`. Input 0 is the looped music, input 1
    /// the source video when its audio is kept.
    pub fn filter_graph(&self) -> String {
        let duration = format_time(self.duration);
        let mut filters = vec![format!(
            "[0:a]{MIX_FORMAT},atrim=duration={duration},asetpts=PTS-STARTPTS,volume={volume:.6}[music]",
            volume = self.music_level,
        )];

        match self.original_level {
            Some(level) => {
                filters.push(format!(
                    "[1:a]{MIX_FORMAT},apad,atrim=duration={duration},asetpts=PTS-STARTPTS,volume={level:.6}[original]",
                ));
                // Plain per-channel sum. Both inputs are stereo and trimmed to
                // the same length, so amerge yields c0..c3 without dropping
                // anything, and `=` in pan keeps the gains unnormalized.
                filters.push(
                    "[original][music]amerge=inputs=2,pan=stereo|c0=c0+c2|c1=c1+c3[outa]"
                        .to_string(),
                );
            }
            None => filters.push("[music]anull[outa]".to_string()),
        }

        filters.join("; ")
    }
}

fn base_args() -> Vec<String> {
    ["-hide_banner", "-nostdin", "-y", "-loglevel", "error", "-stats"]
        .map(String::from)
        .to_vec()
}

/// Render the looped, trimmed and mixed audio bed to a lossless WAV file.
pub fn audio_mix_args(music: &Path, video: &Path, mix: &AudioMix, output: &Path) -> Vec<String> {
    let mut args = base_args();

    args.extend(["-stream_loop", "-1", "-i"].map(String::from));
    args.push(music.to_string_lossy().into_owned());

    if mix.original_level.is_some() {
        args.push("-i".to_string());
        args.push(video.to_string_lossy().into_owned());
    }

    args.push("-filter_complex".to_string());
    args.push(mix.filter_graph());
    args.extend(["-map", "[outa]", "-t"].map(String::from));
    args.push(format_time(mix.duration));
    args.extend(["-c:a", "pcm_s16le", "-f", "wav"].map(String::from));
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Combine the video stream of `video` with `audio`, re-encoding both.
pub fn mux_args(
    video: &Path,
    audio: &Path,
    duration: f64,
    profile: &EncodeProfile,
    output: &Path,
) -> Vec<String> {
    let mut args = base_args();

    args.push("-i".to_string());
    args.push(video.to_string_lossy().into_owned());
    args.push("-i".to_string());
    args.push(audio.to_string_lossy().into_owned());

    args.extend(["-map", "0:v:0", "-map", "1:a:0", "-t"].map(String::from));
    args.push(format_time(duration));

    profile.push_to(&mut args);
    args.extend(["-f", "mp4"].map(String::from));
    args.push(output.to_string_lossy().into_owned());
    args
}

pub fn format_time(value: f64) -> String {
    format!("{value:.6}")
}
