//! Frame codec adapter.
//!
//! The [`FrameCodec`] trait is the bridge between a video file and a
//! numbered frame-image sequence, plus audio extraction and merging. The
//! rest of the pipeline only talks to this trait, so a native decode/encode
//! backend can replace the default subprocess implementation without
//! changing callers.
//!
//! [`FfmpegCli`] implements the trait by invoking the `ffmpeg` and
//! `ffprobe` executables. During frame extraction it scrapes the tool's
//! diagnostic stream for `frame=` markers and turns them into
//! [`Stage::Decompose`] progress updates.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use obscura::{FfmpegCli, FrameCodec, NoOpProgress};
//!
//! let codec = FfmpegCli::new();
//! let decomposition = codec.decompose(
//!     Path::new("input.mp4"),
//!     Path::new("work/frames"),
//!     &NoOpProgress,
//! )?;
//! println!("{} frames @ {:.2} fps", decomposition.frame_count, decomposition.frame_rate);
//! # Ok::<(), obscura::ObscuraError>(())
//! ```

use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::{BufRead, BufReader, Error as IoError};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use crate::error::ObscuraError;
use crate::probe::VideoProbe;
use crate::progress::{ProgressCallback, ProgressUpdate, Stage};
use crate::sequence::FrameSequence;

/// Number of trailing diagnostic lines kept for error reports.
const STDERR_TAIL_LINES: usize = 8;

/// Container metadata written by [`FrameCodec::merge_audio_video`].
///
/// Technical fields are set to typical encoder values and descriptive
/// fields are cleared.
pub const METADATA_OVERRIDES: [(&str, &str); 12] = [
    ("encoder", "Lavf58.20.100"),
    ("compatible_brands", "isom/iso2/avc1/mp41"),
    ("title", ""),
    ("artist", ""),
    ("album", ""),
    ("date", ""),
    ("genre", ""),
    ("comment", ""),
    ("description", ""),
    ("copyright", ""),
    ("encoded_by", ""),
    ("creation_time", ""),
];

/// Result of splitting a video into frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    /// Source frame rate, used again when recomposing.
    pub frame_rate: f64,
    /// Frame count reported by the probe.
    pub frame_count: u64,
    /// Frame files actually written.
    pub extracted_frames: u64,
}

/// Bidirectional bridge between video files and frame-image sequences.
pub trait FrameCodec: Send + Sync {
    /// Read stream properties without decoding.
    fn probe(&self, video: &Path) -> Result<VideoProbe, ObscuraError>;

    /// Write every frame of `video` into `frames_dir` as a numbered image
    /// sequence, reporting `(min(frame, total), total)` under
    /// [`Stage::Decompose`] as frames are written.
    ///
    /// A failing extraction is an error, never a partial count.
    fn decompose(
        &self,
        video: &Path,
        frames_dir: &Path,
        progress: &dyn ProgressCallback,
    ) -> Result<Decomposition, ObscuraError>;

    /// Encode the numbered sequence in `frames_dir` into `output` at
    /// `frame_rate`.
    ///
    /// Fails when no frames are found, numbering has a gap, or the encoder
    /// exits unsuccessfully.
    fn recompose(&self, frames_dir: &Path, output: &Path, frame_rate: f64) -> Result<(), ObscuraError>;

    /// Stream-copy the audio track of `video` into `audio`.
    ///
    /// Returns `false`, not an error, when the source has no audio or the
    /// tool is unavailable; the caller proceeds without audio.
    fn extract_audio(&self, video: &Path, audio: &Path) -> bool;

    /// Combine a silent video and an audio track into `output`, trimmed to
    /// the shorter stream, with normalised container metadata.
    fn merge_audio_video(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), ObscuraError>;
}

/// Encoder settings used when recomposing and merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    /// JPEG quality scale for extracted frames (2 is high quality).
    pub frame_quality: u8,
    /// Video encoder name.
    pub video_codec: String,
    /// Target video bitrate.
    pub bitrate: String,
    /// Output pixel format.
    pub pixel_format: String,
    /// Encoder speed/compression preset.
    pub preset: String,
    /// Compatibility profile.
    pub profile: String,
    /// Compatibility level.
    pub level: String,
    /// Audio encoder used when merging.
    pub audio_codec: String,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            frame_quality: 2,
            video_codec: "libx264".to_string(),
            bitrate: "1800k".to_string(),
            pixel_format: "yuv420p".to_string(),
            preset: "medium".to_string(),
            profile: "main".to_string(),
            level: "4.1".to_string(),
            audio_codec: "aac".to_string(),
        }
    }
}

/// [`FrameCodec`] backed by the `ffmpeg` and `ffprobe` executables.
#[derive(Debug, Clone)]
pub struct FfmpegCli {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    sequence: FrameSequence,
    settings: EncodeSettings,
}

impl Default for FfmpegCli {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegCli {
    /// Use `ffmpeg` and `ffprobe` from `PATH` with default settings.
    pub fn new() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            sequence: FrameSequence::default(),
            settings: EncodeSettings::default(),
        }
    }

    /// Use a specific `ffmpeg` executable.
    #[must_use]
    pub fn with_ffmpeg(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg = path.into();
        self
    }

    /// Use a specific `ffprobe` executable.
    #[must_use]
    pub fn with_ffprobe(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffprobe = path.into();
        self
    }

    /// Override the encoder settings.
    #[must_use]
    pub fn with_encode_settings(mut self, settings: EncodeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Override the frame naming scheme.
    #[must_use]
    pub fn with_sequence(mut self, sequence: FrameSequence) -> Self {
        self.sequence = sequence;
        self
    }

    /// The frame naming scheme used for decomposition and recomposition.
    pub fn sequence(&self) -> &FrameSequence {
        &self.sequence
    }

    fn probe_args(&self, video: &Path) -> Vec<OsString> {
        let mut args = os_args(&[
            "-v",
            "error",
            "-show_entries",
            "stream=codec_type,width,height,r_frame_rate,avg_frame_rate,nb_frames,duration:format=duration",
            "-of",
            "json",
        ]);
        args.push(video.as_os_str().to_owned());
        args
    }

    pub(crate) fn decompose_args(&self, video: &Path, frames_dir: &Path) -> Vec<OsString> {
        let mut args = os_args(&["-i"]);
        args.push(video.as_os_str().to_owned());
        args.extend(os_args(&["-q:v", &self.settings.frame_quality.to_string(), "-y"]));
        args.push(frames_dir.join(self.sequence.pattern()).into_os_string());
        args
    }

    pub(crate) fn recompose_args(
        &self,
        frames_dir: &Path,
        output: &Path,
        frame_rate: f64,
        (width, height): (u32, u32),
    ) -> Vec<OsString> {
        let settings = &self.settings;
        let mut args = os_args(&[
            "-y",
            "-r",
            &frame_rate.to_string(),
            "-f",
            "image2",
            "-s",
            &format!("{width}x{height}"),
            "-i",
        ]);
        args.push(frames_dir.join(self.sequence.pattern()).into_os_string());
        args.extend(os_args(&[
            "-vcodec",
            &settings.video_codec,
            "-b:v",
            &settings.bitrate,
            "-pix_fmt",
            &settings.pixel_format,
            "-preset",
            &settings.preset,
            "-profile:v",
            &settings.profile,
            "-level",
            &settings.level,
        ]));
        args.push(output.as_os_str().to_owned());
        args
    }

    pub(crate) fn extract_audio_args(&self, video: &Path, audio: &Path) -> Vec<OsString> {
        let mut args = os_args(&["-i"]);
        args.push(video.as_os_str().to_owned());
        args.extend(os_args(&["-vn", "-acodec", "copy"]));
        args.push(audio.as_os_str().to_owned());
        args.push(OsString::from("-y"));
        args
    }

    pub(crate) fn merge_args(&self, video: &Path, audio: &Path, output: &Path) -> Vec<OsString> {
        let mut args = os_args(&["-i"]);
        args.push(video.as_os_str().to_owned());
        args.push(OsString::from("-i"));
        args.push(audio.as_os_str().to_owned());
        args.extend(os_args(&[
            "-c:v",
            "copy",
            "-c:a",
            &self.settings.audio_codec,
            "-map",
            "0:v:0",
            "-map",
            "1:a:0",
            "-shortest",
        ]));
        for (key, value) in METADATA_OVERRIDES {
            args.push(OsString::from("-metadata"));
            args.push(OsString::from(format!("{key}={value}")));
        }
        args.push(OsString::from("-y"));
        args.push(output.as_os_str().to_owned());
        args
    }

    fn unavailable(tool: &Path, error: IoError) -> ObscuraError {
        ObscuraError::ToolUnavailable {
            tool: tool.to_path_buf(),
            reason: error.to_string(),
        }
    }

    /// Run `tool` to completion, mapping a non-zero exit to [`ObscuraError::ToolFailed`].
    fn run(&self, tool: &Path, stage: Stage, args: &[OsString]) -> Result<Vec<u8>, ObscuraError> {
        log::debug!("Running {} {}", tool.display(), display_args(args));

        let output = Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|error| Self::unavailable(tool, error))?;

        if !output.status.success() {
            let mut tail = StderrTail::default();
            for_each_line(output.stderr.as_slice(), |line| tail.push(line))?;
            return Err(tool_failed(tool, stage, output.status, tail));
        }

        Ok(output.stdout)
    }
}

impl FrameCodec for FfmpegCli {
    fn probe(&self, video: &Path) -> Result<VideoProbe, ObscuraError> {
        let stdout = self.run(&self.ffprobe, Stage::Decompose, &self.probe_args(video))?;
        VideoProbe::from_probe_json(video, &String::from_utf8_lossy(&stdout))
    }

    fn decompose(
        &self,
        video: &Path,
        frames_dir: &Path,
        progress: &dyn ProgressCallback,
    ) -> Result<Decomposition, ObscuraError> {
        let probe = self.probe(video)?;
        let total = probe.frame_count;
        log::info!(
            "Decomposing {}: {:.2} fps, {} frames",
            video.display(),
            probe.frame_rate,
            total
        );

        fs::create_dir_all(frames_dir)?;
        let args = self.decompose_args(video, frames_dir);
        log::debug!("Running {} {}", self.ffmpeg.display(), display_args(&args));

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| Self::unavailable(&self.ffmpeg, error))?;

        let mut tail = StderrTail::default();
        if let Some(stderr) = child.stderr.take() {
            let scanned = for_each_line(BufReader::new(stderr), |line| {
                if let Some(frame) = parse_frame_marker(line) {
                    progress.on_progress(&ProgressUpdate::new(Stage::Decompose, frame.min(total), total));
                }
                tail.push(line);
            });
            if let Err(error) = scanned {
                let _ = child.kill();
                let _ = child.wait();
                return Err(error.into());
            }
        }

        let status = child.wait()?;
        if !status.success() {
            return Err(tool_failed(&self.ffmpeg, Stage::Decompose, status, tail));
        }

        let extracted_frames = self.sequence.list(frames_dir)?.len() as u64;
        if extracted_frames != total {
            log::warn!("Probe reported {total} frames but {extracted_frames} were extracted");
        }
        log::info!("Extracted {extracted_frames} frames into {}", frames_dir.display());

        Ok(Decomposition {
            frame_rate: probe.frame_rate,
            frame_count: total,
            extracted_frames,
        })
    }

    fn recompose(&self, frames_dir: &Path, output: &Path, frame_rate: f64) -> Result<(), ObscuraError> {
        let frames = self.sequence.list(frames_dir)?;
        let first = frames.first().ok_or_else(|| ObscuraError::NoFrames {
            directory: frames_dir.to_path_buf(),
        })?;
        self.sequence.verify_contiguous(&frames)?;

        let dimensions = image::image_dimensions(first)?;
        let args = self.recompose_args(frames_dir, output, frame_rate, dimensions);
        self.run(&self.ffmpeg, Stage::Recompose, &args)?;

        log::info!("Encoded {} frames into {}", frames.len(), output.display());
        Ok(())
    }

    fn extract_audio(&self, video: &Path, audio: &Path) -> bool {
        match self.run(&self.ffmpeg, Stage::ExtractAudio, &self.extract_audio_args(video, audio)) {
            Ok(_) => {
                log::info!("Extracted audio track to {}", audio.display());
                true
            }
            Err(error) => {
                log::warn!("No audio extracted from {}, continuing silent: {error}", video.display());
                false
            }
        }
    }

    fn merge_audio_video(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), ObscuraError> {
        self.run(&self.ffmpeg, Stage::MergeAudio, &self.merge_args(video, audio, output))?;
        log::info!("Merged audio into {}", output.display());
        Ok(())
    }
}

/// Extract the frame number from a progress line such as
/// `frame=  123 fps= 45 q=2.0 size=N/A time=00:00:04.10 ...`.
pub(crate) fn parse_frame_marker(line: &str) -> Option<u64> {
    let (_, rest) = line.split_once("frame=")?;
    rest.split_whitespace().next()?.parse().ok()
}

/// Feed every line of `reader` to `on_line`.
///
/// The codec tool rewrites its progress line in place with `\r`, so both
/// `\r` and `\n` terminate a line.
fn for_each_line<R: BufRead>(mut reader: R, mut on_line: impl FnMut(&str)) -> Result<(), IoError> {
    let mut line = Vec::new();
    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        };
        if available.is_empty() {
            if !line.is_empty() {
                on_line(&String::from_utf8_lossy(&line));
            }
            return Ok(());
        }

        let consumed = available.len();
        for &byte in available {
            if byte == b'\n' || byte == b'\r' {
                if !line.is_empty() {
                    on_line(&String::from_utf8_lossy(&line));
                    line.clear();
                }
            } else {
                line.push(byte);
            }
        }
        reader.consume(consumed);
    }
}

#[derive(Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
}

impl StderrTail {
    fn push(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if self.lines.len() == STDERR_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    fn into_detail(self) -> String {
        if self.lines.is_empty() {
            return "no diagnostic output".to_string();
        }
        Vec::from(self.lines).join(" | ")
    }
}

fn tool_failed(tool: &Path, stage: Stage, status: ExitStatus, tail: StderrTail) -> ObscuraError {
    ObscuraError::ToolFailed {
        tool: tool.to_path_buf(),
        stage,
        status: status.code(),
        detail: tail.into_detail(),
    }
}

fn os_args(args: &[&str]) -> Vec<OsString> {
    args.iter().map(OsString::from).collect()
}

fn display_args(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| arg.as_os_str())
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}
