//! Lightweight video probing.
//!
//! [`VideoProbe`] holds the handful of stream properties the pipeline needs
//! before decoding starts: dimensions, frame rate, frame count, duration and
//! whether an audio track is present. It is parsed from the codec tool's
//! JSON probe output, which is a metadata read and does not decode frames.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ObscuraError;

/// Stream properties of a video file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[must_use]
pub struct VideoProbe {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second (average rate for variable-frame-rate content).
    pub frame_rate: f64,
    /// Frame count reported by the container, or estimated from duration
    /// and frame rate when the container does not store one.
    pub frame_count: u64,
    /// Stream duration.
    pub duration: Duration,
    /// Whether the file carries at least one audio stream.
    pub has_audio: bool,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl VideoProbe {
    /// Parse the JSON document printed by
    /// `ffprobe -show_entries stream=...:format=duration -of json`.
    pub(crate) fn from_probe_json(path: &Path, json: &str) -> Result<Self, ObscuraError> {
        let output: ProbeOutput =
            serde_json::from_str(json).map_err(|error| ObscuraError::ProbeFailed {
                path: path.to_path_buf(),
                reason: error.to_string(),
            })?;

        let video = output
            .streams
            .iter()
            .find(|stream| stream.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| ObscuraError::NoVideoStream(path.to_path_buf()))?;

        let has_audio = output
            .streams
            .iter()
            .any(|stream| stream.codec_type.as_deref() == Some("audio"));

        let frame_rate = video
            .avg_frame_rate
            .as_deref()
            .and_then(parse_rational)
            .or_else(|| video.r_frame_rate.as_deref().and_then(parse_rational))
            .ok_or_else(|| ObscuraError::ProbeFailed {
                path: path.to_path_buf(),
                reason: "video stream has no usable frame rate".to_string(),
            })?;

        let seconds = video
            .duration
            .as_deref()
            .or(output.format.as_ref().and_then(|format| format.duration.as_deref()))
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
            .unwrap_or(0.0);

        let frame_count = video
            .nb_frames
            .as_deref()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|&count| count > 0)
            .unwrap_or_else(|| (seconds * frame_rate).round() as u64);

        Ok(Self {
            width: video.width.unwrap_or(0),
            height: video.height.unwrap_or(0),
            frame_rate,
            frame_count,
            duration: Duration::from_secs_f64(seconds),
            has_audio,
        })
    }
}

/// Parse `"30000/1001"` or `"25"` into a positive rate.
fn parse_rational(value: &str) -> Option<f64> {
    let rate = match value.split_once('/') {
        Some((numerator, denominator)) => {
            let numerator: f64 = numerator.trim().parse().ok()?;
            let denominator: f64 = denominator.trim().parse().ok()?;
            if denominator == 0.0 {
                return None;
            }
            numerator / denominator
        }
        None => value.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}
