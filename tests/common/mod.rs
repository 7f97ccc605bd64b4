//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use image::{Rgb, RgbImage};
use obscura::{
    Decomposition, FrameCodec, FrameSequence, ObscuraError, ProgressCallback, ProgressUpdate,
    Stage, VideoProbe,
};

/// A gradient test image, so JPEG round trips are not trivially flat.
pub fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) * 3 % 256) as u8])
    })
}

/// A uniform mid-gray image, far from the clamping bounds.
pub fn gray(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([128, 128, 128]))
}

/// Write `count` small JPEG images named `img_000.jpg` ... into `directory`.
pub fn write_images(directory: &Path, count: usize) {
    fs::create_dir_all(directory).unwrap();
    for index in 0..count {
        gradient(16, 12)
            .save(directory.join(format!("img_{index:03}.jpg")))
            .unwrap();
    }
}

/// Names of job workspaces still present in `directory`.
pub fn leftover_workspaces(directory: &Path) -> Vec<String> {
    fs::read_dir(directory)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".work_"))
        .collect()
}

/// Returns `true` if an `ffmpeg` executable is on `PATH`.
pub fn ffmpeg_available() -> bool {
    std::process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .is_ok_and(|output| output.status.success())
}

/// Collects every progress update it receives.
#[derive(Default)]
pub struct Recorder {
    pub updates: Mutex<Vec<ProgressUpdate>>,
}

impl Recorder {
    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().unwrap().clone()
    }

    /// Stages in the order they first reported.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages: Vec<Stage> = Vec::new();
        for update in self.updates() {
            if stages.last() != Some(&update.stage) {
                stages.push(update.stage);
            }
        }
        stages
    }
}

impl ProgressCallback for Recorder {
    fn on_progress(&self, update: &ProgressUpdate) {
        self.updates.lock().unwrap().push(*update);
    }
}

/// In-process [`FrameCodec`] that writes synthetic frames and placeholder
/// videos, with switches for every failure mode the pipeline handles.
pub struct FakeCodec {
    pub frames: u64,
    pub frame_rate: f64,
    pub has_audio: bool,
    pub fail_decompose: bool,
    pub fail_recompose: bool,
    pub fail_merge: bool,
    pub corrupt_frame: Option<u64>,
    pub delay: Duration,
    pub calls: Mutex<Vec<&'static str>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    sequence: FrameSequence,
}

impl FakeCodec {
    pub fn new(frames: u64) -> Self {
        Self {
            frames,
            frame_rate: 25.0,
            has_audio: true,
            fail_decompose: false,
            fail_recompose: false,
            fail_merge: false,
            corrupt_frame: None,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            sequence: FrameSequence::default(),
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn failure(stage: Stage, detail: &str) -> ObscuraError {
        ObscuraError::ToolFailed {
            tool: "fake-ffmpeg".into(),
            stage,
            status: Some(1),
            detail: detail.to_string(),
        }
    }
}

impl FrameCodec for FakeCodec {
    fn probe(&self, _video: &Path) -> Result<VideoProbe, ObscuraError> {
        Ok(VideoProbe {
            width: 16,
            height: 12,
            frame_rate: self.frame_rate,
            frame_count: self.frames,
            duration: Duration::from_secs_f64(self.frames as f64 / self.frame_rate),
            has_audio: self.has_audio,
        })
    }

    fn decompose(
        &self,
        _video: &Path,
        frames_dir: &Path,
        progress: &dyn ProgressCallback,
    ) -> Result<Decomposition, ObscuraError> {
        self.record("decompose");
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail_decompose {
            return Err(Self::failure(Stage::Decompose, "invalid data found when processing input"));
        }

        fs::create_dir_all(frames_dir)?;
        for index in 1..=self.frames {
            let path = frames_dir.join(self.sequence.file_name(index));
            if self.corrupt_frame == Some(index) {
                fs::write(&path, b"not a jpeg")?;
            } else {
                gradient(16, 12).save(&path)?;
            }
            progress.on_progress(&ProgressUpdate::new(Stage::Decompose, index, self.frames));
        }

        Ok(Decomposition {
            frame_rate: self.frame_rate,
            frame_count: self.frames,
            extracted_frames: self.frames,
        })
    }

    fn recompose(&self, frames_dir: &Path, output: &Path, _frame_rate: f64) -> Result<(), ObscuraError> {
        self.record("recompose");
        if self.fail_recompose {
            return Err(Self::failure(Stage::Recompose, "encoder exploded"));
        }
        let frames = self.sequence.list(frames_dir)?;
        self.sequence.verify_contiguous(&frames)?;
        fs::write(output, format!("video:{}", frames.len()))?;
        Ok(())
    }

    fn extract_audio(&self, _video: &Path, audio: &Path) -> bool {
        self.record("extract_audio");
        self.has_audio && fs::write(audio, b"audio").is_ok()
    }

    fn merge_audio_video(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), ObscuraError> {
        self.record("merge");
        if self.fail_merge {
            return Err(Self::failure(Stage::MergeAudio, "muxer exploded"));
        }
        let mut merged = fs::read(video)?;
        merged.extend_from_slice(b"+");
        merged.extend_from_slice(&fs::read(audio)?);
        fs::write(output, merged)?;
        Ok(())
    }
}
