//! Job runner tests: background execution, admission limits and the
//! records they leave in the store.

mod common;

use std::fs;
use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{FakeCodec, gradient, leftover_workspaces};
use image::ImageFormat;
use obscura::{JobRunner, JobStatus, PerturbationConfig, ServiceSettings, VideoRequest};

fn settings(video_slots: usize) -> ServiceSettings {
    ServiceSettings {
        video_slots,
        image_slots: 4,
        frame_workers: 2,
        ..ServiceSettings::for_cpus(4)
    }
}

#[test]
fn submitted_job_completes_in_background() {
    let directory = tempfile::tempdir().unwrap();
    let runner = JobRunner::with_codec(settings(1), Arc::new(FakeCodec::new(6)));

    let handle = runner
        .submit_video(
            VideoRequest::new(directory.path().join("in.mp4"), directory.path().join("out.mp4"))
                .with_source_name("holiday.mp4"),
        )
        .unwrap();
    let id = handle.id();
    assert!(runner.store().get(id).is_some());

    let record = handle.join().unwrap();
    assert_eq!(record.id, id);
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.source_name, "holiday.mp4");
    assert_eq!(record.progress.percent, 100);
    assert!(record.error.is_none());
    let metadata = record.metadata.unwrap();
    assert_eq!(metadata.frame_count, 6);
    assert!(metadata.has_audio);
    assert!(directory.path().join("out.mp4").exists());
}

#[test]
fn invalid_configuration_is_rejected_synchronously() {
    let directory = tempfile::tempdir().unwrap();
    let runner = JobRunner::with_codec(settings(1), Arc::new(FakeCodec::new(1)));

    let result = runner.submit_video(
        VideoRequest::new(directory.path().join("in.mp4"), directory.path().join("out.mp4"))
            .with_config(PerturbationConfig::sparse(2.0)),
    );

    assert!(result.unwrap_err().is_configuration_error());
    assert!(runner.store().is_empty());
}

#[test]
fn failed_job_records_error_and_removes_workspace() {
    let directory = tempfile::tempdir().unwrap();
    let mut codec = FakeCodec::new(3);
    codec.fail_recompose = true;
    let runner = JobRunner::with_codec(settings(1), Arc::new(codec));

    let record = runner
        .submit_video(VideoRequest::new(
            directory.path().join("in.mp4"),
            directory.path().join("fails.mp4"),
        ))
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(record.status, JobStatus::Error);
    assert!(!record.error.unwrap().is_empty());
    assert!(record.metadata.is_none());
    assert!(!directory.path().join("fails.mp4").exists());
    assert!(leftover_workspaces(directory.path()).is_empty());
}

#[test]
fn video_gate_bounds_concurrent_jobs() {
    let directory = tempfile::tempdir().unwrap();
    let mut codec = FakeCodec::new(2);
    codec.delay = Duration::from_millis(80);
    let codec = Arc::new(codec);
    let runner = JobRunner::with_codec(settings(1), codec.clone());

    let handles: Vec<_> = (0..3)
        .map(|index| {
            runner
                .submit_video(VideoRequest::new(
                    directory.path().join("in.mp4"),
                    directory.path().join(format!("out_{index}.mp4")),
                ))
                .unwrap()
        })
        .collect();

    let store = runner.store();
    while store.count_with_status(JobStatus::Completed) + store.count_with_status(JobStatus::Error) < 3 {
        assert!(store.count_with_status(JobStatus::Processing) <= 1);
        thread::sleep(Duration::from_millis(5));
    }

    for handle in handles {
        assert_eq!(handle.join().unwrap().status, JobStatus::Completed);
    }
    assert_eq!(codec.max_active.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(runner.video_gate().in_use(), 0);
}

#[test]
fn excess_jobs_wait_as_pending() {
    let directory = tempfile::tempdir().unwrap();
    let mut codec = FakeCodec::new(1);
    codec.delay = Duration::from_millis(200);
    let runner = JobRunner::with_codec(settings(1), Arc::new(codec));

    let first = runner
        .submit_video(VideoRequest::new(
            directory.path().join("in.mp4"),
            directory.path().join("first.mp4"),
        ))
        .unwrap();
    while runner.store().get(first.id()).unwrap().status == JobStatus::Pending {
        thread::sleep(Duration::from_millis(2));
    }

    let second = runner
        .submit_video(VideoRequest::new(
            directory.path().join("in.mp4"),
            directory.path().join("second.mp4"),
        ))
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(runner.store().get(second.id()).unwrap().status, JobStatus::Pending);

    assert_eq!(first.join().unwrap().status, JobStatus::Completed);
    assert_eq!(second.join().unwrap().status, JobStatus::Completed);
}

#[test]
fn input_is_removed_when_requested() {
    let directory = tempfile::tempdir().unwrap();
    let input = directory.path().join("upload.mp4");
    fs::write(&input, b"uploaded").unwrap();
    let runner = JobRunner::with_codec(settings(1), Arc::new(FakeCodec::new(2)));

    let record = runner
        .submit_video(
            VideoRequest::new(&input, directory.path().join("result.mp4")).remove_input_when_done(true),
        )
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(record.status, JobStatus::Completed);
    assert!(!input.exists());
}

#[test]
fn image_requests_are_perturbed_in_memory() {
    let runner = JobRunner::with_codec(settings(1), Arc::new(FakeCodec::new(1)));
    let mut png = Vec::new();
    image::DynamicImage::ImageRgb8(gradient(32, 24))
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();

    let encoded = runner
        .perturb_image(&png, "Photo.JPG", &PerturbationConfig::sparse(0.1))
        .unwrap();
    assert_eq!(encoded.media_type, "image/jpeg");
    assert_eq!(encoded.file_name, "processed_Photo.JPG");
    assert_eq!(
        image::guess_format(&encoded.bytes).unwrap(),
        ImageFormat::Jpeg
    );

    let encoded = runner
        .perturb_image(&png, "diagram.webp", &PerturbationConfig::sparse(0.1))
        .unwrap();
    assert_eq!(encoded.media_type, "image/png");
    assert_eq!(runner.image_gate().in_use(), 0);
}
