//! Batch scheduler integration tests.

mod common;

use std::fs;

use common::{Recorder, write_images};
use obscura::{NoOpProgress, ObscuraError, PerturbationConfig, Stage, batch, process_directory};

#[test]
fn corrupt_item_is_reported_while_siblings_succeed() {
    let directory = tempfile::tempdir().unwrap();
    let input = directory.path().join("in");
    let output = directory.path().join("out");
    write_images(&input, 5);
    fs::write(input.join("broken.png"), b"definitely not a png").unwrap();
    let recorder = Recorder::default();

    let report = process_directory(&input, &output, &PerturbationConfig::default(), &recorder, 3).unwrap();

    assert_eq!(report.total, 6);
    assert_eq!(report.completed(), 6);
    assert_eq!(report.succeeded(), 5);
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].item, "broken.png");
    assert!(!output.join("broken.png").exists());
    for index in 0..5 {
        assert!(output.join(format!("img_{index:03}.jpg")).is_file());
    }

    let updates = recorder.updates();
    assert_eq!(updates.len(), 6);
    assert!(updates.iter().all(|update| update.stage == Stage::PerturbFrames && update.total == 6));
    let counts: Vec<u64> = updates.iter().map(|update| update.current).collect();
    assert_eq!(counts, vec![1, 2, 3, 4, 5, 6]);

    match report.into_result() {
        Err(ObscuraError::PartialBatchFailure { failed, total, items }) => {
            assert_eq!((failed, total), (1, 6));
            assert!(items[0].starts_with("broken.png: "));
        }
        other => panic!("expected partial failure, got {other:?}"),
    }
}

#[test]
fn empty_directory_is_a_no_op() {
    let directory = tempfile::tempdir().unwrap();
    let input = directory.path().join("empty");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("notes.txt"), b"skip me").unwrap();
    let recorder = Recorder::default();

    let report = process_directory(
        &input,
        &directory.path().join("out"),
        &PerturbationConfig::default(),
        &recorder,
        2,
    )
    .unwrap();

    assert_eq!(report.total, 0);
    assert!(report.is_success());
    assert!(recorder.updates().is_empty());
}

#[test]
fn eligible_files_match_extensions_case_insensitively() {
    let directory = tempfile::tempdir().unwrap();
    for name in ["b.PNG", "a.jpeg", "c.Bmp", "d.gif", "e.txt", "f"] {
        fs::write(directory.path().join(name), b"x").unwrap();
    }
    fs::create_dir(directory.path().join("nested.jpg")).unwrap();

    let names = batch::eligible_files(directory.path()).unwrap();
    assert_eq!(names, vec!["a.jpeg", "b.PNG", "c.Bmp", "d.gif"]);
}

#[test]
fn seeded_batches_are_reproducible() {
    let directory = tempfile::tempdir().unwrap();
    let input = directory.path().join("in");
    fs::create_dir_all(&input).unwrap();
    for index in 0..4 {
        common::gradient(20, 20)
            .save(input.join(format!("frame_{index}.png")))
            .unwrap();
    }
    let config = PerturbationConfig::sparse(0.2).with_seed(99);

    let first = directory.path().join("first");
    let second = directory.path().join("second");
    process_directory(&input, &first, &config, &NoOpProgress, 4).unwrap();
    process_directory(&input, &second, &config, &NoOpProgress, 1).unwrap();

    for index in 0..4 {
        let name = format!("frame_{index}.png");
        assert_eq!(fs::read(first.join(&name)).unwrap(), fs::read(second.join(&name)).unwrap());
        assert_ne!(fs::read(first.join(&name)).unwrap(), fs::read(input.join(&name)).unwrap());
    }
    assert_ne!(
        fs::read(first.join("frame_0.png")).unwrap(),
        fs::read(first.join("frame_1.png")).unwrap()
    );
}

#[test]
fn invalid_configuration_fails_the_whole_batch() {
    let directory = tempfile::tempdir().unwrap();
    let input = directory.path().join("in");
    write_images(&input, 1);

    let error = process_directory(
        &input,
        &directory.path().join("out"),
        &PerturbationConfig::block(8, -0.5, 0.1),
        &NoOpProgress,
        1,
    )
    .unwrap_err();
    assert!(error.is_configuration_error());
}

#[test]
fn missing_input_directory_is_an_error() {
    let directory = tempfile::tempdir().unwrap();
    let result = process_directory(
        &directory.path().join("missing"),
        &directory.path().join("out"),
        &PerturbationConfig::default(),
        &NoOpProgress,
        1,
    );
    assert!(matches!(result, Err(ObscuraError::IoError(_))));
}
