//! End-to-end pipeline runs with stand-in models.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use aimusic_rs::Error;
use aimusic_rs::audio::{AudioClip, WavEncoding};
use aimusic_rs::config::OutputDirs;
use common::{MELODY_RATE, expected_song_frames, fake_pipeline, fake_pipeline_with_releases};

#[test]
fn test_generate_writes_every_artifact() {
    let tmp = tempfile::tempdir().unwrap();
    let dirs = OutputDirs::new(tmp.path().join("songs"));
    // 2 prompt words + 8 generated = 10 words = 2 segments of 5.
    let mut pipeline = fake_pipeline(dirs.clone(), 8, vec![]);

    let song = pipeline.generate("sunny day").unwrap();

    assert!(song.lyrics.starts_with("sunny day la0"));
    assert_eq!(song.segments.len(), 2);
    assert_eq!(song.segments[0], "sunny day la0 la1 la2");
    assert_eq!(song.mixed_files, vec![dirs.mixed_path(0), dirs.mixed_path(1)]);
    assert_eq!(song.final_song_path, dirs.final_song_path());

    assert!(dirs.melody_path().is_file());
    assert!(dirs.segment_path(0).is_file());
    assert!(dirs.segment_path(1).is_file());

    let mixed = AudioClip::load(dirs.mixed_path(0)).unwrap();
    assert_eq!(mixed.sample_rate, MELODY_RATE);
    assert_eq!(mixed.frames(), MELODY_RATE as usize);

    let final_song = AudioClip::load(&song.final_song_path).unwrap();
    assert_eq!(final_song.frames(), expected_song_frames(2));
}

#[test]
fn test_failed_segment_is_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let dirs = OutputDirs::new(tmp.path());
    // 15 words = 3 segments; the middle one fails.
    let mut pipeline = fake_pipeline(dirs.clone(), 13, vec![1]);

    let song = pipeline.generate("sunny day").unwrap();

    assert_eq!(song.segments.len(), 3);
    assert_eq!(song.mixed_files, vec![dirs.mixed_path(0), dirs.mixed_path(2)]);
    assert!(!dirs.segment_path(1).exists());
    let final_song = AudioClip::load(&song.final_song_path).unwrap();
    assert_eq!(final_song.frames(), expected_song_frames(2));
}

#[test]
fn test_stale_clips_never_reach_the_final_song() {
    let tmp = tempfile::tempdir().unwrap();
    let dirs = OutputDirs::new(tmp.path());
    dirs.ensure().unwrap();
    let stale = dirs.mixed.join("mix_099.wav");
    AudioClip::new(vec![0.9; 4000], MELODY_RATE, 1)
        .save(&stale, WavEncoding::Pcm16)
        .unwrap();

    let mut pipeline = fake_pipeline(dirs.clone(), 3, vec![]);
    let song = pipeline.generate("sunny day").unwrap();

    assert!(!stale.exists());
    assert_eq!(song.mixed_files.len(), 1);
    let final_song = AudioClip::load(&song.final_song_path).unwrap();
    assert_eq!(final_song.frames(), expected_song_frames(1));
}

#[test]
fn test_every_segment_failing_still_writes_a_song() {
    let tmp = tempfile::tempdir().unwrap();
    let dirs = OutputDirs::new(tmp.path());
    let mut pipeline = fake_pipeline(dirs.clone(), 3, vec![0]);

    let song = pipeline.generate("sunny day").unwrap();

    assert!(song.mixed_files.is_empty());
    let final_song = AudioClip::load(&song.final_song_path).unwrap();
    assert!(final_song.is_empty());
}

#[test]
fn test_empty_prompt_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let mut pipeline = fake_pipeline(OutputDirs::new(tmp.path()), 3, vec![]);
    let error = pipeline.generate("  \n ").unwrap_err();
    assert!(matches!(error, Error::InvalidInput(_)));
    assert!(!OutputDirs::new(tmp.path()).final_song_path().exists());
}

#[test]
fn test_models_released_between_phases() {
    let tmp = tempfile::tempdir().unwrap();
    let releases = Arc::new(AtomicUsize::new(0));
    let mut pipeline =
        fake_pipeline_with_releases(OutputDirs::new(tmp.path()), 3, vec![], releases.clone());
    pipeline.generate("one").unwrap();
    pipeline.generate("two").unwrap();
    assert_eq!(releases.load(Ordering::SeqCst), 2);
}
