//! Song manager queueing with stand-in models.

mod common;

use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use aimusic_rs::config::{OutputDirs, PipelineConfig};
use aimusic_rs::manager::SongManager;
use aimusic_rs::pipeline::{LyricModel, SongPipeline};
use aimusic_rs::{Error, Result};
use common::{FakeMelody, FakeVoice, fake_pipeline};
use tokio::sync::mpsc;

/// Blocks every call until the test lets it go.
struct GatedLyrics {
    started: mpsc::UnboundedSender<()>,
    release: std_mpsc::Receiver<()>,
}

impl LyricModel for GatedLyrics {
    fn generate_lyrics(&mut self, prompt: &str) -> Result<String> {
        let _ = self.started.send(());
        self.release
            .recv()
            .map_err(|_| Error::Manager("gate closed".into()))?;
        Ok(format!("{prompt} and a chorus"))
    }
}

#[tokio::test]
async fn test_manager_runs_requests() {
    let tmp = tempfile::tempdir().unwrap();
    let manager = SongManager::spawn(fake_pipeline(OutputDirs::new(tmp.path()), 3, vec![]), 4);

    let song = manager.generate("rainy night").await.unwrap();
    assert!(song.lyrics.starts_with("rainy night"));
    assert!(song.final_song_path.is_file());

    let error = manager.generate(" ").await.unwrap_err();
    assert!(matches!(error, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_full_queue_reports_busy() {
    let tmp = tempfile::tempdir().unwrap();
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let (release_tx, release_rx) = std_mpsc::channel();
    let pipeline = SongPipeline::new(
        Box::new(GatedLyrics {
            started: started_tx,
            release: release_rx,
        }),
        Box::new(FakeMelody),
        Box::new(FakeVoice {
            fail_on: vec![],
            calls: 0,
        }),
        OutputDirs::new(tmp.path()),
        PipelineConfig::default(),
    );
    let manager = SongManager::spawn(pipeline, 1);

    // First request occupies the worker.
    let running = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.generate("first").await })
    };
    started_rx.recv().await.unwrap();

    // Second request fills the queue; polling it once enqueues it.
    let mut queued = Box::pin(manager.generate("second"));
    assert!(tokio::time::timeout(Duration::from_millis(50), &mut queued).await.is_err());

    // Third request has nowhere to go.
    let error = manager.generate("third").await.unwrap_err();
    assert!(matches!(error, Error::Busy(1)));

    release_tx.send(()).unwrap();
    release_tx.send(()).unwrap();
    assert!(running.await.unwrap().is_ok());
    assert!(queued.await.is_ok());
}
