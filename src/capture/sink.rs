//! Persistence of asynchronously delivered camera frames.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::mailbox::Mailbox;
use crate::device::{FrameHandler, RawFrame};
use crate::error::{ScanError, ScanResult};
use crate::pattern::Orientation;

/// A delivered frame with its session identity.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// 1-based delivery index.
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
    pub orientation: Orientation,
}

/// What the sink did with one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Persisted,
    /// Index beyond the session's frame count.
    Discarded,
    /// Writing the file failed.
    Failed,
}

/// Completion signal sent to the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEvent {
    pub index: usize,
    pub outcome: DeliveryOutcome,
}

/// Counters accumulated over a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub delivered: usize,
    pub persisted: usize,
    pub discarded: usize,
    pub io_failures: usize,
}

/// Result of checking the output directory for the expected files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub expected: usize,
    pub found: usize,
    pub missing: Vec<PathBuf>,
}

impl VerificationReport {
    pub fn is_complete(&self) -> bool {
        self.found == self.expected
    }
}

/// File name for frame `index`: `I001_V.png`, `I005_H.png`, ...
pub fn frame_file_name(index: usize, orientation: Orientation) -> String {
    format!("I{:03}_{}.png", index, orientation.tag())
}

/// Receives frames on the camera's delivery thread and writes them as PNG.
pub struct FrameSink {
    save_dir: PathBuf,
    total_frames: usize,
    steps_per_orientation: usize,
    counter: AtomicUsize,
    persisted: AtomicUsize,
    discarded: AtomicUsize,
    io_failures: AtomicUsize,
    latest: Mailbox<CapturedFrame>,
    events: Sender<FrameEvent>,
}

impl FrameSink {
    /// Create a sink for a scan of `steps` phase steps per orientation.
    ///
    /// The save directory is created if needed. The returned receiver gets one
    /// [`FrameEvent`] per delivery.
    pub fn new(save_dir: &Path, steps: usize) -> ScanResult<(Self, Receiver<FrameEvent>)> {
        if steps == 0 {
            return Err(ScanError::Validation("steps must be at least 1".into()));
        }
        std::fs::create_dir_all(save_dir).map_err(|e| {
            ScanError::Configuration(format!(
                "cannot create save directory {}: {}",
                save_dir.display(),
                e
            ))
        })?;

        let total_frames = steps * 2;
        let (events, receiver) = bounded(total_frames);

        let sink = Self {
            save_dir: save_dir.to_path_buf(),
            total_frames,
            steps_per_orientation: steps,
            counter: AtomicUsize::new(0),
            persisted: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
            io_failures: AtomicUsize::new(0),
            latest: Mailbox::new(),
            events,
        };
        Ok((sink, receiver))
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// Path where frame `index` is written.
    pub fn frame_path(&self, index: usize) -> PathBuf {
        let orientation = Orientation::for_frame(index, self.steps_per_orientation);
        self.save_dir.join(frame_file_name(index, orientation))
    }

    /// Wrap the sink into a camera frame handler.
    pub fn handler(self: &Arc<Self>) -> FrameHandler {
        let sink = Arc::clone(self);
        Box::new(move |frame| {
            sink.deliver(frame);
        })
    }

    /// Handle one delivered frame. Called from the delivery thread.
    pub fn deliver(&self, frame: RawFrame) -> DeliveryOutcome {
        let index = 1 + self.counter.fetch_add(1, Ordering::AcqRel);
        log::debug!(
            "Frame delivered: {}x{} index {}/{}",
            frame.width,
            frame.height,
            index,
            self.total_frames
        );

        let outcome = if index > self.total_frames {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "Discarding surplus frame {} (session expects {})",
                index,
                self.total_frames
            );
            DeliveryOutcome::Discarded
        } else {
            let captured = CapturedFrame {
                index,
                width: frame.width,
                height: frame.height,
                data: frame.data,
                orientation: Orientation::for_frame(index, self.steps_per_orientation),
            };
            let outcome = match self.persist(&captured) {
                Ok(path) => {
                    self.persisted.fetch_add(1, Ordering::Relaxed);
                    log::info!("Saved frame {} to {}", index, path.display());
                    DeliveryOutcome::Persisted
                }
                Err(e) => {
                    self.io_failures.fetch_add(1, Ordering::Relaxed);
                    log::error!("Failed to save frame {}: {}", index, e);
                    DeliveryOutcome::Failed
                }
            };
            self.latest.post(captured);
            outcome
        };

        match self.events.try_send(FrameEvent { index, outcome }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::debug!("Frame event queue full, dropping event for frame {}", index)
            }
            Err(TrySendError::Disconnected(_)) => {}
        }

        outcome
    }

    fn persist(&self, frame: &CapturedFrame) -> ScanResult<PathBuf> {
        let image = image::GrayImage::from_raw(frame.width, frame.height, frame.data.to_vec())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "{} bytes is not a {}x{} Mono8 frame",
                        frame.data.len(),
                        frame.width,
                        frame.height
                    ),
                )
            })?;

        let path = self.frame_path(frame.index);
        image
            .save(&path)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(path)
    }

    /// Most recent in-range frame, if not yet taken.
    pub fn take_latest(&self) -> Option<CapturedFrame> {
        self.latest.take()
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            delivered: self.counter.load(Ordering::Acquire),
            persisted: self.persisted.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            io_failures: self.io_failures.load(Ordering::Relaxed),
        }
    }

    /// Check which of the expected files exist on disk.
    pub fn verify(&self) -> VerificationReport {
        let mut report = VerificationReport {
            expected: self.total_frames,
            ..VerificationReport::default()
        };
        for index in 1..=self.total_frames {
            let path = self.frame_path(index);
            if path.is_file() {
                report.found += 1;
            } else {
                report.missing.push(path);
            }
        }
        log::info!(
            "Verification: {}/{} frames present in {}",
            report.found,
            report.expected,
            self.save_dir.display()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(width: u32, height: u32, value: u8) -> RawFrame {
        RawFrame {
            width,
            height,
            data: Bytes::from(vec![value; (width * height) as usize]),
        }
    }

    #[test]
    fn test_file_names() {
        assert_eq!(frame_file_name(1, Orientation::Vertical), "I001_V.png");
        assert_eq!(frame_file_name(12, Orientation::Horizontal), "I012_H.png");
    }

    #[test]
    fn test_partial_delivery_persists_each_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, events) = FrameSink::new(dir.path(), 2).unwrap();

        for value in [10, 20, 30] {
            assert_eq!(sink.deliver(frame(4, 2, value)), DeliveryOutcome::Persisted);
        }

        assert!(dir.path().join("I001_V.png").is_file());
        assert!(dir.path().join("I002_V.png").is_file());
        assert!(dir.path().join("I003_H.png").is_file());
        assert!(!dir.path().join("I004_H.png").exists());

        let report = sink.verify();
        assert_eq!(report.expected, 4);
        assert_eq!(report.found, 3);
        assert_eq!(report.missing, vec![dir.path().join("I004_H.png")]);

        let indices: Vec<usize> = events.try_iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);

        let saved = image::open(dir.path().join("I002_V.png")).unwrap().to_luma8();
        assert_eq!(saved.dimensions(), (4, 2));
        assert!(saved.pixels().all(|p| p[0] == 20));
    }

    #[test]
    fn test_surplus_frames_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _events) = FrameSink::new(dir.path(), 1).unwrap();

        assert_eq!(sink.deliver(frame(2, 2, 1)), DeliveryOutcome::Persisted);
        assert_eq!(sink.deliver(frame(2, 2, 2)), DeliveryOutcome::Persisted);
        assert_eq!(sink.deliver(frame(2, 2, 3)), DeliveryOutcome::Discarded);

        let stats = sink.stats();
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.persisted, 2);
        assert_eq!(stats.discarded, 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
        assert!(sink.verify().is_complete());
    }

    #[test]
    fn test_malformed_frame_counts_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, events) = FrameSink::new(dir.path(), 1).unwrap();

        let short = RawFrame {
            width: 4,
            height: 4,
            data: Bytes::from(vec![0u8; 3]),
        };
        assert_eq!(sink.deliver(short), DeliveryOutcome::Failed);
        assert_eq!(sink.stats().io_failures, 1);
        assert_eq!(
            events.try_recv().unwrap(),
            FrameEvent {
                index: 1,
                outcome: DeliveryOutcome::Failed
            }
        );
        // The index is consumed even though nothing was written
        assert_eq!(sink.deliver(frame(2, 2, 0)), DeliveryOutcome::Persisted);
        assert!(dir.path().join("I002_H.png").is_file());
    }

    #[test]
    fn test_existing_directory_and_files_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("I001_V.png"), b"stale").unwrap();

        let (sink, _events) = FrameSink::new(dir.path(), 1).unwrap();
        sink.deliver(frame(3, 1, 200));

        let saved = image::open(dir.path().join("I001_V.png")).unwrap().to_luma8();
        assert_eq!(saved.get_pixel(2, 0)[0], 200);

        // Creating a second sink over the same directory is fine
        assert!(FrameSink::new(dir.path(), 1).is_ok());
    }

    #[test]
    fn test_concurrent_deliveries_get_unique_indices() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, events) = FrameSink::new(dir.path(), 4).unwrap();
        let sink = Arc::new(sink);

        let workers: Vec<_> = (0..3)
            .map(|_| {
                let handler = sink.handler();
                thread::spawn(move || {
                    for _ in 0..4 {
                        handler(frame(2, 2, 7));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let stats = sink.stats();
        assert_eq!(stats.delivered, 12);
        assert_eq!(stats.persisted, 8);
        assert_eq!(stats.discarded, 4);
        assert!(sink.verify().is_complete());

        let mut indices: Vec<usize> = events.try_iter().map(|e| e.index).collect();
        indices.sort_unstable();
        // Channel holds total_frames events; later ones are dropped when full
        assert_eq!(indices.len(), 8);
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_latest_frame_mailbox() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _events) = FrameSink::new(dir.path(), 2).unwrap();
        assert!(sink.take_latest().is_none());

        sink.deliver(frame(2, 1, 5));
        sink.deliver(frame(2, 1, 6));
        let latest = sink.take_latest().unwrap();
        assert_eq!(latest.index, 2);
        assert_eq!(latest.orientation, Orientation::Vertical);
        assert_eq!(latest.data.as_ref(), &[6, 6]);
        assert!(sink.take_latest().is_none());
    }

    #[test]
    fn test_zero_steps_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FrameSink::new(dir.path(), 0),
            Err(ScanError::Validation(_))
        ));
    }
}
