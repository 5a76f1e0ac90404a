//! Audio hand-off between the capture thread and the render thread.
//!
//! The producer fills a private staging buffer, then copies it into the shared
//! slot under the mutex. The render thread copies the shared slot into its own
//! snapshot under the same mutex and releases it before any transform runs.
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Result, TransformError};

/// One update worth of two-channel samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl AudioFrame {
    pub fn silent(len: usize) -> Self {
        Self {
            left: vec![0.0; len],
            right: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

#[derive(Debug)]
struct Slot {
    frame: AudioFrame,
    fresh: bool,
}

/// Mutex-guarded region shared with an external audio producer.
#[derive(Debug, Clone)]
pub struct SharedAudio {
    slot: Arc<Mutex<Slot>>,
    len: usize,
}

impl SharedAudio {
    pub fn new(len: usize) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                frame: AudioFrame::silent(len),
                fresh: false,
            })),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn producer(&self) -> AudioProducer {
        AudioProducer {
            shared: self.clone(),
            staging: AudioFrame::silent(self.len),
        }
    }

    /// Copies the shared samples into `snapshot` and clears the fresh flag.
    pub fn snapshot_into(&self, snapshot: &mut AudioSnapshot) -> Result<()> {
        let mut slot = self.lock()?;
        snapshot.frame.left.clone_from(&slot.frame.left);
        snapshot.frame.right.clone_from(&slot.frame.right);
        snapshot.fresh = mem::replace(&mut slot.fresh, false);
        Ok(())
    }

    pub fn snapshot(&self) -> Result<AudioSnapshot> {
        let mut snapshot = AudioSnapshot::new(self.len);
        self.snapshot_into(&mut snapshot)?;
        Ok(snapshot)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Slot>> {
        self.slot
            .lock()
            .map_err(|_| TransformError::Poisoned("shared audio buffer"))
    }
}

/// Writer half held by the capture thread.
#[derive(Debug)]
pub struct AudioProducer {
    shared: SharedAudio,
    staging: AudioFrame,
}

impl AudioProducer {
    /// Fills the staging buffer outside the lock, then copies it into the
    /// shared slot. `fill` receives the samples of the previous publish.
    pub fn publish<F>(&mut self, fill: F) -> Result<()>
    where
        F: FnOnce(&mut [f32], &mut [f32]),
    {
        fill(&mut self.staging.left, &mut self.staging.right);
        let mut slot = self.shared.lock()?;
        slot.frame.left.copy_from_slice(&self.staging.left);
        slot.frame.right.copy_from_slice(&self.staging.right);
        slot.fresh = true;
        Ok(())
    }

    pub fn publish_frame(&mut self, left: &[f32], right: &[f32]) -> Result<()> {
        self.publish(|l, r| {
            copy_clamped(l, left);
            copy_clamped(r, right);
        })
    }
}

fn copy_clamped(dst: &mut [f32], src: &[f32]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
    dst[n..].fill(0.0);
}

/// Render-thread private copy of the shared audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSnapshot {
    pub frame: AudioFrame,
    pub fresh: bool,
}

impl AudioSnapshot {
    pub fn new(len: usize) -> Self {
        Self {
            frame: AudioFrame::silent(len),
            fresh: false,
        }
    }
}

/// Externally driven run flag; clearing it stops the loop after the tick in
/// progress.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn snapshot_consumes_fresh_flag() {
        let shared = SharedAudio::new(4);
        let mut producer = shared.producer();
        producer
            .publish_frame(&[1.0, 2.0, 3.0, 4.0], &[0.5; 4])
            .unwrap();

        let first = shared.snapshot().unwrap();
        assert!(first.fresh);
        assert_eq!(first.frame.left, vec![1.0, 2.0, 3.0, 4.0]);
        let second = shared.snapshot().unwrap();
        assert!(!second.fresh);
        assert_eq!(second.frame, first.frame);
    }

    #[test]
    fn short_input_is_zero_padded() {
        let shared = SharedAudio::new(4);
        shared
            .producer()
            .publish_frame(&[1.0], &[1.0, 1.0, 1.0, 1.0, 1.0])
            .unwrap();
        let snapshot = shared.snapshot().unwrap();
        assert_eq!(snapshot.frame.left, vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(snapshot.frame.right, vec![1.0; 4]);
    }

    #[test]
    fn partial_fill_builds_on_the_last_publish() {
        let shared = SharedAudio::new(3);
        let mut producer = shared.producer();
        producer.publish_frame(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]).unwrap();
        producer.publish_frame(&[7.0, 8.0, 9.0], &[0.0; 3]).unwrap();
        producer
            .publish(|left, right| {
                assert_eq!(&*left, &[7.0, 8.0, 9.0]);
                left[0] = -1.0;
                right[2] = 1.0;
            })
            .unwrap();
        let snapshot = shared.snapshot().unwrap();
        assert_eq!(snapshot.frame.left, vec![-1.0, 8.0, 9.0]);
        assert_eq!(snapshot.frame.right, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn producer_runs_on_another_thread() {
        let shared = SharedAudio::new(8);
        let mut producer = shared.producer();
        let handle = thread::spawn(move || {
            for round in 0..10 {
                producer
                    .publish(|left, right| {
                        left.fill(round as f32);
                        right.fill(-(round as f32));
                    })
                    .unwrap();
            }
        });
        handle.join().unwrap();
        let snapshot = shared.snapshot().unwrap();
        assert_eq!(snapshot.frame.left, vec![9.0; 8]);
        assert_eq!(snapshot.frame.right, vec![-9.0; 8]);
    }

    #[test]
    fn liveness_is_shared() {
        let live = Liveness::new();
        let observer = live.clone();
        assert!(observer.is_alive());
        live.stop();
        assert!(!observer.is_alive());
    }
}
