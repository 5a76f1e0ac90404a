use std::thread;
use std::time::{Duration, Instant};

use tracing::info;
use transform::{Liveness, SharedAudio};

use crate::backend::GraphicsBackend;
use crate::pipeline::{Pipeline, RenderError};

/// Ticks a pipeline at a fixed rate until the liveness flag clears.
#[derive(Debug, Clone)]
pub struct RenderLoop {
    frame_interval: Duration,
    liveness: Liveness,
    limit: Option<Duration>,
}

impl RenderLoop {
    pub fn new(frame_rate: u32, liveness: Liveness) -> Self {
        Self {
            frame_interval: Duration::from_secs_f64(1.0 / f64::from(frame_rate.max(1))),
            liveness,
            limit: None,
        }
    }

    /// Stops after `limit` of wall time as well.
    pub fn with_limit(mut self, limit: Option<Duration>) -> Self {
        self.limit = limit;
        self
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Returns the number of ticks rendered. A tick already started always
    /// completes before the flag is checked again.
    pub fn run<B: GraphicsBackend + ?Sized>(
        &self,
        pipeline: &mut Pipeline,
        backend: &mut B,
        audio: &SharedAudio,
    ) -> Result<u64, RenderError> {
        let started = Instant::now();
        let mut deadline = started;
        let mut ticks = 0u64;
        while self.liveness.is_alive() {
            pipeline.render_tick(backend, audio)?;
            ticks += 1;
            if self.limit.is_some_and(|limit| started.elapsed() >= limit) {
                break;
            }
            deadline += self.frame_interval;
            let now = Instant::now();
            match deadline.checked_duration_since(now) {
                Some(wait) => thread::sleep(wait),
                // Running behind; don't try to catch up with a burst.
                None => deadline = now,
            }
        }
        info!(ticks, elapsed = ?started.elapsed(), "render loop stopped");
        Ok(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_follows_frame_rate() {
        let render_loop = RenderLoop::new(50, Liveness::new());
        assert_eq!(render_loop.frame_interval(), Duration::from_millis(20));
        let zero = RenderLoop::new(0, Liveness::new());
        assert_eq!(zero.frame_interval(), Duration::from_secs(1));
    }
}
