//! Master-volume fades run as a repeating job on the control worker.

use tracing::debug;

use crate::command::CommandSender;
use crate::jobs::{JobContext, Repeat, REPEAT_INTERVAL};

/// Steps the master volume toward a target once per worker cycle.
///
/// Stops on its own when the target is reached.
pub struct VolumeFadeJob {
    sender: CommandSender,
    target: f32,
    step: f32,
}

impl VolumeFadeJob {
    /// Fade from the current volume to `target` over roughly `seconds`.
    pub fn new(sender: CommandSender, target: f32, seconds: f32) -> Self {
        let target = target.max(0.0);
        let cycles = (seconds.max(0.0) / REPEAT_INTERVAL.as_secs_f32()).ceil().max(1.0);
        let step = (target - sender.volume()).abs() / cycles;
        debug!(target, seconds, "volume fade started");
        Self {
            sender,
            target,
            step,
        }
    }
}

impl Repeat for VolumeFadeJob {
    fn execute(&mut self, _ctx: &JobContext) {
        let current = self.sender.volume();
        let next = if (self.target - current).abs() <= self.step {
            self.target
        } else if self.target > current {
            current + self.step
        } else {
            current - self.step
        };
        self.sender.set_volume(next);
        if next == self.target {
            debug!(volume = next, "volume fade finished");
        }
    }

    fn should_run(&self) -> bool {
        self.sender.volume() != self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::command::EngineCommand;
    use crate::jobs::{JobQueue, JobStatus, JobWorker, ThreadingMode};

    #[test]
    fn fade_reaches_target_and_stops() {
        let queue = Arc::new(JobQueue::new());
        let sender = CommandSender::new(queue.clone(), 1.0);
        let mut worker = JobWorker::new(ThreadingMode::SingleThreaded);

        // 40 ms rounds up to three cycles
        let handle = worker.spawn_repeating(VolumeFadeJob::new(sender.clone(), 0.0, 0.04), false);
        for _ in 0..5 {
            worker.pump();
        }

        assert_eq!(sender.volume(), 0.0);
        assert_eq!(handle.status(), JobStatus::Stopped);

        let mut batch = Vec::new();
        queue.take_all(&mut batch);
        let volumes: Vec<f32> = batch
            .iter()
            .filter_map(|c| match c {
                EngineCommand::SetVolume(v) => Some(*v),
                _ => None,
            })
            .collect();
        assert_eq!(volumes.len(), 3);
        assert_eq!(volumes.last(), Some(&0.0));
    }
}
