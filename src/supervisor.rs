use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::context::PipelineContext;
use crate::settings::StreamSettings;

const RESTART_COOLDOWN: Duration = Duration::from_secs(1);
const COOLDOWN_POLL: Duration = Duration::from_millis(20);

/// One pipeline run with a fixed settings snapshot. Returns when the run
/// token is cancelled, the source ends, or a fatal error occurs.
pub trait PipelineRuntime {
    fn run(&mut self, settings: &StreamSettings, run: &CancellationToken) -> anyhow::Result<()>;
}

/// Keeps exactly one pipeline run alive at a time. Each pass snapshots
/// the current settings, issues a fresh run token and blocks in the
/// runtime; a settings change cancels the token and the next pass picks
/// up the new snapshot. Failed runs restart after a cooldown so a broken
/// source cannot spin the loop hot.
pub struct Supervisor {
    ctx: Arc<PipelineContext>,
    cooldown: Duration,
}

impl Supervisor {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self::with_cooldown(ctx, RESTART_COOLDOWN)
    }

    pub fn with_cooldown(ctx: Arc<PipelineContext>, cooldown: Duration) -> Self {
        Self { ctx, cooldown }
    }

    pub fn run(&self, runtime: &mut dyn PipelineRuntime) {
        while !self.ctx.is_shutdown() {
            let settings = self.ctx.settings();
            let run = self.ctx.begin_run();
            log::info!(
                "pipeline run starting: mode={} {}x{}@{}",
                settings.mode,
                settings.width,
                settings.height,
                settings.fps
            );
            match runtime.run(&settings, &run) {
                Ok(()) => log::info!("pipeline run ended"),
                Err(e) => log::error!("pipeline run failed: {:#}", e),
            }
            if self.ctx.is_shutdown() {
                break;
            }
            self.sleep_cooldown();
        }
        log::info!("supervisor stopped");
    }

    fn sleep_cooldown(&self) {
        let deadline = Instant::now() + self.cooldown;
        loop {
            let now = Instant::now();
            if now >= deadline || self.ctx.is_shutdown() {
                return;
            }
            std::thread::sleep(COOLDOWN_POLL.min(deadline - now));
        }
    }
}

#[cfg(test)]
#[path = "supervisor_test.rs"]
mod supervisor_test;
