use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::context::PipelineContext;
use crate::settings::{PipelineMode, StreamSettings, Toggles};

use super::{PipelineRuntime, Supervisor};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Start(PipelineMode),
    End(PipelineMode),
}

/// Runtime that blocks on the run token like the real loops do, and
/// records run boundaries so mode exclusivity can be asserted.
struct FakeRuntime {
    phases: Arc<Mutex<Vec<Phase>>>,
    active: Arc<AtomicBool>,
    fail: bool,
}

impl PipelineRuntime for FakeRuntime {
    fn run(&mut self, settings: &StreamSettings, run: &CancellationToken) -> anyhow::Result<()> {
        assert!(
            !self.active.swap(true, Ordering::SeqCst),
            "two pipeline runs were active at once"
        );
        self.phases.lock().unwrap().push(Phase::Start(settings.mode));

        if self.fail {
            self.phases.lock().unwrap().push(Phase::End(settings.mode));
            self.active.store(false, Ordering::SeqCst);
            anyhow::bail!("simulated source failure");
        }

        while !run.is_cancelled() {
            std::thread::sleep(Duration::from_millis(2));
        }
        self.phases.lock().unwrap().push(Phase::End(settings.mode));
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn settings(mode: PipelineMode) -> StreamSettings {
    StreamSettings {
        mode,
        ..StreamSettings::default()
    }
}

#[test]
fn test_mode_switch_tears_down_before_starting_next() {
    let (ctx, _events) = PipelineContext::new(settings(PipelineMode::Piped), Toggles::default());
    let control = ctx.control();
    let phases = Arc::new(Mutex::new(Vec::new()));

    let worker = {
        let ctx = Arc::clone(&ctx);
        let phases = Arc::clone(&phases);
        std::thread::spawn(move || {
            let mut runtime = FakeRuntime {
                phases,
                active: Arc::new(AtomicBool::new(false)),
                fail: false,
            };
            Supervisor::with_cooldown(ctx, Duration::from_millis(5)).run(&mut runtime);
        })
    };

    std::thread::sleep(Duration::from_millis(30));
    control
        .apply_settings(settings(PipelineMode::Capture))
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));
    control.shutdown();
    worker.join().unwrap();

    let phases = phases.lock().unwrap();
    assert_eq!(
        &phases[..4],
        &[
            Phase::Start(PipelineMode::Piped),
            Phase::End(PipelineMode::Piped),
            Phase::Start(PipelineMode::Capture),
            Phase::End(PipelineMode::Capture),
        ],
        "old mode must end before the new one starts"
    );
}

#[test]
fn test_failed_run_restarts_after_cooldown() {
    let (ctx, _events) = PipelineContext::new(settings(PipelineMode::Piped), Toggles::default());
    let runs = Arc::new(AtomicU32::new(0));
    let phases = Arc::new(Mutex::new(Vec::new()));

    struct CountingRuntime {
        runs: Arc<AtomicU32>,
        inner: FakeRuntime,
    }
    impl PipelineRuntime for CountingRuntime {
        fn run(
            &mut self,
            settings: &StreamSettings,
            run: &CancellationToken,
        ) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.inner.run(settings, run)
        }
    }

    let worker = {
        let ctx = Arc::clone(&ctx);
        let runs = Arc::clone(&runs);
        let phases = Arc::clone(&phases);
        std::thread::spawn(move || {
            let mut runtime = CountingRuntime {
                runs,
                inner: FakeRuntime {
                    phases,
                    active: Arc::new(AtomicBool::new(false)),
                    fail: true,
                },
            };
            Supervisor::with_cooldown(ctx, Duration::from_millis(5)).run(&mut runtime);
        })
    };

    std::thread::sleep(Duration::from_millis(60));
    ctx.shutdown();
    worker.join().unwrap();

    assert!(
        runs.load(Ordering::SeqCst) >= 2,
        "a failing run must be restarted"
    );
}

#[test]
fn test_shutdown_ends_supervisor_without_cooldown_wait() {
    let (ctx, _events) = PipelineContext::new(settings(PipelineMode::Piped), Toggles::default());
    let phases = Arc::new(Mutex::new(Vec::new()));

    let worker = {
        let ctx = Arc::clone(&ctx);
        let phases = Arc::clone(&phases);
        std::thread::spawn(move || {
            let mut runtime = FakeRuntime {
                phases,
                active: Arc::new(AtomicBool::new(false)),
                fail: false,
            };
            // Long cooldown: shutdown must cut through it.
            Supervisor::with_cooldown(ctx, Duration::from_secs(30)).run(&mut runtime);
        })
    };

    std::thread::sleep(Duration::from_millis(30));
    let start = std::time::Instant::now();
    ctx.shutdown();
    worker.join().unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
}
