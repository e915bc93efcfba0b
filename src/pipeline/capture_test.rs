use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::gpu::CapturedFrame;

use super::{run_capture_loop, Acquire, DuplicationOpener, DuplicationSource};

enum Step {
    Frame,
    Timeout,
    Fail,
}

struct ScriptedSource {
    steps: VecDeque<Step>,
    data: Vec<u8>,
}

impl ScriptedSource {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            data: vec![0u8; 4 * 4 * 4],
        }
    }
}

impl DuplicationSource for ScriptedSource {
    fn size(&self) -> (u32, u32) {
        (4, 4)
    }

    fn acquire_frame(
        &mut self,
        _timeout: Duration,
        on_frame: &mut dyn FnMut(CapturedFrame<'_>),
    ) -> anyhow::Result<Acquire> {
        match self.steps.pop_front() {
            Some(Step::Frame) | None => {
                on_frame(CapturedFrame {
                    data: &self.data,
                    width: 4,
                    height: 4,
                    stride: 16,
                });
                Ok(Acquire::Acquired)
            }
            Some(Step::Timeout) => Ok(Acquire::Timeout),
            Some(Step::Fail) => anyhow::bail!("access lost"),
        }
    }
}

struct ScriptedOpener {
    sources: RefCell<VecDeque<ScriptedSource>>,
}

impl DuplicationOpener for ScriptedOpener {
    fn open(&self) -> anyhow::Result<Box<dyn DuplicationSource>> {
        match self.sources.borrow_mut().pop_front() {
            Some(source) => Ok(Box::new(source)),
            None => anyhow::bail!("no display"),
        }
    }
}

#[test]
fn test_two_failures_recreate_session_exactly_twice() {
    // First session dies immediately, so does its replacement; the third
    // one delivers frames.
    let first = ScriptedSource::new(vec![Step::Fail]);
    let second = ScriptedSource::new(vec![Step::Fail]);
    let third = ScriptedSource::new(vec![]);
    let opener = ScriptedOpener {
        sources: RefCell::new(VecDeque::from([second, third])),
    };

    let run = CancellationToken::new();
    let stop = run.clone();
    let mut delivered = 0u64;
    let stats = run_capture_loop(&opener, Box::new(first), &run, 1000, |_frame| {
        delivered += 1;
        if delivered == 3 {
            stop.cancel();
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(stats.reopens, 2, "one recreation per lost session");
    assert_eq!(stats.frames, 3);
    assert_eq!(delivered, 3);
}

#[test]
fn test_timeouts_skip_slots_without_recreating() {
    let source = ScriptedSource::new(vec![Step::Timeout, Step::Timeout, Step::Frame]);
    let opener = ScriptedOpener {
        sources: RefCell::new(VecDeque::new()),
    };

    let run = CancellationToken::new();
    let stop = run.clone();
    let stats = run_capture_loop(&opener, Box::new(source), &run, 1000, |_frame| {
        stop.cancel();
        Ok(())
    })
    .unwrap();

    assert_eq!(stats.reopens, 0);
    assert_eq!(stats.frames, 1);
}

#[test]
fn test_cancelled_loop_returns_immediately() {
    let source = ScriptedSource::new(vec![]);
    let opener = ScriptedOpener {
        sources: RefCell::new(VecDeque::new()),
    };
    let run = CancellationToken::new();
    run.cancel();

    let stats = run_capture_loop(&opener, Box::new(source), &run, 60, |_frame| {
        panic!("no frame expected after cancellation")
    })
    .unwrap();
    assert_eq!(stats, super::CaptureStats::default());
}

#[test]
fn test_frame_callback_error_fails_the_run() {
    let source = ScriptedSource::new(vec![Step::Frame]);
    let opener = ScriptedOpener {
        sources: RefCell::new(VecDeque::new()),
    };
    let run = CancellationToken::new();

    let result = run_capture_loop(&opener, Box::new(source), &run, 1000, |_frame| {
        anyhow::bail!("device lost")
    });
    assert!(result.is_err());
}
