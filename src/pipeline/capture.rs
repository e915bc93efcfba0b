use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::gpu::CapturedFrame;

use super::pacer::FramePacer;

const ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Outcome of one acquire attempt. A timeout is routine: the desktop
/// simply had no new content within the window.
pub enum Acquire {
    Acquired,
    Timeout,
}

/// A live desktop duplication session. Dropped and reopened whenever the
/// platform invalidates it (display mode change, exclusive fullscreen).
pub trait DuplicationSource {
    fn size(&self) -> (u32, u32);

    /// Waits up to `timeout` for a new desktop frame and hands it to
    /// `on_frame` while the backing buffer is still mapped.
    fn acquire_frame(
        &mut self,
        timeout: Duration,
        on_frame: &mut dyn FnMut(CapturedFrame<'_>),
    ) -> anyhow::Result<Acquire>;
}

/// Factory for duplication sessions, used for the initial open and every
/// recreation after a lost session.
pub trait DuplicationOpener: Send {
    fn open(&self) -> anyhow::Result<Box<dyn DuplicationSource>>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub reopens: u64,
}

/// Paced desktop capture loop. Acquire failures invalidate the session
/// and recreate it through `opener`; acquire timeouts just skip the
/// frame slot. Runs until cancelled.
pub fn run_capture_loop(
    opener: &dyn DuplicationOpener,
    source: Box<dyn DuplicationSource>,
    run: &CancellationToken,
    fps: u32,
    mut on_frame: impl FnMut(CapturedFrame<'_>) -> anyhow::Result<()>,
) -> anyhow::Result<CaptureStats> {
    let mut pacer = FramePacer::new(fps);
    let mut source = Some(source);
    let mut stats = CaptureStats::default();

    while !run.is_cancelled() {
        if !pacer.ready(Instant::now()) {
            std::thread::sleep(IDLE_SLEEP);
            continue;
        }

        let Some(active) = source.as_mut() else {
            match opener.open() {
                Ok(reopened) => {
                    stats.reopens += 1;
                    source = Some(reopened);
                }
                Err(e) => {
                    log::warn!("duplication reopen failed: {:#}", e);
                    std::thread::sleep(ACQUIRE_TIMEOUT);
                }
            }
            continue;
        };

        let mut frame_result = Ok(());
        match active.acquire_frame(ACQUIRE_TIMEOUT, &mut |frame| {
            frame_result = on_frame(frame);
        }) {
            Ok(Acquire::Acquired) => {
                stats.frames += 1;
                frame_result?;
            }
            Ok(Acquire::Timeout) => {}
            Err(e) => {
                log::warn!("duplication lost ({:#}), recreating", e);
                source = None;
            }
        }
    }
    Ok(stats)
}

#[cfg(feature = "duplication")]
pub use scrap_backend::ScrapOpener;

#[cfg(feature = "duplication")]
mod scrap_backend {
    use std::io::ErrorKind;
    use std::time::Duration;

    use anyhow::Context as _;

    use crate::gpu::CapturedFrame;

    use super::{Acquire, DuplicationOpener, DuplicationSource};

    /// Display duplication through scrap (DXGI on Windows, X11/quartz
    /// elsewhere). Always captures the primary display.
    pub struct ScrapOpener;

    impl DuplicationOpener for ScrapOpener {
        fn open(&self) -> anyhow::Result<Box<dyn DuplicationSource>> {
            let display = scrap::Display::primary().context("query primary display")?;
            let capturer = scrap::Capturer::new(display).context("open display duplication")?;
            Ok(Box::new(ScrapSource { capturer }))
        }
    }

    struct ScrapSource {
        capturer: scrap::Capturer,
    }

    impl DuplicationSource for ScrapSource {
        fn size(&self) -> (u32, u32) {
            (self.capturer.width() as u32, self.capturer.height() as u32)
        }

        fn acquire_frame(
            &mut self,
            _timeout: Duration,
            on_frame: &mut dyn FnMut(CapturedFrame<'_>),
        ) -> anyhow::Result<Acquire> {
            let (width, height) = self.size();
            match self.capturer.frame() {
                Ok(frame) => {
                    // scrap rows can carry platform padding
                    let stride = frame.len() / height.max(1) as usize;
                    on_frame(CapturedFrame {
                        data: &frame,
                        width,
                        height,
                        stride,
                    });
                    Ok(Acquire::Acquired)
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(Acquire::Timeout),
                Err(e) => Err(e).context("acquire duplication frame"),
            }
        }
    }
}

#[cfg(not(feature = "duplication"))]
pub use null_backend::NullOpener;

#[cfg(not(feature = "duplication"))]
mod null_backend {
    use super::{DuplicationOpener, DuplicationSource};

    pub struct NullOpener;

    impl DuplicationOpener for NullOpener {
        fn open(&self) -> anyhow::Result<Box<dyn DuplicationSource>> {
            anyhow::bail!("built without display duplication support")
        }
    }
}

/// The opener the shipped binary uses.
pub fn default_opener() -> Box<dyn DuplicationOpener> {
    #[cfg(feature = "duplication")]
    {
        Box::new(ScrapOpener)
    }
    #[cfg(not(feature = "duplication"))]
    {
        Box::new(NullOpener)
    }
}

#[cfg(test)]
#[path = "capture_test.rs"]
mod capture_test;
