pub mod capture;
pub mod pacer;
pub mod piped;

pub use capture::{default_opener, Acquire, CaptureStats, DuplicationOpener, DuplicationSource};
pub use pacer::FramePacer;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::context::{PipelineContext, PipelineEvent};
use crate::gpu::GpuEngine;
use crate::net::BroadcastSink;
use crate::settings::{clamp_capture_target, PipelineMode, StreamSettings};
use crate::supervisor::PipelineRuntime;

/// The real pipeline runtime: owns the GPU engine, the UDP sink and the
/// duplication opener, and runs whichever producer the settings select.
pub struct HubRuntime {
    engine: GpuEngine,
    sink: Arc<BroadcastSink>,
    opener: Box<dyn DuplicationOpener>,
    transport_addr: String,
    ctx: Arc<PipelineContext>,
}

impl HubRuntime {
    pub fn new(
        ctx: Arc<PipelineContext>,
        opener: Box<dyn DuplicationOpener>,
        transport_addr: String,
        udp_dest: SocketAddr,
    ) -> anyhow::Result<Self> {
        let engine = GpuEngine::new(ctx.event_sender())?;
        let sink = Arc::new(
            BroadcastSink::new(udp_dest, ctx.toggles_rx()).context("open broadcast socket")?,
        );
        Ok(Self {
            engine,
            sink,
            opener,
            transport_addr,
            ctx,
        })
    }

    /// For an embedding UI that wants to attach a preview surface.
    pub fn engine_mut(&mut self) -> &mut GpuEngine {
        &mut self.engine
    }
}

impl PipelineRuntime for HubRuntime {
    fn run(&mut self, settings: &StreamSettings, run: &CancellationToken) -> anyhow::Result<()> {
        let result = match settings.mode {
            PipelineMode::Piped => piped::run_piped_loop(
                &mut self.engine,
                &self.sink,
                &self.ctx,
                run,
                &self.transport_addr,
            ),
            PipelineMode::Capture => {
                let Self {
                    engine,
                    sink,
                    opener,
                    ctx,
                    ..
                } = self;
                let source = opener.open().context("open display duplication")?;
                let (dw, dh) = source.size();
                let (tw, th) = clamp_capture_target(settings.width, settings.height);
                if (tw, th) != (settings.width, settings.height) {
                    log::warn!(
                        "capture target {}x{} too small, using {}x{}",
                        settings.width,
                        settings.height,
                        tw,
                        th
                    );
                }
                log::info!(
                    "capturing {}x{} desktop -> {}x{}@{}",
                    dw,
                    dh,
                    tw,
                    th,
                    settings.fps
                );
                ctx.emit(PipelineEvent::Ready);

                let toggles = ctx.toggles_rx();
                let stats = capture::run_capture_loop(
                    opener.as_ref(),
                    source,
                    run,
                    settings.fps,
                    |frame| {
                        let t = *toggles.borrow();
                        if let Some(rgb) =
                            engine.process_captured(&frame, tw, th, t.preview, t.broadcast)?
                        {
                            sink.send(&rgb);
                        }
                        Ok(())
                    },
                )?;
                log::info!(
                    "capture run ended after {} frames ({} duplication restarts)",
                    stats.frames,
                    stats.reopens
                );
                Ok(())
            }
        };
        self.engine.release_textures();
        result
    }
}
