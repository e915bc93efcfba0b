use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::settings::{StreamSettings, Toggles};

/// Notifications for an embedding UI or the log drain in the binary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A pipeline run finished its setup and is producing frames.
    Ready,
    /// The presentation surface was reconfigured for new content dimensions.
    ContentResized { width: u32, height: u32 },
}

pub type EventSender = mpsc::UnboundedSender<PipelineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PipelineEvent>;

/// Shared state for one hub instance: the process-lifetime cancellation
/// token, the token of the currently active run, and the watched settings
/// and toggles. Everything the loops need travels through here, there is
/// no global state.
pub struct PipelineContext {
    cancel: CancellationToken,
    current_run: Mutex<CancellationToken>,
    settings_tx: watch::Sender<StreamSettings>,
    settings_rx: watch::Receiver<StreamSettings>,
    toggles_tx: watch::Sender<Toggles>,
    toggles_rx: watch::Receiver<Toggles>,
    events: EventSender,
}

impl PipelineContext {
    pub fn new(settings: StreamSettings, toggles: Toggles) -> (Arc<Self>, EventReceiver) {
        let (settings_tx, settings_rx) = watch::channel(settings);
        let (toggles_tx, toggles_rx) = watch::channel(toggles);
        let (events, event_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(Self {
            cancel: CancellationToken::new(),
            current_run: Mutex::new(CancellationToken::new()),
            settings_tx,
            settings_rx,
            toggles_tx,
            toggles_rx,
            events,
        });
        (ctx, event_rx)
    }

    pub fn control(self: &Arc<Self>) -> ControlHandle {
        ControlHandle {
            ctx: Arc::clone(self),
        }
    }

    /// Issues the cancellation token for the next pipeline run. Child of
    /// the process token, so shutdown reaches into an active run.
    pub fn begin_run(&self) -> CancellationToken {
        let run = self.cancel.child_token();
        *self.current_run.lock().unwrap() = run.clone();
        run
    }

    pub fn restart(&self) {
        self.current_run.lock().unwrap().cancel();
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn settings(&self) -> StreamSettings {
        *self.settings_rx.borrow()
    }

    pub fn toggles_rx(&self) -> watch::Receiver<Toggles> {
        self.toggles_rx.clone()
    }

    pub fn event_sender(&self) -> EventSender {
        self.events.clone()
    }

    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }
}

/// Control surface handed to whatever drives the hub. Settings changes
/// are validated here, at the boundary, and applied by restarting the
/// active run; toggles flip live without a restart.
#[derive(Clone)]
pub struct ControlHandle {
    ctx: Arc<PipelineContext>,
}

impl ControlHandle {
    pub fn apply_settings(&self, settings: StreamSettings) -> anyhow::Result<()> {
        settings.validate()?;
        let changed = *self.ctx.settings_rx.borrow() != settings;
        self.ctx.settings_tx.send_replace(settings);
        if changed {
            log::info!(
                "settings applied: {}x{}@{} mode={}",
                settings.width,
                settings.height,
                settings.fps,
                settings.mode
            );
            self.ctx.restart();
        }
        Ok(())
    }

    pub fn set_preview(&self, enabled: bool) {
        self.ctx.toggles_tx.send_modify(|t| t.preview = enabled);
    }

    pub fn set_broadcast(&self, enabled: bool) {
        self.ctx.toggles_tx.send_modify(|t| t.broadcast = enabled);
    }

    pub fn shutdown(&self) {
        self.ctx.shutdown();
    }
}
