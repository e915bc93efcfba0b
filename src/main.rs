use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;

use cast_hub::context::{PipelineContext, PipelineEvent};
use cast_hub::pipeline::{self, HubRuntime};
use cast_hub::settings::{PipelineMode, StreamSettings, Toggles};
use cast_hub::supervisor::Supervisor;

#[derive(Parser, Debug)]
#[command(
    name = "cast-hub",
    about = "Live video hub: decode a piped encoder stream or capture the desktop, then present and broadcast"
)]
struct Args {
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
    #[arg(long, default_value_t = 60)]
    fps: u32,
    #[arg(long, value_enum, default_value_t = PipelineMode::Piped)]
    mode: PipelineMode,
    /// Loopback address the external encoder connects to.
    #[arg(long, default_value = "127.0.0.1:8219")]
    transport: String,
    /// Destination for UDP fanout datagrams.
    #[arg(long, default_value = "255.255.255.255:8221")]
    udp: SocketAddr,
    /// Start with UDP fanout enabled.
    #[arg(long)]
    broadcast: bool,
    /// JSON settings file overriding width/height/fps/mode.
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    av_pipe::init()?;
    let args = Args::parse();

    let settings = match &args.settings {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read settings file {}", path.display()))?;
            let parsed: StreamSettings =
                serde_json::from_str(&raw).context("parse settings file")?;
            parsed.validate()?;
            parsed
        }
        None => StreamSettings::new(args.width, args.height, args.fps, args.mode)?,
    };
    let toggles = Toggles {
        preview: false,
        broadcast: args.broadcast,
    };

    let (ctx, mut events) = PipelineContext::new(settings, toggles);
    let control = ctx.control();

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PipelineEvent::Ready => log::info!("pipeline ready"),
                PipelineEvent::ContentResized { width, height } => {
                    log::info!("content resized to {}x{}", width, height)
                }
            }
        }
    });

    let worker = {
        let ctx = Arc::clone(&ctx);
        let opener = pipeline::default_opener();
        let transport_addr = args.transport.clone();
        let udp_dest = args.udp;
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let mut runtime = HubRuntime::new(Arc::clone(&ctx), opener, transport_addr, udp_dest)?;
            Supervisor::new(ctx).run(&mut runtime);
            Ok(())
        })
    };

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    control.shutdown();
    worker.await??;
    Ok(())
}
