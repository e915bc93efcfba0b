#![allow(dead_code)]

/// Registers FFmpeg components. Call once at startup before opening inputs.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod convert;
pub mod decoder;
pub mod frame;
pub mod hw;
pub mod input;
pub mod packet;
pub mod queue;
pub mod stream;
pub mod transport;
