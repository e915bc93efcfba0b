pub mod engine;
pub mod pool;

pub use engine::GpuEngine;
pub use pool::{TexturePool, TextureRole};

/// One captured desktop frame, borrowed from the duplication backend.
/// Rows are BGRA; `stride` is the byte distance between rows and may
/// exceed `width * 4`.
pub struct CapturedFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub stride: usize,
}
