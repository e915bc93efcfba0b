use ffmpeg_next::software::scaling;

use crate::frame::PlanarFrame;

/// Normalizes packed or exotic-planar decoder output to NV12 at the same
/// resolution. The sws context is cached and rebuilt only when the source
/// geometry or pixel format changes.
pub struct Converter {
    context: Option<scaling::Context>,
    src_format: ffmpeg_next::format::Pixel,
    src_width: u32,
    src_height: u32,
}

impl Converter {
    pub fn new() -> Self {
        Self {
            context: None,
            src_format: ffmpeg_next::format::Pixel::None,
            src_width: 0,
            src_height: 0,
        }
    }

    pub fn to_planar(&mut self, frame: &ffmpeg_next::frame::Video) -> anyhow::Result<PlanarFrame> {
        let (format, width, height) = (frame.format(), frame.width(), frame.height());
        if self.context.is_none()
            || format != self.src_format
            || width != self.src_width
            || height != self.src_height
        {
            self.context = Some(scaling::Context::get(
                format,
                width,
                height,
                ffmpeg_next::format::Pixel::NV12,
                width,
                height,
                scaling::Flags::POINT,
            )?);
            self.src_format = format;
            self.src_width = width;
            self.src_height = height;
            log::debug!("sws context (re)built for {:?} {}x{}", format, width, height);
        }

        let mut dst = ffmpeg_next::frame::Video::new(ffmpeg_next::format::Pixel::NV12, width, height);
        if let Some(context) = self.context.as_mut() {
            context.run(frame, &mut dst)?;
        }
        Ok(PlanarFrame::from_nv12(&dst))
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}
