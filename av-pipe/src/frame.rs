use bytes::Bytes;

/// A decoded video frame ready for GPU upload. Hardware decoders and most
/// software paths produce NV12 directly (`Planar`); anything else stays
/// `Packed` until the converter normalizes it.
pub enum DecodedImage {
    Planar(PlanarFrame),
    Packed(ffmpeg_next::frame::Video),
}

impl DecodedImage {
    pub fn from_frame(frame: ffmpeg_next::frame::Video) -> Self {
        if frame.format() == ffmpeg_next::format::Pixel::NV12 {
            Self::Planar(PlanarFrame::from_nv12(&frame))
        } else {
            Self::Packed(frame)
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            Self::Planar(p) => p.width,
            Self::Packed(f) => f.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Self::Planar(p) => p.height,
            Self::Packed(f) => f.height(),
        }
    }
}

/// NV12 planes copied out of an FFmpeg frame: full-resolution luma plus
/// interleaved half-resolution chroma. Strides are in bytes and may carry
/// row padding.
#[derive(Clone)]
pub struct PlanarFrame {
    pub width: u32,
    pub height: u32,
    pub y: Bytes,
    pub y_stride: usize,
    pub uv: Bytes,
    pub uv_stride: usize,
}

impl PlanarFrame {
    pub fn from_nv12(frame: &ffmpeg_next::frame::Video) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            y: Bytes::copy_from_slice(frame.data(0)),
            y_stride: frame.stride(0),
            uv: Bytes::copy_from_slice(frame.data(1)),
            uv_stride: frame.stride(1),
        }
    }

    pub fn chroma_width(&self) -> u32 {
        self.width.div_ceil(2)
    }

    pub fn chroma_height(&self) -> u32 {
        self.height.div_ceil(2)
    }
}
