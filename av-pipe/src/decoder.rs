use ffmpeg_next::Rational;

use crate::{frame::DecodedImage, hw, packet::RawPacket, stream::AvStream};

/// Video decoder tuned for live streams: hardware decoder first with
/// software fallback, low-delay output, single decode thread so frames
/// come out the moment their packet goes in.
pub struct VideoDecoder {
    inner: ffmpeg_next::codec::decoder::Video,
    decoder_time_base: Rational,
    hardware: bool,
}

impl VideoDecoder {
    pub fn open(stream: &AvStream) -> anyhow::Result<Self> {
        if let Some(codec) = hw::find_hw_decoder(stream.codec_id()) {
            match Self::open_with(stream, Some(codec)) {
                Ok(decoder) => return Ok(decoder),
                Err(e) => {
                    log::warn!("hardware decoder failed ({}), falling back to software", e);
                }
            }
        }
        Self::open_with(stream, None)
    }

    fn open_with(stream: &AvStream, codec: Option<ffmpeg_next::Codec>) -> anyhow::Result<Self> {
        let hardware = codec.is_some();
        let mut decoder_ctx = match codec {
            Some(codec) => ffmpeg_next::codec::Context::new_with_codec(codec),
            None => ffmpeg_next::codec::Context::new(),
        };
        unsafe {
            (*decoder_ctx.as_mut_ptr()).time_base = stream.time_base().into();
        }
        decoder_ctx.set_parameters(stream.parameters().clone())?;
        unsafe {
            let ptr = decoder_ctx.as_mut_ptr();
            (*ptr).flags |= ffmpeg_next::ffi::AV_CODEC_FLAG_LOW_DELAY as i32;
            (*ptr).thread_count = 1;
        }

        let video_decoder = decoder_ctx.decoder().video()?;
        let decoder_time_base = video_decoder.time_base();

        if video_decoder.format() == ffmpeg_next::format::Pixel::None
            || video_decoder.width() == 0
            || video_decoder.height() == 0
        {
            return Err(anyhow::anyhow!("missing codec parameters"));
        }

        Ok(Self {
            inner: video_decoder,
            decoder_time_base,
            hardware,
        })
    }

    pub fn is_hardware(&self) -> bool {
        self.hardware
    }

    pub fn send_packet(&mut self, mut packet: RawPacket) -> anyhow::Result<()> {
        let time_base = packet.time_base();
        let packet = packet.get_mut();
        packet.rescale_ts(time_base, self.decoder_time_base);
        self.inner.send_packet(packet)?;
        Ok(())
    }

    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        self.inner.send_eof()?;
        Ok(())
    }

    /// Pulls one decoded frame out of the decoder. `None` means the decoder
    /// needs more input (or hit EOF), not an error.
    pub fn receive_image(&mut self) -> anyhow::Result<Option<DecodedImage>> {
        let mut frame = ffmpeg_next::frame::Video::empty();
        match self.inner.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(DecodedImage::from_frame(frame))),
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}
