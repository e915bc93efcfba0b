//! Hardware-accelerated decoder discovery.
//!
//! Finds a hardware decoder (CUDA/QSV/V4L2M2M) for a codec ID with
//! automatic fallback to software decoding when none is available.

/// Try to find a hardware-accelerated decoder for the given codec ID.
/// Returns the first available hardware decoder, or None if none is found.
pub fn find_hw_decoder(codec_id: ffmpeg_next::codec::Id) -> Option<ffmpeg_next::Codec> {
    let hw_names: &[&str] = match codec_id {
        ffmpeg_next::codec::Id::H264 => &["h264_cuvid", "h264_qsv", "h264_v4l2m2m"],
        ffmpeg_next::codec::Id::HEVC => &["hevc_cuvid", "hevc_qsv", "hevc_v4l2m2m"],
        ffmpeg_next::codec::Id::VP8 => &["vp8_cuvid", "vp8_qsv", "vp8_v4l2m2m"],
        ffmpeg_next::codec::Id::VP9 => &["vp9_cuvid", "vp9_qsv", "vp9_v4l2m2m"],
        ffmpeg_next::codec::Id::AV1 => &["av1_cuvid", "av1_qsv"],
        ffmpeg_next::codec::Id::MPEG2VIDEO => &["mpeg2_cuvid", "mpeg2_qsv", "mpeg2_v4l2m2m"],
        ffmpeg_next::codec::Id::MPEG4 => &["mpeg4_cuvid", "mpeg4_v4l2m2m"],
        _ => &[],
    };

    for name in hw_names {
        if let Some(codec) = ffmpeg_next::decoder::find_by_name(name) {
            log::info!("found hardware decoder: {}", name);
            return Some(codec);
        }
    }
    None
}
