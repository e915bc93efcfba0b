use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ffmpeg_next::Rational;
use tokio_util::sync::CancellationToken;

use crate::convert::Converter;
use crate::decoder::VideoDecoder;
use crate::frame::DecodedImage;
use crate::input::{low_latency_options, AvInput, ReaderTask};
use crate::queue::{PacketQueue, Pop};

const FIXTURE_WIDTH: u32 = 64;
const FIXTURE_HEIGHT: u32 = 64;
const FIXTURE_FPS: i32 = 25;
const FIXTURE_FRAMES: usize = 30;

/// Encodes FIXTURE_FRAMES of flat MPEG-2 video and muxes them into an
/// in-memory transport stream. Returns None when this FFmpeg build lacks
/// the encoder or muxer, so callers can skip.
fn make_transport_stream() -> anyhow::Result<Option<Vec<u8>>> {
    crate::init()?;
    let Some(codec) = ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::MPEG2VIDEO) else {
        return Ok(None);
    };

    let path = std::env::temp_dir().join(format!("transport-fixture-{}.ts", std::process::id()));
    // The .ts extension selects the mpegts muxer.
    let mut octx = match ffmpeg_next::format::output(&path) {
        Ok(octx) => octx,
        Err(_) => return Ok(None),
    };

    let in_time_base = Rational(1, FIXTURE_FPS);
    let enc_ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
    let mut enc = enc_ctx.encoder().video()?;
    enc.set_width(FIXTURE_WIDTH);
    enc.set_height(FIXTURE_HEIGHT);
    enc.set_format(ffmpeg_next::format::Pixel::YUV420P);
    enc.set_time_base(in_time_base);
    enc.set_frame_rate(Some(Rational(FIXTURE_FPS, 1)));
    let mut enc = enc.open()?;

    let mut ost = octx.add_stream(codec)?;
    ost.set_parameters(&enc);
    octx.write_header()?;

    for i in 0..FIXTURE_FRAMES {
        let mut frame = ffmpeg_next::frame::Video::new(
            ffmpeg_next::format::Pixel::YUV420P,
            FIXTURE_WIDTH,
            FIXTURE_HEIGHT,
        );
        let shade = 40 + (i * 4) as u8;
        for plane in 0..3 {
            let fill = if plane == 0 { shade } else { 128 };
            frame.data_mut(plane).fill(fill);
        }
        frame.set_pts(Some(i as i64));
        enc.send_frame(&frame)?;
        write_encoded(&mut enc, &mut octx, in_time_base)?;
    }
    enc.send_eof()?;
    write_encoded(&mut enc, &mut octx, in_time_base)?;
    octx.write_trailer()?;

    let bytes = std::fs::read(&path)?;
    let _ = std::fs::remove_file(&path);
    anyhow::ensure!(!bytes.is_empty(), "muxer produced an empty fixture");
    Ok(Some(bytes))
}

fn write_encoded(
    enc: &mut ffmpeg_next::codec::encoder::Video,
    octx: &mut ffmpeg_next::format::context::Output,
    in_time_base: Rational,
) -> anyhow::Result<()> {
    let out_time_base = octx.stream(0).map(|s| s.time_base()).unwrap_or(in_time_base);
    let mut packet = ffmpeg_next::codec::packet::Packet::empty();
    while enc.receive_packet(&mut packet).is_ok() {
        packet.set_stream(0);
        packet.rescale_ts(in_time_base, out_time_base);
        packet.write_interleaved(octx)?;
    }
    Ok(())
}

fn open_fixture(ts: Vec<u8>, cancel: CancellationToken) -> anyhow::Result<AvInput> {
    AvInput::open_reader(
        Box::new(Cursor::new(ts)),
        Some("mpegts"),
        low_latency_options(),
        cancel,
    )
}

/// Emulates the consumer side of the decode loop: pull every frame the
/// decoder has ready, normalize packed output, count what came out.
fn drain_images(decoder: &mut VideoDecoder, converter: &mut Converter) -> usize {
    let mut images = 0;
    loop {
        match decoder.receive_image() {
            Ok(Some(image)) => {
                let planar = match image {
                    DecodedImage::Planar(planar) => planar,
                    DecodedImage::Packed(frame) => match converter.to_planar(&frame) {
                        Ok(planar) => planar,
                        Err(e) => {
                            eprintln!("convert error: {}", e);
                            continue;
                        }
                    },
                };
                assert_eq!(planar.width, FIXTURE_WIDTH);
                assert_eq!(planar.height, FIXTURE_HEIGHT);
                images += 1;
            }
            Ok(None) => return images,
            Err(e) => {
                eprintln!("receive frame error: {}", e);
                return images;
            }
        }
    }
}

#[test]
fn test_reader_task_drains_queue_then_finishes() -> anyhow::Result<()> {
    let Some(ts) = make_transport_stream()? else {
        eprintln!("skip: mpeg2video encoder not available");
        return Ok(());
    };

    let cancel = CancellationToken::new();
    let input = open_fixture(ts, cancel.clone())?;
    let video = input
        .best_video_stream()
        .expect("fixture must expose a video stream")
        .clone();
    assert_eq!(video.width(), FIXTURE_WIDTH);
    assert_eq!(video.height(), FIXTURE_HEIGHT);

    let queue = Arc::new(PacketQueue::new());
    let reader = ReaderTask::spawn(input, Arc::clone(&queue), video.index(), cancel);

    let mut packets = 0usize;
    loop {
        match queue.pop() {
            Pop::Packet(packet) => {
                assert_eq!(packet.index(), video.index());
                assert!(packet.size() > 0);
                packets += 1;
            }
            Pop::Empty => unreachable!("blocking pop never reports Empty"),
            Pop::Finished => break,
        }
    }
    reader.join();

    assert!(queue.is_finished());
    assert_eq!(
        packets, FIXTURE_FRAMES,
        "every encoded packet must be delivered exactly once before Finished"
    );
    Ok(())
}

#[test]
fn test_reader_marks_finished_on_truncated_transport() -> anyhow::Result<()> {
    let Some(ts) = make_transport_stream()? else {
        eprintln!("skip: mpeg2video encoder not available");
        return Ok(());
    };

    // Chop the tail off mid-stream; the reader must still end the queue
    // instead of leaving the consumer waiting.
    let cut = ts.len() * 3 / 4;
    let cancel = CancellationToken::new();
    let input = open_fixture(ts[..cut].to_vec(), cancel.clone())?;
    let video = input
        .best_video_stream()
        .expect("fixture must expose a video stream")
        .clone();

    let queue = Arc::new(PacketQueue::new());
    let reader = ReaderTask::spawn(input, Arc::clone(&queue), video.index(), cancel);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match queue.pop_timeout(Duration::from_millis(100)) {
            Pop::Packet(_) => {}
            Pop::Empty => {
                assert!(
                    Instant::now() < deadline,
                    "queue not finished after the transport broke off"
                );
            }
            Pop::Finished => break,
        }
    }
    reader.join();
    assert!(queue.is_finished());
    Ok(())
}

#[test]
fn test_corrupt_packet_is_skipped_and_decoding_continues() -> anyhow::Result<()> {
    let Some(ts) = make_transport_stream()? else {
        eprintln!("skip: mpeg2video encoder not available");
        return Ok(());
    };

    let cancel = CancellationToken::new();
    let mut input = open_fixture(ts, cancel)?;
    let video = input
        .best_video_stream()
        .expect("fixture must expose a video stream")
        .clone();
    let mut decoder = VideoDecoder::open(&video)?;
    let mut converter = Converter::new();

    let mut packets = Vec::new();
    while let Some(packet) = input.read_packet() {
        if packet.index() == video.index() {
            packets.push(packet);
        }
    }
    assert!(packets.len() > 2, "need packets on both sides of the corruption");

    // Stomp the second packet's payload. The decoder may reject it or
    // error-conceal; either way later packets keep decoding.
    if let Some(data) = packets[1].get_mut().data_mut() {
        data.fill(0x55);
    }

    let mut images_after_corrupt = 0usize;
    for (i, packet) in packets.into_iter().enumerate() {
        if let Err(e) = decoder.send_packet(packet) {
            eprintln!("send packet error: {}", e);
            continue;
        }
        let images = drain_images(&mut decoder, &mut converter);
        if i > 1 {
            images_after_corrupt += images;
        }
    }
    let _ = decoder.send_eof();
    images_after_corrupt += drain_images(&mut decoder, &mut converter);

    assert!(
        images_after_corrupt > 0,
        "stream must recover at the next keyframe after a corrupt packet"
    );
    Ok(())
}
