use std::io::Read;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use av_pipe::convert::Converter;
use av_pipe::decoder::VideoDecoder;
use av_pipe::frame::DecodedImage;
use av_pipe::input::{self, AvInput, ReaderTask};
use av_pipe::queue::{PacketQueue, Pop};
use av_pipe::transport::Transport;

use crate::context::{PipelineContext, PipelineEvent};
use crate::gpu::GpuEngine;
use crate::net::BroadcastSink;

const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Forwards every byte the demuxer pulls off the transport to the UDP
/// sink, before any parsing. Receivers get the compressed stream exactly
/// as the encoder produced it.
struct TeeReader {
    inner: TcpStream,
    sink: Arc<BroadcastSink>,
}

impl Read for TeeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.sink.send(&buf[..n]);
        }
        Ok(n)
    }
}

/// Piped-encoder run: wait for the encoder to connect, demux its
/// transport stream on a reader thread, decode on this one and hand
/// frames to the GPU while presentation is enabled.
pub fn run_piped_loop(
    engine: &mut GpuEngine,
    sink: &Arc<BroadcastSink>,
    ctx: &PipelineContext,
    run: &CancellationToken,
    transport_addr: &str,
) -> anyhow::Result<()> {
    let transport = Transport::bind(transport_addr)?;
    log::info!("waiting for encoder on {}", transport.local_addr()?);
    let stream = transport.wait_for_client(run)?;
    let tee = TeeReader {
        inner: stream,
        sink: Arc::clone(sink),
    };

    let reader_cancel = run.child_token();
    let input = AvInput::open_reader(
        Box::new(tee),
        Some("mpegts"),
        input::low_latency_options(),
        reader_cancel.clone(),
    )
    .context("open transport demuxer")?;

    let video = input
        .best_video_stream()
        .context("no decodable video stream on transport")?
        .clone();
    log::info!(
        "video stream {}: {:?} {}x{} {:.1}fps",
        video.index(),
        video.codec_id(),
        video.width(),
        video.height(),
        video.fps()
    );

    let mut decoder = VideoDecoder::open(&video).context("open video decoder")?;
    if decoder.is_hardware() {
        log::info!("decoding in hardware");
    }

    let queue = Arc::new(PacketQueue::new());
    let reader = ReaderTask::spawn(input, Arc::clone(&queue), video.index(), reader_cancel.clone());
    ctx.emit(PipelineEvent::Ready);

    let result = decode_loop(engine, ctx, run, &queue, &mut decoder);

    reader_cancel.cancel();
    queue.mark_finished();
    reader.join();
    queue.clear();
    result
}

fn decode_loop(
    engine: &mut GpuEngine,
    ctx: &PipelineContext,
    run: &CancellationToken,
    queue: &PacketQueue,
    decoder: &mut VideoDecoder,
) -> anyhow::Result<()> {
    let mut converter = Converter::new();
    let toggles = ctx.toggles_rx();

    loop {
        if run.is_cancelled() {
            return Ok(());
        }
        match queue.pop_timeout(POP_TIMEOUT) {
            Pop::Packet(packet) => {
                if let Err(e) = decoder.send_packet(packet) {
                    // corrupted packet, the stream recovers at the next keyframe
                    log::error!("send packet to decoder: {:#}", e);
                    continue;
                }
                let render = toggles.borrow().preview && engine.has_surface();
                drain(engine, decoder, &mut converter, render)?;
            }
            Pop::Empty => continue,
            Pop::Finished => {
                let _ = decoder.send_eof();
                let render = toggles.borrow().preview && engine.has_surface();
                drain(engine, decoder, &mut converter, render)?;
                log::info!("transport stream finished");
                return Ok(());
            }
        }
    }
}

/// Pulls every frame the decoder has ready. Frames are always drained to
/// keep the decoder moving; they only reach the GPU while presenting.
fn drain(
    engine: &mut GpuEngine,
    decoder: &mut VideoDecoder,
    converter: &mut Converter,
    render: bool,
) -> anyhow::Result<()> {
    loop {
        match decoder.receive_image() {
            Ok(Some(image)) => {
                if !render {
                    continue;
                }
                let planar = match image {
                    DecodedImage::Planar(planar) => planar,
                    DecodedImage::Packed(frame) => converter.to_planar(&frame)?,
                };
                engine.render_decoded(&planar)?;
            }
            Ok(None) => return Ok(()),
            Err(e) => {
                log::error!("receive frame error: {:#}", e);
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
#[path = "piped_test.rs"]
mod piped_test;
