use std::collections::HashMap;
use std::ffi::CString;
use std::io::Read;
use std::mem::ManuallyDrop;
use std::os::raw::{c_int, c_void};
use std::sync::Arc;

use ffmpeg_next::Dictionary;
use ffmpeg_next::ffi;
use tokio_util::sync::CancellationToken;

use crate::{
    packet::RawPacket,
    queue::PacketQueue,
    stream::AvStream,
};

/// Matches the 1 MiB AVIO buffer the demuxer always ran with.
const AVIO_BUFFER_SIZE: usize = 1 << 20;

/// Demux options for a live low-latency transport stream: generous probe
/// windows so codec parameters resolve quickly, no internal buffering.
pub fn low_latency_options() -> Dictionary<'static> {
    let mut opts = Dictionary::new();
    opts.set("probesize", "5000000");
    opts.set("analyzeduration", "5000000");
    opts.set("fflags", "nobuffer");
    opts
}

struct AvioReader {
    reader: Box<dyn Read + Send>,
    cancel: CancellationToken,
}

/// Read callback handed to avio_alloc_context. Timeout errors from the
/// transport are retried so cancellation stays observable on an idle
/// connection; cancellation surfaces as AVERROR_EXIT.
unsafe extern "C" fn read_callback(opaque: *mut c_void, buf: *mut u8, buf_size: c_int) -> c_int {
    if buf_size <= 0 {
        return ffi::AVERROR_EOF;
    }
    let state = unsafe { &mut *(opaque as *mut AvioReader) };
    let dst = unsafe { std::slice::from_raw_parts_mut(buf, buf_size as usize) };
    loop {
        if state.cancel.is_cancelled() {
            return ffi::AVERROR_EXIT;
        }
        match state.reader.read(dst) {
            Ok(0) => return ffi::AVERROR_EOF,
            Ok(n) => return n as c_int,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                log::debug!("transport read error: {}", e);
                return ffi::AVERROR_EOF;
            }
        }
    }
}

unsafe fn free_avio(mut avio: *mut ffi::AVIOContext) {
    if avio.is_null() {
        return;
    }
    unsafe {
        ffi::av_freep(&mut (*avio).buffer as *mut _ as *mut c_void);
        ffi::avio_context_free(&mut avio);
    }
}

/// Demuxer over a caller-supplied byte source (custom AVIO). The inner
/// format context must be closed before the AVIO context and its opaque
/// reader are released, hence the ManuallyDrop ordering in Drop.
pub struct AvInput {
    inner: ManuallyDrop<ffmpeg_next::format::context::Input>,
    avio: *mut ffi::AVIOContext,
    opaque: *mut AvioReader,
    streams: HashMap<usize, AvStream>,
    best_video: Option<usize>,
}

// Raw pointers are owned by this struct and only touched from the thread
// that holds it.
unsafe impl Send for AvInput {}

impl AvInput {
    fn find_input_format(name: &str) -> anyhow::Result<*const ffi::AVInputFormat> {
        let cname = CString::new(name)
            .map_err(|e| anyhow::anyhow!("invalid format name {:?}: {}", name, e))?;
        let ptr = unsafe { ffi::av_find_input_format(cname.as_ptr()) };
        if ptr.is_null() {
            return Err(anyhow::anyhow!("input format not found: {}", name));
        }
        Ok(ptr as *const _)
    }

    /// Opens a demuxer that pulls bytes from `reader`. `format_hint` skips
    /// container probing (e.g. "mpegts"); `cancel` aborts blocked reads.
    pub fn open_reader(
        reader: Box<dyn Read + Send>,
        format_hint: Option<&str>,
        options: Dictionary,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let input_format = match format_hint {
            Some(name) => Self::find_input_format(name)?,
            None => std::ptr::null(),
        };

        let opaque = Box::into_raw(Box::new(AvioReader { reader, cancel }));

        unsafe {
            let buffer = ffi::av_malloc(AVIO_BUFFER_SIZE) as *mut u8;
            if buffer.is_null() {
                drop(Box::from_raw(opaque));
                anyhow::bail!("av_malloc failed for AVIO buffer");
            }

            let avio = ffi::avio_alloc_context(
                buffer,
                AVIO_BUFFER_SIZE as c_int,
                0,
                opaque as *mut c_void,
                Some(read_callback),
                None,
                None,
            );
            if avio.is_null() {
                ffi::av_free(buffer as *mut c_void);
                drop(Box::from_raw(opaque));
                anyhow::bail!("avio_alloc_context failed");
            }

            let mut fmt_ctx = ffi::avformat_alloc_context();
            if fmt_ctx.is_null() {
                free_avio(avio);
                drop(Box::from_raw(opaque));
                anyhow::bail!("avformat_alloc_context failed");
            }
            (*fmt_ctx).pb = avio;
            (*fmt_ctx).flags |= ffi::AVFMT_FLAG_CUSTOM_IO as c_int;

            let mut opts_ptr = options.disown();
            let err = ffi::avformat_open_input(
                &mut fmt_ctx,
                c"".as_ptr(),
                input_format,
                &mut opts_ptr,
            );
            ffi::av_dict_free(&mut opts_ptr);
            if err < 0 {
                // open_input frees the context on failure, the AVIO side is ours
                free_avio(avio);
                drop(Box::from_raw(opaque));
                return Err(ffmpeg_next::Error::from(err).into());
            }

            let err = ffi::avformat_find_stream_info(fmt_ctx, std::ptr::null_mut());
            if err < 0 {
                ffi::avformat_close_input(&mut fmt_ctx);
                free_avio(avio);
                drop(Box::from_raw(opaque));
                return Err(ffmpeg_next::Error::from(err).into());
            }

            let inner = ffmpeg_next::format::context::Input::wrap(fmt_ctx);

            let best_video = inner
                .streams()
                .best(ffmpeg_next::media::Type::Video)
                .map(|s| s.index());
            let mut streams = HashMap::new();
            for stream in inner.streams() {
                streams.insert(stream.index(), AvStream::from(stream));
            }

            Ok(Self {
                inner: ManuallyDrop::new(inner),
                avio,
                opaque,
                streams,
                best_video,
            })
        }
    }

    pub fn streams(&self) -> &HashMap<usize, AvStream> {
        &self.streams
    }

    pub fn best_video_stream(&self) -> Option<&AvStream> {
        self.best_video.and_then(|index| self.streams.get(&index))
    }

    pub fn read_packet(&mut self) -> Option<RawPacket> {
        match self.inner.packets().next() {
            Some((stream, packet)) => Some((packet, stream.time_base()).into()),
            None => None,
        }
    }
}

impl Drop for AvInput {
    fn drop(&mut self) {
        unsafe {
            ManuallyDrop::drop(&mut self.inner);
            free_avio(self.avio);
            self.avio = std::ptr::null_mut();
            if !self.opaque.is_null() {
                drop(Box::from_raw(self.opaque));
                self.opaque = std::ptr::null_mut();
            }
        }
    }
}

/// Reads demuxed packets on a dedicated thread and pushes the selected
/// video stream into the queue. Always marks the queue finished on exit,
/// whatever ended the loop.
pub struct ReaderTask {
    handle: std::thread::JoinHandle<()>,
}

impl ReaderTask {
    pub fn spawn(
        mut input: AvInput,
        queue: Arc<PacketQueue>,
        video_index: usize,
        cancel: CancellationToken,
    ) -> Self {
        let handle = std::thread::spawn(move || {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match input.read_packet() {
                    Some(packet) => {
                        if packet.index() != video_index {
                            continue;
                        }
                        if !queue.push(packet) {
                            break;
                        }
                    }
                    None => {
                        log::info!("end of transport stream");
                        break;
                    }
                }
            }
            queue.mark_finished();
        });
        Self { handle }
    }

    pub fn join(self) {
        let _ = self.handle.join();
    }
}

#[cfg(test)]
#[path = "input_test.rs"]
mod input_test;
