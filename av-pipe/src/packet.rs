use bytes::Bytes;
use ffmpeg_next::Rational;

/// A demuxed compressed packet together with the time base of the stream
/// it was read from. Owns its payload, so it can outlive the demuxer.
#[derive(Clone)]
pub struct RawPacket {
    packet: ffmpeg_next::codec::packet::Packet,
    time_base: Rational,
}

impl RawPacket {
    pub fn pts(&self) -> Option<i64> {
        self.packet.pts()
    }

    pub fn dts(&self) -> Option<i64> {
        self.packet.dts()
    }

    pub fn size(&self) -> usize {
        self.packet.size()
    }

    pub fn index(&self) -> usize {
        self.packet.stream()
    }

    pub fn data(&self) -> Bytes {
        self.packet
            .data()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default()
    }

    pub fn is_key(&self) -> bool {
        self.packet.is_key()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::codec::packet::Packet {
        &mut self.packet
    }
}

impl From<(ffmpeg_next::codec::packet::Packet, Rational)> for RawPacket {
    fn from((packet, time_base): (ffmpeg_next::codec::packet::Packet, Rational)) -> Self {
        Self { packet, time_base }
    }
}

#[cfg(test)]
impl RawPacket {
    /// Builds a packet with the given payload and stream index.
    pub fn for_tests(index: usize, payload: &[u8]) -> Self {
        let mut packet = ffmpeg_next::codec::packet::Packet::copy(payload);
        packet.set_stream(index);
        Self {
            packet,
            time_base: Rational::new(1, 90000),
        }
    }
}
