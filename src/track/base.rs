//! Track base: producer state shared by every codec
//!
//! A [`Track`] owns the ring writer and the frame being assembled. Codec
//! state machines embed one by value and call [`Track::flush`] at every
//! frame boundary. Everything subscribers and monitoring need lives in an
//! `Arc`-shared block reached through a [`TrackHandle`].
//!
//! ```text
//!   codec state machine ──► Track::flush ──► RingWriter ──► Subscriber 1
//!                               │                       └──► Subscriber N
//!                               ├─ GOP / attach point
//!                               └─ counters, decoder configuration
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::config::TrackConfig;
use crate::error::{CloseReason, MediaError};
use crate::media::nalu::NaluIterator;
use crate::media::packaged::PackagedVideo;
use crate::ring::{ReadError, RingHandle, RingReader, RingWriter, StartPosition};
use crate::rtp::RtpPacket;
use crate::stats::{TrackCounters, TrackStats};

use super::dts::DtsEstimator;
use super::frame::{AvFrame, FramePayload, VideoPayload};
use super::rtp::{RtpDemuxer, RtpMuxer};
use super::CodecId;

/// Parameter sets needed to initialize a decoder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderConfiguration {
    /// Raw parameter sets in codec order (SPS, PPS / VPS, SPS, PPS / ASC)
    pub raw: Vec<Bytes>,
    /// Packaged sequence header (5-byte video or 2-byte audio prefix)
    pub packaged: Bytes,
    /// Incremented once per configuration occurrence, 0 = never seen
    pub seq: u32,
    /// RTP payload type
    pub payload_type: u8,
}

impl DecoderConfiguration {
    pub fn is_empty(&self) -> bool {
        self.seq == 0
    }
}

/// State shared between the producer, handles and subscribers
#[derive(Debug)]
struct TrackShared {
    name: String,
    codec: CodecId,
    decoder_config: RwLock<Arc<DecoderConfiguration>>,
    counters: TrackCounters,
    close_tx: watch::Sender<Option<CloseReason>>,
}

impl TrackShared {
    /// Publish the close reason; only the first call has any effect
    fn signal_close(&self, reason: CloseReason) -> bool {
        self.close_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }
}

/// Producer side of a track
pub struct Track<P: FramePayload> {
    shared: Arc<TrackShared>,
    config: TrackConfig,
    ring: RingWriter<AvFrame<P>>,
    /// Frame being assembled
    pub(crate) value: AvFrame<P>,
    pub(crate) dts: DtsEstimator,
    pub(crate) demuxer: RtpDemuxer,
    pub(crate) muxer: RtpMuxer,
    /// Configuration arrived since the last keyframe flush
    pub(crate) dc_changed: bool,
    last_keyframe: Option<u64>,
    ready: bool,
    closed: bool,
}

impl<P: FramePayload> Track<P> {
    /// Create a track
    pub fn new(name: impl Into<String>, codec: CodecId, config: TrackConfig) -> Self {
        let name = name.into();
        let config = config.normalized();
        let muxer = RtpMuxer::new(&name, codec.default_payload_type(), &config);
        let decoder_config = DecoderConfiguration {
            payload_type: muxer.payload_type(),
            ..Default::default()
        };
        let (close_tx, _) = watch::channel(None);

        tracing::info!(
            track = %name,
            codec = %codec,
            ring_size = config.ring_size,
            rtp = config.enable_rtp,
            reorder = config.rtp_reorder,
            "Track created"
        );

        Self {
            shared: Arc::new(TrackShared {
                name,
                codec,
                decoder_config: RwLock::new(Arc::new(decoder_config)),
                counters: TrackCounters::default(),
                close_tx,
            }),
            ring: RingWriter::new(config.ring_size),
            value: AvFrame::default(),
            dts: DtsEstimator::new(),
            demuxer: RtpDemuxer::new(&config),
            muxer,
            dc_changed: false,
            last_keyframe: None,
            ready: false,
            closed: false,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn codec(&self) -> CodecId {
        self.shared.codec
    }

    pub fn config(&self) -> &TrackConfig {
        &self.config
    }

    /// Get a handle for subscribers and monitoring
    pub fn handle(&self) -> TrackHandle<P> {
        TrackHandle {
            shared: Arc::clone(&self.shared),
            ring: self.ring.handle(),
        }
    }

    /// Current decoder configuration
    pub fn decoder_config(&self) -> Arc<DecoderConfiguration> {
        Arc::clone(&self.shared.decoder_config.read())
    }

    /// Whether ingestion has stopped (fatal error or publisher ended)
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Replace the decoder configuration and bump its sequence number
    pub(crate) fn update_decoder_config(&mut self, raw: Vec<Bytes>, packaged: Bytes) {
        let seq = {
            let mut current = self.shared.decoder_config.write();
            let seq = current.seq.wrapping_add(1);
            *current = Arc::new(DecoderConfiguration {
                raw,
                packaged,
                seq,
                payload_type: current.payload_type,
            });
            seq
        };
        self.dc_changed = true;

        tracing::info!(track = %self.name(), seq, "Decoder configuration updated");
    }

    /// Count one unit dropped by the codec layer
    pub(crate) fn count_dropped(&self) {
        TrackCounters::add(&self.shared.counters.dropped_units, 1);
    }

    /// Mirror RTP sequencing counters into the shared stats
    pub(crate) fn sync_rtp_counters(&self) {
        let counters = &self.shared.counters;
        counters.rtp_lost.store(self.demuxer.lost(), Ordering::Relaxed);
        counters.rtp_late.store(self.demuxer.late(), Ordering::Relaxed);
        counters
            .rtp_discontinuities
            .store(self.demuxer.discontinuities(), Ordering::Relaxed);
    }

    /// Append a relayed RTP packet to the current frame under the
    /// track's outgoing sequence numbering
    pub(crate) fn append_rtp(&mut self, mut packet: RtpPacket) {
        packet.sequence_number = self.muxer.relay_sequence(packet.sequence_number);
        self.value.rtp.push(packet);
    }

    /// Publish the current frame
    ///
    /// Frames without media data are not published; their RTP packets (for
    /// example in-band parameter sets) carry over to the next frame.
    pub(crate) fn flush(&mut self) {
        if self.closed {
            self.value = AvFrame::default();
            return;
        }
        if self.value.payload.is_empty() {
            tracing::trace!(track = %self.name(), "Empty frame not published");
            self.value.reset();
            return;
        }

        let mut frame = std::mem::take(&mut self.value);
        let config_seq = self.shared.decoder_config.read().seq;
        frame.config_seq = config_seq;
        let keyframe = frame.keyframe;
        let bytes_in = frame.bytes_in as u64;

        let seq = self.ring.write(frame);

        let counters = &self.shared.counters;
        TrackCounters::add(&counters.bytes_in, bytes_in);
        TrackCounters::add(&counters.frames, 1);

        if !keyframe {
            return;
        }
        TrackCounters::add(&counters.keyframes, 1);
        self.dc_changed = false;

        // Keyframes before any configuration cannot start a decodable GOP
        if config_seq == 0 {
            return;
        }
        if let Some(prev) = self.last_keyframe {
            let gop = (seq - prev) as u32;
            if counters.gop.swap(gop, Ordering::Relaxed) != gop {
                tracing::debug!(track = %self.name(), gop, "GOP length changed");
            }
        }
        self.last_keyframe = Some(seq);
        self.ring.mark_keyframe(seq);

        if !self.ready {
            self.ready = true;
            tracing::info!(track = %self.name(), seq, config_seq, "Track ready");
        }
    }

    /// Close the track because no later frame can be decoded
    ///
    /// The reason is delivered once to the owning session; subscribers drain
    /// the ring and then see [`ReadError::Closed`].
    pub fn close_fatal(&mut self, err: MediaError) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.value = AvFrame::default();
        tracing::error!(track = %self.name(), error = %err, "Track closed");
        self.shared.signal_close(CloseReason::Fatal(err));
        self.ring.close();
    }

    /// End the track normally
    pub fn end(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        tracing::info!(track = %self.name(), "Publisher ended");
        self.shared.signal_close(CloseReason::PublisherEnded);
        self.ring.close();
    }

    /// Prepare for a new publisher on the same track
    ///
    /// Decoder configuration, GOP state and subscribers are kept; the next
    /// publisher's RTP packets continue the outgoing sequence numbering.
    pub(crate) fn restart_publisher(&mut self) {
        self.value = AvFrame::default();
        self.demuxer.reset();
        self.muxer.rebase();
        self.dts.reset();
        tracing::info!(
            track = %self.name(),
            last_seq = self.muxer.last_sequence(),
            "Publisher restarted"
        );
    }
}

impl Track<VideoPayload> {
    pub(crate) fn append_nalu(&mut self, nalu: Bytes) {
        self.value.payload.nalus.push(nalu);
    }

    pub(crate) fn set_sei(&mut self, sei: Bytes) {
        self.value.payload.sei = Some(sei);
    }

    /// Load a packaged (non sequence header) video chunk into the current
    /// frame
    ///
    /// Millisecond timestamps move to the 90 kHz clock; the composition
    /// offset only applies to the PTS.
    pub(crate) fn load_packaged(
        &mut self,
        timestamp_ms: u32,
        packaged: &PackagedVideo,
        chunk_len: usize,
        nalu_length_size: u8,
    ) {
        self.value.bytes_in += chunk_len;
        self.value.dts = timestamp_ms.wrapping_mul(90);
        self.value.pts = timestamp_ms
            .wrapping_add_signed(packaged.composition_time)
            .wrapping_mul(90);
        self.value.keyframe = packaged.keyframe;

        let body = &packaged.body;
        let mut iter = NaluIterator::new(body, nalu_length_size);
        for nalu in iter.by_ref() {
            self.value.payload.nalus.push(body.slice_ref(nalu));
        }

        let leftover = iter.remaining();
        if leftover > 0 {
            tracing::warn!(track = %self.name(), leftover, "Truncated NAL unit in packaged frame");
            self.count_dropped();
        }
    }

    /// Insert one RTP packet per parameter set ahead of the relayed ones
    pub(crate) fn inject_parameter_sets(&mut self) {
        let Some(first) = self.value.rtp.first() else {
            return;
        };
        let (start, timestamp) = (first.sequence_number, first.timestamp);

        let config = self.decoder_config();
        let raw: Vec<&Bytes> = config.raw.iter().filter(|r| !r.is_empty()).collect();
        if raw.is_empty() {
            return;
        }
        let count = raw.len() as u16;

        let mut packets: Vec<RtpPacket> = raw
            .into_iter()
            .enumerate()
            .map(|(i, nalu)| {
                RtpPacket::new(
                    self.muxer.payload_type(),
                    start.wrapping_add(i as u16),
                    timestamp,
                    self.muxer.ssrc(),
                    false,
                    nalu.clone(),
                )
            })
            .collect();

        for packet in &mut self.value.rtp {
            packet.sequence_number = packet.sequence_number.wrapping_add(count);
        }
        packets.append(&mut self.value.rtp);
        self.value.rtp = packets;
        self.muxer.grow(count);

        tracing::trace!(track = %self.name(), count, "Parameter sets injected");
    }
}

impl<P: FramePayload> Drop for Track<P> {
    fn drop(&mut self) {
        if self.shared.signal_close(CloseReason::PublisherEnded) {
            tracing::info!(track = %self.name(), "Track dropped");
        }
    }
}

/// Read side of a track
pub struct TrackHandle<P> {
    shared: Arc<TrackShared>,
    ring: RingHandle<AvFrame<P>>,
}

impl<P> Clone for TrackHandle<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            ring: self.ring.clone(),
        }
    }
}

impl<P: FramePayload> TrackHandle<P> {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn codec(&self) -> CodecId {
        self.shared.codec
    }

    /// Attach a subscriber
    pub fn subscribe(&self, start: StartPosition) -> Subscriber<P> {
        let reader = self.ring.reader(start);
        let subscribers = self.shared.counters.subscribers.fetch_add(1, Ordering::Relaxed) + 1;

        tracing::info!(
            track = %self.shared.name,
            subscribers,
            position = reader.position(),
            "Subscriber added"
        );

        Subscriber {
            reader,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current decoder configuration
    pub fn decoder_config(&self) -> Arc<DecoderConfiguration> {
        Arc::clone(&self.shared.decoder_config.read())
    }

    /// Frames between the last two keyframes (0 until two were seen)
    pub fn gop_len(&self) -> u32 {
        self.shared.counters.gop.load(Ordering::Relaxed)
    }

    /// Total ingress bytes
    pub fn bytes_in(&self) -> u64 {
        self.shared.counters.bytes_in.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> u32 {
        self.shared.counters.subscribers.load(Ordering::Relaxed)
    }

    /// Most recently published frame
    pub fn latest(&self) -> Option<Arc<AvFrame<P>>> {
        self.ring.latest()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> TrackStats {
        let config_seq = self.shared.decoder_config.read().seq;
        self.shared
            .counters
            .snapshot(&self.shared.name, self.shared.codec, config_seq)
    }

    /// Close reason, if the track has closed
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.close_tx.borrow().clone()
    }

    /// Wait until the track closes
    ///
    /// Resolves once, with the first reason the track was closed for.
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.shared.close_tx.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(reason) = current {
                return reason;
            }
            if rx.changed().await.is_err() {
                return CloseReason::PublisherEnded;
            }
        }
    }
}

/// An attached subscriber cursor
///
/// Dropping the subscriber detaches it.
pub struct Subscriber<P> {
    reader: RingReader<AvFrame<P>>,
    shared: Arc<TrackShared>,
}

impl<P> Subscriber<P> {
    /// Wait for the next frame
    pub async fn next(&mut self) -> Result<Arc<AvFrame<P>>, ReadError> {
        let result = self.reader.next().await;
        self.log_lag(&result);
        result
    }

    /// Read the next frame without waiting
    pub fn try_next(&mut self) -> Result<Arc<AvFrame<P>>, ReadError> {
        let result = self.reader.try_next();
        self.log_lag(&result);
        result
    }

    /// Ring sequence of the next frame to be read
    pub fn position(&self) -> u64 {
        self.reader.position()
    }

    /// Frames published but not yet read
    pub fn pending(&self) -> u64 {
        self.reader.pending()
    }

    /// Detach from the track
    pub fn detach(self) {}

    fn log_lag(&self, result: &Result<Arc<AvFrame<P>>, ReadError>) {
        if let Err(ReadError::Lagged(skipped)) = result {
            tracing::debug!(
                track = %self.shared.name,
                skipped,
                position = self.reader.position(),
                "Subscriber lagged"
            );
        }
    }
}

impl<P> Drop for Subscriber<P> {
    fn drop(&mut self) {
        let prev = self.shared.counters.subscribers.fetch_sub(1, Ordering::Relaxed);
        tracing::debug!(
            track = %self.shared.name,
            subscribers = prev.saturating_sub(1),
            "Subscriber removed"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;
    use crate::track::frame::AudioPayload;
    use crate::track::init_tracing;

    fn video_track() -> Track<VideoPayload> {
        Track::new("live/test", CodecId::H264, TrackConfig::default())
    }

    fn push_frame(track: &mut Track<VideoPayload>, pts: u32, keyframe: bool) {
        track.value.pts = pts;
        track.value.dts = pts;
        track.value.keyframe = keyframe;
        track.value.bytes_in = 100;
        track.append_nalu(Bytes::from(vec![if keyframe { 0x65 } else { 0x41 }; 100]));
        track.flush();
    }

    fn configure(track: &mut Track<VideoPayload>) {
        track.update_decoder_config(
            vec![Bytes::from_static(&[0x67, 1]), Bytes::from_static(&[0x68, 2])],
            Bytes::from_static(&[0x17, 0, 0, 0, 0]),
        );
    }

    #[test]
    fn test_gop_computation() {
        init_tracing();
        let mut track = video_track();
        let handle = track.handle();
        configure(&mut track);

        for i in 0..30u32 {
            push_frame(&mut track, i * 3000, i % 10 == 0);
            if i == 9 {
                assert_eq!(handle.gop_len(), 0);
            }
            if i == 10 {
                assert_eq!(handle.gop_len(), 10);
            }
        }

        let stats = handle.stats();
        assert_eq!(stats.gop, 10);
        assert_eq!(stats.frames, 30);
        assert_eq!(stats.keyframes, 3);
        assert_eq!(stats.bytes_in, 3000);
        assert_eq!(stats.config_seq, 1);
    }

    #[test]
    fn test_gop_ignores_keyframes_before_config() {
        let mut track = video_track();
        let handle = track.handle();

        push_frame(&mut track, 0, true);
        push_frame(&mut track, 3000, false);
        configure(&mut track);
        push_frame(&mut track, 6000, true);
        assert_eq!(handle.gop_len(), 0);

        // Late subscriber starts at the first keyframe after configuration
        let mut sub = handle.subscribe(StartPosition::LatestKeyframe);
        assert_eq!(sub.position(), 2);
        let frame = sub.try_next().unwrap();
        assert!(frame.keyframe);
        assert_eq!(frame.config_seq, 1);
    }

    #[test]
    fn test_empty_frame_carries_rtp() {
        let mut track = video_track();
        let handle = track.handle();

        track.append_rtp(RtpPacket::new(96, 7, 0, 1, false, Bytes::from_static(&[0x67])));
        track.flush();
        assert_eq!(handle.stats().frames, 0);

        push_frame(&mut track, 0, false);
        let frame = handle.latest().unwrap();
        assert_eq!(frame.rtp.len(), 1);
        assert_eq!(frame.rtp[0].sequence_number, 7);
    }

    #[test]
    fn test_config_sequence_per_occurrence() {
        let mut track = video_track();
        assert!(track.decoder_config().is_empty());
        assert_eq!(track.decoder_config().payload_type, 96);

        configure(&mut track);
        configure(&mut track);
        let config = track.decoder_config();
        assert_eq!(config.seq, 2);
        assert_eq!(config.raw.len(), 2);
        assert_eq!(config.payload_type, 96);
    }

    #[test]
    fn test_inject_parameter_sets() {
        let mut track = video_track();
        configure(&mut track);

        track.append_rtp(RtpPacket::new(96, 100, 9000, 1, false, Bytes::from_static(&[0x65])));
        track.append_rtp(RtpPacket::new(96, 101, 9000, 1, true, Bytes::from_static(&[0x65])));
        track.inject_parameter_sets();

        let seqs: Vec<u16> = track.value.rtp.iter().map(|p| p.sequence_number).collect();
        assert_eq!(seqs, vec![100, 101, 102, 103]);
        assert_eq!(&track.value.rtp[0].payload[..], &[0x67, 1]);
        assert_eq!(&track.value.rtp[1].payload[..], &[0x68, 2]);
        assert!(track.value.rtp.iter().all(|p| p.timestamp == 9000));

        // Later relayed packets keep counting after the shift
        track.append_rtp(RtpPacket::new(96, 102, 12000, 1, true, Bytes::from_static(&[0x41])));
        assert_eq!(track.value.rtp.last().unwrap().sequence_number, 104);
    }

    #[test]
    fn test_subscriber_count() {
        let track = video_track();
        let handle = track.handle();

        let a = handle.subscribe(StartPosition::Live);
        let b = handle.subscribe(StartPosition::Live);
        assert_eq!(handle.subscriber_count(), 2);

        a.detach();
        assert_eq!(handle.subscriber_count(), 1);
        drop(b);
        assert_eq!(handle.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_fan_out_isolation() {
        let config = TrackConfig::default().ring_size(8);
        let mut track: Track<AudioPayload> = Track::new("live/audio", CodecId::Aac, config);
        let handle = track.handle();

        let mut fast = handle.subscribe(StartPosition::Live);
        let mut slow = handle.subscribe(StartPosition::Live);

        let mut fast_seen = Vec::new();
        for pts in 0..20u32 {
            track.value.pts = pts;
            track.value.payload.units.push(Bytes::from_static(&[0x21]));
            track.flush();
            fast_seen.push(fast.next().await.unwrap().pts);
        }
        assert_eq!(fast_seen, (0..20).collect::<Vec<_>>());

        // Only the slow reader is lapped
        assert_eq!(slow.try_next().unwrap_err(), ReadError::Lagged(12));
        let mut slow_seen = Vec::new();
        while let Ok(frame) = slow.try_next() {
            slow_seen.push(frame.pts);
        }
        assert_eq!(slow_seen, (12..20).collect::<Vec<_>>());
        assert_eq!(fast.try_next().unwrap_err(), ReadError::Empty);
    }

    #[tokio::test]
    async fn test_subscriber_wakes_on_flush() {
        let mut track = video_track();
        let handle = track.handle();
        let mut sub = handle.subscribe(StartPosition::Live);

        let mut next = task::spawn(async move { sub.next().await.map(|f| f.pts) });
        assert_pending!(next.poll());

        push_frame(&mut track, 3000, false);
        assert!(next.is_woken());
        assert_eq!(assert_ready!(next.poll()), Ok(3000));
    }

    #[tokio::test]
    async fn test_close_fatal_once() {
        let mut track = video_track();
        let handle = track.handle();
        let mut sub = handle.subscribe(StartPosition::Live);
        push_frame(&mut track, 0, false);

        track.close_fatal(MediaError::InvalidParameterSet("SPS"));
        track.close_fatal(MediaError::InvalidAvcPacket);
        track.end();
        assert!(track.is_closed());

        let reason = tokio::time::timeout(Duration::from_secs(1), handle.closed())
            .await
            .unwrap();
        assert_eq!(reason, CloseReason::Fatal(MediaError::InvalidParameterSet("SPS")));

        // Frames after the close are discarded
        push_frame(&mut track, 3000, false);
        assert_eq!(sub.next().await.unwrap().pts, 0);
        assert_eq!(sub.next().await.unwrap_err(), ReadError::Closed);
    }

    #[tokio::test]
    async fn test_drop_signals_publisher_ended() {
        let track = video_track();
        let handle = track.handle();

        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.closed().await }
        });
        drop(track);

        assert_eq!(waiter.await.unwrap(), CloseReason::PublisherEnded);
        assert_eq!(handle.close_reason(), Some(CloseReason::PublisherEnded));
        assert!(handle.subscribe(StartPosition::Live).try_next().unwrap_err() == ReadError::Closed);
    }
}
