//! Statistics and metrics for media tracks

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::track::CodecId;

/// Live counters updated by the producer and read by monitoring
#[derive(Debug)]
pub struct TrackCounters {
    started_at: Instant,
    pub(crate) bytes_in: AtomicU64,
    pub(crate) frames: AtomicU64,
    pub(crate) keyframes: AtomicU64,
    pub(crate) gop: AtomicU32,
    pub(crate) subscribers: AtomicU32,
    /// Units dropped by the codec layer (malformed, mismatched, orphaned)
    pub(crate) dropped_units: AtomicU64,
    pub(crate) rtp_discontinuities: AtomicU64,
    pub(crate) rtp_lost: AtomicU64,
    pub(crate) rtp_late: AtomicU64,
}

impl Default for TrackCounters {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            bytes_in: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            keyframes: AtomicU64::new(0),
            gop: AtomicU32::new(0),
            subscribers: AtomicU32::new(0),
            dropped_units: AtomicU64::new(0),
            rtp_discontinuities: AtomicU64::new(0),
            rtp_lost: AtomicU64::new(0),
            rtp_late: AtomicU64::new(0),
        }
    }
}

impl TrackCounters {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a snapshot
    pub fn snapshot(&self, name: &str, codec: CodecId, config_seq: u32) -> TrackStats {
        TrackStats {
            name: name.to_string(),
            codec,
            duration: self.started_at.elapsed(),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            keyframes: self.keyframes.load(Ordering::Relaxed),
            gop: self.gop.load(Ordering::Relaxed),
            subscribers: self.subscribers.load(Ordering::Relaxed),
            config_seq,
            dropped_units: self.dropped_units.load(Ordering::Relaxed),
            rtp_discontinuities: self.rtp_discontinuities.load(Ordering::Relaxed),
            rtp_lost: self.rtp_lost.load(Ordering::Relaxed),
            rtp_late: self.rtp_late.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time track statistics
#[derive(Debug, Clone, PartialEq)]
pub struct TrackStats {
    /// Track name
    pub name: String,
    /// Codec carried by the track
    pub codec: CodecId,
    /// Time since the track was created
    pub duration: Duration,
    /// Total ingress bytes
    pub bytes_in: u64,
    /// Frames written to the ring
    pub frames: u64,
    /// Keyframes written to the ring
    pub keyframes: u64,
    /// Frames between the last two keyframes
    pub gop: u32,
    /// Currently attached subscribers
    pub subscribers: u32,
    /// Decoder configuration sequence number
    pub config_seq: u32,
    /// Units dropped as malformed or unsupported
    pub dropped_units: u64,
    /// Sequence gaps seen with reordering disabled
    pub rtp_discontinuities: u64,
    /// Packets given up on by the reorder window
    pub rtp_lost: u64,
    /// Packets that arrived behind the reorder window
    pub rtp_late: u64,
}

impl TrackStats {
    /// Ingress bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let millis = self.duration.as_millis() as u64;
        if millis > 0 {
            self.bytes_in * 8 * 1000 / millis
        } else {
            0
        }
    }

    /// Average frames per second
    pub fn frame_rate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}
