//! Decode timestamp estimation
//!
//! Some sources (raw bitstreams, RTP) only carry presentation timestamps.
//! With B-frames, PTS is not monotonic in decode order, so the DTS is
//! estimated as the smallest PTS among the last few frames:
//!
//! ```text
//! decode order:  ...   P     B     B     P     B     B
//! pts:           ... 18000 12000 15000 27000 21000 24000
//! dts:           ...  9000  9000 12000 12000 15000 21000
//! ```
//!
//! The estimate never decreases. Until the first out-of-order PTS is seen
//! the stream is assumed to have no reordering and DTS equals PTS.

/// Number of recent PTS values considered
const WINDOW: usize = 3;

/// A backward PTS jump larger than this is treated as a timestamp reset
const RESET_THRESHOLD: u32 = 0x8000_0000;

/// Per-track DTS estimator
#[derive(Debug, Default, Clone)]
pub struct DtsEstimator {
    recent: [u32; WINDOW],
    len: usize,
    prev_pts: Option<u32>,
    prev_dts: u32,
    reordered: bool,
}

impl DtsEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a DTS for `pts`
    pub fn feed(&mut self, pts: u32) -> u32 {
        if let Some(prev) = self.prev_pts {
            if pts < prev {
                if prev - pts > RESET_THRESHOLD {
                    tracing::debug!(pts, prev, "PTS wrapped, DTS estimator reset");
                    self.reset();
                } else {
                    self.reordered = true;
                }
            }
        }

        if self.len == WINDOW {
            self.recent.rotate_left(1);
            self.len -= 1;
        }
        self.recent[self.len] = pts;
        self.len += 1;
        self.prev_pts = Some(pts);

        let estimate = if self.reordered {
            self.recent[..self.len].iter().copied().min().unwrap_or(pts)
        } else {
            pts
        };

        let dts = estimate.max(self.prev_dts);
        self.prev_dts = dts;
        dts
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
