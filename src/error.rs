//! Error types
//!
//! Errors fall in three groups:
//! - per-unit errors ([`MediaError`], [`RtpError`]) returned by parsers and
//!   swallowed (logged) by the codec state machines
//! - fatal errors that close a track, reported once as a [`CloseReason`]
//! - ring-buffer read conditions ([`crate::ring::ReadError`]), which are not
//!   errors for the producer at all

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("rtp error: {0}")]
    Rtp(#[from] RtpError),
}

impl Error {
    /// The underlying media error, or `fallback` for any other kind
    pub fn into_media(self, fallback: MediaError) -> MediaError {
        match self {
            Error::Media(err) => err,
            Error::Rtp(_) => fallback,
        }
    }
}

/// Bitstream and container errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("invalid AVC decoder configuration record")]
    InvalidAvcPacket,

    #[error("invalid HEVC decoder configuration record")]
    InvalidHevcPacket,

    #[error("invalid AAC data")]
    InvalidAacPacket,

    #[error("invalid ADTS header")]
    InvalidAdts,

    #[error("invalid {0} parameter set")]
    InvalidParameterSet(&'static str),

    #[error("packaged chunk too short: {0} bytes")]
    PackagedTooShort(usize),

    #[error("bitstream ended unexpectedly")]
    UnexpectedEof,

    #[error("exp-golomb code too long")]
    GolombOverflow,
}

/// RTP packet and packetization errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RtpError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),

    #[error("unsupported RTP version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid padding length {0}")]
    InvalidPadding(u8),

    #[error("payload type mismatch: expected {expected}, got {got}")]
    PayloadTypeMismatch { expected: u8, got: u8 },

    #[error("aggregated unit length {declared} exceeds remaining {remaining} bytes")]
    AggregationOverflow { declared: usize, remaining: usize },

    #[error("fragment without a start fragment")]
    OrphanFragment,

    #[error("empty payload")]
    EmptyPayload,

    #[error("access unit of {0} bytes exceeds the AU-header size field")]
    AccessUnitTooLarge(usize),
}

/// Why a track was closed
///
/// Delivered exactly once to the owning session through
/// [`crate::track::TrackHandle::closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The publisher ended the track normally
    PublisherEnded,
    /// Decoder configuration could not be parsed; no later frame is decodable
    Fatal(MediaError),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::PublisherEnded => write!(f, "publisher ended"),
            CloseReason::Fatal(err) => write!(f, "fatal: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: Error = MediaError::InvalidAvcPacket.into();
        assert!(matches!(err, Error::Media(MediaError::InvalidAvcPacket)));

        let err: Error = RtpError::TooShort(3).into();
        assert_eq!(err.to_string(), "rtp error: packet too short: 3 bytes");
        assert_eq!(
            err.into_media(MediaError::InvalidAvcPacket),
            MediaError::InvalidAvcPacket
        );

        let err: Error = MediaError::UnexpectedEof.into();
        assert_eq!(
            err.into_media(MediaError::InvalidAvcPacket),
            MediaError::UnexpectedEof
        );
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::PublisherEnded.to_string(), "publisher ended");
        let reason = CloseReason::Fatal(MediaError::InvalidParameterSet("SPS"));
        assert_eq!(reason.to_string(), "fatal: invalid SPS parameter set");
    }
}
