//! Media track core for a live streaming engine
//!
//! A track accepts one publisher's media, in RTP, Annex-B, ADTS or packaged
//! (FLV-style) form, normalizes it into [`AvFrame`]s and fans those out to
//! any number of subscribers through a fixed-size ring:
//!
//! ```text
//!                  ┌───────────────────────────────┐
//!  RTP ──► reorder ┤                               │    ┌──► Subscriber (live)
//!  Annex-B ────────┤  H264Track / H265Track /      ├──► ring ──► Subscriber (keyframe)
//!  packaged ───────┤  AacTrack (framing, config)   │    └──► Subscriber ...
//!                  └───────────────────────────────┘
//! ```
//!
//! Producers never wait for subscribers. A subscriber that falls a full
//! ring behind observes [`ReadError::Lagged`] and resumes at the oldest
//! frame still held.
//!
//! The crate emits [`tracing`] events but never installs a subscriber.

pub mod config;
pub mod error;
pub mod media;
pub mod ring;
pub mod rtp;
pub mod stats;
pub mod track;

pub use config::TrackConfig;
pub use error::{CloseReason, Error, MediaError, Result, RtpError};
pub use ring::{ReadError, StartPosition};
pub use rtp::{LatePacketPolicy, RtpPacket};
pub use stats::TrackStats;
pub use track::{
    AacTrack, AudioPayload, AvFrame, CodecId, DecoderConfiguration, H264Track, H265Track,
    NaluWriter, PackagedIngest, RtpIngest, Subscriber, TrackHandle, VideoPayload,
};
