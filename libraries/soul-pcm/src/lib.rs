//! Fixed-point PCM rate conversion and channel routing/mixing.
//!
//! This crate implements the two DSP plug-ins that sit between a PCM
//! producer and a consumer in a stream-transform pipeline:
//!
//! - [`rate::RateConverter`] resamples a block of linear-PCM audio between
//!   sample rates using a two-tap linear interpolator with fixed-point
//!   fractional phase arithmetic.
//! - [`route::RouteConverter`] maps M source channels to N destination
//!   channels through a sparse attenuation matrix (the "transfer table"),
//!   producing each destination sample as a possibly-attenuated weighted
//!   sum of its sources.
//!
//! Both operate per-channel, per-sample, across every linear-PCM sample
//! format this crate's [`format::LinearFormat`] can describe (8/16/24/32
//! bit, signed/unsigned, little/big endian), and preserve state across
//! successive [`PcmPlugin::transfer`] calls.
//!
//! # Example
//!
//! ```
//! use soul_pcm::format::LinearFormat;
//! use soul_pcm::rate::RateConverter;
//! use soul_pcm::area::{SrcArea, DstArea};
//! use soul_pcm::PcmPlugin;
//!
//! let fmt = LinearFormat::s16_le();
//! let mut rate = RateConverter::build(fmt, fmt, 44_100, 48_000, 1).unwrap();
//!
//! let mut src_bytes = vec![0u8; 2 * 4];
//! for (i, chunk) in src_bytes.chunks_mut(2).enumerate() {
//!     soul_pcm::format::encode_from_common_i16((i as i16) * 1000, chunk, fmt);
//! }
//! let dst_frames = rate.dst_frames(4).unwrap();
//! let mut dst_bytes = vec![0u8; dst_frames as usize * 2];
//!
//! let src = vec![SrcArea::new(&src_bytes, 0, 16, true)];
//! let mut dst = vec![DstArea::new(&mut dst_bytes, 0, 16, true)];
//! let written = rate.transfer(&src, &mut dst, 4).unwrap();
//! assert_eq!(written, dst_frames);
//! ```

pub mod area;
pub mod error;
pub mod format;
pub mod rate;
pub mod route;

pub use area::{DstArea, SrcArea};
pub use error::{PluginError, Result};
pub use format::LinearFormat;

/// Lifecycle actions a plugin can be asked to perform.
///
/// `Init`, `Prepare`, `Drain`, and `Flush` all reset a plugin's internal
/// DSP state (rate phase/history); any other action is silently ignored,
/// matching `spec.md` §6's "others silently ignored" contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Reset state before the first transfer.
    Init,
    /// Reset state before (re)starting playback.
    Prepare,
    /// Reset state after draining buffered audio.
    Drain,
    /// Reset state after a flush.
    Flush,
    /// Any other lifecycle action — ignored.
    Other,
}

/// The contract every plug-in in this pipeline implements.
///
/// A plugin is built once with frozen source/destination formats and
/// channel counts; `transfer` is the only method called in steady state
/// and must not allocate (state is sized once, at build time).
pub trait PcmPlugin {
    /// Consume up to `frames` source frames and produce the corresponding
    /// number of destination frames, returning how many were written.
    fn transfer(&mut self, src: &[SrcArea], dst: &mut [DstArea], frames: u64) -> Result<u64>;

    /// How many source frames are needed to produce `frames` destination
    /// frames (the inverse of [`PcmPlugin::dst_frames`]).
    fn src_frames(&self, frames: u64) -> Result<u64>;

    /// How many destination frames `frames` source frames produce.
    fn dst_frames(&self, frames: u64) -> Result<u64>;

    /// Perform a lifecycle action (see [`Action`]).
    fn action(&mut self, action: Action) -> Result<()>;
}
