//! Strided channel views ("areas").
//!
//! An [`Area`] describes where one channel's samples live: a byte buffer,
//! the bit offset of the first sample, and the bit stride between
//! successive samples. `spec.md` models this as `{addr, first_bit, step_bit,
//! enabled, wanted}` with a single pointer shared across channels that may
//! alias into one interleaved buffer.
//!
//! Rust's aliasing rules don't allow handing out more than one live `&mut`
//! into the same buffer, and this workspace forbids `unsafe_code`, so each
//! channel here owns an exclusive, non-overlapping byte slice — the planar
//! layout `soul_audio`'s own buffers already use internally. `step_bit`
//! still supports non-contiguous layouts *within* a channel's own slice
//! (e.g. padded sample slots); it just can't describe interleaving across
//! channels sharing one buffer. See `DESIGN.md` for the open-question
//! writeup.

use crate::error::PluginError;

fn validate_alignment(first_bit: u32, step_bit: u32) -> Result<(), PluginError> {
    if first_bit % 8 != 0 || step_bit % 8 != 0 {
        return Err(PluginError::InvalidArgument(format!(
            "area is not byte-aligned: first_bit={first_bit}, step_bit={step_bit}"
        )));
    }
    Ok(())
}

/// A read-only channel view: the source side of a `transfer` call.
#[derive(Debug)]
pub struct SrcArea<'a> {
    data: &'a [u8],
    first_bit: u32,
    step_bit: u32,
    /// Whether this channel currently carries data.
    pub enabled: bool,
}

impl<'a> SrcArea<'a> {
    /// Build a source view over `data`, with a sample at `first_bit` and
    /// every `step_bit` bits thereafter.
    #[must_use]
    pub fn new(data: &'a [u8], first_bit: u32, step_bit: u32, enabled: bool) -> Self {
        Self { data, first_bit, step_bit, enabled }
    }

    /// Byte-align check required before this view can be used in a
    /// `transfer` call.
    pub fn validate(&self) -> Result<(), PluginError> {
        validate_alignment(self.first_bit, self.step_bit)
    }

    /// The test suite additionally requires `step_bit % 16 == 0` for 16-bit
    /// samples on the rate path.
    pub fn validate_for_rate(&self, sample_width_bits: u32) -> Result<(), PluginError> {
        self.validate()?;
        if sample_width_bits == 16 && self.step_bit % 16 != 0 {
            return Err(PluginError::InvalidArgument(format!(
                "rate path requires 16-bit-aligned stride for 16-bit samples, got step_bit={}",
                self.step_bit
            )));
        }
        Ok(())
    }

    /// The byte slice holding frame `frame`'s `width_bytes`-byte sample.
    #[must_use]
    pub fn sample(&self, frame: u64, width_bytes: usize) -> &[u8] {
        let offset = (self.first_bit / 8) as u64 + frame * (self.step_bit / 8) as u64;
        let offset = offset as usize;
        &self.data[offset..offset + width_bytes]
    }
}

/// A mutable channel view: the destination side of a `transfer` call.
#[derive(Debug)]
pub struct DstArea<'a> {
    data: &'a mut [u8],
    first_bit: u32,
    step_bit: u32,
    /// Whether this channel currently carries data (plugins set this after
    /// processing).
    pub enabled: bool,
    /// Whether the consumer downstream expects this channel to carry data.
    pub wanted: bool,
}

impl<'a> DstArea<'a> {
    /// Build a destination view over `data`, with a sample at `first_bit`
    /// and every `step_bit` bits thereafter.
    #[must_use]
    pub fn new(data: &'a mut [u8], first_bit: u32, step_bit: u32, wanted: bool) -> Self {
        Self { data, first_bit, step_bit, enabled: false, wanted }
    }

    /// Byte-align check required before this view can be used in a
    /// `transfer` call.
    pub fn validate(&self) -> Result<(), PluginError> {
        validate_alignment(self.first_bit, self.step_bit)
    }

    /// The test suite additionally requires `step_bit % 16 == 0` for 16-bit
    /// samples on the rate path.
    pub fn validate_for_rate(&self, sample_width_bits: u32) -> Result<(), PluginError> {
        self.validate()?;
        if sample_width_bits == 16 && self.step_bit % 16 != 0 {
            return Err(PluginError::InvalidArgument(format!(
                "rate path requires 16-bit-aligned stride for 16-bit samples, got step_bit={}",
                self.step_bit
            )));
        }
        Ok(())
    }

    /// The byte slice holding frame `frame`'s `width_bytes`-byte sample,
    /// mutable for writing.
    pub fn sample_mut(&mut self, frame: u64, width_bytes: usize) -> &mut [u8] {
        let offset = (self.first_bit / 8) as u64 + frame * (self.step_bit / 8) as u64;
        let offset = offset as usize;
        &mut self.data[offset..offset + width_bytes]
    }

    /// Write the format's silence pattern into every frame in `0..frames`
    /// and mark this channel disabled, matching `snd_pcm_area_silence`
    /// followed by the disabled-source contract in `spec.md` §3/§4.C/§4.E.
    pub fn silence_and_disable(&mut self, frames: u64, fmt: crate::format::LinearFormat) {
        let width_bytes = fmt.bytes();
        for frame in 0..frames {
            let slot = self.sample_mut(frame, width_bytes);
            crate::format::silence(slot, fmt);
        }
        self.enabled = false;
    }
}
