//! Fixed-point linear-interpolation rate converter.
//!
//! Grounded on `original_source/src/pcm/plugin/rate.c`'s `resample_expand`/
//! `resample_shrink` kernels, translated from computed-goto per-format
//! dispatch to plain calls into [`crate::format`] (see `SPEC_FULL.md` §9).

use std::cell::Cell;

use crate::area::{DstArea, SrcArea};
use crate::error::PluginError;
use crate::format::{decode_to_common_i16, encode_from_common_i16, LinearFormat};
use crate::{Action, PcmPlugin, Result};

/// Fractional-phase fixed-point shift: phase advances in units of `1/2048`.
pub const SHIFT: u32 = 11;
/// `1 << SHIFT` — one whole phase step.
pub const BITS: u32 = 1 << SHIFT;
/// `BITS - 1` — mask to the fractional part of the phase accumulator.
pub const MASK: u32 = BITS - 1;

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    last_s1: i16,
    last_s2: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Source rate < destination rate: phase advances per output frame.
    Expand,
    /// Source rate > destination rate: phase advances per input frame.
    Shrink,
}

/// Resamples linear-PCM audio from `src_rate` to `dst_rate` using a two-tap
/// linear interpolator with fixed-point fractional phase arithmetic.
///
/// Per `spec.md` §3's continuity invariant, `(last_s1, last_s2, pos)` are
/// preserved across calls to [`PcmPlugin::transfer`] and reset only by
/// [`PcmPlugin::action`].
pub struct RateConverter {
    src_format: LinearFormat,
    dst_format: LinearFormat,
    direction: Direction,
    pitch: u32,
    pos: u32,
    channels: Vec<ChannelState>,
    // (query, result) cache for `src_frames`, exploiting the halving/
    // doubling linearity `spec.md` §4.C calls for.
    src_frames_cache: Cell<(u64, u64)>,
}

impl RateConverter {
    /// Build a rate converter. Fails with [`PluginError::InvalidArgument`]
    /// if `channels == 0` or `src_rate == dst_rate`.
    pub fn build(
        src_format: LinearFormat,
        dst_format: LinearFormat,
        src_rate: u32,
        dst_rate: u32,
        channels: usize,
    ) -> Result<Self> {
        if channels == 0 {
            return Err(PluginError::InvalidArgument("rate plugin requires at least one channel".into()));
        }
        if src_rate == dst_rate {
            return Err(PluginError::InvalidArgument("rate plugin requires src_rate != dst_rate".into()));
        }

        let (direction, pitch) = if src_rate < dst_rate {
            let pitch = ((u64::from(src_rate) << SHIFT) + u64::from(dst_rate) / 2) / u64::from(dst_rate);
            (Direction::Expand, pitch as u32)
        } else {
            let pitch = ((u64::from(dst_rate) << SHIFT) + u64::from(src_rate) / 2) / u64::from(src_rate);
            (Direction::Shrink, pitch as u32)
        };

        tracing::info!(
            src_rate,
            dst_rate,
            channels,
            pitch,
            direction = ?direction,
            "built rate converter"
        );

        Ok(Self {
            src_format,
            dst_format,
            direction,
            pitch,
            pos: 0,
            channels: vec![ChannelState::default(); channels],
            src_frames_cache: Cell::new((0, 0)),
        })
    }

    fn compute_dst_frames(&self, n_src: u64) -> u64 {
        match self.direction {
            Direction::Expand => ((n_src << SHIFT) + u64::from(self.pitch) / 2) / u64::from(self.pitch),
            Direction::Shrink => (n_src * u64::from(self.pitch)) >> SHIFT,
        }
    }

    fn compute_src_frames(&self, n_dst: u64) -> u64 {
        match self.direction {
            Direction::Expand => (n_dst * u64::from(self.pitch) + u64::from(BITS) / 2) >> SHIFT,
            Direction::Shrink => ((n_dst << SHIFT) + u64::from(self.pitch) / 2) / u64::from(self.pitch),
        }
    }

    fn validate_areas(&self, src: &[SrcArea], dst: &[DstArea]) -> Result<()> {
        if src.len() != self.channels.len() || dst.len() != self.channels.len() {
            return Err(PluginError::InvalidArgument(format!(
                "expected {} channels, got {} src / {} dst",
                self.channels.len(),
                src.len(),
                dst.len()
            )));
        }
        let width_bits = self.src_format.width.bits();
        for area in src {
            area.validate_for_rate(width_bits)?;
        }
        let width_bits = self.dst_format.width.bits();
        for area in dst {
            area.validate_for_rate(width_bits)?;
        }
        Ok(())
    }

    fn transfer_channel_expand(
        &self,
        src: &SrcArea,
        dst: &mut DstArea,
        n_src_frames: u64,
        n_dst_frames: u64,
        state: &mut ChannelState,
    ) -> u32 {
        let src_bytes = self.src_format.bytes();
        let dst_bytes = self.dst_format.bytes();

        let mut pos = self.pos;
        let mut s1 = state.last_s1;
        let mut s2 = state.last_s2;
        let mut src_idx: u64 = 0;
        let mut src_remaining = n_src_frames;

        // Catch-up: realign if more than one whole step had accumulated
        // since the previous call (rate.c's single pre-loop GET_S16).
        if pos & !MASK != 0 && src_remaining > 0 {
            s1 = s2;
            s2 = decode_to_common_i16(src.sample(src_idx, src_bytes), self.src_format);
            src_idx += 1;
            src_remaining -= 1;
            pos &= MASK;
        }

        for i in 0..n_dst_frames {
            if pos & !MASK != 0 {
                pos &= MASK;
                s1 = s2;
                if src_remaining > 0 {
                    s2 = decode_to_common_i16(src.sample(src_idx, src_bytes), self.src_format);
                    src_idx += 1;
                    src_remaining -= 1;
                }
            }
            let val = i32::from(s1) + ((i32::from(s2) - i32::from(s1)) * pos as i32) / BITS as i32;
            let val = val.clamp(-32768, 32767) as i16;
            encode_from_common_i16(val, dst.sample_mut(i, dst_bytes), self.dst_format);
            pos += self.pitch;
        }

        state.last_s1 = s1;
        state.last_s2 = s2;
        pos
    }

    fn transfer_channel_shrink(
        &self,
        src: &SrcArea,
        dst: &mut DstArea,
        n_src_frames: u64,
        n_dst_frames: u64,
        state: &mut ChannelState,
    ) -> u32 {
        let src_bytes = self.src_format.bytes();
        let dst_bytes = self.dst_format.bytes();

        let mut pos = self.pos;
        let mut s1 = state.last_s1;
        let mut s2 = state.last_s2;
        let mut dst_remaining = n_dst_frames;
        let mut dst_idx: u64 = 0;

        for i in 0..n_src_frames {
            if dst_remaining == 0 {
                break; // must not overrun the destination even if source remains
            }
            s1 = s2;
            s2 = decode_to_common_i16(src.sample(i, src_bytes), self.src_format);

            if pos & !MASK != 0 {
                let frac = pos & MASK;
                let val = i32::from(s1) + ((i32::from(s2) - i32::from(s1)) * frac as i32) / BITS as i32;
                let val = val.clamp(-32768, 32767) as i16;
                encode_from_common_i16(val, dst.sample_mut(dst_idx, dst_bytes), self.dst_format);
                dst_idx += 1;
                pos = frac;
                dst_remaining -= 1;
            }
            pos += self.pitch;
        }

        state.last_s1 = s1;
        state.last_s2 = s2;
        pos
    }
}

impl PcmPlugin for RateConverter {
    fn transfer(&mut self, src: &[SrcArea], dst: &mut [DstArea], n_src_frames: u64) -> Result<u64> {
        if n_src_frames == 0 {
            return Ok(0);
        }
        self.validate_areas(src, dst)?;

        let n_dst_frames = self.compute_dst_frames(n_src_frames);
        let mut final_pos = self.pos;

        for (ch, (s, d)) in src.iter().zip(dst.iter_mut()).enumerate() {
            let state = &mut self.channels[ch];
            if !s.enabled {
                if d.wanted {
                    d.silence_and_disable(n_dst_frames, self.dst_format);
                } else {
                    d.enabled = false;
                }
                continue;
            }
            d.enabled = true;
            final_pos = match self.direction {
                Direction::Expand => {
                    self.transfer_channel_expand(s, d, n_src_frames, n_dst_frames, state)
                }
                Direction::Shrink => {
                    self.transfer_channel_shrink(s, d, n_src_frames, n_dst_frames, state)
                }
            };
        }

        self.pos = final_pos;
        Ok(n_dst_frames)
    }

    fn src_frames(&self, frames: u64) -> Result<u64> {
        if frames == 0 {
            return Err(PluginError::InvalidArgument("src_frames requires frames > 0".into()));
        }
        let (key, val) = self.src_frames_cache.get();
        if key != 0 {
            if key % frames == 0 {
                let divisor = key / frames;
                if val % divisor == 0 {
                    let result = val / divisor;
                    self.src_frames_cache.set((frames, result));
                    return Ok(result);
                }
            } else if frames % key == 0 {
                let result = val * (frames / key);
                self.src_frames_cache.set((frames, result));
                return Ok(result);
            }
        }
        let result = self.compute_src_frames(frames);
        self.src_frames_cache.set((frames, result));
        Ok(result)
    }

    fn dst_frames(&self, frames: u64) -> Result<u64> {
        if frames == 0 {
            return Err(PluginError::InvalidArgument("dst_frames requires frames > 0".into()));
        }
        Ok(self.compute_dst_frames(frames))
    }

    fn action(&mut self, action: Action) -> Result<()> {
        match action {
            Action::Init | Action::Prepare | Action::Drain | Action::Flush => {
                self.pos = 0;
                for ch in &mut self.channels {
                    *ch = ChannelState::default();
                }
                tracing::debug!(?action, "rate converter state reset");
            }
            Action::Other => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bytes_i16(samples: &[i16]) -> Vec<u8> {
        let fmt = LinearFormat::s16_le();
        let mut bytes = vec![0u8; samples.len() * 2];
        for (i, &s) in samples.iter().enumerate() {
            encode_from_common_i16(s, &mut bytes[i * 2..i * 2 + 2], fmt);
        }
        bytes
    }

    fn read_bytes_i16(bytes: &[u8]) -> Vec<i16> {
        let fmt = LinearFormat::s16_le();
        bytes.chunks_exact(2).map(|c| decode_to_common_i16(c, fmt)).collect()
    }

    #[test]
    fn build_rejects_equal_rates() {
        let fmt = LinearFormat::s16_le();
        let err = RateConverter::build(fmt, fmt, 44_100, 44_100, 1).unwrap_err();
        assert_eq!(err.code(), -22);
    }

    #[test]
    fn s1_2_to_1_downsample() {
        let fmt = LinearFormat::s16_le();
        let mut rate = RateConverter::build(fmt, fmt, 96_000, 48_000, 1).unwrap();
        assert_eq!(rate.pitch, 1024);

        let src_samples = [1000i16, 2000, 3000, 4000];
        let src_bytes = make_bytes_i16(&src_samples);
        let dst_frames = rate.dst_frames(4).unwrap();
        assert_eq!(dst_frames, 2);

        let mut dst_bytes = vec![0u8; dst_frames as usize * 2];
        let src = vec![SrcArea::new(&src_bytes, 0, 16, true)];
        let mut dst = vec![DstArea::new(&mut dst_bytes, 0, 16, true)];
        let written = rate.transfer(&src, &mut dst, 4).unwrap();
        assert_eq!(written, 2);

        let out = read_bytes_i16(&dst_bytes);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn s2_3_to_2_upsample() {
        let fmt = LinearFormat::s16_le();
        let rate = RateConverter::build(fmt, fmt, 32_000, 48_000, 1).unwrap();
        assert_eq!(rate.pitch, 1365);
        assert_eq!(rate.dst_frames(8).unwrap(), 12);
    }

    #[test]
    fn invariant_dst_frames_monotonic() {
        let fmt = LinearFormat::s16_le();
        let rate = RateConverter::build(fmt, fmt, 32_000, 48_000, 2).unwrap();
        let mut prev = 0u64;
        for n in 1..200u64 {
            let d = rate.dst_frames(n).unwrap();
            assert!(d >= prev);
            prev = d;
        }
    }

    #[test]
    fn invariant_src_dst_round_trip_within_one() {
        let fmt = LinearFormat::s16_le();
        let rate = RateConverter::build(fmt, fmt, 44_100, 48_000, 1).unwrap();
        for n in [1u64, 2, 17, 256, 4096] {
            let dst = rate.dst_frames(n).unwrap();
            let back = rate.src_frames(dst).unwrap();
            assert!((back as i64 - n as i64).abs() <= 1, "n={n} dst={dst} back={back}");
        }
    }

    #[test]
    fn continuity_across_calls_matches_single_call() {
        let fmt = LinearFormat::s16_le();
        let samples: Vec<i16> = (0..16).map(|i| i * 500).collect();
        let bytes = make_bytes_i16(&samples);

        // Single call across the whole block.
        let mut rate_a = RateConverter::build(fmt, fmt, 44_100, 48_000, 1).unwrap();
        let total_dst = rate_a.dst_frames(16).unwrap();
        let mut out_a = vec![0u8; total_dst as usize * 2];
        {
            let src = vec![SrcArea::new(&bytes, 0, 16, true)];
            let mut dst = vec![DstArea::new(&mut out_a, 0, 16, true)];
            rate_a.transfer(&src, &mut dst, 16).unwrap();
        }

        // Two calls, split at frame 8.
        let mut rate_b = RateConverter::build(fmt, fmt, 44_100, 48_000, 1).unwrap();
        let first_bytes = &bytes[0..16];
        let second_bytes = &bytes[16..32];
        let first_dst = rate_b.dst_frames(8).unwrap();
        let mut out_b1 = vec![0u8; first_dst as usize * 2];
        {
            let src = vec![SrcArea::new(first_bytes, 0, 16, true)];
            let mut dst = vec![DstArea::new(&mut out_b1, 0, 16, true)];
            rate_b.transfer(&src, &mut dst, 8).unwrap();
        }
        let second_dst = rate_b.dst_frames(8).unwrap();
        let mut out_b2 = vec![0u8; second_dst as usize * 2];
        {
            let src = vec![SrcArea::new(second_bytes, 0, 16, true)];
            let mut dst = vec![DstArea::new(&mut out_b2, 0, 16, true)];
            rate_b.transfer(&src, &mut dst, 8).unwrap();
        }

        let combined: Vec<u8> = out_b1.into_iter().chain(out_b2).collect();
        assert_eq!(out_a, combined, "split transfer must match one contiguous transfer");
    }

    #[test]
    fn action_init_zeroes_state_then_zero_input_yields_zero_output() {
        let fmt = LinearFormat::s16_le();
        let mut rate = RateConverter::build(fmt, fmt, 44_100, 48_000, 1).unwrap();

        // Warm up with non-zero data so state is non-trivial.
        let bytes = make_bytes_i16(&[1234, 5678, -4321, 999]);
        let dst_frames = rate.dst_frames(4).unwrap();
        let mut scratch = vec![0u8; dst_frames as usize * 2];
        {
            let src = vec![SrcArea::new(&bytes, 0, 16, true)];
            let mut dst = vec![DstArea::new(&mut scratch, 0, 16, true)];
            rate.transfer(&src, &mut dst, 4).unwrap();
        }

        rate.action(Action::Init).unwrap();

        let zero_bytes = make_bytes_i16(&[0, 0, 0, 0]);
        let dst_frames = rate.dst_frames(4).unwrap();
        let mut out = vec![0u8; dst_frames as usize * 2];
        {
            let src = vec![SrcArea::new(&zero_bytes, 0, 16, true)];
            let mut dst = vec![DstArea::new(&mut out, 0, 16, true)];
            rate.transfer(&src, &mut dst, 4).unwrap();
        }
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn s6_disabled_source_to_wanted_destination_is_silenced() {
        let fmt = LinearFormat::s16_le();
        let mut rate = RateConverter::build(fmt, fmt, 44_100, 48_000, 1).unwrap();
        let bytes = make_bytes_i16(&[1, 2, 3, 4]);
        let dst_frames = rate.dst_frames(4).unwrap();
        let mut out = vec![0xAAu8; dst_frames as usize * 2];

        let src = vec![SrcArea::new(&bytes, 0, 16, false)];
        let mut dst = vec![DstArea::new(&mut out, 0, 16, true)];
        rate.transfer(&src, &mut dst, 4).unwrap();

        assert!(out.iter().all(|&b| b == 0));
        assert!(!dst[0].enabled);
    }

    /// Regression test for the double-advance bug in `rate.c`'s
    /// `resample_expand` (spec Open Question #2): the original C code
    /// advances its `rvoices` channel-state pointer twice per processed
    /// channel (once via the `for` loop's own increment clause, once via an
    /// explicit `rvoices++` at the end of the loop body), corrupting state
    /// for every channel after the first. With >=3 independently-valued
    /// channels, per-channel state must stay distinct across calls.
    #[test]
    fn regression_three_channels_keep_independent_state() {
        let fmt = LinearFormat::s16_le();
        let mut rate = RateConverter::build(fmt, fmt, 44_100, 48_000, 3).unwrap();

        let ch0 = make_bytes_i16(&[100, 200, 300, 400]);
        let ch1 = make_bytes_i16(&[-100, -200, -300, -400]);
        let ch2 = make_bytes_i16(&[5, 10, 15, 20]);

        let dst_frames = rate.dst_frames(4).unwrap();
        let mut out0 = vec![0u8; dst_frames as usize * 2];
        let mut out1 = vec![0u8; dst_frames as usize * 2];
        let mut out2 = vec![0u8; dst_frames as usize * 2];

        let src = vec![
            SrcArea::new(&ch0, 0, 16, true),
            SrcArea::new(&ch1, 0, 16, true),
            SrcArea::new(&ch2, 0, 16, true),
        ];
        let mut dst = vec![
            DstArea::new(&mut out0, 0, 16, true),
            DstArea::new(&mut out1, 0, 16, true),
            DstArea::new(&mut out2, 0, 16, true),
        ];
        rate.transfer(&src, &mut dst, 4).unwrap();

        let o0 = read_bytes_i16(&out0);
        let o1 = read_bytes_i16(&out1);
        let o2 = read_bytes_i16(&out2);
        // Channel 1 is the negation of channel 0 and channel 2 is a small
        // positive ramp: if state bled across channels these would not
        // hold the expected sign/magnitude relationships.
        assert!(o0.iter().all(|&v| v > 0));
        assert!(o1.iter().all(|&v| v < 0));
        assert!(o2.iter().all(|&v| v.abs() <= 20));
    }
}
