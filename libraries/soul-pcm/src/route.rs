//! Sparse attenuation-matrix channel router/mixer.
//!
//! Grounded on `original_source/src/pcm/plugin/route.c`'s `route_transfer`
//! and kernel-selection logic (`route_prepare`/`getput_label`/`sum_label`),
//! with the per-channel pointer bug it carries (spec Open Question #1)
//! deliberately not reproduced: see [`RouteRow`] for the fix.

use crate::area::{DstArea, SrcArea};
use crate::error::PluginError;
use crate::format::{decode_to_route_aligned, encode_from_route_aligned, LinearFormat};
use crate::{Action, PcmPlugin, Result};

/// Unity weight: a source contributes at 100% when its transfer-table entry
/// equals this value.
pub const FULL: i64 = 1 << 16;

#[derive(Debug, Clone, Copy)]
struct Tap {
    src_index: usize,
    weight: i64,
}

/// A compiled destination channel: the subset of sources with a nonzero
/// weight in this row of the transfer table, plus whether any of them is
/// attenuated (weight != FULL).
#[derive(Debug, Clone)]
enum RouteRow {
    /// No source contributes: the destination is silenced.
    Zero,
    /// Exactly one source contributes at unity weight: a straight copy.
    One { src_index: usize },
    /// One or more sources contribute; weighted sum or plain addition.
    Many { taps: Vec<Tap>, attenuated: bool },
}

impl RouteRow {
    fn compile(weights: &[i64]) -> Result<Self> {
        let mut taps = Vec::new();
        for (src_index, &w) in weights.iter().enumerate() {
            if w < 0 || w > FULL {
                return Err(PluginError::InvalidArgument(format!(
                    "route weight out of range at source {src_index}: {w} (must be 0..={FULL})"
                )));
            }
            if w != 0 {
                taps.push(Tap { src_index, weight: w });
            }
        }

        if taps.is_empty() {
            return Ok(RouteRow::Zero);
        }
        // A single source dispatches to the cheap copy kernel only when it
        // carries no attenuation; otherwise (including a single source at
        // less than unity weight, per the stricter rule this crate applies)
        // it still needs the weighted-sum kernel.
        if taps.len() == 1 && taps[0].weight == FULL {
            return Ok(RouteRow::One { src_index: taps[0].src_index });
        }
        // `att` tracks whether ANY tap is attenuated, not how many taps
        // there are: two unity-weight sources summed still take the
        // "noatt" add (plain addition, no weight multiply/divide), matching
        // `route.c`'s `ttable->att` flag.
        let attenuated = taps.iter().any(|t| t.weight != FULL);
        Ok(RouteRow::Many { taps, attenuated })
    }

    fn sources_mask(&self, n_src: usize) -> Vec<bool> {
        let mut mask = vec![false; n_src];
        match self {
            RouteRow::Zero => {}
            RouteRow::One { src_index } => mask[*src_index] = true,
            RouteRow::Many { taps, .. } => {
                for t in taps {
                    mask[t.src_index] = true;
                }
            }
        }
        mask
    }

    /// This row's taps as a flat list, regardless of which compiled variant
    /// it is. Used to filter out disabled sources at transfer time: `route.c`
    /// (`route_to_voice`, route.c:198-214) rebuilds its active-source list on
    /// every call by skipping disabled sources, rather than baking source
    /// enablement into the compiled table.
    fn taps(&self) -> Vec<Tap> {
        match self {
            RouteRow::Zero => Vec::new(),
            RouteRow::One { src_index } => vec![Tap { src_index: *src_index, weight: FULL }],
            RouteRow::Many { taps, .. } => taps.clone(),
        }
    }
}

/// A compiled row-major weight matrix: `table[dst][src]` is the weight (0..=
/// [`FULL`]) source `src` contributes to destination `dst`.
pub struct TransferTable {
    rows: Vec<RouteRow>,
    n_src: usize,
}

impl TransferTable {
    /// Compile a `dst_channels`-by-`src_channels` row-major weight matrix.
    /// Fails with [`PluginError::InvalidArgument`] if any weight is outside
    /// `0..=FULL`, or if the matrix shape doesn't match `src_channels *
    /// dst_channels`. Row sums are not validated against `FULL`: a row may
    /// legally sum to more, and the engine saturates the result instead
    /// (`route.c` guards this check out; see `DESIGN.md`).
    pub fn compile(weights: &[i64], src_channels: usize, dst_channels: usize) -> Result<Self> {
        if weights.len() != src_channels * dst_channels {
            return Err(PluginError::InvalidArgument(format!(
                "expected {}x{} weight matrix ({} entries), got {}",
                dst_channels,
                src_channels,
                src_channels * dst_channels,
                weights.len()
            )));
        }
        let mut rows = Vec::with_capacity(dst_channels);
        for dst in 0..dst_channels {
            let row = &weights[dst * src_channels..(dst + 1) * src_channels];
            rows.push(RouteRow::compile(row)?);
        }
        Ok(Self { rows, n_src: src_channels })
    }

    fn dst_channels(&self) -> usize {
        self.rows.len()
    }
}

/// Routes and mixes `src_channels` source channels into `dst_channels`
/// destination channels through a compiled [`TransferTable`].
pub struct RouteConverter {
    src_format: LinearFormat,
    dst_format: LinearFormat,
    table: TransferTable,
}

impl RouteConverter {
    /// Build a router from a compiled transfer table and the sample formats
    /// on each side.
    pub fn build(src_format: LinearFormat, dst_format: LinearFormat, table: TransferTable) -> Self {
        tracing::info!(
            src_channels = table.n_src,
            dst_channels = table.dst_channels(),
            "built route converter"
        );
        Self { src_format, dst_format, table }
    }

    /// Which source channels any destination row actually reads from.
    #[must_use]
    pub fn src_voices_mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.table.n_src];
        for row in &self.table.rows {
            for (i, used) in row.sources_mask(self.table.n_src).into_iter().enumerate() {
                mask[i] |= used;
            }
        }
        mask
    }

    /// Which destination channels carry at least one source.
    #[must_use]
    pub fn dst_voices_mask(&self) -> Vec<bool> {
        self.table.rows.iter().map(|r| !matches!(r, RouteRow::Zero)).collect()
    }

    fn validate_areas(&self, src: &[SrcArea], dst: &[DstArea]) -> Result<()> {
        if src.len() != self.table.n_src {
            return Err(PluginError::InvalidArgument(format!(
                "expected {} source channels, got {}",
                self.table.n_src,
                src.len()
            )));
        }
        if dst.len() != self.table.dst_channels() {
            return Err(PluginError::InvalidArgument(format!(
                "expected {} destination channels, got {}",
                self.table.dst_channels(),
                dst.len()
            )));
        }
        for area in src {
            area.validate()?;
        }
        for area in dst {
            area.validate()?;
        }
        Ok(())
    }

    /// Divide the attenuated sum back down by `FULL` and saturate to the
    /// representable range of a signed, left-aligned 32-bit sample.
    fn normalize(&self, sum: i128, attenuated: bool) -> i64 {
        let sum = if attenuated { sum / i128::from(FULL) } else { sum };
        sum.clamp(i128::from(i32::MIN), i128::from(i32::MAX)) as i64
    }

    /// Mix one frame over `active` — the taps whose source is enabled for
    /// this call. `attenuated` reflects only those active taps: a row
    /// compiled with a mix of full- and partial-weight taps still takes the
    /// plain-addition path here if every tap that's actually enabled right
    /// now happens to be full weight.
    fn transfer_active(
        &self,
        active: &[Tap],
        attenuated: bool,
        src: &[SrcArea],
        dst: &mut DstArea,
        frame: u64,
        src_bytes: usize,
        dst_bytes: usize,
    ) {
        if active.len() == 1 && !attenuated {
            let aligned = decode_to_route_aligned(src[active[0].src_index].sample(frame, src_bytes), self.src_format);
            encode_from_route_aligned(aligned, dst.sample_mut(frame, dst_bytes), self.dst_format);
            return;
        }
        let mut sum: i128 = 0;
        for tap in active {
            let aligned = i128::from(decode_to_route_aligned(src[tap.src_index].sample(frame, src_bytes), self.src_format));
            if attenuated {
                sum += aligned * i128::from(tap.weight);
            } else {
                sum += aligned;
            }
        }
        let normalized = self.normalize(sum, attenuated);
        encode_from_route_aligned(normalized, dst.sample_mut(frame, dst_bytes), self.dst_format);
    }
}

impl PcmPlugin for RouteConverter {
    fn transfer(&mut self, src: &[SrcArea], dst: &mut [DstArea], frames: u64) -> Result<u64> {
        self.validate_areas(src, dst)?;

        let src_bytes = self.src_format.bytes();
        let dst_bytes = self.dst_format.bytes();

        for (dst_idx, row) in self.table.rows.iter().enumerate() {
            let d = &mut dst[dst_idx];
            // Mirror `route_to_voice`'s per-call active-source collection:
            // skip disabled sources rather than silencing the whole row for
            // them, and only fall back to silence once none remain (this is
            // also how a `RouteRow::Zero` row, which has no taps at all,
            // ends up here with an empty `active` list).
            let active: Vec<Tap> = row.taps().into_iter().filter(|t| src[t.src_index].enabled).collect();

            if active.is_empty() {
                if d.wanted {
                    d.silence_and_disable(frames, self.dst_format);
                } else {
                    d.enabled = false;
                }
                continue;
            }

            d.enabled = true;
            let attenuated = active.iter().any(|t| t.weight != FULL);
            for frame in 0..frames {
                self.transfer_active(&active, attenuated, src, d, frame, src_bytes, dst_bytes);
            }
        }

        Ok(frames)
    }

    fn src_frames(&self, frames: u64) -> Result<u64> {
        Ok(frames)
    }

    fn dst_frames(&self, frames: u64) -> Result<u64> {
        Ok(frames)
    }

    fn action(&mut self, _action: Action) -> Result<()> {
        // The router carries no cross-call state: every frame is independent.
        Ok(())
    }
}
