// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Per-tile derivation of symmetric, separable Wiener filters.
//!
//! The per-tile statistics give the exact quadratic form of the restoration
//! error, so the search solves the normal equations directly instead of
//! trialing filters: a cross-correlation vector M and an auto-correlation
//! matrix H over the 7x7 window, then alternating per-axis least squares
//! under the symmetry and unit-gain constraints.

use v_frame::math::clamp;
use v_frame::pixel::{CastFromPrimitive, Pixel};
use v_frame::plane::Plane;

use crate::frame::FrameBuffers;
use crate::ops::RestorationOps;
use crate::pick::{PickContext, PickError};
use crate::rd::{compute_rd_cost, rate_from_bits};
use crate::restoration::{
  RestorationInfo, RestorationKind, WienerCoeffs, RESTORE_KIND_BITS,
  WIENER_FILT_STEP, WIENER_HALFWIN, WIENER_TAPS_MAX, WIENER_TAPS_MID,
  WIENER_TAPS_MIN, WIENER_TAP_BITS, WIENER_WIN, WIENER_WIN2,
};
use crate::tile::{TileGrid, TileRect};
use crate::trial::{sse_plane, try_restoration};

const WIENER_ITERATIONS: usize = 10;
const WIENER_HALFWIN1: usize = WIENER_HALFWIN + 1;
const PIVOT_MIN: f64 = 1e-10;

pub struct WienerResult {
  pub success: bool,
  pub cost: f64,
  pub filters: Vec<Option<WienerCoeffs>>,
}

/// Window statistics for one tile. M and H are indexed by the flattened
/// window position `horizontal * WIENER_WIN + vertical`.
pub(crate) struct WienerStats {
  m: Vec<f64>,
  h: Vec<f64>,
}

impl WienerStats {
  pub fn new() -> Result<WienerStats, PickError> {
    let mut m = Vec::new();
    m.try_reserve_exact(WIENER_WIN2)?;
    m.resize(WIENER_WIN2, 0.0);
    let mut h = Vec::new();
    h.try_reserve_exact(WIENER_WIN2 * WIENER_WIN2)?;
    h.resize(WIENER_WIN2 * WIENER_WIN2, 0.0);
    Ok(WienerStats { m, h })
  }

  fn clear(&mut self) {
    self.m.fill(0.0);
    self.h.fill(0.0);
  }
}

/// Accumulates M and H from the unfiltered/source pixel pairs of one tile.
/// A half-window border is excluded on interior tile edges; edges on the
/// picture boundary keep the full extent, with window taps clamped to the
/// picture (edge replication).
pub(crate) fn compute_stats<T: Pixel>(
  deblocked: &Plane<T>, src: &Plane<T>, rect: TileRect, frame_w: usize,
  frame_h: usize, stats: &mut WienerStats,
) {
  stats.clear();
  let x0 = rect.x + if rect.x > 0 { WIENER_HALFWIN } else { 0 };
  let x1 =
    rect.x + rect.w - if rect.x + rect.w < frame_w { WIENER_HALFWIN } else { 0 };
  let y0 = rect.y + if rect.y > 0 { WIENER_HALFWIN } else { 0 };
  let y1 =
    rect.y + rect.h - if rect.y + rect.h < frame_h { WIENER_HALFWIN } else { 0 };
  if x0 >= x1 || y0 >= y1 {
    return;
  }

  let mut sum = 0u64;
  for y in y0..y1 {
    for x in x0..x1 {
      sum += u64::from(u32::cast_from(deblocked.p(x, y)));
    }
  }
  let avg = sum as f64 / ((x1 - x0) * (y1 - y0)) as f64;

  let half = WIENER_HALFWIN as isize;
  let mut window = [0.0f64; WIENER_WIN2];
  for y in y0..y1 {
    for x in x0..x1 {
      let target = f64::from(u32::cast_from(src.p(x, y))) - avg;
      let mut idx = 0;
      for dx in -half..=half {
        for dy in -half..=half {
          let sx = clamp(x as isize + dx, 0, frame_w as isize - 1) as usize;
          let sy = clamp(y as isize + dy, 0, frame_h as isize - 1) as usize;
          window[idx] =
            f64::from(u32::cast_from(deblocked.p(sx, sy))) - avg;
          idx += 1;
        }
      }
      for k in 0..WIENER_WIN2 {
        stats.m[k] += window[k] * target;
        stats.h[k * WIENER_WIN2 + k] += window[k] * window[k];
        for l in k + 1..WIENER_WIN2 {
          let v = window[k] * window[l];
          stats.h[k * WIENER_WIN2 + l] += v;
          stats.h[l * WIENER_WIN2 + k] += v;
        }
      }
    }
  }
}

/// Gaussian elimination with partial pivoting over an `n`x`n` system stored
/// row-major with the given stride. Returns false (leaving `x` untouched)
/// when a pivot magnitude falls below the degeneracy floor.
fn linsolve(
  n: usize, a: &mut [f64], stride: usize, b: &mut [f64], x: &mut [f64],
) -> bool {
  // Forward elimination, bubbling the largest magnitude onto the diagonal.
  for k in 0..n.saturating_sub(1) {
    for i in (k + 1..n).rev() {
      if a[(i - 1) * stride + k].abs() < a[i * stride + k].abs() {
        for j in 0..n {
          a.swap((i - 1) * stride + j, i * stride + j);
        }
        b.swap(i - 1, i);
      }
    }
    if a[k * stride + k].abs() < PIVOT_MIN {
      return false;
    }
    for i in k..n - 1 {
      let c = a[(i + 1) * stride + k] / a[k * stride + k];
      for j in 0..n {
        a[(i + 1) * stride + j] -= c * a[k * stride + j];
      }
      b[i + 1] -= c * b[k];
    }
  }
  // Back substitution.
  for i in (0..n).rev() {
    if a[i * stride + i].abs() < PIVOT_MIN {
      return false;
    }
    let mut c = 0.0;
    for j in i + 1..n {
      c += a[i * stride + j] * x[j];
    }
    x[i] = (b[i] - c) / a[i * stride + i];
  }
  true
}

// Folds a full-window index onto the independent half: 0 1 2 3 2 1 0.
#[inline]
fn wrap_index(i: usize) -> usize {
  if i >= WIENER_HALFWIN1 {
    WIENER_WIN - 1 - i
  } else {
    i
  }
}

// Writes the reduced-system solution back as a full symmetric tap vector,
// recomputing the center tap from the unit-gain constraint.
fn unfold_taps(sol: &mut [f64; WIENER_HALFWIN1], taps: &mut [f64; WIENER_WIN]) {
  sol[WIENER_HALFWIN] = 1.0;
  for i in (0..WIENER_HALFWIN).rev() {
    sol[WIENER_HALFWIN] -= 2.0 * sol[i];
    taps[i] = sol[i];
    taps[WIENER_WIN - 1 - i] = sol[i];
  }
  taps[WIENER_HALFWIN] = sol[WIENER_HALFWIN];
}

/// Solves for the vertical taps with the horizontal taps held fixed. On a
/// degenerate system the previous taps are left unchanged.
fn update_a_sep_sym(
  m: &[f64], h: &[f64], a: &mut [f64; WIENER_WIN], b: &[f64; WIENER_WIN],
) {
  const W: usize = WIENER_WIN;
  const W2: usize = WIENER_HALFWIN1;
  let mut aa = [0.0f64; W2];
  let mut bb = [0.0f64; W2 * W2];

  for i in 0..W {
    for j in 0..W {
      aa[wrap_index(j)] += m[i * W + j] * b[i];
    }
  }
  for i in 0..W {
    for j in 0..W {
      for k in 0..W {
        for l in 0..W {
          bb[wrap_index(l) * W2 + wrap_index(k)] +=
            h[(i * W + k) * WIENER_WIN2 + (j * W + l)] * b[i] * b[j];
        }
      }
    }
  }

  // Fold the center tap out of the system via the unit-gain constraint.
  let c = W2 - 1;
  for i in 0..c {
    aa[i] -= aa[c] * 2.0 + bb[i * W2 + c] - 2.0 * bb[c * W2 + c];
    for j in 0..c {
      bb[i * W2 + j] -=
        2.0 * (bb[i * W2 + c] + bb[c * W2 + j] - 2.0 * bb[c * W2 + c]);
    }
  }

  let mut sol = [0.0f64; W2];
  if linsolve(c, &mut bb, W2, &mut aa, &mut sol) {
    unfold_taps(&mut sol, a);
  }
}

/// Solves for the horizontal taps with the vertical taps held fixed.
fn update_b_sep_sym(
  m: &[f64], h: &[f64], b: &mut [f64; WIENER_WIN], a: &[f64; WIENER_WIN],
) {
  const W: usize = WIENER_WIN;
  const W2: usize = WIENER_HALFWIN1;
  let mut aa = [0.0f64; W2];
  let mut bb = [0.0f64; W2 * W2];

  for i in 0..W {
    for j in 0..W {
      aa[wrap_index(j)] += m[j * W + i] * a[i];
    }
  }
  for i in 0..W {
    for j in 0..W {
      for k in 0..W {
        for l in 0..W {
          bb[wrap_index(l) * W2 + wrap_index(k)] +=
            h[(k * W + i) * WIENER_WIN2 + (l * W + j)] * a[i] * a[j];
        }
      }
    }
  }

  let c = W2 - 1;
  for i in 0..c {
    aa[i] -= aa[c] * 2.0 + bb[i * W2 + c] - 2.0 * bb[c * W2 + c];
    for j in 0..c {
      bb[i * W2 + j] -=
        2.0 * (bb[i * W2 + c] + bb[c * W2 + j] - 2.0 * bb[c * W2 + c]);
    }
  }

  let mut sol = [0.0f64; W2];
  if linsolve(c, &mut bb, W2, &mut aa, &mut sol) {
    unfold_taps(&mut sol, b);
  }
}

fn init_filter() -> [f64; WIENER_WIN] {
  let taps = WienerCoeffs::expand(WIENER_TAPS_MID);
  let mut f = [0.0f64; WIENER_WIN];
  for (f, t) in f.iter_mut().zip(taps.iter()) {
    *f = f64::from(*t) / f64::from(WIENER_FILT_STEP);
  }
  f
}

/// Alternating optimization of the separable tap pair, seeded from the
/// standard low-pass filter on both axes.
pub(crate) fn wiener_decompose_sep_sym(
  stats: &WienerStats, a: &mut [f64; WIENER_WIN], b: &mut [f64; WIENER_WIN],
) {
  *a = init_filter();
  *b = init_filter();
  for _ in 0..WIENER_ITERATIONS {
    update_a_sep_sym(&stats.m, &stats.h, a, b);
    update_b_sep_sym(&stats.m, &stats.h, b, a);
  }
}

/// Quantizes the independent taps to 7-bit fixed point, rounding to nearest
/// with ties away from zero, and clips to the per-tap legal ranges.
pub(crate) fn quantize_sym_filter(
  f: &[f64; WIENER_WIN],
) -> [i8; WIENER_HALFWIN] {
  let mut q = [0i8; WIENER_HALFWIN];
  for i in 0..WIENER_HALFWIN {
    let v = (f[i] * f64::from(WIENER_FILT_STEP)).round() as i32;
    q[i] = clamp(v, WIENER_TAPS_MIN[i] as i32, WIENER_TAPS_MAX[i] as i32)
      as i8;
  }
  q
}

/// Predicted error delta of the quantized filter relative to the identity
/// filter, straight from the statistics. Positive means the learned filter
/// is worse than not filtering this tile.
pub(crate) fn compute_score(stats: &WienerStats, coeffs: WienerCoeffs) -> f64 {
  let step = f64::from(WIENER_FILT_STEP);
  let mut a = [0.0f64; WIENER_WIN];
  let mut b = [0.0f64; WIENER_WIN];
  for (i, t) in coeffs.vert_taps().iter().enumerate() {
    a[i] = f64::from(*t) / step;
  }
  for (i, t) in coeffs.horz_taps().iter().enumerate() {
    b[i] = f64::from(*t) / step;
  }

  let mut ab = [0.0f64; WIENER_WIN2];
  for k in 0..WIENER_WIN {
    for l in 0..WIENER_WIN {
      ab[k * WIENER_WIN + l] = b[k] * a[l];
    }
  }
  let mut p = 0.0;
  let mut q = 0.0;
  for k in 0..WIENER_WIN2 {
    p += ab[k] * stats.m[k];
    for l in 0..WIENER_WIN2 {
      q += ab[k] * ab[l] * stats.h[k * WIENER_WIN2 + l];
    }
  }
  let score = q - 2.0 * p;

  let center = WIENER_WIN2 >> 1;
  let i_score = stats.h[center * WIENER_WIN2 + center] - 2.0 * stats.m[center];

  score - i_score
}

fn wiener_tile_rate() -> u32 {
  WIENER_TAP_BITS.iter().sum::<u32>() * 2 + 1
}

/// Derives, validates, and accepts/rejects a Wiener filter per tile, then
/// confirms the joint configuration against the no-restoration baseline.
pub fn search_wiener_filter<T: Pixel, O: RestorationOps<T>>(
  ctx: &PickContext, ops: &O, bufs: &mut FrameBuffers<'_, T>,
) -> Result<WienerResult, PickError> {
  let grid = TileGrid::new(
    ctx.width,
    ctx.height,
    ops.tile_size(RestorationKind::Wiener),
  );
  let ntiles = grid.ntiles();
  let mut stats = WienerStats::new()?;

  let base_err = sse_plane(
    &bufs.src.planes[0],
    &bufs.deblocked.planes[0],
    ctx.width,
    ctx.height,
  );
  let cost_norestore =
    compute_rd_cost(ctx, rate_from_bits(RESTORE_KIND_BITS), base_err);
  let cost_tile_off = compute_rd_cost(ctx, rate_from_bits(1), base_err);

  let mut filters: Vec<Option<WienerCoeffs>> = vec![None; ntiles];
  let mut solo_info =
    RestorationInfo::Wiener { filters: vec![None; ntiles] };
  let mut a = [0.0f64; WIENER_WIN];
  let mut b = [0.0f64; WIENER_WIN];

  for tile in 0..ntiles {
    compute_stats(
      &bufs.deblocked.planes[0],
      &bufs.src.planes[0],
      grid.rect(tile),
      ctx.width,
      ctx.height,
      &mut stats,
    );
    wiener_decompose_sep_sym(&stats, &mut a, &mut b);
    let coeffs = WienerCoeffs {
      vert: quantize_sym_filter(&a),
      horz: quantize_sym_filter(&b),
    };
    if compute_score(&stats, coeffs) > 0.0 {
      continue;
    }
    // Confirm the tile in isolation before it joins the joint pass.
    if let RestorationInfo::Wiener { filters: solo } = &mut solo_info {
      solo[tile] = Some(coeffs);
    }
    let err = try_restoration(
      ops, bufs, &grid, &solo_info, Some(tile), ctx.width, ctx.height,
    );
    if let RestorationInfo::Wiener { filters: solo } = &mut solo_info {
      solo[tile] = None;
    }
    let cost =
      compute_rd_cost(ctx, rate_from_bits(wiener_tile_rate()), err);
    if cost < cost_tile_off {
      filters[tile] = Some(coeffs);
    }
  }

  let rate = RESTORE_KIND_BITS
    + filters
      .iter()
      .map(|f| if f.is_some() { wiener_tile_rate() } else { 1 })
      .sum::<u32>();
  let info = RestorationInfo::Wiener { filters: filters.clone() };
  let err =
    try_restoration(ops, bufs, &grid, &info, None, ctx.width, ctx.height);
  let cost = compute_rd_cost(ctx, rate_from_bits(rate), err);
  let success = cost < cost_norestore;
  log::debug!(
    "wiener search: {} active tiles of {}, cost {:.1} vs baseline {:.1}",
    filters.iter().flatten().count(),
    ntiles,
    cost,
    cost_norestore
  );
  Ok(WienerResult { success, cost, filters })
}
