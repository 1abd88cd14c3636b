// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Per-tile bilateral strength selection, optionally joint with the global
//! deblocking strength.

use v_frame::math::clamp;
use v_frame::pixel::Pixel;

use crate::frame::FrameBuffers;
use crate::ops::RestorationOps;
use crate::pick::{max_filter_level, PickContext, PickError};
use crate::rd::{compute_rd_cost, rate_from_bits};
use crate::restoration::{
  RestorationInfo, RestorationKind, BILATERAL_LEVELS, BILATERAL_LEVEL_BITS,
  BILATERAL_TILE_BITS, MAX_LOOP_FILTER, RESTORE_KIND_BITS,
};
use crate::tile::TileGrid;
use crate::trial::{sse_plane, try_restoration};

pub struct BilateralResult {
  pub success: bool,
  pub cost: f64,
  pub levels: Vec<Option<u8>>,
  /// The deblocking strength the per-tile levels were chosen for.
  pub filter_level: u8,
}

fn bilateral_tile_rate() -> u32 {
  BILATERAL_TILE_BITS + BILATERAL_LEVEL_BITS + 1
}

/// Chooses a strength level (or off) for every tile at a fixed deblocking
/// strength, then validates the joint configuration. Leaves the live buffer
/// and the post-deblock snapshot holding the frame deblocked at
/// `filter_level`.
pub fn search_bilateral_level<T: Pixel, O: RestorationOps<T>>(
  ctx: &PickContext, ops: &O, bufs: &mut FrameBuffers<'_, T>,
  filter_level: u8, partial_frame: bool,
) -> Result<BilateralResult, PickError> {
  bufs.rec.copy_from(bufs.pre_deblock);
  ops.deblock(bufs.rec, filter_level, partial_frame);
  bufs.deblocked.copy_from(bufs.rec);

  let grid = TileGrid::new(
    ctx.width,
    ctx.height,
    ops.tile_size(RestorationKind::Bilateral),
  );
  let ntiles = grid.ntiles();

  let base_err = sse_plane(
    &bufs.src.planes[0],
    &bufs.rec.planes[0],
    ctx.width,
    ctx.height,
  );
  let cost_norestore =
    compute_rd_cost(ctx, rate_from_bits(RESTORE_KIND_BITS), base_err);
  // "Off" costs one bit and is always a candidate.
  let cost_tile_off = compute_rd_cost(ctx, rate_from_bits(1), base_err);

  let mut levels: Vec<Option<u8>> = vec![None; ntiles];
  let mut solo_info =
    RestorationInfo::Bilateral { levels: vec![None; ntiles] };

  for tile in 0..ntiles {
    let mut best_cost = cost_tile_off;
    let mut best_level = None;
    for level in 0..BILATERAL_LEVELS as u8 {
      if let RestorationInfo::Bilateral { levels: solo } = &mut solo_info {
        solo[tile] = Some(level);
      }
      let err = try_restoration(
        ops, bufs, &grid, &solo_info, Some(tile), ctx.width, ctx.height,
      );
      let cost =
        compute_rd_cost(ctx, rate_from_bits(bilateral_tile_rate()), err);
      if cost < best_cost {
        best_cost = cost;
        best_level = Some(level);
      }
    }
    if let RestorationInfo::Bilateral { levels: solo } = &mut solo_info {
      solo[tile] = None;
    }
    levels[tile] = best_level;
  }

  // The per-tile decisions were made independently; validate them jointly
  // since the active and off signaling costs differ.
  let rate = RESTORE_KIND_BITS
    + levels
      .iter()
      .map(|l| if l.is_some() { bilateral_tile_rate() } else { 1 })
      .sum::<u32>();
  let info = RestorationInfo::Bilateral { levels: levels.clone() };
  let err =
    try_restoration(ops, bufs, &grid, &info, None, ctx.width, ctx.height);
  let cost = compute_rd_cost(ctx, rate_from_bits(rate), err);
  let success = cost < cost_norestore;
  log::trace!(
    "bilateral level search at strength {}: cost {:.1} vs baseline {:.1}",
    filter_level,
    cost,
    cost_norestore
  );
  Ok(BilateralResult { success, cost, levels, filter_level })
}

/// Joint search of the deblocking strength and the per-tile bilateral
/// levels. Step-halving bisection from the previous frame's strength, with
/// a bias damping upward strength changes; already-evaluated strengths are
/// memoized. Ties inside the bias margin prefer the lower strength.
pub fn search_filter_bilateral_level<T: Pixel, O: RestorationOps<T>>(
  ctx: &PickContext, ops: &O, bufs: &mut FrameBuffers<'_, T>,
) -> Result<BilateralResult, PickError> {
  let max_level = i32::from(max_filter_level(ctx));
  let mut memo: Vec<Option<BilateralResult>> = Vec::new();
  memo.try_reserve_exact(MAX_LOOP_FILTER as usize + 1)?;
  memo.resize_with(MAX_LOOP_FILTER as usize + 1, || None);

  let mut filt_mid = clamp(i32::from(ctx.prev_filter_level), 0, max_level);
  let mut filter_step = if filt_mid < 16 { 4 } else { filt_mid / 4 };
  let mut filt_direction = 0i32;

  memo[filt_mid as usize] =
    Some(search_bilateral_level(ctx, ops, bufs, filt_mid as u8, false)?);
  let mut best_cost = memo[filt_mid as usize].as_ref().unwrap().cost;
  let mut filt_best = filt_mid;

  while filter_step > 0 {
    let filt_high = (filt_mid + filter_step).min(max_level);
    let filt_low = (filt_mid - filter_step).max(0);

    // Bias against raising the filter strength in favor of lowering it.
    let mut bias = (best_cost
      / f64::from(1u32 << (15 - (filt_mid / 8)) as u32))
      * filter_step as f64;
    if let Some(rating) = ctx.intra_rating {
      if rating < 20 {
        bias = bias * f64::from(rating) / 20.0;
      }
    }
    if ctx.large_tx {
      bias /= 2.0;
    }

    if filt_direction <= 0 && filt_low != filt_mid {
      if memo[filt_low as usize].is_none() {
        memo[filt_low as usize] = Some(search_bilateral_level(
          ctx, ops, bufs, filt_low as u8, false,
        )?);
      }
      let cost_low = memo[filt_low as usize].as_ref().unwrap().cost;
      // If the lower strength is close to the best, take it.
      if cost_low < best_cost + bias {
        filt_best = filt_low;
        if cost_low < best_cost {
          best_cost = cost_low;
        }
      }
    }
    if filt_direction >= 0 && filt_high != filt_mid {
      if memo[filt_high as usize].is_none() {
        memo[filt_high as usize] = Some(search_bilateral_level(
          ctx, ops, bufs, filt_high as u8, false,
        )?);
      }
      let cost_high = memo[filt_high as usize].as_ref().unwrap().cost;
      if cost_high < best_cost - bias {
        filt_best = filt_high;
        best_cost = cost_high;
      }
    }

    if filt_best != filt_mid {
      filt_direction = if filt_best < filt_mid { -1 } else { 1 };
      filt_mid = filt_best;
    } else {
      filter_step /= 2;
    }
  }

  Ok(memo[filt_best as usize].take().unwrap())
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::fixtures::{flat_frame, noise_frame, test_ctx, ReferenceOps};
  use crate::frame::{Frame, FrameBuffers};
  use pretty_assertions::assert_eq;

  #[test]
  fn lossless_tile_stays_off_noisy_tile_filters() {
    let (w, h) = (32, 16);
    let ops = ReferenceOps::with_tiles((16, 16));
    let ctx = test_ctx(w, h);
    let src: Frame<u8> = flat_frame(w, h, 128);
    // Left tile matches the source exactly; right tile is noisy.
    let mut rec: Frame<u8> = flat_frame(w, h, 128);
    let noisy: Frame<u8> = noise_frame(w, h, 128, 24, 3);
    let stride = rec.planes[0].cfg.stride;
    let origin = rec.planes[0].cfg.yorigin * stride + rec.planes[0].cfg.xorigin;
    for y in 0..h {
      for x in 16..w {
        rec.planes[0].data[origin + y * stride + x] =
          noisy.planes[0].p(x, y);
      }
    }
    let mut deblocked = Frame::new(w, h);
    let mut pre_deblock = Frame::new(w, h);
    pre_deblock.copy_from(&rec);
    let mut bufs = FrameBuffers {
      rec: &mut rec,
      deblocked: &mut deblocked,
      pre_deblock: &mut pre_deblock,
      src: &src,
    };

    let r = search_bilateral_level(&ctx, &ops, &mut bufs, 0, false).unwrap();
    assert!(r.success);
    assert_eq!(r.levels.len(), 2);
    assert_eq!(r.levels[0], None);
    assert!(r.levels[1].is_some());
  }

  #[test]
  fn flat_cost_surface_settles_on_lowest_strength() {
    let (w, h) = (16, 16);
    let ops = ReferenceOps::with_tiles((16, 16));
    let mut ctx = test_ctx(w, h);
    ctx.prev_filter_level = 16;
    let src: Frame<u8> = flat_frame(w, h, 128);
    let mut rec: Frame<u8> = flat_frame(w, h, 128);
    let mut deblocked = Frame::new(w, h);
    let mut pre_deblock = Frame::new(w, h);
    pre_deblock.copy_from(&rec);
    let mut bufs = FrameBuffers {
      rec: &mut rec,
      deblocked: &mut deblocked,
      pre_deblock: &mut pre_deblock,
      src: &src,
    };

    let r = search_filter_bilateral_level(&ctx, &ops, &mut bufs).unwrap();
    // A flat frame deblocks to itself at every strength, so every strength
    // costs the same and the downward bias must walk to zero.
    assert_eq!(r.filter_level, 0);
    assert!(!r.success);
  }

  #[test]
  fn strength_search_memoizes_evaluated_levels() {
    let (w, h) = (16, 16);
    let ops = ReferenceOps::with_tiles((16, 16));
    let mut ctx = test_ctx(w, h);
    ctx.prev_filter_level = 16;
    let src: Frame<u8> = noise_frame(w, h, 128, 10, 11);
    let mut rec: Frame<u8> = noise_frame(w, h, 128, 14, 12);
    let mut deblocked = Frame::new(w, h);
    let mut pre_deblock = Frame::new(w, h);
    pre_deblock.copy_from(&rec);
    let mut bufs = FrameBuffers {
      rec: &mut rec,
      deblocked: &mut deblocked,
      pre_deblock: &mut pre_deblock,
      src: &src,
    };

    search_filter_bilateral_level(&ctx, &ops, &mut bufs).unwrap();
    // One deblock call per distinct strength; the bisection touches well
    // under the full 0..=63 range.
    let calls = ops.deblock_calls.get();
    assert!(calls > 0 && calls <= 24, "deblock called {} times", calls);
  }
}
