// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Top-level restoration decision: run every candidate search against the
//! same deblocked baseline, pick the cheapest, commit it.

use std::collections::TryReserveError;

use num_derive::FromPrimitive;
use thiserror::Error;
use v_frame::math::clamp;
use v_frame::pixel::Pixel;

#[cfg(feature = "bilateral")]
use crate::bilateral::{
  search_bilateral_level, search_filter_bilateral_level,
};
use crate::frame::FrameBuffers;
#[cfg(feature = "offset")]
use crate::offset::search_offset_correction;
use crate::ops::RestorationOps;
use crate::rd::{compute_rd_cost, rate_from_bits};
use crate::restoration::{
  RestorationInfo, RestorationKind, MAX_LOOP_FILTER, RESTORE_KIND_BITS,
};
use crate::tile::TileGrid;
use crate::trial::sse_plane;
#[cfg(feature = "wiener")]
use crate::wiener::search_wiener_filter;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameType {
  Key,
  Inter,
}

/// How to settle the deblocking strength before the restoration searches.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum PickMethod {
  /// Disable deblocking and restoration outright.
  MinimalLoopFilter,
  /// Derive the strength from the quantizer, then search restoration.
  FromQuantizer,
  /// Like `FromQuantizer`, but trial deblocking runs on a sub-image.
  FromSubimageSearch,
  /// Jointly search the deblocking strength and the restoration.
  FullSearch,
}

/// Frame-level read-only inputs to the search, owned by the surrounding
/// encoder's rate-control and frame state.
#[derive(Clone, Debug)]
pub struct PickContext {
  pub width: usize,
  pub height: usize,
  pub bit_depth: usize,
  pub frame_type: FrameType,
  pub base_q_idx: u8,
  /// Rate-distortion multiplier.
  pub rdmult: i64,
  /// Rate-distortion denominator.
  pub rddiv: i64,
  /// The previous frame's deblocking strength, the bisection start point.
  pub prev_filter_level: u8,
  /// Two-pass estimated intra rating of this frame, if available.
  pub intra_rating: Option<u32>,
  /// Whether transform sizes beyond the smallest are in use.
  pub large_tx: bool,
}

#[derive(Debug, Error)]
pub enum PickError {
  #[error("failed to allocate restoration search scratch buffers")]
  ScratchAlloc(#[from] TryReserveError),
}

/// Upper bound for the deblocking strength. A strongly intra-rated frame in
/// two-pass encoding caps out earlier.
pub(crate) fn max_filter_level(ctx: &PickContext) -> u8 {
  match ctx.intra_rating {
    Some(rating) if rating > 8 => MAX_LOOP_FILTER * 3 / 4,
    _ => MAX_LOOP_FILTER,
  }
}

// Linear fits of searched deblocking strengths against the AC quantizer.
pub(crate) fn deblock_level_from_quantizer<T: Pixel, O: RestorationOps<T>>(
  ctx: &PickContext, ops: &O,
) -> u8 {
  let q = i32::from(ops.ac_quant(ctx.base_q_idx, ctx.bit_depth).get());
  let key = ctx.frame_type == FrameType::Key;
  let guess = match ctx.bit_depth {
    8 => {
      if key {
        (q * 17563 - 421574 + (1 << 18 >> 1)) >> 18
      } else {
        (q * 6017 + 650707 + (1 << 18 >> 1)) >> 18
      }
    }
    10 => {
      let level = (q * 20723 + 4060632 + (1 << 20 >> 1)) >> 20;
      if key {
        level - 4
      } else {
        level
      }
    }
    12 => {
      let level = (q * 20723 + 16242526 + (1 << 22 >> 1)) >> 22;
      if key {
        level - 4
      } else {
        level
      }
    }
    _ => unreachable!("unsupported bit depth"),
  };
  clamp(guess, 0, i32::from(max_filter_level(ctx))) as u8
}

/// Decides the deblocking strength and the restoration configuration for
/// one frame.
///
/// Mutates only the caller-owned `rst` and `filter_level` fields and the
/// borrowed frame buffers, per the contract on [`FrameBuffers`]: on return
/// the live reconstruction holds the committed filtered result and both
/// snapshots reflect the committed strength.
pub fn pick_restoration<T: Pixel, O: RestorationOps<T>>(
  ctx: &PickContext, ops: &O, bufs: &mut FrameBuffers<'_, T>,
  method: PickMethod, rst: &mut RestorationInfo, filter_level: &mut u8,
) -> Result<(), PickError> {
  // Snapshot the unfiltered reconstruction so deblock trials can reset.
  bufs.pre_deblock.copy_from(bufs.rec);

  if method == PickMethod::MinimalLoopFilter {
    *filter_level = 0;
    *rst = RestorationInfo::None;
    bufs.deblocked.copy_from(bufs.rec);
    return Ok(());
  }

  #[cfg(feature = "bilateral")]
  let bilateral = match method {
    PickMethod::FullSearch => {
      search_filter_bilateral_level(ctx, ops, bufs)?
    }
    _ => {
      let level = deblock_level_from_quantizer(ctx, ops);
      search_bilateral_level(
        ctx,
        ops,
        bufs,
        level,
        method == PickMethod::FromSubimageSearch,
      )?
    }
  };
  #[cfg(feature = "bilateral")]
  let level = bilateral.filter_level;
  #[cfg(not(feature = "bilateral"))]
  let level = deblock_level_from_quantizer(ctx, ops);

  // Establish the committed-strength deblocked baseline all remaining
  // searches run against.
  *filter_level = level;
  bufs.rec.copy_from(bufs.pre_deblock);
  ops.deblock(bufs.rec, level, false);
  bufs.deblocked.copy_from(bufs.rec);

  let base_err = sse_plane(
    &bufs.src.planes[0],
    &bufs.rec.planes[0],
    ctx.width,
    ctx.height,
  );
  let cost_norestore =
    compute_rd_cost(ctx, rate_from_bits(RESTORE_KIND_BITS), base_err);

  #[cfg(feature = "wiener")]
  let wiener = search_wiener_filter(ctx, ops, bufs)?;
  #[cfg(feature = "offset")]
  let offset = search_offset_correction(ctx, ops, bufs)?;

  // Strict comparison chain; exact ties keep the earlier candidate, so the
  // preference order is None > Wiener > Bilateral > OffsetCorrection.
  #[allow(unused_mut)]
  let (mut best_cost, mut winner) = (cost_norestore, RestorationKind::None);
  #[cfg(feature = "wiener")]
  if wiener.success && wiener.cost < best_cost {
    best_cost = wiener.cost;
    winner = RestorationKind::Wiener;
  }
  #[cfg(feature = "bilateral")]
  if bilateral.success && bilateral.cost < best_cost {
    best_cost = bilateral.cost;
    winner = RestorationKind::Bilateral;
  }
  #[cfg(feature = "offset")]
  if offset.success && offset.cost < best_cost {
    best_cost = offset.cost;
    winner = RestorationKind::OffsetCorrection;
  }
  log::debug!(
    "pick_restoration: strength {} winner {:?} cost {:.1} (baseline {:.1})",
    level,
    winner,
    best_cost,
    cost_norestore
  );

  // Commit the winner; the losing candidates' scratch drops here.
  *rst = match winner {
    RestorationKind::None => RestorationInfo::None,
    #[cfg(feature = "bilateral")]
    RestorationKind::Bilateral => {
      RestorationInfo::Bilateral { levels: bilateral.levels }
    }
    #[cfg(feature = "wiener")]
    RestorationKind::Wiener => {
      RestorationInfo::Wiener { filters: wiener.filters }
    }
    #[cfg(feature = "offset")]
    RestorationKind::OffsetCorrection => RestorationInfo::OffsetCorrection {
      offsets: offset.offsets,
      classifier: offset.classifier,
      encoding: offset.encoding,
    },
    #[allow(unreachable_patterns)]
    _ => RestorationInfo::None,
  };

  // Leave the live buffer holding the committed filtered result.
  if *rst != RestorationInfo::None {
    let grid =
      TileGrid::new(ctx.width, ctx.height, ops.tile_size(rst.kind()));
    ops.apply_restoration(bufs.rec, rst, &grid, None);
  }
  Ok(())
}
