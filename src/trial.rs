// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Trial harness: apply a candidate, measure, revert.

use itertools::izip;
use v_frame::pixel::{CastFromPrimitive, Pixel};
use v_frame::plane::Plane;

use crate::frame::{Frame, FrameBuffers};
use crate::ops::RestorationOps;
use crate::restoration::RestorationInfo;
use crate::tile::TileGrid;

/// Sum of squared error between two planes over the active `w`×`h` region.
pub fn sse_plane<T: Pixel>(
  a: &Plane<T>, b: &Plane<T>, w: usize, h: usize,
) -> u64 {
  let mut sse = 0u64;
  for (row_a, row_b) in izip!(
    a.data_origin().chunks(a.cfg.stride),
    b.data_origin().chunks(b.cfg.stride)
  )
  .take(h)
  {
    for (pa, pb) in izip!(&row_a[..w], &row_b[..w]) {
      let d = i64::from(i32::cast_from(*pa) - i32::cast_from(*pb));
      sse += (d * d) as u64;
    }
  }
  sse
}

// Copies the snapshot back over the live luma plane when dropped, so the
// revert happens on every exit path.
struct TrialGuard<'a, 'b, T: Pixel> {
  live: &'a mut Frame<T>,
  snapshot: &'b Frame<T>,
}

impl<T: Pixel> Drop for TrialGuard<'_, '_, T> {
  fn drop(&mut self) {
    self.live.copy_luma_from(self.snapshot);
  }
}

/// Applies `info` to the live reconstruction, measures luma SSE against the
/// source, then restores the live buffer from the post-deblock snapshot.
/// After the call returns, the live buffer is pixel-identical to its state
/// before the call.
pub fn try_restoration<T: Pixel, O: RestorationOps<T>>(
  ops: &O, bufs: &mut FrameBuffers<'_, T>, grid: &TileGrid,
  info: &RestorationInfo, tile: Option<usize>, width: usize, height: usize,
) -> u64 {
  let mut guard =
    TrialGuard { live: &mut *bufs.rec, snapshot: &*bufs.deblocked };
  ops.apply_restoration(&mut *guard.live, info, grid, tile);
  sse_plane(&bufs.src.planes[0], &guard.live.planes[0], width, height)
}
