// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Pixel-classification offset correction search.
//!
//! Pixels are grouped by an externally computed class id; each class gets
//! the clipped mean source-minus-reconstruction difference as a corrective
//! offset. Low-impact classes are pruned and the surviving mostly-zero
//! offset table is costed with a zero-run model, all without further trial
//! passes: the change in SSE is known exactly from the per-class sums.

use arrayvec::ArrayVec;
use itertools::izip;
use v_frame::math::clamp;
use v_frame::pixel::{CastFromPrimitive, Pixel};

use crate::frame::FrameBuffers;
use crate::ops::RestorationOps;
use crate::pick::{PickContext, PickError};
use crate::rd::{compute_rd_cost, rate_from_bits};
use crate::restoration::{
  ClassifierMode, OffsetEncoding, MAX_OFFSET_CLASSES, OFFSET_KEEP_CUTOFFS,
  RESTORE_KIND_BITS,
};
use crate::trial::sse_plane;

const ENCODING_MODE_BITS: u32 = 2;
const CLASSIFIER_MODE_BITS: u32 = 3;

pub struct OffsetResult {
  pub success: bool,
  pub cost: f64,
  pub offsets: Vec<i8>,
  pub classifier: ClassifierMode,
  pub encoding: OffsetEncoding,
}

fn max_offset(bit_depth: usize) -> i32 {
  7 << (bit_depth - 8)
}

// Sign plus magnitude of the clipped offset range (7 << (bit_depth - 8)).
fn offset_value_bits(bit_depth: usize) -> u32 {
  3 + (bit_depth as u32 - 8) + 1
}

// A run of `run` zeros costs one terminator plus the quotient in unary and
// the remainder in `modulus_log2` raw bits.
fn zero_run_bits(run: u32, modulus_log2: u32) -> u32 {
  (run >> modulus_log2) + 1 + modulus_log2
}

/// Estimated size of the mostly-zero offset table under the given zero-run
/// encoding, including the per-mode and per-classifier signaling overhead.
fn offset_table_bits(
  offsets: &[i8], encoding: OffsetEncoding, value_bits: u32,
) -> u32 {
  let k = encoding.zero_run_modulus_log2();
  let mut bits = ENCODING_MODE_BITS + CLASSIFIER_MODE_BITS;
  let mut run = 0u32;
  for &offset in offsets {
    if offset == 0 {
      run += 1;
    } else {
      bits += zero_run_bits(run, k) + value_bits;
      run = 0;
    }
  }
  if run > 0 {
    bits += zero_run_bits(run, k);
  }
  bits
}

/// Keeps the offsets of the classes with the most negative `dsse`, using the
/// K-th smallest value as a threshold so ties keep all qualifying classes.
/// Classes that do not strictly reduce the error are never kept, so a larger
/// cutoff can only extend the kept set. Returns the pruned table and the
/// exact SSE change of applying it.
fn prune_classes(
  offsets: &[i8; MAX_OFFSET_CLASSES], dsse: &[i64; MAX_OFFSET_CLASSES],
  order: &[usize], cutoff: usize,
) -> ([i8; MAX_OFFSET_CLASSES], i64) {
  let threshold = dsse[order[cutoff - 1]];
  let mut kept = [0i8; MAX_OFFSET_CLASSES];
  let mut dsse_sum = 0i64;
  for &c in order {
    if dsse[c] <= threshold && dsse[c] < 0 && offsets[c] != 0 {
      kept[c] = offsets[c];
      dsse_sum += dsse[c];
    }
  }
  (kept, dsse_sum)
}

/// Searches every (classifier, cutoff, encoding) combination and keeps the
/// single cheapest offset table that beats the no-restoration baseline.
pub fn search_offset_correction<T: Pixel, O: RestorationOps<T>>(
  ctx: &PickContext, ops: &O, bufs: &mut FrameBuffers<'_, T>,
) -> Result<OffsetResult, PickError> {
  let (width, height) = (ctx.width, ctx.height);
  let mut labels: Vec<u8> = Vec::new();
  labels.try_reserve_exact(width * height)?;
  labels.resize(width * height, 0);

  let base_err = sse_plane(
    &bufs.src.planes[0],
    &bufs.deblocked.planes[0],
    width,
    height,
  );
  let cost_norestore =
    compute_rd_cost(ctx, rate_from_bits(RESTORE_KIND_BITS), base_err);

  let max_off = max_offset(ctx.bit_depth);
  let pixel_max = (1i32 << ctx.bit_depth) - 1;
  let value_bits = offset_value_bits(ctx.bit_depth);

  let mut best_cost = cost_norestore;
  let mut best: Option<(Vec<i8>, ClassifierMode, OffsetEncoding)> = None;

  let rec_plane = &bufs.deblocked.planes[0];
  let src_plane = &bufs.src.planes[0];
  let rec_stride = rec_plane.cfg.stride;
  let src_stride = src_plane.cfg.stride;

  for mode in ClassifierMode::ALL {
    let nclasses = ops.num_classes(mode);
    assert!(nclasses <= MAX_OFFSET_CLASSES);
    ops.classify(rec_plane, mode, &mut labels);

    let mut count = [0u64; MAX_OFFSET_CLASSES];
    let mut diff = [0i64; MAX_OFFSET_CLASSES];
    for (rec_row, src_row, label_row) in izip!(
      rec_plane.data_origin().chunks(rec_stride),
      src_plane.data_origin().chunks(src_stride),
      labels.chunks(width)
    )
    .take(height)
    {
      for (r, s, c) in izip!(&rec_row[..width], &src_row[..width], label_row)
      {
        let c = *c as usize;
        count[c] += 1;
        diff[c] +=
          i64::from(i32::cast_from(*s) - i32::cast_from(*r));
      }
    }

    // Mean difference per class, rounded half away from zero with the class
    // population as the divisor, then clipped to the legal range.
    let mut offsets = [0i8; MAX_OFFSET_CLASSES];
    for c in 0..nclasses {
      if count[c] == 0 {
        continue;
      }
      let magnitude =
        ((diff[c].unsigned_abs() + count[c] / 2) / count[c]) as i32;
      let offset = if diff[c] < 0 { -magnitude } else { magnitude };
      offsets[c] = clamp(offset, -max_off, max_off) as i8;
    }

    // Exact SSE change per class from the algebraic identity
    // dsse = sum (recon + pred - 2*source) * (pred - recon).
    let mut dsse = [0i64; MAX_OFFSET_CLASSES];
    for (rec_row, src_row, label_row) in izip!(
      rec_plane.data_origin().chunks(rec_stride),
      src_plane.data_origin().chunks(src_stride),
      labels.chunks(width)
    )
    .take(height)
    {
      for (r, s, c) in izip!(&rec_row[..width], &src_row[..width], label_row)
      {
        let c = *c as usize;
        let offset = i32::from(offsets[c]);
        if offset == 0 {
          continue;
        }
        let r = i32::cast_from(*r);
        let s = i32::cast_from(*s);
        let p = clamp(r + offset, 0, pixel_max);
        dsse[c] += i64::from(r + p - 2 * s) * i64::from(p - r);
      }
    }

    let mut order: ArrayVec<usize, MAX_OFFSET_CLASSES> =
      (0..nclasses).collect();
    order.sort_unstable_by_key(|&c| dsse[c]);

    for cutoff in OFFSET_KEEP_CUTOFFS {
      if cutoff > nclasses {
        continue;
      }
      let (kept, dsse_sum) = prune_classes(&offsets, &dsse, &order, cutoff);
      let distortion = (base_err as i64 + dsse_sum) as u64;
      for encoding in OffsetEncoding::ALL {
        let rate = RESTORE_KIND_BITS
          + offset_table_bits(&kept[..nclasses], encoding, value_bits);
        let cost = compute_rd_cost(ctx, rate_from_bits(rate), distortion);
        if cost < best_cost {
          best_cost = cost;
          best = Some((kept[..nclasses].to_vec(), mode, encoding));
        }
      }
    }
  }

  match best {
    Some((offsets, classifier, encoding)) => {
      log::debug!(
        "offset search: classifier {:?} encoding {:?} cost {:.1} vs baseline {:.1}",
        classifier,
        encoding,
        best_cost,
        cost_norestore
      );
      Ok(OffsetResult {
        success: true,
        cost: best_cost,
        offsets,
        classifier,
        encoding,
      })
    }
    None => Ok(OffsetResult {
      success: false,
      cost: cost_norestore,
      offsets: Vec::new(),
      classifier: ClassifierMode::Band,
      encoding: OffsetEncoding::Mod1,
    }),
  }
}
