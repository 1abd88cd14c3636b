// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Rate-distortion cost model shared by all restoration searches.

use crate::pick::PickContext;

/// Rate values are carried in eighth-of-a-bit units throughout the searches
/// so costs from the different candidate types compare directly.
pub const OD_BITRES: u32 = 3;

/// Converts a whole-bit estimate into eighth-bit rate units.
#[inline]
pub const fn rate_from_bits(bits: u32) -> u32 {
  bits << OD_BITRES
}

/// Collapses a (rate, distortion) pair into one scalar. The multiplier and
/// denominator come from the encoder's rate-control state and are read-only
/// inputs here.
pub fn compute_rd_cost(ctx: &PickContext, rate: u32, distortion: u64) -> f64 {
  let bits = rate as f64 / (1 << OD_BITRES) as f64;
  distortion as f64 + bits * ctx.rdmult as f64 / ctx.rddiv as f64
}
