// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Interfaces to the pixel-domain collaborators the search drives.
//!
//! The search never touches filter pixel math itself; it only decides
//! parameters. Everything below is provided by the surrounding encoder.

use std::num::NonZeroU16;

use v_frame::pixel::Pixel;
use v_frame::plane::Plane;

use crate::frame::Frame;
use crate::restoration::{ClassifierMode, RestorationInfo, RestorationKind};
use crate::tile::TileGrid;

pub trait RestorationOps<T: Pixel> {
  /// Applies `info` to the luma plane of `rec`, over all tiles of `grid` or
  /// a single tile. Must be bit-exact and idempotent when re-applied to the
  /// same unfiltered input; the decoder runs the identical operation.
  fn apply_restoration(
    &self, rec: &mut Frame<T>, info: &RestorationInfo, grid: &TileGrid,
    tile: Option<usize>,
  );

  /// Runs the deblocking loop filter over `rec` at the given strength.
  /// `partial_frame` restricts filtering to a sub-image for faster trials.
  fn deblock(&self, rec: &mut Frame<T>, filter_level: u8, partial_frame: bool);

  /// Labels every active-area pixel of `luma` with a class id. `labels` is
  /// indexed `[y * width + x]` and each id must be below
  /// `self.num_classes(mode)`.
  fn classify(&self, luma: &Plane<T>, mode: ClassifierMode, labels: &mut [u8]);

  fn num_classes(&self, mode: ClassifierMode) -> usize;

  /// AC quantizer lookup, used only to derive the initial deblocking
  /// strength guess.
  fn ac_quant(&self, qindex: u8, bit_depth: usize) -> NonZeroU16;

  /// Nominal tile size for the given restoration kind. Only queried for
  /// kinds that decide parameters per tile.
  fn tile_size(&self, kind: RestorationKind) -> (usize, usize);
}
