// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Simple reference implementations of the external collaborators, used by
//! the tests. The real encoder supplies optimized versions of these; the
//! search only relies on the contracts documented on [`RestorationOps`].

use std::cell::Cell;
use std::num::NonZeroU16;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use v_frame::math::clamp;
use v_frame::pixel::{CastFromPrimitive, Pixel};
use v_frame::plane::Plane;

use crate::frame::Frame;
use crate::ops::RestorationOps;
use crate::pick::{FrameType, PickContext};
use crate::restoration::{
  ClassifierMode, RestorationInfo, RestorationKind, WienerCoeffs,
  WIENER_HALFWIN,
};
use crate::tile::{TileGrid, TileRect};

pub fn test_ctx(width: usize, height: usize) -> PickContext {
  PickContext {
    width,
    height,
    bit_depth: 8,
    frame_type: FrameType::Key,
    base_q_idx: 100,
    rdmult: 80,
    rddiv: 1,
    prev_filter_level: 0,
    intra_rating: None,
    large_tx: false,
  }
}

pub fn flat_frame<T: Pixel>(width: usize, height: usize, value: u32) -> Frame<T> {
  let mut f = Frame::new(width, height);
  for px in f.planes[0].data.iter_mut() {
    *px = T::cast_from(value);
  }
  f
}

/// A flat frame with deterministic uniform noise of amplitude `amp` in the
/// active luma area.
pub fn noise_frame<T: Pixel>(
  width: usize, height: usize, base: i32, amp: i32, seed: u64,
) -> Frame<T> {
  let mut rng = ChaCha8Rng::seed_from_u64(seed);
  let mut f = flat_frame(width, height, base as u32);
  for y in 0..height {
    for x in 0..width {
      let v = clamp(base + rng.gen_range(-amp..=amp), 0, 255);
      put(&mut f.planes[0], x, y, v);
    }
  }
  f
}

fn put<T: Pixel>(plane: &mut Plane<T>, x: usize, y: usize, v: i32) {
  let i = (y + plane.cfg.yorigin) * plane.cfg.stride + x + plane.cfg.xorigin;
  plane.data[i] = T::cast_from(v);
}

fn get<T: Pixel>(plane: &Plane<T>, x: isize, y: isize, w: usize, h: usize) -> i32 {
  let x = clamp(x, 0, w as isize - 1) as usize;
  let y = clamp(y, 0, h as isize - 1) as usize;
  i32::cast_from(plane.p(x, y))
}

pub struct ReferenceOps {
  pub bilateral_tile: (usize, usize),
  pub wiener_tile: (usize, usize),
  pub bit_depth: usize,
  pub deblock_calls: Cell<usize>,
}

impl ReferenceOps {
  pub fn with_tiles(tile: (usize, usize)) -> ReferenceOps {
    ReferenceOps {
      bilateral_tile: tile,
      wiener_tile: tile,
      bit_depth: 8,
      deblock_calls: Cell::new(0),
    }
  }

  fn pixel_max(&self) -> i32 {
    (1 << self.bit_depth) - 1
  }
}

// Blends each tile pixel toward its 3x3 neighborhood mean; the blend weight
// grows with the strength level.
fn blur_tile<T: Pixel>(
  src: &Plane<T>, dst: &mut Plane<T>, rect: TileRect, level: u8,
  pixel_max: i32,
) {
  let (w, h) = (src.cfg.width, src.cfg.height);
  let k = i32::from(level) + 1;
  for y in rect.y..rect.y + rect.h {
    for x in rect.x..rect.x + rect.w {
      let mut sum = 0;
      for dy in -1..=1 {
        for dx in -1..=1 {
          sum += get(src, x as isize + dx, y as isize + dy, w, h);
        }
      }
      let mean = (sum + 4) / 9;
      let p = get(src, x as isize, y as isize, w, h);
      let v = (p * (8 - k) + mean * k + 4) >> 3;
      put(dst, x, y, clamp(v, 0, pixel_max));
    }
  }
}

fn wiener_tile<T: Pixel>(
  src: &Plane<T>, dst: &mut Plane<T>, rect: TileRect, coeffs: WienerCoeffs,
  pixel_max: i32,
) {
  let (w, h) = (src.cfg.width, src.cfg.height);
  let vert = coeffs.vert_taps();
  let horz = coeffs.horz_taps();
  let half = WIENER_HALFWIN as isize;
  for y in rect.y..rect.y + rect.h {
    for x in rect.x..rect.x + rect.w {
      let mut acc = 0i64;
      for dy in -half..=half {
        for dx in -half..=half {
          let p = get(src, x as isize + dx, y as isize + dy, w, h);
          acc += i64::from(vert[(dy + half) as usize])
            * i64::from(horz[(dx + half) as usize])
            * i64::from(p);
        }
      }
      let v = ((acc + (1 << 13)) >> 14) as i32;
      put(dst, x, y, clamp(v, 0, pixel_max));
    }
  }
}

// Neighbor pair per edge classifier direction.
fn edge_offsets(mode: ClassifierMode) -> (isize, isize, isize, isize) {
  match mode {
    ClassifierMode::EdgeHorizontal => (-1, 0, 1, 0),
    ClassifierMode::EdgeVertical => (0, -1, 0, 1),
    ClassifierMode::EdgeDiagonal45 => (1, -1, -1, 1),
    ClassifierMode::EdgeDiagonal135 => (-1, -1, 1, 1),
    ClassifierMode::Band => unreachable!(),
  }
}

impl<T: Pixel> RestorationOps<T> for ReferenceOps {
  fn apply_restoration(
    &self, rec: &mut Frame<T>, info: &RestorationInfo, grid: &TileGrid,
    tile: Option<usize>,
  ) {
    let snapshot = rec.planes[0].clone();
    match info {
      RestorationInfo::None => {}
      RestorationInfo::Bilateral { levels } => {
        for (idx, rect) in grid.rects().enumerate() {
          if tile.map_or(true, |t| t == idx) {
            if let Some(level) = levels[idx] {
              blur_tile(
                &snapshot,
                &mut rec.planes[0],
                rect,
                level,
                self.pixel_max(),
              );
            }
          }
        }
      }
      RestorationInfo::Wiener { filters } => {
        for (idx, rect) in grid.rects().enumerate() {
          if tile.map_or(true, |t| t == idx) {
            if let Some(coeffs) = filters[idx] {
              wiener_tile(
                &snapshot,
                &mut rec.planes[0],
                rect,
                coeffs,
                self.pixel_max(),
              );
            }
          }
        }
      }
      RestorationInfo::OffsetCorrection { offsets, classifier, .. } => {
        let (w, h) =
          (rec.planes[0].cfg.width, rec.planes[0].cfg.height);
        let mut labels = vec![0u8; w * h];
        self.classify(&snapshot, *classifier, &mut labels);
        for y in 0..h {
          for x in 0..w {
            let offset = i32::from(offsets[labels[y * w + x] as usize]);
            if offset != 0 {
              let p = get(&snapshot, x as isize, y as isize, w, h);
              put(
                &mut rec.planes[0],
                x,
                y,
                clamp(p + offset, 0, self.pixel_max()),
              );
            }
          }
        }
      }
    }
  }

  fn deblock(&self, rec: &mut Frame<T>, filter_level: u8, partial_frame: bool) {
    self.deblock_calls.set(self.deblock_calls.get() + 1);
    if filter_level == 0 {
      return;
    }
    let (w, h) = (rec.planes[0].cfg.width, rec.planes[0].cfg.height);
    let h_lim = if partial_frame { h / 2 } else { h };
    let snapshot = rec.planes[0].clone();
    let strength = i32::from(filter_level);
    // Pull the two pixels astride each 8-aligned edge toward their mean.
    let mut smooth = |x: usize, y: usize, nx: isize, ny: isize| {
      let a = get(&snapshot, x as isize, y as isize, w, h);
      let b = get(&snapshot, nx, ny, w, h);
      let mean = (a + b + 1) >> 1;
      let v = a + (((mean - a) * strength + 32) >> 6);
      put(&mut rec.planes[0], x, y, v);
    };
    for x in (8..w).step_by(8) {
      for y in 0..h_lim {
        smooth(x - 1, y, x as isize, y as isize);
        smooth(x, y, x as isize - 1, y as isize);
      }
    }
    for y in (8..h_lim).step_by(8) {
      for x in 0..w {
        smooth(x, y - 1, x as isize, y as isize);
        smooth(x, y, x as isize, y as isize - 1);
      }
    }
  }

  fn classify(&self, luma: &Plane<T>, mode: ClassifierMode, labels: &mut [u8]) {
    let (w, h) = (luma.cfg.width, luma.cfg.height);
    match mode {
      ClassifierMode::Band => {
        let shift = self.bit_depth - 5;
        for y in 0..h {
          for x in 0..w {
            labels[y * w + x] = (u32::cast_from(luma.p(x, y)) >> shift) as u8;
          }
        }
      }
      _ => {
        let (dx0, dy0, dx1, dy1) = edge_offsets(mode);
        for y in 0..h {
          for x in 0..w {
            let (xi, yi) = (x as isize, y as isize);
            let inside = xi + dx0 >= 0
              && xi + dx0 < w as isize
              && yi + dy0 >= 0
              && yi + dy0 < h as isize
              && xi + dx1 >= 0
              && xi + dx1 < w as isize
              && yi + dy1 >= 0
              && yi + dy1 < h as isize;
            labels[y * w + x] = if inside {
              let c = get(luma, xi, yi, w, h);
              let n0 = get(luma, xi + dx0, yi + dy0, w, h);
              let n1 = get(luma, xi + dx1, yi + dy1, w, h);
              (2 + (c - n0).signum() + (c - n1).signum()) as u8
            } else {
              2
            };
          }
        }
      }
    }
  }

  fn num_classes(&self, mode: ClassifierMode) -> usize {
    match mode {
      ClassifierMode::Band => 32,
      _ => 5,
    }
  }

  fn ac_quant(&self, qindex: u8, _bit_depth: usize) -> NonZeroU16 {
    NonZeroU16::new(u16::from(qindex) * 4 + 4).unwrap()
  }

  fn tile_size(&self, kind: RestorationKind) -> (usize, usize) {
    match kind {
      RestorationKind::Wiener => self.wiener_tile,
      _ => self.bilateral_tile,
    }
  }
}
