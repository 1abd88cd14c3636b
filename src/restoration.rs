// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Decision output types shared by the restoration searches.

use num_derive::FromPrimitive;

pub const MAX_LOOP_FILTER: u8 = 63;

pub const BILATERAL_LEVEL_BITS: u32 = 3;
pub const BILATERAL_LEVELS: usize = 1 << BILATERAL_LEVEL_BITS;
/// Per-tile signaling overhead charged on top of the level index and the
/// on/off flag for an active bilateral tile.
pub const BILATERAL_TILE_BITS: u32 = 2;

pub const WIENER_HALFWIN: usize = 3;
pub const WIENER_WIN: usize = 2 * WIENER_HALFWIN + 1;
pub const WIENER_WIN2: usize = WIENER_WIN * WIENER_WIN;
pub const WIENER_BITS: usize = 7;
pub const WIENER_FILT_STEP: i32 = 1 << WIENER_BITS;

pub const WIENER_TAPS_MIN: [i8; WIENER_HALFWIN] = [-5, -23, -17];
pub const WIENER_TAPS_MID: [i8; WIENER_HALFWIN] = [3, -7, 15];
pub const WIENER_TAPS_MAX: [i8; WIENER_HALFWIN] = [10, 8, 46];

/// Signaling width of each independent tap, sized by its legal range above.
pub const WIENER_TAP_BITS: [u32; WIENER_HALFWIN] = [4, 5, 6];

pub const MAX_OFFSET_CLASSES: usize = 32;
/// Keep-best-K cutoffs attempted when pruning offset classes. Cutoffs larger
/// than the classifier's class count are skipped.
pub const OFFSET_KEEP_CUTOFFS: [usize; 5] = [2, 4, 8, 16, 32];

/// Restoration-kind signaling cost charged to every candidate, including
/// "no restoration", so candidate costs stay comparable.
pub const RESTORE_KIND_BITS: u32 = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RestorationKind {
  None,
  Bilateral,
  Wiener,
  OffsetCorrection,
}

/// Pixel-labeling rule used to group pixels for a shared correction value.
/// The labeling itself is performed by the external classifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum ClassifierMode {
  Band,
  EdgeHorizontal,
  EdgeVertical,
  EdgeDiagonal45,
  EdgeDiagonal135,
}

impl ClassifierMode {
  pub const ALL: [ClassifierMode; 5] = [
    ClassifierMode::Band,
    ClassifierMode::EdgeHorizontal,
    ClassifierMode::EdgeVertical,
    ClassifierMode::EdgeDiagonal45,
    ClassifierMode::EdgeDiagonal135,
  ];
}

/// Zero-run encoding variant for the mostly-zero offset table. The variant
/// fixes the modulus of the run-length code.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum OffsetEncoding {
  Mod1,
  Mod2,
  Mod4,
}

impl OffsetEncoding {
  pub const ALL: [OffsetEncoding; 3] =
    [OffsetEncoding::Mod1, OffsetEncoding::Mod2, OffsetEncoding::Mod4];

  #[inline]
  pub fn zero_run_modulus_log2(self) -> u32 {
    self as u32
  }
}

/// The three independent taps of one symmetric, separable Wiener filter
/// axis pair. The full 7-tap vectors mirror around a derived center tap so
/// that each axis sums to `WIENER_FILT_STEP` exactly.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WienerCoeffs {
  pub vert: [i8; WIENER_HALFWIN],
  pub horz: [i8; WIENER_HALFWIN],
}

impl WienerCoeffs {
  pub fn mid() -> WienerCoeffs {
    WienerCoeffs { vert: WIENER_TAPS_MID, horz: WIENER_TAPS_MID }
  }

  /// Expands three independent taps into the full symmetric 7-tap vector.
  pub fn expand(half: [i8; WIENER_HALFWIN]) -> [i32; WIENER_WIN] {
    [
      half[0] as i32,
      half[1] as i32,
      half[2] as i32,
      WIENER_FILT_STEP
        - 2 * (half[0] as i32 + half[1] as i32 + half[2] as i32),
      half[2] as i32,
      half[1] as i32,
      half[0] as i32,
    ]
  }

  pub fn vert_taps(self) -> [i32; WIENER_WIN] {
    Self::expand(self.vert)
  }

  pub fn horz_taps(self) -> [i32; WIENER_WIN] {
    Self::expand(self.horz)
  }
}

/// The committed restoration decision for one frame. The payload present
/// depends on the selected kind, so fields of unused kinds cannot be read.
#[derive(Clone, Debug, PartialEq)]
pub enum RestorationInfo {
  None,
  /// Per-tile bilateral strength levels; `None` leaves the tile unfiltered.
  Bilateral { levels: Vec<Option<u8>> },
  /// Per-tile separable filters; `None` leaves the tile unfiltered.
  Wiener { filters: Vec<Option<WienerCoeffs>> },
  /// One signed offset per class id of the chosen classifier.
  OffsetCorrection {
    offsets: Vec<i8>,
    classifier: ClassifierMode,
    encoding: OffsetEncoding,
  },
}

impl RestorationInfo {
  pub fn kind(&self) -> RestorationKind {
    match self {
      RestorationInfo::None => RestorationKind::None,
      RestorationInfo::Bilateral { .. } => RestorationKind::Bilateral,
      RestorationInfo::Wiener { .. } => RestorationKind::Wiener,
      RestorationInfo::OffsetCorrection { .. } => {
        RestorationKind::OffsetCorrection
      }
    }
  }
}
