// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! In-loop restoration search for AV-style video encoders.
//!
//! After a frame is reconstructed and deblocked, an encoder decides per
//! frame and per tile whether to apply no restoration, a bilateral range
//! filter, a separable Wiener filter, or a pixel-value offset correction,
//! minimizing a rate-distortion cost before the frame is referenced and its
//! parameters entropy-coded. This crate is that decision engine; the filter
//! pixel math, deblocker, and classifier stay behind the
//! [`RestorationOps`] trait and are supplied by the surrounding encoder.
//!
//! The entry point is [`pick_restoration`].

pub mod frame;
pub mod ops;
pub mod pick;
pub mod rd;
pub mod restoration;
pub mod tile;
pub mod trial;

#[cfg(feature = "bilateral")]
pub mod bilateral;
#[cfg(feature = "offset")]
pub mod offset;
#[cfg(feature = "wiener")]
pub mod wiener;

#[cfg(test)]
pub(crate) mod fixtures;

pub use crate::frame::{Frame, FrameBuffers};
pub use crate::ops::RestorationOps;
pub use crate::pick::{
  pick_restoration, FrameType, PickContext, PickError, PickMethod,
};
pub use crate::restoration::{
  ClassifierMode, OffsetEncoding, RestorationInfo, RestorationKind,
  WienerCoeffs,
};
