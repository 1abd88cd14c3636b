// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Frame buffers the search borrows from the surrounding encoder.

use v_frame::pixel::Pixel;
use v_frame::plane::Plane;

const LUMA_PADDING: usize = 8;

/// One 4:2:0 video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<T: Pixel> {
  pub planes: [Plane<T>; 3],
}

impl<T: Pixel> Frame<T> {
  pub fn new(width: usize, height: usize) -> Frame<T> {
    let chroma_width = (width + 1) >> 1;
    let chroma_height = (height + 1) >> 1;
    let chroma_padding = LUMA_PADDING >> 1;
    Frame {
      planes: [
        Plane::new(width, height, 0, 0, LUMA_PADDING, LUMA_PADDING),
        Plane::new(
          chroma_width,
          chroma_height,
          1,
          1,
          chroma_padding,
          chroma_padding,
        ),
        Plane::new(
          chroma_width,
          chroma_height,
          1,
          1,
          chroma_padding,
          chroma_padding,
        ),
      ],
    }
  }

  /// Copies all plane data from `other`. The geometries must match.
  pub fn copy_from(&mut self, other: &Frame<T>) {
    for (dst, src) in self.planes.iter_mut().zip(other.planes.iter()) {
      assert_eq!(dst.cfg, src.cfg);
      dst.data.copy_from_slice(&src.data);
    }
  }

  /// Copies the luma plane data from `other`. The geometries must match.
  pub fn copy_luma_from(&mut self, other: &Frame<T>) {
    assert_eq!(self.planes[0].cfg, other.planes[0].cfg);
    self.planes[0].data.copy_from_slice(&other.planes[0].data);
  }
}

/// The frame buffers one restoration pick operates on, borrowed from the
/// frame-encode step for the duration of the search.
///
/// On entry `rec` holds the reconstructed, not-yet-deblocked picture and the
/// two snapshots are caller-owned scratch of identical geometry. On return
/// `rec` holds the committed result (deblocked at the chosen strength, with
/// the winning restoration applied), `pre_deblock` holds the entry state of
/// `rec`, `deblocked` holds the committed-strength deblock snapshot, and
/// `src` is never written.
pub struct FrameBuffers<'a, T: Pixel> {
  pub rec: &'a mut Frame<T>,
  pub deblocked: &'a mut Frame<T>,
  pub pre_deblock: &'a mut Frame<T>,
  pub src: &'a Frame<T>,
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn copy_restores_bit_exactly() {
    let mut a: Frame<u8> = Frame::new(37, 21);
    let b: Frame<u8> = Frame::new(37, 21);
    for (i, px) in a.planes[0].data.iter_mut().enumerate() {
      *px = (i & 255) as u8;
    }
    assert_ne!(a, b);
    a.copy_from(&b);
    assert_eq!(a, b);
  }
}
