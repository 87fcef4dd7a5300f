// 该文件是 Kanjian （看见） 项目的一部分。
// src/result/segments.rs - 语义分割结果
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use serde::{Deserialize, Serialize};

use super::{Roi, ShapeMismatchError, expand_grid};

#[derive(Serialize, Deserialize)]
struct SegmentsRecord {
  width: usize,
  height: usize,
  mask: Vec<u8>,
  #[serde(default)]
  roi_compensated: bool,
}

/// 按像素存放类别编号的掩码，0 表示背景。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "SegmentsRecord", into = "SegmentsRecord")]
pub struct Segments {
  width: usize,
  height: usize,
  mask: Vec<u8>,
  roi_compensated: bool,
}

impl TryFrom<SegmentsRecord> for Segments {
  type Error = ShapeMismatchError;

  fn try_from(record: SegmentsRecord) -> Result<Self, Self::Error> {
    let mut segments = Segments::new(record.width, record.height, record.mask)?;
    segments.roi_compensated = record.roi_compensated;
    Ok(segments)
  }
}

impl From<Segments> for SegmentsRecord {
  fn from(value: Segments) -> Self {
    Self {
      width: value.width,
      height: value.height,
      mask: value.mask,
      roi_compensated: value.roi_compensated,
    }
  }
}

impl Segments {
  pub fn new(width: usize, height: usize, mask: Vec<u8>) -> Result<Self, ShapeMismatchError> {
    ShapeMismatchError::check("mask", width * height, mask.len())?;
    Ok(Self {
      width,
      height,
      mask,
      roi_compensated: false,
    })
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn mask(&self) -> &[u8] {
    &self.mask
  }

  /// 出现过的类别编号（升序，不含背景）。
  pub fn indices(&self) -> Vec<u8> {
    let mut seen = [false; 256];
    for &v in &self.mask {
      seen[v as usize] = true;
    }
    (1..=255u8).filter(|&v| seen[v as usize]).collect()
  }

  pub fn n_segments(&self) -> usize {
    self.indices().len()
  }

  /// 指定类别的二值掩码。
  pub fn get_mask(&self, id: u8) -> Vec<u8> {
    self.mask.iter().map(|&v| u8::from(v == id)).collect()
  }

  pub fn compensate_for_roi(&mut self, roi: &Roi) {
    if roi.is_full() || self.roi_compensated || self.mask.is_empty() {
      return;
    }
    let (mask, width, height) = expand_grid(&self.mask, self.width, self.height, roi);
    self.mask = mask;
    self.width = width;
    self.height = height;
    self.roi_compensated = true;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn indices_ignore_background() {
    let s = Segments::new(3, 2, vec![0, 2, 2, 0, 5, 0]).unwrap();
    assert_eq!(s.indices(), vec![2, 5]);
    assert_eq!(s.n_segments(), 2);
    assert_eq!(s.get_mask(2), vec![0, 1, 1, 0, 0, 0]);
  }

  #[test]
  fn mask_length_is_checked() {
    assert!(Segments::new(2, 2, vec![0; 3]).is_err());
  }

  #[test]
  fn roi_grows_canvas() {
    let mut s = Segments::new(2, 2, vec![1; 4]).unwrap();
    s.compensate_for_roi(&Roi::new(0.0, 0.5, 1.0, 0.5));
    assert_eq!((s.width(), s.height()), (2, 4));
    assert_eq!(s.mask(), &[0, 0, 0, 0, 1, 1, 1, 1]);
  }
}
