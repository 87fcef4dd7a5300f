// 该文件是 Kanjian （看见） 项目的一部分。
// src/result/anomaly.rs - 异常检测结果
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
struct AnomalyRecord {
  score: f32,
  width: usize,
  height: usize,
  heatmap: Vec<f32>,
  #[serde(default)]
  roi_compensated: bool,
}

/// 整图异常分数以及逐像素热力图。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "AnomalyRecord", into = "AnomalyRecord")]
pub struct Anomaly {
  score: f32,
  width: usize,
  height: usize,
  heatmap: Vec<f32>,
  roi_compensated: bool,
}

impl TryFrom<AnomalyRecord> for Anomaly {
  type Error = ShapeMismatchError;

  fn try_from(record: AnomalyRecord) -> Result<Self, Self::Error> {
    let mut anomaly = Anomaly::new(record.score, record.width, record.height, record.heatmap)?;
    anomaly.roi_compensated = record.roi_compensated;
    Ok(anomaly)
  }
}

impl From<Anomaly> for AnomalyRecord {
  fn from(value: Anomaly) -> Self {
    Self {
      score: value.score,
      width: value.width,
      height: value.height,
      heatmap: value.heatmap,
      roi_compensated: value.roi_compensated,
    }
  }
}

impl Anomaly {
  pub fn new(
    score: f32,
    width: usize,
    height: usize,
    heatmap: Vec<f32>,
  ) -> Result<Self, ShapeMismatchError> {
    ShapeMismatchError::check("heatmap", width * height, heatmap.len())?;
    Ok(Self {
      score,
      width,
      height,
      heatmap,
      roi_compensated: false,
    })
  }

  pub fn score(&self) -> f32 {
    self.score
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn heatmap(&self) -> &[f32] {
    &self.heatmap
  }

  /// 热力图超过阈值的像素填充为 `color`，其余为黑色，按 HWC 排列。
  pub fn get_mask(&self, score_threshold: f32, color: [u8; 3]) -> Vec<u8> {
    let mut mask = Vec::with_capacity(self.heatmap.len() * 3);
    for &v in &self.heatmap {
      if v >= score_threshold {
        mask.extend_from_slice(&color);
      } else {
        mask.extend_from_slice(&[0, 0, 0]);
      }
    }
    mask
  }

  pub fn compensate_for_roi(&mut self, roi: &Roi) {
    if roi.is_full() || self.roi_compensated || self.heatmap.is_empty() {
      return;
    }
    let (heatmap, width, height) = expand_grid(&self.heatmap, self.width, self.height, roi);
    self.heatmap = heatmap;
    self.width = width;
    self.height = height;
    self.roi_compensated = true;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mask_thresholds_heatmap() {
    let a = Anomaly::new(0.7, 2, 1, vec![0.2, 0.9]).unwrap();
    assert_eq!(a.get_mask(0.5, [255, 0, 0]), vec![0, 0, 0, 255, 0, 0]);
  }

  #[test]
  fn heatmap_size_is_checked() {
    assert!(Anomaly::new(0.0, 4, 4, vec![0.0; 15]).is_err());
  }
}
