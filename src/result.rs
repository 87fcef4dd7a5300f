// 该文件是 Kanjian （看见） 项目的一部分。
// src/result.rs - 推理结果容器
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

//! 后处理输出的统一结构。
//!
//! 无论推理发生在传感器加速器上还是主机解释器上，模型的后处理都产出
//! [`Results`]，下游的绘制、记录代码因此与执行后端无关。

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod anomaly;
mod classifications;
mod detections;
mod poses;
mod segments;

pub use self::anomaly::Anomaly;
pub use self::classifications::Classifications;
pub use self::detections::{DetectItem, Detections};
pub use self::poses::{Keypoint, PoseItem, Poses};
pub use self::segments::Segments;

/// 记录数量与掩码长度不一致。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("形状不匹配: {what} 期望长度 {expected}, 实际长度 {actual}")]
pub struct ShapeMismatchError {
  pub what: &'static str,
  pub expected: usize,
  pub actual: usize,
}

impl ShapeMismatchError {
  pub(crate) fn check(what: &'static str, expected: usize, actual: usize) -> Result<(), Self> {
    if expected == actual {
      Ok(())
    } else {
      Err(Self {
        what,
        expected,
        actual,
      })
    }
  }
}

/// 归一化的感兴趣区域 (left, top, width, height)，取值范围 [0, 1]。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Roi {
  pub left: f32,
  pub top: f32,
  pub width: f32,
  pub height: f32,
}

impl Default for Roi {
  fn default() -> Self {
    Self::FULL
  }
}

impl Roi {
  pub const FULL: Roi = Roi {
    left: 0.0,
    top: 0.0,
    width: 1.0,
    height: 1.0,
  };

  pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
    Self {
      left,
      top,
      width,
      height,
    }
  }

  pub fn is_full(&self) -> bool {
    *self == Self::FULL
  }

  pub fn is_valid(&self) -> bool {
    let values = [self.left, self.top, self.width, self.height];
    values.iter().all(|v| (0.0..=1.0).contains(v))
      && self.left + self.width <= 1.0 + f32::EPSILON
      && self.top + self.height <= 1.0 + f32::EPSILON
  }

  /// 换算为像素矩形 (left, top, width, height)，结果总是落在图像内部。
  pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let left = ((self.left * width as f32).round() as u32).min(width);
    let top = ((self.top * height as f32).round() as u32).min(height);
    let w = ((self.width * width as f32).round() as u32).min(width - left);
    let h = ((self.height * height as f32).round() as u32).min(height - top);
    (left, top, w, h)
  }

  /// ROI 内的归一化坐标映射回整幅图像坐标。
  pub fn map_x(&self, x: f32) -> f32 {
    self.left + x * self.width
  }

  pub fn map_y(&self, y: f32) -> f32 {
    self.top + y * self.height
  }
}

/// 按任务类型区分的后处理结果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Results {
  Classifications(Classifications),
  Detections(Detections),
  Poses(Poses),
  Segments(Segments),
  Anomaly(Anomaly),
}

impl Results {
  pub fn kind(&self) -> &'static str {
    match self {
      Results::Classifications(_) => "classifications",
      Results::Detections(_) => "detections",
      Results::Poses(_) => "poses",
      Results::Segments(_) => "segments",
      Results::Anomaly(_) => "anomaly",
    }
  }

  /// 记录数量；分割与异常检测分别按分割区域数和 1 计。
  pub fn len(&self) -> usize {
    match self {
      Results::Classifications(c) => c.len(),
      Results::Detections(d) => d.len(),
      Results::Poses(p) => p.len(),
      Results::Segments(s) => s.n_segments(),
      Results::Anomaly(_) => 1,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn compensate_for_roi(&mut self, roi: &Roi) {
    if roi.is_full() {
      return;
    }
    match self {
      Results::Classifications(_) => {}
      Results::Detections(d) => d.compensate_for_roi(roi),
      Results::Poses(p) => p.compensate_for_roi(roi),
      Results::Segments(s) => s.compensate_for_roi(roi),
      Results::Anomaly(a) => a.compensate_for_roi(roi),
    }
  }
}

impl From<Detections> for Results {
  fn from(value: Detections) -> Self {
    Results::Detections(value)
  }
}

impl From<Classifications> for Results {
  fn from(value: Classifications) -> Self {
    Results::Classifications(value)
  }
}

impl From<Poses> for Results {
  fn from(value: Poses) -> Self {
    Results::Poses(value)
  }
}

impl From<Segments> for Results {
  fn from(value: Segments) -> Self {
    Results::Segments(value)
  }
}

impl From<Anomaly> for Results {
  fn from(value: Anomaly) -> Self {
    Results::Anomaly(value)
  }
}

/// 把一张网格（分割掩码、热力图）放回整幅画面中 ROI 所在的位置。
pub(crate) fn expand_grid<T: Copy + Default>(
  grid: &[T],
  width: usize,
  height: usize,
  roi: &Roi,
) -> (Vec<T>, usize, usize) {
  let full_w = (width as f32 / roi.width) as usize;
  let full_h = (height as f32 / roi.height) as usize;
  let start_w = (roi.left * width as f32 / roi.width) as usize;
  let start_h = (roi.top * height as f32 / roi.height) as usize;

  let mut expanded = vec![T::default(); full_w * full_h];
  for y in 0..height {
    let ty = start_h + y;
    if ty >= full_h {
      break;
    }
    for x in 0..width {
      let tx = start_w + x;
      if tx >= full_w {
        break;
      }
      expanded[ty * full_w + tx] = grid[y * width + x];
    }
  }
  (expanded, full_w, full_h)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn roi_validation() {
    assert!(Roi::FULL.is_valid());
    assert!(Roi::new(0.25, 0.25, 0.5, 0.5).is_valid());
    assert!(!Roi::new(0.6, 0.0, 0.5, 1.0).is_valid());
    assert!(!Roi::new(-0.1, 0.0, 0.5, 0.5).is_valid());
  }

  #[test]
  fn roi_pixels_stay_inside_image() {
    let roi = Roi::new(0.5, 0.25, 0.5, 0.75);
    assert_eq!(roi.to_pixels(640, 480), (320, 120, 320, 360));
  }

  #[test]
  fn results_serialize_with_kind_tag() {
    let results = Results::from(Detections::empty());
    let value = serde_json::to_value(&results).unwrap();
    assert_eq!(value["kind"], "detections");
    let back: Results = serde_json::from_value(value).unwrap();
    assert_eq!(back, results);
  }

  #[test]
  fn grid_expansion_places_roi_content() {
    let roi = Roi::new(0.5, 0.0, 0.5, 1.0);
    let (grid, w, h) = expand_grid(&[1u8, 2, 3, 4], 2, 2, &roi);
    assert_eq!((w, h), (4, 2));
    assert_eq!(grid, vec![0, 0, 1, 2, 0, 0, 3, 4]);
  }
}
