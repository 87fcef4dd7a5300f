// 该文件是 Kanjian （看见） 项目的一部分。
// src/result/poses.rs - 姿态估计结果
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

use super::{Roi, ShapeMismatchError};

/// 归一化坐标下的关键点。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
  pub x: f32,
  pub y: f32,
  pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseItem {
  pub score: f32,
  pub keypoints: Vec<Keypoint>,
  #[serde(default)]
  pub bbox: Option<[f32; 4]>,
  #[serde(default)]
  pub tracker_id: Option<i64>,
}

#[derive(Serialize, Deserialize)]
struct PosesRecord {
  items: Vec<PoseItem>,
  #[serde(default)]
  roi_compensated: bool,
}

/// 姿态集合；所有个体的关键点数量相同。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "PosesRecord", into = "PosesRecord")]
pub struct Poses {
  items: Vec<PoseItem>,
  roi_compensated: bool,
}

impl TryFrom<PosesRecord> for Poses {
  type Error = ShapeMismatchError;

  fn try_from(record: PosesRecord) -> Result<Self, Self::Error> {
    let mut poses = Poses::new(record.items)?;
    poses.roi_compensated = record.roi_compensated;
    Ok(poses)
  }
}

impl From<Poses> for PosesRecord {
  fn from(value: Poses) -> Self {
    Self {
      items: value.items,
      roi_compensated: value.roi_compensated,
    }
  }
}

impl Poses {
  pub fn new(items: Vec<PoseItem>) -> Result<Self, ShapeMismatchError> {
    if let Some(first) = items.first() {
      let expected = first.keypoints.len();
      for item in &items {
        ShapeMismatchError::check("keypoints", expected, item.keypoints.len())?;
      }
    }
    Ok(Self {
      items,
      roi_compensated: false,
    })
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn n_keypoints(&self) -> usize {
    self.items.first().map(|p| p.keypoints.len()).unwrap_or(0)
  }

  pub fn get(&self, index: usize) -> Option<&PoseItem> {
    self.items.get(index)
  }

  pub fn iter(&self) -> std::slice::Iter<'_, PoseItem> {
    self.items.iter()
  }

  pub fn filter(&self, mask: &[bool]) -> Result<Poses, ShapeMismatchError> {
    ShapeMismatchError::check("mask", self.len(), mask.len())?;
    Ok(Poses {
      items: self
        .items
        .iter()
        .zip(mask)
        .filter(|(_, keep)| **keep)
        .map(|(item, _)| item.clone())
        .collect(),
      roi_compensated: self.roi_compensated,
    })
  }

  pub fn compensate_for_roi(&mut self, roi: &Roi) {
    if roi.is_full() || self.roi_compensated {
      return;
    }
    for item in self.items.iter_mut() {
      for kp in item.keypoints.iter_mut() {
        kp.x = roi.map_x(kp.x);
        kp.y = roi.map_y(kp.y);
      }
      if let Some(b) = item.bbox.as_mut() {
        b[0] = roi.map_x(b[0]);
        b[1] = roi.map_y(b[1]);
        b[2] = roi.map_x(b[2]);
        b[3] = roi.map_y(b[3]);
      }
    }
    self.roi_compensated = true;
  }
}
