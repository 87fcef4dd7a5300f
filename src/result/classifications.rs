// 该文件是 Kanjian （看见） 项目的一部分。
// src/result/classifications.rs - 分类结果
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

use std::ops::Add;

use serde::{Deserialize, Serialize};

use super::ShapeMismatchError;

#[derive(Serialize, Deserialize)]
struct ClassificationsRecord {
  confidence: Vec<f32>,
  class_id: Vec<u32>,
}

/// 按置信度排列的类别列表。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "ClassificationsRecord", into = "ClassificationsRecord")]
pub struct Classifications {
  confidence: Vec<f32>,
  class_id: Vec<u32>,
}

impl TryFrom<ClassificationsRecord> for Classifications {
  type Error = ShapeMismatchError;

  fn try_from(record: ClassificationsRecord) -> Result<Self, Self::Error> {
    Classifications::new(record.confidence, record.class_id)
  }
}

impl From<Classifications> for ClassificationsRecord {
  fn from(value: Classifications) -> Self {
    Self {
      confidence: value.confidence,
      class_id: value.class_id,
    }
  }
}

impl Classifications {
  pub fn new(confidence: Vec<f32>, class_id: Vec<u32>) -> Result<Self, ShapeMismatchError> {
    ShapeMismatchError::check("class_id", confidence.len(), class_id.len())?;
    Ok(Self {
      confidence,
      class_id,
    })
  }

  pub fn len(&self) -> usize {
    self.confidence.len()
  }

  pub fn is_empty(&self) -> bool {
    self.confidence.is_empty()
  }

  pub fn confidence(&self) -> &[f32] {
    &self.confidence
  }

  pub fn class_id(&self) -> &[u32] {
    &self.class_id
  }

  pub fn get(&self, index: usize) -> Option<(f32, u32)> {
    Some((*self.confidence.get(index)?, *self.class_id.get(index)?))
  }

  pub fn iter(&self) -> impl Iterator<Item = (f32, u32)> + '_ {
    self.confidence.iter().copied().zip(self.class_id.iter().copied())
  }

  pub fn filter(&self, mask: &[bool]) -> Result<Classifications, ShapeMismatchError> {
    ShapeMismatchError::check("mask", self.len(), mask.len())?;
    let (confidence, class_id) = self
      .iter()
      .zip(mask)
      .filter(|(_, keep)| **keep)
      .map(|(item, _)| item)
      .unzip();
    Ok(Self {
      confidence,
      class_id,
    })
  }
}

impl Add for Classifications {
  type Output = Classifications;

  fn add(mut self, other: Classifications) -> Classifications {
    self.confidence.extend(other.confidence);
    self.class_id.extend(other.class_id);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn filter_follows_mask() {
    let c = Classifications::new(vec![0.8, 0.15, 0.05], vec![3, 1, 7]).unwrap();
    let top = c.filter(&[true, true, false]).unwrap();
    assert_eq!(top.class_id(), &[3, 1]);
    assert!(c.filter(&[true]).is_err());
  }

  #[test]
  fn iteration_pairs_columns() {
    let c = Classifications::new(vec![0.6, 0.4], vec![2, 9]).unwrap();
    assert_eq!(c.iter().collect::<Vec<_>>(), vec![(0.6, 2), (0.4, 9)]);
    assert_eq!(c.get(1), Some((0.4, 9)));
  }
}
