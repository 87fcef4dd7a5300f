// 该文件是 Kanjian （看见） 项目的一部分。
// src/result/detections.rs - 目标检测结果
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

use super::{Roi, ShapeMismatchError};

/// 单条检测记录。`bbox` 为归一化坐标 `[x0, y0, x1, y1]`。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectItem {
  pub bbox: [f32; 4],
  pub score: f32,
  pub class_id: u32,
  pub tracker_id: Option<i64>,
}

impl DetectItem {
  pub fn new(bbox: [f32; 4], score: f32, class_id: u32) -> Self {
    Self {
      bbox,
      score,
      class_id,
      tracker_id: None,
    }
  }
}

#[derive(Serialize, Deserialize)]
struct DetectionsRecord {
  bbox: Vec<[f32; 4]>,
  confidence: Vec<f32>,
  class_id: Vec<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  tracker_id: Option<Vec<i64>>,
  #[serde(default)]
  roi_compensated: bool,
}

/// 按列存储的检测集合。
///
/// 各列长度始终相同；所有构造路径（包括反序列化）都会检查这一点。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "DetectionsRecord", into = "DetectionsRecord")]
pub struct Detections {
  bbox: Vec<[f32; 4]>,
  confidence: Vec<f32>,
  class_id: Vec<u32>,
  tracker_id: Option<Vec<i64>>,
  roi_compensated: bool,
}

impl TryFrom<DetectionsRecord> for Detections {
  type Error = ShapeMismatchError;

  fn try_from(record: DetectionsRecord) -> Result<Self, Self::Error> {
    let mut detections = Detections::new(record.bbox, record.confidence, record.class_id)?;
    if let Some(ids) = record.tracker_id {
      detections = detections.with_tracker_ids(ids)?;
    }
    detections.roi_compensated = record.roi_compensated;
    Ok(detections)
  }
}

impl From<Detections> for DetectionsRecord {
  fn from(value: Detections) -> Self {
    Self {
      bbox: value.bbox,
      confidence: value.confidence,
      class_id: value.class_id,
      tracker_id: value.tracker_id,
      roi_compensated: value.roi_compensated,
    }
  }
}

impl Detections {
  pub fn new(
    bbox: Vec<[f32; 4]>,
    confidence: Vec<f32>,
    class_id: Vec<u32>,
  ) -> Result<Self, ShapeMismatchError> {
    ShapeMismatchError::check("confidence", bbox.len(), confidence.len())?;
    ShapeMismatchError::check("class_id", bbox.len(), class_id.len())?;
    Ok(Self {
      bbox,
      confidence,
      class_id,
      tracker_id: None,
      roi_compensated: false,
    })
  }

  pub fn empty() -> Self {
    Self::default()
  }

  pub fn from_items<I: IntoIterator<Item = DetectItem>>(items: I) -> Self {
    let mut detections = Self::empty();
    let mut trackers = Vec::new();
    let mut tracked = false;
    for item in items {
      detections.bbox.push(item.bbox);
      detections.confidence.push(item.score);
      detections.class_id.push(item.class_id);
      tracked |= item.tracker_id.is_some();
      trackers.push(item.tracker_id.unwrap_or(-1));
    }
    if tracked {
      detections.tracker_id = Some(trackers);
    }
    detections
  }

  pub fn with_tracker_ids(mut self, ids: Vec<i64>) -> Result<Self, ShapeMismatchError> {
    ShapeMismatchError::check("tracker_id", self.len(), ids.len())?;
    self.tracker_id = Some(ids);
    Ok(self)
  }

  pub fn len(&self) -> usize {
    self.bbox.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bbox.is_empty()
  }

  pub fn bbox(&self) -> &[[f32; 4]] {
    &self.bbox
  }

  pub fn confidence(&self) -> &[f32] {
    &self.confidence
  }

  pub fn class_id(&self) -> &[u32] {
    &self.class_id
  }

  pub fn tracker_id(&self) -> Option<&[i64]> {
    self.tracker_id.as_deref()
  }

  pub fn get(&self, index: usize) -> Option<DetectItem> {
    if index >= self.len() {
      return None;
    }
    Some(DetectItem {
      bbox: self.bbox[index],
      score: self.confidence[index],
      class_id: self.class_id[index],
      tracker_id: self.tracker_id.as_ref().map(|ids| ids[index]),
    })
  }

  pub fn iter(&self) -> impl Iterator<Item = DetectItem> + '_ {
    (0..self.len()).filter_map(|i| self.get(i))
  }

  /// 按布尔掩码筛选，保持原有相对顺序；掩码长度必须与记录数相同。
  pub fn filter(&self, mask: &[bool]) -> Result<Detections, ShapeMismatchError> {
    ShapeMismatchError::check("mask", self.len(), mask.len())?;

    let keep = |i: &usize| mask[*i];
    let indices: Vec<usize> = (0..self.len()).filter(keep).collect();
    Ok(Detections {
      bbox: indices.iter().map(|&i| self.bbox[i]).collect(),
      confidence: indices.iter().map(|&i| self.confidence[i]).collect(),
      class_id: indices.iter().map(|&i| self.class_id[i]).collect(),
      tracker_id: self
        .tracker_id
        .as_ref()
        .map(|ids| indices.iter().map(|&i| ids[i]).collect()),
      roi_compensated: self.roi_compensated,
    })
  }

  /// 由谓词生成掩码，便于写 `d.filter(&d.mask(|x| x.score > 0.5))`。
  pub fn mask<F: Fn(&DetectItem) -> bool>(&self, predicate: F) -> Vec<bool> {
    self.iter().map(|item| predicate(&item)).collect()
  }

  pub fn area(&self) -> Vec<f32> {
    self
      .bbox
      .iter()
      .map(|b| (b[2] - b[0]) * (b[3] - b[1]))
      .collect()
  }

  pub fn bbox_width(&self) -> Vec<f32> {
    self.bbox.iter().map(|b| b[2] - b[0]).collect()
  }

  pub fn bbox_height(&self) -> Vec<f32> {
    self.bbox.iter().map(|b| b[3] - b[1]).collect()
  }

  /// 把 ROI 内的归一化坐标换算回整幅画面，重复调用不会再次换算。
  pub fn compensate_for_roi(&mut self, roi: &Roi) {
    if roi.is_full() || self.roi_compensated {
      return;
    }
    for b in self.bbox.iter_mut() {
      b[0] = roi.map_x(b[0]);
      b[1] = roi.map_y(b[1]);
      b[2] = roi.map_x(b[2]);
      b[3] = roi.map_y(b[3]);
    }
    self.roi_compensated = true;
  }
}

impl Add for Detections {
  type Output = Detections;

  fn add(mut self, other: Detections) -> Detections {
    let tracker_id = match (self.tracker_id.take(), other.tracker_id) {
      (None, None) => None,
      (left, right) => {
        let mut ids = left.unwrap_or_else(|| vec![-1; self.bbox.len()]);
        ids.extend(right.unwrap_or_else(|| vec![-1; other.bbox.len()]));
        Some(ids)
      }
    };
    self.bbox.extend(other.bbox);
    self.confidence.extend(other.confidence);
    self.class_id.extend(other.class_id);
    self.tracker_id = tracker_id;
    self.roi_compensated = self.roi_compensated && other.roi_compensated;
    self
  }
}

impl FromIterator<DetectItem> for Detections {
  fn from_iter<T: IntoIterator<Item = DetectItem>>(iter: T) -> Self {
    Self::from_items(iter)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Detections {
    Detections::from_items([
      DetectItem::new([0.1, 0.1, 0.5, 0.5], 0.9, 0),
      DetectItem::new([0.2, 0.2, 0.4, 0.6], 0.3, 1),
      DetectItem::new([0.0, 0.0, 1.0, 1.0], 0.7, 2),
    ])
  }

  #[test]
  fn mismatched_columns_are_rejected() {
    let err = Detections::new(vec![[0.0; 4]; 2], vec![0.5], vec![0, 1]).unwrap_err();
    assert_eq!(err.expected, 2);
    assert_eq!(err.actual, 1);
  }

  #[test]
  fn filter_keeps_order() {
    let d = sample();
    let kept = d.filter(&[true, false, true]).unwrap();
    assert_eq!(kept.len(), 2);
    assert_eq!(kept.class_id(), &[0, 2]);
    assert_eq!(kept.confidence(), &[0.9, 0.7]);
  }

  #[test]
  fn filter_with_wrong_mask_leaves_input_untouched() {
    let d = sample();
    let before = d.clone();
    assert!(d.filter(&[true]).is_err());
    assert_eq!(d, before);
  }

  #[test]
  fn predicate_mask() {
    let d = sample();
    let strong = d.filter(&d.mask(|x| x.score > 0.5)).unwrap();
    assert_eq!(strong.class_id(), &[0, 2]);
  }

  #[test]
  fn empty_container_is_valid() {
    let d = Detections::empty();
    assert!(d.is_empty());
    assert_eq!(d.filter(&[]).unwrap(), Detections::empty());
    assert!(d.get(0).is_none());
  }

  #[test]
  fn concatenation_pads_missing_tracker_ids() {
    let tracked = sample().with_tracker_ids(vec![4, 5, 6]).unwrap();
    let joined = tracked + sample();
    assert_eq!(joined.len(), 6);
    assert_eq!(joined.tracker_id().unwrap(), &[4, 5, 6, -1, -1, -1]);
  }

  #[test]
  fn geometry_helpers() {
    let d = sample();
    let area = d.area();
    assert!((area[0] - 0.16).abs() < 1e-6);
    assert!((d.bbox_width()[1] - 0.2).abs() < 1e-6);
    assert!((d.bbox_height()[1] - 0.4).abs() < 1e-6);
  }

  #[test]
  fn roi_compensation_is_applied_once() {
    let mut d = Detections::from_items([DetectItem::new([0.0, 0.0, 1.0, 1.0], 0.5, 0)]);
    let roi = Roi::new(0.5, 0.25, 0.5, 0.5);
    d.compensate_for_roi(&roi);
    d.compensate_for_roi(&roi);
    assert_eq!(d.bbox()[0], [0.5, 0.25, 1.0, 0.75]);
  }

  #[test]
  fn deserialisation_revalidates_lengths() {
    let json = r#"{"bbox":[[0,0,1,1]],"confidence":[0.5,0.6],"class_id":[0]}"#;
    assert!(serde_json::from_str::<Detections>(json).is_err());

    let json = r#"{"bbox":[[0,0,1,1]],"confidence":[0.5],"class_id":[3]}"#;
    let d: Detections = serde_json::from_str(json).unwrap();
    assert_eq!(d.get(0).unwrap().class_id, 3);
  }
}
