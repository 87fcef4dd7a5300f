// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/post_process.rs - 常用后处理
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

use tracing::debug;

use crate::{
  model::ModelError,
  result::{Anomaly, Classifications, Detections, Segments},
  tensor::Tensor,
};

const EFFICIENTDET_LITE0_INPUT: f32 = 320.0;

fn require(outputs: &[Tensor], count: usize) -> Result<(), ModelError> {
  if outputs.len() < count {
    return Err(ModelError::OutputCount {
      expected: count,
      actual: outputs.len(),
    });
  }
  Ok(())
}

fn sorted_classifications(scores: Vec<f32>) -> Result<Classifications, ModelError> {
  let mut order: Vec<usize> = (0..scores.len()).collect();
  order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
  let confidence = order.iter().map(|&i| scores[i]).collect();
  let class_id = order.iter().map(|&i| i as u32).collect();
  Ok(Classifications::new(confidence, class_id)?)
}

/// 单个分数向量，按置信度降序输出。
pub fn pp_cls(outputs: &[Tensor]) -> Result<Classifications, ModelError> {
  require(outputs, 1)?;
  sorted_classifications(outputs[0].values().into_owned())
}

/// 同 [`pp_cls`]，先做 softmax。
pub fn pp_cls_softmax(outputs: &[Tensor]) -> Result<Classifications, ModelError> {
  require(outputs, 1)?;
  let logits = outputs[0].values();
  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exp: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
  let sum: f32 = exp.iter().sum();
  sorted_classifications(exp.into_iter().map(|v| v / sum).collect())
}

/// 框坐标为 `[y0, x0, y1, x1]`，转换为 `[x0, y0, x1, y1]`。
fn od_from_columns(
  boxes: &Tensor,
  classes: &Tensor,
  scores: &Tensor,
  count: &Tensor,
) -> Result<Detections, ModelError> {
  let declared = count
    .values()
    .first()
    .copied()
    .ok_or_else(|| ModelError::Decode("检测数量张量为空".to_string()))?;
  let boxes = boxes.values();
  let classes = classes.values();
  let scores = scores.values();

  let available = (boxes.len() / 4).min(classes.len()).min(scores.len());
  let n = (declared.max(0.0) as usize).min(available);
  if n < declared as usize {
    debug!("声明检测数量 {} 超过输出容量 {}, 已截断", declared, available);
  }

  let bbox = boxes
    .chunks_exact(4)
    .take(n)
    .map(|b| [b[1], b[0], b[3], b[2]])
    .collect();
  let class_id = classes[..n].iter().map(|&c| c as u32).collect();
  let confidence = scores[..n].to_vec();
  Ok(Detections::new(bbox, confidence, class_id)?)
}

/// 输出顺序: 框、类别、分数、数量。
pub fn pp_od_bcsn(outputs: &[Tensor]) -> Result<Detections, ModelError> {
  require(outputs, 4)?;
  od_from_columns(&outputs[0], &outputs[1], &outputs[2], &outputs[3])
}

/// 输出顺序: 框、分数、类别、数量。
pub fn pp_od_bscn(outputs: &[Tensor]) -> Result<Detections, ModelError> {
  require(outputs, 4)?;
  od_from_columns(&outputs[0], &outputs[2], &outputs[1], &outputs[3])
}

/// EfficientDet-Lite0 输出的是 320x320 输入上的像素坐标。
pub fn pp_od_efficientdet_lite0(outputs: &[Tensor]) -> Result<Detections, ModelError> {
  let detections = pp_od_bscn(outputs)?;
  let bbox = detections
    .bbox()
    .iter()
    .map(|b| b.map(|v| v / EFFICIENTDET_LITE0_INPUT))
    .collect();
  Ok(Detections::new(
    bbox,
    detections.confidence().to_vec(),
    detections.class_id().to_vec(),
  )?)
}

/// 第一个输出的最后两维视作 `H x W` 的类别掩码。
pub fn pp_segment(outputs: &[Tensor]) -> Result<Segments, ModelError> {
  require(outputs, 1)?;
  let shape = outputs[0].shape();
  if shape.len() < 2 {
    return Err(ModelError::Decode(format!(
      "分割输出至少需要两维, 实际形状 {:?}",
      shape
    )));
  }
  let (height, width) = (shape[shape.len() - 2], shape[shape.len() - 1]);
  let mask = outputs[0]
    .values()
    .iter()
    .take(height * width)
    .map(|&v| v as u8)
    .collect();
  Ok(Segments::new(width, height, mask)?)
}

/// 输出为 `H x W x 2`：通道 0 为热力图，`[0, 0, 1]` 处为整图分数。
pub fn pp_anomaly(outputs: &[Tensor]) -> Result<Anomaly, ModelError> {
  require(outputs, 1)?;
  let shape = outputs[0].shape();
  let [height, width, channels] = match shape {
    [.., h, w, c] => [*h, *w, *c],
    _ => {
      return Err(ModelError::Decode(format!(
        "异常检测输出应为 HxWxC, 实际形状 {:?}",
        shape
      )));
    }
  };
  if channels < 2 {
    return Err(ModelError::Decode(format!(
      "异常检测输出至少需要 2 个通道, 实际 {}",
      channels
    )));
  }
  let values = outputs[0].values();
  if values.len() < channels || width * height == 0 {
    return Err(ModelError::Decode(format!(
      "异常检测输出为空, 形状 {:?}",
      shape
    )));
  }
  let heatmap = values.chunks_exact(channels).map(|px| px[0]).collect();
  Ok(Anomaly::new(values[1], width, height, heatmap)?)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn t(shape: Vec<usize>, data: Vec<f32>) -> Tensor {
    Tensor::from_f32(shape, data).unwrap()
  }

  fn boxes() -> Tensor {
    t(vec![2, 4], vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7])
  }

  #[test]
  fn cls_sorts_descending() {
    let c = pp_cls(&[t(vec![1, 4], vec![0.1, 0.4, 0.3, 0.2])]).unwrap();
    assert_eq!(c.confidence(), &[0.4, 0.3, 0.2, 0.1]);
    assert_eq!(c.class_id(), &[1, 2, 3, 0]);
  }

  #[test]
  fn cls_softmax_recovers_probabilities() {
    let probs = [0.1f32, 0.4, 0.3, 0.2];
    let logits = probs.iter().map(|p| p.ln() - 0.4).collect();
    let c = pp_cls_softmax(&[t(vec![4], logits)]).unwrap();
    assert_eq!(c.class_id(), &[1, 2, 3, 0]);
    for (got, want) in c.confidence().iter().zip([0.4, 0.3, 0.2, 0.1]) {
      assert!((got - want).abs() < 1e-4);
    }
  }

  #[test]
  fn bcsn_swaps_box_axes() {
    let d = pp_od_bcsn(&[
      boxes(),
      t(vec![2], vec![1.0, 2.0]),
      t(vec![2], vec![0.9, 0.8]),
      t(vec![1], vec![2.0]),
    ])
    .unwrap();
    assert_eq!(d.bbox(), &[[0.1, 0.0, 0.3, 0.2], [0.5, 0.4, 0.7, 0.6]]);
    assert_eq!(d.class_id(), &[1, 2]);
    assert_eq!(d.confidence(), &[0.9, 0.8]);
  }

  #[test]
  fn bscn_respects_declared_count() {
    let d = pp_od_bscn(&[
      boxes(),
      t(vec![2], vec![0.9, 0.8]),
      t(vec![2], vec![1.0, 2.0]),
      t(vec![1], vec![1.0]),
    ])
    .unwrap();
    assert_eq!(d.len(), 1);
    assert_eq!(d.class_id(), &[1]);
  }

  #[test]
  fn efficientdet_normalises_pixels() {
    let pixels = t(vec![1, 4], vec![0.0, 32.0, 64.0, 96.0]);
    let d = pp_od_efficientdet_lite0(&[
      pixels,
      t(vec![1], vec![0.9]),
      t(vec![1], vec![3.0]),
      t(vec![1], vec![1.0]),
    ])
    .unwrap();
    assert_eq!(d.bbox(), &[[0.1, 0.0, 0.3, 0.2]]);
  }

  #[test]
  fn missing_outputs_are_reported() {
    assert!(matches!(
      pp_od_bcsn(&[boxes()]),
      Err(ModelError::OutputCount {
        expected: 4,
        actual: 1
      })
    ));
  }

  #[test]
  fn segment_uses_trailing_axes() {
    let s = pp_segment(&[t(vec![1, 2, 3], vec![0.0, 1.0, 1.0, 0.0, 4.0, 0.0])]).unwrap();
    assert_eq!((s.width(), s.height()), (3, 2));
    assert_eq!(s.indices(), vec![1, 4]);
  }

  #[test]
  fn anomaly_splits_score_and_heatmap() {
    let a = pp_anomaly(&[t(vec![1, 1, 2, 2], vec![0.1, 0.7, 0.9, 0.7])]).unwrap();
    assert_eq!(a.score(), 0.7);
    assert_eq!(a.heatmap(), &[0.1, 0.9]);
    assert_eq!((a.width(), a.height()), (2, 1));
  }

  #[test]
  fn anomaly_with_empty_extent_is_a_decode_error() {
    for shape in [vec![0, 1, 2], vec![1, 0, 2]] {
      assert!(matches!(
        pp_anomaly(&[t(shape, vec![])]),
        Err(ModelError::Decode(_))
      ));
    }
  }
}
