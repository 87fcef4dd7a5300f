// 该文件是 Kanjian （看见） 项目的一部分。
// src/tensor.rs - 张量定义
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

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
  #[default]
  Nhwc,
  Nchw,
}

#[derive(Error, Debug, PartialEq)]
pub enum TensorError {
  #[error("张量形状 {shape:?} 需要 {expected} 个元素, 实际为 {actual}")]
  ShapeMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  U8(Box<[u8]>),
  F32(Box<[f32]>),
}

impl TensorData {
  pub fn len(&self) -> usize {
    match self {
      TensorData::U8(data) => data.len(),
      TensorData::F32(data) => data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 行主序（C 顺序）的稠密张量。
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: Vec<usize>,
  layout: Option<TensorLayout>,
  data: TensorData,
}

fn element_count(shape: &[usize]) -> usize {
  shape.iter().product()
}

impl Tensor {
  pub fn from_u8(shape: Vec<usize>, data: Vec<u8>) -> Result<Self, TensorError> {
    Self::new(shape, TensorData::U8(data.into_boxed_slice()))
  }

  pub fn from_f32(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, TensorError> {
    Self::new(shape, TensorData::F32(data.into_boxed_slice()))
  }

  pub fn new(shape: Vec<usize>, data: TensorData) -> Result<Self, TensorError> {
    let expected = element_count(&shape);
    if expected != data.len() {
      return Err(TensorError::ShapeMismatch {
        shape,
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      shape,
      layout: None,
      data,
    })
  }

  /// 传感器按列主序（Fortran 顺序）输出张量，这里转换为行主序。
  pub fn from_column_major(shape: Vec<usize>, data: &[f32]) -> Result<Self, TensorError> {
    let expected = element_count(&shape);
    if expected != data.len() {
      return Err(TensorError::ShapeMismatch {
        shape,
        expected,
        actual: data.len(),
      });
    }

    let rank = shape.len();
    let mut values = vec![0f32; expected];
    let mut index = vec![0usize; rank];
    for slot in values.iter_mut() {
      // 当前行主序下标对应的列主序偏移
      let mut offset = 0usize;
      let mut stride = 1usize;
      for axis in 0..rank {
        offset += index[axis] * stride;
        stride *= shape[axis];
      }
      *slot = data[offset];

      for axis in (0..rank).rev() {
        index[axis] += 1;
        if index[axis] < shape[axis] {
          break;
        }
        index[axis] = 0;
      }
    }

    Self::from_f32(shape, values)
  }

  pub fn with_layout(mut self, layout: TensorLayout) -> Self {
    self.layout = Some(layout);
    self
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn layout(&self) -> Option<TensorLayout> {
    self.layout
  }

  pub fn data(&self) -> &TensorData {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_f32(&self) -> Option<&[f32]> {
    match &self.data {
      TensorData::F32(data) => Some(data),
      TensorData::U8(_) => None,
    }
  }

  pub fn as_u8(&self) -> Option<&[u8]> {
    match &self.data {
      TensorData::U8(data) => Some(data),
      TensorData::F32(_) => None,
    }
  }

  /// 以浮点数视图读取，`u8` 张量会被逐元素转换。
  pub fn values(&self) -> Cow<'_, [f32]> {
    match &self.data {
      TensorData::F32(data) => Cow::Borrowed(data),
      TensorData::U8(data) => Cow::Owned(data.iter().map(|&v| v as f32).collect()),
    }
  }

  /// 去掉所有长度为 1 的维度。
  pub fn squeezed_shape(&self) -> Vec<usize> {
    self.shape.iter().copied().filter(|&d| d != 1).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_checks_element_count() {
    let err = Tensor::from_f32(vec![2, 3], vec![0.0; 5]).unwrap_err();
    assert_eq!(
      err,
      TensorError::ShapeMismatch {
        shape: vec![2, 3],
        expected: 6,
        actual: 5
      }
    );
  }

  #[test]
  fn column_major_is_transposed_into_row_major() {
    // 2x3 矩阵 [[1,2,3],[4,5,6]] 的列主序存储
    let column_major = [1.0, 4.0, 2.0, 5.0, 3.0, 6.0];
    let tensor = Tensor::from_column_major(vec![2, 3], &column_major).unwrap();
    assert_eq!(tensor.as_f32().unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
  }

  #[test]
  fn u8_values_are_widened() {
    let tensor = Tensor::from_u8(vec![3], vec![1, 2, 255]).unwrap();
    assert_eq!(tensor.values().as_ref(), &[1.0, 2.0, 255.0]);
    assert!(tensor.as_f32().is_none());
  }

  #[test]
  fn squeeze_drops_unit_axes() {
    let tensor = Tensor::from_f32(vec![1, 4, 1], vec![0.0; 4]).unwrap();
    assert_eq!(tensor.squeezed_shape(), vec![4]);
  }
}
