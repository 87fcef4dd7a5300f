// 该文件是 Kanjian （看见） 项目的一部分。
// src/source/metadata.rs - 传感器内嵌推理元数据
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

use crate::{source::SourceError, tensor::Tensor};

const NETWORK_NAME_LEN: usize = 64;
const MAX_NUM_TENSORS: usize = 16;
const MAX_NUM_DIMENSIONS: usize = 16;
const TENSOR_INFO_SIZE: usize = 4 + 4 + 2 * MAX_NUM_DIMENSIONS;

/// 打包后的描述符长度（小端、无填充）。
pub const OUTPUT_TENSOR_INFO_SIZE: usize = NETWORK_NAME_LEN + 4 + MAX_NUM_TENSORS * TENSOR_INFO_SIZE;

/// 随帧到达的加速器输出。
///
/// `output_tensor` 为全部输出张量按顺序拼接后的浮点数据，
/// `output_tensor_info` 为 [`OutputTensorInfo`] 的打包字节。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorMetadata {
  #[serde(default)]
  pub output_tensor: Option<Vec<f32>>,
  #[serde(default)]
  pub output_tensor_info: Option<Vec<u8>>,
}

impl SensorMetadata {
  pub fn has_output(&self) -> bool {
    self.output_tensor.as_ref().is_some_and(|t| !t.is_empty())
  }

  /// 按描述符中的形状切分输出数据；数据按列主序排列。
  pub fn output_tensors(&self) -> Result<Vec<Tensor>, SourceError> {
    let Some(data) = self.output_tensor.as_deref() else {
      return Ok(Vec::new());
    };
    let info = match self.output_tensor_info.as_deref() {
      Some(bytes) if !bytes.is_empty() => OutputTensorInfo::parse(bytes)?,
      _ => return Ok(Vec::new()),
    };
    info.split(data)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorShapeInfo {
  pub data_num: u32,
  pub dims: Vec<u16>,
}

/// 加速器导出的输出张量描述。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTensorInfo {
  pub network_name: String,
  pub tensors: Vec<TensorShapeInfo>,
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
  u32::from_le_bytes([
    bytes[offset],
    bytes[offset + 1],
    bytes[offset + 2],
    bytes[offset + 3],
  ])
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
  u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

impl OutputTensorInfo {
  pub fn parse(bytes: &[u8]) -> Result<Self, SourceError> {
    if bytes.len() != OUTPUT_TENSOR_INFO_SIZE {
      return Err(SourceError::Metadata(format!(
        "张量描述长度 {} 与期望长度 {} 不符",
        bytes.len(),
        OUTPUT_TENSOR_INFO_SIZE
      )));
    }

    let name_bytes = &bytes[..NETWORK_NAME_LEN];
    let name_end = name_bytes
      .iter()
      .position(|&b| b == 0)
      .unwrap_or(NETWORK_NAME_LEN);
    let network_name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();

    let num_tensors = read_u32(bytes, NETWORK_NAME_LEN) as usize;
    if num_tensors > MAX_NUM_TENSORS {
      return Err(SourceError::Metadata(format!(
        "张量数量 {} 超过上限 {}",
        num_tensors, MAX_NUM_TENSORS
      )));
    }

    let mut tensors = Vec::with_capacity(num_tensors);
    for i in 0..num_tensors {
      let base = NETWORK_NAME_LEN + 4 + i * TENSOR_INFO_SIZE;
      let data_num = read_u32(bytes, base);
      let num_dims = read_u32(bytes, base + 4) as usize;
      if num_dims > MAX_NUM_DIMENSIONS {
        return Err(SourceError::Metadata(format!(
          "第 {} 个张量维度数 {} 超过上限 {}",
          i, num_dims, MAX_NUM_DIMENSIONS
        )));
      }
      let dims = (0..num_dims)
        .map(|d| read_u16(bytes, base + 8 + d * 2))
        .collect();
      tensors.push(TensorShapeInfo { data_num, dims });
    }

    Ok(Self {
      network_name,
      tensors,
    })
  }

  pub fn encode(&self) -> Result<Vec<u8>, SourceError> {
    if self.tensors.len() > MAX_NUM_TENSORS {
      return Err(SourceError::Metadata(format!(
        "张量数量 {} 超过上限 {}",
        self.tensors.len(),
        MAX_NUM_TENSORS
      )));
    }

    let mut bytes = vec![0u8; OUTPUT_TENSOR_INFO_SIZE];
    let name = self.network_name.as_bytes();
    let name_len = name.len().min(NETWORK_NAME_LEN - 1);
    bytes[..name_len].copy_from_slice(&name[..name_len]);
    bytes[NETWORK_NAME_LEN..NETWORK_NAME_LEN + 4]
      .copy_from_slice(&(self.tensors.len() as u32).to_le_bytes());

    for (i, tensor) in self.tensors.iter().enumerate() {
      if tensor.dims.len() > MAX_NUM_DIMENSIONS {
        return Err(SourceError::Metadata(format!(
          "第 {} 个张量维度数 {} 超过上限 {}",
          i,
          tensor.dims.len(),
          MAX_NUM_DIMENSIONS
        )));
      }
      let base = NETWORK_NAME_LEN + 4 + i * TENSOR_INFO_SIZE;
      bytes[base..base + 4].copy_from_slice(&tensor.data_num.to_le_bytes());
      bytes[base + 4..base + 8].copy_from_slice(&(tensor.dims.len() as u32).to_le_bytes());
      for (d, size) in tensor.dims.iter().enumerate() {
        let at = base + 8 + d * 2;
        bytes[at..at + 2].copy_from_slice(&size.to_le_bytes());
      }
    }
    Ok(bytes)
  }

  pub fn shapes(&self) -> Vec<Vec<usize>> {
    self
      .tensors
      .iter()
      .map(|t| t.dims.iter().map(|&d| d as usize).collect())
      .collect()
  }

  /// 依次切分平铺的输出数据，每段按列主序转换为行主序张量。
  pub fn split(&self, data: &[f32]) -> Result<Vec<Tensor>, SourceError> {
    let mut offset = 0usize;
    let mut outputs = Vec::with_capacity(self.tensors.len());
    for shape in self.shapes() {
      let size: usize = shape.iter().product();
      let end = offset + size;
      if end > data.len() {
        return Err(SourceError::Metadata(format!(
          "输出数据长度 {} 不足, 需要至少 {}",
          data.len(),
          end
        )));
      }
      let tensor = Tensor::from_column_major(shape, &data[offset..end])
        .map_err(|e| SourceError::Metadata(e.to_string()))?;
      outputs.push(tensor);
      offset = end;
    }
    Ok(outputs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> OutputTensorInfo {
    OutputTensorInfo {
      network_name: "ssd_mobilenet".to_string(),
      tensors: vec![
        TensorShapeInfo {
          data_num: 8,
          dims: vec![2, 4],
        },
        TensorShapeInfo {
          data_num: 1,
          dims: vec![1],
        },
      ],
    }
  }

  #[test]
  fn descriptor_has_fixed_size() {
    assert_eq!(OUTPUT_TENSOR_INFO_SIZE, 708);
    let bytes = sample().encode().unwrap();
    assert_eq!(bytes.len(), 708);
    assert_eq!(OutputTensorInfo::parse(&bytes).unwrap(), sample());
  }

  #[test]
  fn wrong_length_is_rejected() {
    assert!(matches!(
      OutputTensorInfo::parse(&[0u8; 700]),
      Err(SourceError::Metadata(_))
    ));
  }

  #[test]
  fn little_endian_layout() {
    let bytes = sample().encode().unwrap();
    assert_eq!(&bytes[..13], b"ssd_mobilenet");
    assert_eq!(&bytes[64..68], &[2, 0, 0, 0]);
    // 第一个张量: data_num=8, dims=2, size=[2, 4]
    assert_eq!(&bytes[68..80], &[8, 0, 0, 0, 2, 0, 0, 0, 2, 0, 4, 0]);
  }

  #[test]
  fn split_reorders_column_major_data() {
    let metadata = SensorMetadata {
      output_tensor: Some(vec![1.0, 5.0, 2.0, 6.0, 3.0, 7.0, 4.0, 8.0, 2.0]),
      output_tensor_info: Some(sample().encode().unwrap()),
    };
    let outputs = metadata.output_tensors().unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].shape(), &[2, 4]);
    assert_eq!(
      outputs[0].as_f32().unwrap(),
      &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
    );
    assert_eq!(outputs[1].as_f32().unwrap(), &[2.0]);
  }

  #[test]
  fn short_data_is_an_error() {
    let metadata = SensorMetadata {
      output_tensor: Some(vec![0.0; 4]),
      output_tensor_info: Some(sample().encode().unwrap()),
    };
    assert!(metadata.output_tensors().is_err());
  }
}
