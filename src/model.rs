// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 模型
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

//! 模型描述与前/后处理约定。
//!
//! 一个 [`Model`] 必须能做后处理（[`Postprocess`]），前处理能力（[`Preprocess`]）
//! 是可选的：在传感器加速器上，前处理由硬件完成；在主机解释器上，
//! 设备在部署时要求模型提供前处理能力。

use std::{
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  raster::{ColorFormat, Image, RasterError},
  result::{Results, ShapeMismatchError},
  source::SourceCapabilities,
  tensor::{Tensor, TensorError},
};

mod network;
mod post_process;
mod pre_process;
mod yolo26;
mod zoo;

pub use self::network::{NetworkModel, PostProcessor};
pub use self::post_process::{
  pp_anomaly, pp_cls, pp_cls_softmax, pp_od_bcsn, pp_od_bscn, pp_od_efficientdet_lite0,
  pp_segment,
};
pub use self::pre_process::{Normalization, Preprocessor};
pub use self::yolo26::{COCO_LABELS, Yolo26Builder, Yolo26Config};
pub use self::zoo::{DownloadError, ModelZoo};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型与输入源不兼容: {0}")]
  Incompatible(String),
  #[error("模型输出数量不匹配: 期望 {expected}, 实际 {actual}")]
  OutputCount { expected: usize, actual: usize },
  #[error("第 {index} 个输出形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  OutputShape {
    index: usize,
    expected: Vec<usize>,
    actual: Vec<usize>,
  },
  #[error("后处理失败: {0}")]
  Decode(String),
  #[error("标签文件 {path} 读取失败: {source}")]
  Labels {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("模型配置错误: {0}")]
  Config(String),
  #[error("图像错误: {0}")]
  Raster(#[from] RasterError),
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
  #[error("结果形状错误: {0}")]
  Shape(#[from] ShapeMismatchError),
  #[error("模型下载失败: {0}")]
  Download(#[from] DownloadError),
}

/// 网络输入尺寸。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
  pub width: u32,
  pub height: u32,
  pub channels: u32,
}

impl InputShape {
  pub fn new(width: u32, height: u32) -> Self {
    Self {
      width,
      height,
      channels: 3,
    }
  }
}

impl fmt::Display for InputShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}x{}", self.width, self.height, self.channels)
  }
}

/// 解析 `320x320` 或 `320x320x3`。
impl FromStr for InputShape {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let parts = s
      .split('x')
      .map(|p| p.trim().parse::<u32>())
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| ModelError::Config(format!("输入尺寸 {} 无效: {}", s, e)))?;
    match parts.as_slice() {
      [w, h] => Ok(InputShape::new(*w, *h)),
      [w, h, c] => Ok(InputShape {
        width: *w,
        height: *h,
        channels: *c,
      }),
      _ => Err(ModelError::Config(format!("输入尺寸 {} 无效", s))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
  /// 已打包、可直接加载到传感器加速器的网络
  RpkPackaged,
  /// 已转换但尚未打包
  Converted,
  Onnx,
  Keras,
  /// Rockchip NPU 网络
  Rknn,
  Unknown,
}

impl ModelKind {
  pub fn from_path(path: &Path) -> Self {
    let ext = path
      .extension()
      .and_then(|e| e.to_str())
      .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
      Some("rpk") => ModelKind::RpkPackaged,
      Some("zip") => ModelKind::Converted,
      Some("onnx") => ModelKind::Onnx,
      Some("keras") | Some("h5") => ModelKind::Keras,
      Some("rknn") => ModelKind::Rknn,
      _ => ModelKind::Unknown,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFile {
  pub path: PathBuf,
  pub kind: ModelKind,
}

impl ModelFile {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let kind = ModelKind::from_path(&path);
    Self { path, kind }
  }
}

/// 模型的静态描述，部署后不再改变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
  pub name: String,
  pub input_shape: InputShape,
  pub color_format: ColorFormat,
  pub labels: Vec<String>,
  /// 期望的输出形状；维度 0 表示任意长度，空列表表示不检查。
  pub output_shapes: Vec<Vec<usize>>,
  pub file: ModelFile,
  pub preserve_aspect_ratio: bool,
}

impl ModelInfo {
  pub fn new(name: impl Into<String>, file: impl Into<PathBuf>, input_shape: InputShape) -> Self {
    Self {
      name: name.into(),
      input_shape,
      color_format: ColorFormat::default(),
      labels: Vec::new(),
      output_shapes: Vec::new(),
      file: ModelFile::new(file),
      preserve_aspect_ratio: false,
    }
  }

  pub fn with_color_format(mut self, color_format: ColorFormat) -> Self {
    self.color_format = color_format;
    self
  }

  pub fn with_labels(mut self, labels: Vec<String>) -> Self {
    self.labels = labels;
    self
  }

  pub fn with_output_shapes(mut self, shapes: Vec<Vec<usize>>) -> Self {
    self.output_shapes = shapes;
    self
  }

  pub fn with_preserve_aspect_ratio(mut self, preserve: bool) -> Self {
    self.preserve_aspect_ratio = preserve;
    self
  }

  /// 检查输入源能否提供模型需要的输入。
  ///
  /// 分辨率必须与输入源一致，或者不超过输入源片上缩放器支持的最大张量尺寸；
  /// 颜色格式必须一致。`fallback` 打开时，由主机端缩放与颜色转换兜底。
  pub fn validate(&self, caps: &SourceCapabilities, fallback: bool) -> Result<(), ModelError> {
    let InputShape {
      width,
      height,
      channels,
    } = self.input_shape;
    if width == 0 || height == 0 || channels == 0 {
      return Err(ModelError::Incompatible(format!(
        "模型 {} 的输入尺寸 {} 含有零维度",
        self.name, self.input_shape
      )));
    }
    if channels != 3 {
      return Err(ModelError::Incompatible(format!(
        "模型 {} 需要 {} 通道输入, 输入源只提供 3 通道",
        self.name, channels
      )));
    }

    let same_size = width == caps.width && height == caps.height;
    let scaled = caps
      .max_tensor_size
      .is_some_and(|(max_w, max_h)| width <= max_w && height <= max_h);
    if !(same_size || scaled || fallback) {
      return Err(ModelError::Incompatible(format!(
        "模型 {} 需要 {}x{} 输入, 输入源提供 {}x{} 且未启用软件缩放",
        self.name, width, height, caps.width, caps.height
      )));
    }

    if self.color_format != caps.color_format && !fallback {
      return Err(ModelError::Incompatible(format!(
        "模型 {} 需要 {:?} 颜色格式, 输入源提供 {:?}",
        self.name, self.color_format, caps.color_format
      )));
    }
    Ok(())
  }

  /// 检查后端输出是否与声明的输出形状一致。
  pub fn check_outputs(&self, outputs: &[Tensor]) -> Result<(), ModelError> {
    if self.output_shapes.is_empty() {
      return Ok(());
    }
    if outputs.len() != self.output_shapes.len() {
      return Err(ModelError::OutputCount {
        expected: self.output_shapes.len(),
        actual: outputs.len(),
      });
    }
    for (index, (tensor, expected)) in outputs.iter().zip(&self.output_shapes).enumerate() {
      let actual = tensor.shape();
      let matches = expected.len() == actual.len()
        && expected
          .iter()
          .zip(actual)
          .all(|(&e, &a)| e == 0 || e == a);
      if !matches {
        return Err(ModelError::OutputShape {
          index,
          expected: expected.clone(),
          actual: actual.to_vec(),
        });
      }
    }
    Ok(())
  }

  pub fn label(&self, class_id: u32) -> Option<&str> {
    self.labels.get(class_id as usize).map(String::as_str)
  }
}

/// 逐行读取标签文件，忽略行尾空白。
pub fn load_labels(path: impl AsRef<Path>) -> Result<Vec<String>, ModelError> {
  let path = path.as_ref();
  let content = std::fs::read_to_string(path).map_err(|source| ModelError::Labels {
    path: path.to_path_buf(),
    source,
  })?;
  Ok(
    content
      .lines()
      .map(|line| line.trim_end().to_string())
      .filter(|line| !line.is_empty())
      .collect(),
  )
}

/// 原始输出张量到结构化结果的转换。
pub trait Postprocess: Send {
  fn post_process(&self, outputs: &[Tensor]) -> Result<Results, ModelError>;
}

/// 图像到输入张量的转换，不得依赖任何设备状态。
pub trait Preprocess: Send + Sync {
  fn pre_process(&self, image: &Image) -> Result<Tensor, ModelError>;
}

pub trait Model: Postprocess {
  fn info(&self) -> &ModelInfo;

  fn as_preprocess(&self) -> Option<&dyn Preprocess> {
    None
  }
}

impl<M: Model + ?Sized> Postprocess for Box<M> {
  fn post_process(&self, outputs: &[Tensor]) -> Result<Results, ModelError> {
    (**self).post_process(outputs)
  }
}

impl<M: Model + ?Sized> Model for Box<M> {
  fn info(&self) -> &ModelInfo {
    (**self).info()
  }

  fn as_preprocess(&self) -> Option<&dyn Preprocess> {
    (**self).as_preprocess()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn caps(width: u32, height: u32) -> SourceCapabilities {
    SourceCapabilities::new(width, height)
  }

  fn info(width: u32, height: u32) -> ModelInfo {
    ModelInfo::new("test", "/tmp/test.rpk", InputShape::new(width, height))
  }

  #[test]
  fn kind_follows_extension() {
    assert_eq!(
      ModelKind::from_path(Path::new("a/b/net.RPK")),
      ModelKind::RpkPackaged
    );
    assert_eq!(ModelKind::from_path(Path::new("net.h5")), ModelKind::Keras);
    assert_eq!(ModelKind::from_path(Path::new("net")), ModelKind::Unknown);
  }

  #[test]
  fn input_shape_parses() {
    assert_eq!(
      "320x240".parse::<InputShape>().unwrap(),
      InputShape::new(320, 240)
    );
    assert_eq!("1x2x1".parse::<InputShape>().unwrap().channels, 1);
    assert!("320".parse::<InputShape>().is_err());
    assert!("axb".parse::<InputShape>().is_err());
  }

  #[test]
  fn validate_requires_matching_resolution_without_fallback() {
    assert!(info(64, 64).validate(&caps(64, 64), false).is_ok());
    assert!(matches!(
      info(64, 64).validate(&caps(32, 32), false),
      Err(ModelError::Incompatible(_))
    ));
    assert!(info(64, 64).validate(&caps(32, 32), true).is_ok());
  }

  #[test]
  fn validate_accepts_sizes_within_sensor_scaler() {
    let caps = caps(4056, 3040).with_max_tensor_size(640, 640);
    assert!(info(320, 320).validate(&caps, false).is_ok());
    assert!(info(1024, 1024).validate(&caps, false).is_err());
  }

  #[test]
  fn validate_rejects_zero_dimensions_even_with_fallback() {
    assert!(info(0, 64).validate(&caps(64, 64), true).is_err());
  }

  #[test]
  fn validate_checks_color_format() {
    let bgr = info(8, 8).with_color_format(ColorFormat::Bgr);
    assert!(bgr.validate(&caps(8, 8), false).is_err());
    assert!(bgr.validate(&caps(8, 8), true).is_ok());
  }

  #[test]
  fn output_shapes_allow_wildcards() {
    let info = info(8, 8).with_output_shapes(vec![vec![0, 4], vec![10]]);
    let ok = [
      Tensor::from_f32(vec![3, 4], vec![0.0; 12]).unwrap(),
      Tensor::from_f32(vec![10], vec![0.0; 10]).unwrap(),
    ];
    assert!(info.check_outputs(&ok).is_ok());

    let bad = [
      Tensor::from_f32(vec![3, 5], vec![0.0; 15]).unwrap(),
      Tensor::from_f32(vec![10], vec![0.0; 10]).unwrap(),
    ];
    assert!(matches!(
      info.check_outputs(&bad),
      Err(ModelError::OutputShape { index: 0, .. })
    ));
    assert!(matches!(
      info.check_outputs(&ok[..1]),
      Err(ModelError::OutputCount {
        expected: 2,
        actual: 1
      })
    ));
  }

  #[test]
  fn labels_skip_blank_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labels.txt");
    std::fs::write(&path, "person\nbicycle  \n\ncar\n").unwrap();
    assert_eq!(load_labels(&path).unwrap(), vec!["person", "bicycle", "car"]);
    assert!(matches!(
      load_labels(dir.path().join("missing.txt")),
      Err(ModelError::Labels { .. })
    ));
  }
}
