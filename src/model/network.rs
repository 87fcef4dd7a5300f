// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/network.rs - 通用网络模型
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

use std::{path::PathBuf, str::FromStr};

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    InputShape, Model, ModelError, ModelInfo, ModelZoo, Postprocess, Preprocess, Preprocessor,
    Yolo26Builder, Yolo26Config, load_labels, post_process, yolo26,
  },
  raster::ColorFormat,
  result::Results,
  tensor::{Tensor, TensorLayout},
};

const MODEL_SCHEME: &str = "model";
const ZOO_SCHEME: &str = "zoo";

/// 模型输出对应的后处理方式。
#[derive(Debug, Clone, PartialEq)]
pub enum PostProcessor {
  Classification,
  ClassificationSoftmax,
  DetectionBcsn,
  DetectionBscn,
  EfficientDetLite0,
  Segmentation,
  Anomaly,
  Yolo26(Yolo26Config),
}

impl FromStr for PostProcessor {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "cls" => Ok(PostProcessor::Classification),
      "cls_softmax" => Ok(PostProcessor::ClassificationSoftmax),
      "bcsn" => Ok(PostProcessor::DetectionBcsn),
      "bscn" => Ok(PostProcessor::DetectionBscn),
      "efficientdet_lite0" => Ok(PostProcessor::EfficientDetLite0),
      "segment" => Ok(PostProcessor::Segmentation),
      "anomaly" => Ok(PostProcessor::Anomaly),
      "yolo26" => Ok(PostProcessor::Yolo26(Yolo26Config::default())),
      other => Err(ModelError::Config(format!("未知后处理方式: {}", other))),
    }
  }
}

impl PostProcessor {
  pub fn apply(&self, outputs: &[Tensor]) -> Result<Results, ModelError> {
    let results = match self {
      PostProcessor::Classification => post_process::pp_cls(outputs)?.into(),
      PostProcessor::ClassificationSoftmax => post_process::pp_cls_softmax(outputs)?.into(),
      PostProcessor::DetectionBcsn => post_process::pp_od_bcsn(outputs)?.into(),
      PostProcessor::DetectionBscn => post_process::pp_od_bscn(outputs)?.into(),
      PostProcessor::EfficientDetLite0 => post_process::pp_od_efficientdet_lite0(outputs)?.into(),
      PostProcessor::Segmentation => post_process::pp_segment(outputs)?.into(),
      PostProcessor::Anomaly => post_process::pp_anomaly(outputs)?.into(),
      PostProcessor::Yolo26(config) => yolo26::decode(outputs, config)?.into(),
    };
    Ok(results)
  }
}

/// 由描述信息、后处理方式和可选前处理组成的模型。
#[derive(Debug, Clone)]
pub struct NetworkModel {
  info: ModelInfo,
  post: PostProcessor,
  pre: Option<Preprocessor>,
}

impl NetworkModel {
  /// 默认带有与输入尺寸、颜色格式一致的标准前处理。
  pub fn new(info: ModelInfo, post: PostProcessor) -> Self {
    let pre = Some(Preprocessor::from_info(&info));
    Self { info, post, pre }
  }

  pub fn with_preprocessor(mut self, pre: Preprocessor) -> Self {
    self.pre = Some(pre);
    self
  }

  /// 仅供传感器加速器使用的模型不需要主机前处理。
  pub fn without_preprocess(mut self) -> Self {
    self.pre = None;
    self
  }

  pub fn post_processor(&self) -> &PostProcessor {
    &self.post
  }

  fn from_parts(path: PathBuf, url: &Url) -> Result<Self, ModelError> {
    let mut post = None;
    let mut shape = None;
    let mut color = ColorFormat::default();
    let mut labels = Vec::new();
    let mut layout = TensorLayout::Nhwc;
    let mut preserve = false;
    let mut host_pre = true;
    let mut name = path
      .file_stem()
      .and_then(|s| s.to_str())
      .unwrap_or("model")
      .to_string();

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "pp" => post = Some(value.parse::<PostProcessor>()?),
        "input" => shape = Some(value.parse::<InputShape>()?),
        "color" => color = value.parse::<ColorFormat>()?,
        "labels" => labels = load_labels(&*value)?,
        "layout" => {
          layout = match &*value {
            "nhwc" => TensorLayout::Nhwc,
            "nchw" => TensorLayout::Nchw,
            other => return Err(ModelError::Config(format!("未知张量排布: {}", other))),
          }
        }
        "aspect" => preserve = value == "preserve",
        "preprocess" => host_pre = value != "none",
        "name" => name = value.into_owned(),
        other => debug!("忽略未知参数: {}", other),
      }
    }

    let post = post.ok_or_else(|| ModelError::Config("缺少后处理参数 pp".to_string()))?;
    let shape = shape.ok_or_else(|| ModelError::Config("缺少输入尺寸参数 input".to_string()))?;

    let info = ModelInfo::new(name, path, shape)
      .with_color_format(color)
      .with_labels(labels)
      .with_preserve_aspect_ratio(preserve);
    info!(
      "模型 {}: 文件 {}, 输入 {}, 后处理 {:?}",
      info.name,
      info.file.path.display(),
      info.input_shape,
      post
    );

    let pre = Preprocessor::from_info(&info).with_layout(layout);
    let model = NetworkModel::new(info, post).with_preprocessor(pre);
    Ok(if host_pre {
      model
    } else {
      model.without_preprocess()
    })
  }
}

/// `model:///path/net.rpk?pp=bscn&input=320x320`，
/// `zoo:efficientdet_lite0.rpk?pp=efficientdet_lite0&input=320x320`，
/// 或 `yolo26:///path/net.rknn`。
impl FromUrl for NetworkModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      MODEL_SCHEME => NetworkModel::from_parts(PathBuf::from(url.path()), url),
      ZOO_SCHEME => {
        let name = urlencoding::decode(url.path())
          .map_err(|e| ModelError::Config(format!("模型名称无效: {}", e)))?;
        let path = ModelZoo::from_env()?.resolve(&name)?;
        NetworkModel::from_parts(path, url)
      }
      Yolo26Builder::SCHEME => Yolo26Builder::from_url(url)?.build(),
      other => Err(ModelError::Config(format!("不支持的模型方案: {}", other))),
    }
  }
}

impl FromUrlWithScheme for NetworkModel {
  const SCHEME: &'static str = MODEL_SCHEME;
}

impl Postprocess for NetworkModel {
  fn post_process(&self, outputs: &[Tensor]) -> Result<Results, ModelError> {
    self.post.apply(outputs)
  }
}

impl Model for NetworkModel {
  fn info(&self) -> &ModelInfo {
    &self.info
  }

  fn as_preprocess(&self) -> Option<&dyn Preprocess> {
    self.pre.as_ref().map(|p| p as &dyn Preprocess)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::ModelKind;

  #[test]
  fn model_url_configures_everything() {
    let dir = tempfile::tempdir().unwrap();
    let labels = dir.path().join("labels.txt");
    std::fs::write(&labels, "cat\ndog\n").unwrap();

    let url = Url::parse(&format!(
      "model:///opt/nets/detector.rpk?pp=bscn&input=320x240&color=bgr&labels={}&aspect=preserve",
      labels.display()
    ))
    .unwrap();
    let model = NetworkModel::from_url(&url).unwrap();
    let info = model.info();
    assert_eq!(info.name, "detector");
    assert_eq!(info.file.kind, ModelKind::RpkPackaged);
    assert_eq!(info.input_shape, InputShape::new(320, 240));
    assert_eq!(info.color_format, ColorFormat::Bgr);
    assert_eq!(info.labels, vec!["cat", "dog"]);
    assert!(info.preserve_aspect_ratio);
    assert_eq!(model.post_processor(), &PostProcessor::DetectionBscn);
    assert!(model.as_preprocess().is_some());
  }

  #[test]
  fn missing_post_processor_is_a_config_error() {
    let url = Url::parse("model:///net.rpk?input=320x320").unwrap();
    assert!(matches!(
      NetworkModel::from_url(&url),
      Err(ModelError::Config(_))
    ));
  }

  #[test]
  fn preprocess_can_be_disabled() {
    let url = Url::parse("model:///net.rpk?pp=cls&input=224x224&preprocess=none").unwrap();
    let model = NetworkModel::from_url(&url).unwrap();
    assert!(model.as_preprocess().is_none());
  }

  #[test]
  fn post_process_dispatches() {
    let model = NetworkModel::new(
      ModelInfo::new("cls", "net.onnx", InputShape::new(4, 4)),
      PostProcessor::Classification,
    );
    let outputs = [Tensor::from_f32(vec![3], vec![0.2, 0.7, 0.1]).unwrap()];
    let results = model.post_process(&outputs).unwrap();
    assert_eq!(results.kind(), "classifications");
    match results {
      Results::Classifications(c) => assert_eq!(c.class_id(), &[1, 0, 2]),
      other => panic!("unexpected results {:?}", other),
    }
  }
}
