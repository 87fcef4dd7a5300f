// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - 帧定义
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

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::{
  output::Render,
  raster::Image,
  result::{Anomaly, Classifications, Detections, Poses, Results, Roi, Segments},
  tensor::Tensor,
};

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("帧中没有 {expected} 结果 (实际: {})", .actual.unwrap_or("无"))]
  ResultsUnavailable {
    expected: &'static str,
    actual: Option<&'static str>,
  },
  #[error("帧序列化失败: {0}")]
  Json(#[from] serde_json::Error),
}

/// 一帧图像及其推理结果，交给调用方后不再改变。
#[derive(Debug, Clone)]
pub struct Frame {
  index: u64,
  timestamp: DateTime<Utc>,
  image: Option<Image>,
  outputs: Vec<Tensor>,
  results: Option<Results>,
  new_detection: bool,
  fps: f64,
  dps: f64,
  roi: Roi,
  labels: Arc<[String]>,
  headless: bool,
}

#[derive(Serialize)]
struct FrameRecord<'a> {
  index: u64,
  timestamp: DateTime<Utc>,
  width: Option<u32>,
  height: Option<u32>,
  new_detection: bool,
  fps: f64,
  dps: f64,
  roi: Roi,
  results: Option<&'a Results>,
}

macro_rules! results_accessor {
  ($name:ident, $variant:ident, $ty:ty, $kind:literal) => {
    pub fn $name(&self) -> Result<&$ty, FrameError> {
      match &self.results {
        Some(Results::$variant(value)) => Ok(value),
        other => Err(FrameError::ResultsUnavailable {
          expected: $kind,
          actual: other.as_ref().map(Results::kind),
        }),
      }
    }
  };
}

impl Frame {
  pub fn new(index: u64, image: Option<Image>) -> Self {
    Self {
      index,
      timestamp: Utc::now(),
      image,
      outputs: Vec::new(),
      results: None,
      new_detection: false,
      fps: 0.0,
      dps: 0.0,
      roi: Roi::FULL,
      labels: Arc::from(Vec::new()),
      headless: false,
    }
  }

  pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
    self.timestamp = timestamp;
    self
  }

  pub fn with_outputs(mut self, outputs: Vec<Tensor>) -> Self {
    self.outputs = outputs;
    self
  }

  /// `new_detection` 表示结果是否由本帧计算得出。
  pub fn with_results(mut self, results: Results, new_detection: bool) -> Self {
    self.results = Some(results);
    self.new_detection = new_detection;
    self
  }

  pub fn with_rates(mut self, fps: f64, dps: f64) -> Self {
    self.fps = fps;
    self.dps = dps;
    self
  }

  pub fn with_roi(mut self, roi: Roi) -> Self {
    self.roi = roi;
    self
  }

  pub fn with_labels(mut self, labels: Arc<[String]>) -> Self {
    self.labels = labels;
    self
  }

  pub fn headless(mut self, headless: bool) -> Self {
    self.headless = headless;
    self
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn timestamp(&self) -> DateTime<Utc> {
    self.timestamp
  }

  pub fn image(&self) -> Option<&Image> {
    self.image.as_ref()
  }

  pub fn outputs(&self) -> &[Tensor] {
    &self.outputs
  }

  pub fn results(&self) -> Option<&Results> {
    self.results.as_ref()
  }

  pub fn new_detection(&self) -> bool {
    self.new_detection
  }

  pub fn fps(&self) -> f64 {
    self.fps
  }

  pub fn dps(&self) -> f64 {
    self.dps
  }

  pub fn roi(&self) -> Roi {
    self.roi
  }

  pub fn labels(&self) -> &[String] {
    &self.labels
  }

  pub fn label(&self, class_id: u32) -> Option<&str> {
    self.labels.get(class_id as usize).map(String::as_str)
  }

  pub fn is_headless(&self) -> bool {
    self.headless
  }

  results_accessor!(detections, Detections, Detections, "detections");
  results_accessor!(classifications, Classifications, Classifications, "classifications");
  results_accessor!(poses, Poses, Poses, "poses");
  results_accessor!(segments, Segments, Segments, "segments");
  results_accessor!(anomaly, Anomaly, Anomaly, "anomaly");

  /// 交给显示端渲染；无头模式下不做任何事。
  pub fn display<R: Render + ?Sized>(&self, render: &R) -> Result<(), R::Error> {
    if self.headless {
      return Ok(());
    }
    render.render(self)
  }

  /// 帧的元数据与结果，不含像素。
  pub fn to_json(&self) -> Result<serde_json::Value, FrameError> {
    let record = FrameRecord {
      index: self.index,
      timestamp: self.timestamp,
      width: self.image.as_ref().map(Image::width),
      height: self.image.as_ref().map(Image::height),
      new_detection: self.new_detection,
      fps: self.fps,
      dps: self.dps,
      roi: self.roi,
      results: self.results.as_ref(),
    };
    Ok(serde_json::to_value(record)?)
  }
}
