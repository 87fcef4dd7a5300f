// 该文件是 Kanjian （看见） 项目的一部分。
// src/source.rs - 输入源
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

//! 原始帧的生产者。
//!
//! 一个 [`Source`] 同一时刻只归属一个设备，由设备在进入流时打开、退出时关闭。
//! `read` 由单一消费者调用，会阻塞直到有帧、输入结束或轮询窗口到期。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl,
  raster::{ColorFormat, Image, RasterError},
};

mod memory;
mod metadata;
mod recording;

#[cfg(feature = "read_image_file")]
mod image_file;

#[cfg(feature = "v4l_input")]
mod v4l_input;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;

pub use self::memory::ArraySource;
pub use self::metadata::{
  OUTPUT_TENSOR_INFO_SIZE, OutputTensorInfo, SensorMetadata, TensorShapeInfo,
};
pub use self::recording::{RecordedFrame, Recording, RecordingSource};

#[cfg(feature = "read_image_file")]
pub use self::image_file::ImageFileSource;

#[cfg(feature = "v4l_input")]
pub use self::v4l_input::V4lSource;

#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::GStreamerSource;

#[derive(Error, Debug)]
pub enum SourceError {
  #[error("输入源 {0} 尚未打开")]
  NotOpen(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  Decode(#[from] image::ImageError),
  #[error("图像错误: {0}")]
  Raster(#[from] RasterError),
  #[error("元数据错误: {0}")]
  Metadata(String),
  #[error("录制文件格式错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("输入源配置错误: {0}")]
  Config(String),
  #[error("设备错误: {0}")]
  Device(String),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 输入源能够提供的画面。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCapabilities {
  pub width: u32,
  pub height: u32,
  pub color_format: ColorFormat,
  /// 帧中携带加速器推理结果
  #[serde(default)]
  pub embedded_inference: bool,
  /// 片上缩放器能输出的最大输入张量
  #[serde(default)]
  pub max_tensor_size: Option<(u32, u32)>,
}

impl SourceCapabilities {
  pub fn new(width: u32, height: u32) -> Self {
    Self {
      width,
      height,
      color_format: ColorFormat::Rgb,
      embedded_inference: false,
      max_tensor_size: None,
    }
  }

  pub fn with_color_format(mut self, color_format: ColorFormat) -> Self {
    self.color_format = color_format;
    self
  }

  pub fn with_embedded_inference(mut self, embedded: bool) -> Self {
    self.embedded_inference = embedded;
    self
  }

  pub fn with_max_tensor_size(mut self, width: u32, height: u32) -> Self {
    self.max_tensor_size = Some((width, height));
    self
  }
}

/// 未经推理处理的一帧。
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
  pub image: Option<Image>,
  pub metadata: Option<SensorMetadata>,
  pub timestamp: DateTime<Utc>,
}

impl RawFrame {
  pub fn new(image: Image) -> Self {
    Self {
      image: Some(image),
      metadata: None,
      timestamp: Utc::now(),
    }
  }

  pub fn with_metadata(mut self, metadata: SensorMetadata) -> Self {
    self.metadata = Some(metadata);
    self
  }

  pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
    self.timestamp = timestamp;
    self
  }
}

#[derive(Debug)]
pub enum SourceRead {
  Frame(RawFrame),
  /// 轮询窗口内没有新帧，调用方可以检查退出条件后继续读取
  Idle,
  EndOfStream,
}

pub trait Source: Send {
  fn name(&self) -> &str;

  fn capabilities(&self) -> SourceCapabilities;

  /// 打开或重新打开；有限输入源从头开始。
  fn open(&mut self) -> Result<(), SourceError>;

  fn read(&mut self) -> Result<SourceRead, SourceError>;

  /// 关闭已关闭的输入源不做任何事。
  fn close(&mut self) -> Result<(), SourceError>;
}

impl<S: Source + ?Sized> Source for Box<S> {
  fn name(&self) -> &str {
    (**self).name()
  }

  fn capabilities(&self) -> SourceCapabilities {
    (**self).capabilities()
  }

  fn open(&mut self) -> Result<(), SourceError> {
    (**self).open()
  }

  fn read(&mut self) -> Result<SourceRead, SourceError> {
    (**self).read()
  }

  fn close(&mut self) -> Result<(), SourceError> {
    (**self).close()
  }
}

/// 按 URL 方案选择的输入源。
pub enum SourceWrapper {
  #[cfg(feature = "read_image_file")]
  ImageFile(ImageFileSource),
  #[cfg(feature = "v4l_input")]
  V4l(V4lSource),
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerSource),
  Recording(RecordingSource),
}

impl FromUrl for SourceWrapper {
  type Error = SourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    match url.scheme() {
      #[cfg(feature = "read_image_file")]
      ImageFileSource::SCHEME => Ok(SourceWrapper::ImageFile(ImageFileSource::from_url(url)?)),
      #[cfg(feature = "v4l_input")]
      V4lSource::SCHEME => Ok(SourceWrapper::V4l(V4lSource::from_url(url)?)),
      #[cfg(feature = "gstreamer_input")]
      GStreamerSource::SCHEME => Ok(SourceWrapper::GStreamer(GStreamerSource::from_url(url)?)),
      RecordingSource::SCHEME => Ok(SourceWrapper::Recording(RecordingSource::from_url(url)?)),
      _ => Err(SourceError::SchemeMismatch),
    }
  }
}

impl SourceWrapper {
  fn inner(&self) -> &dyn Source {
    match self {
      #[cfg(feature = "read_image_file")]
      SourceWrapper::ImageFile(source) => source,
      #[cfg(feature = "v4l_input")]
      SourceWrapper::V4l(source) => source,
      #[cfg(feature = "gstreamer_input")]
      SourceWrapper::GStreamer(source) => source,
      SourceWrapper::Recording(source) => source,
    }
  }

  fn inner_mut(&mut self) -> &mut dyn Source {
    match self {
      #[cfg(feature = "read_image_file")]
      SourceWrapper::ImageFile(source) => source,
      #[cfg(feature = "v4l_input")]
      SourceWrapper::V4l(source) => source,
      #[cfg(feature = "gstreamer_input")]
      SourceWrapper::GStreamer(source) => source,
      SourceWrapper::Recording(source) => source,
    }
  }
}

impl Source for SourceWrapper {
  fn name(&self) -> &str {
    self.inner().name()
  }

  fn capabilities(&self) -> SourceCapabilities {
    self.inner().capabilities()
  }

  fn open(&mut self) -> Result<(), SourceError> {
    self.inner_mut().open()
  }

  fn read(&mut self) -> Result<SourceRead, SourceError> {
    self.inner_mut().read()
  }

  fn close(&mut self) -> Result<(), SourceError> {
    self.inner_mut().close()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("ftp://example.com/video").unwrap();
    assert!(matches!(
      SourceWrapper::from_url(&url),
      Err(SourceError::SchemeMismatch)
    ));
  }

  #[test]
  fn capabilities_builder() {
    let caps = SourceCapabilities::new(640, 480)
      .with_color_format(ColorFormat::Bgr)
      .with_embedded_inference(true)
      .with_max_tensor_size(320, 320);
    assert_eq!(caps.color_format, ColorFormat::Bgr);
    assert!(caps.embedded_inference);
    assert_eq!(caps.max_tensor_size, Some((320, 320)));
  }
}
