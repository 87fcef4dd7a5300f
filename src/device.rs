// 该文件是 Kanjian （看见） 项目的一部分。
// src/device.rs - 推理设备
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

//! # 设备
//!
//! [`Device`] 独占一个输入源和至多一个已部署的模型，并对外提供逐帧拉取的数据流。
//!
//! 状态机为 `Idle → Deployed → Streaming → Deployed/Idle`：
//!
//! - [`Device::deploy`] 只能在非流状态调用，校验失败时设备保持原状态；
//! - [`Device::enter`] 打开输入源并启动采集线程，返回 [`Stream`]；
//! - [`Stream::close`]（或 `Drop`）停止采集线程、关闭输入源，设备回到进入前的状态。
//!
//! ```no_run
//! use kanjian::{
//!   backend::{ExecutionBackend, ReplayAccelerator},
//!   device::{Device, DeviceConfig},
//!   source::{RecordingSource, Source},
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = RecordingSource::open_file("stream.json")?;
//! let accelerator = ReplayAccelerator::from_capabilities(&source.capabilities());
//! let mut device = Device::new(source, ExecutionBackend::hardware(accelerator))
//!   .with_config(DeviceConfig::default().headless(true));
//! let mut stream = device.enter()?;
//! while let Some(frame) = stream.next_frame()? {
//!   println!("帧 {}: {:?}", frame.index(), frame.results());
//! }
//! stream.close()?;
//! # Ok(())
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  backend::{Accelerator, BackendError, ExecutionBackend, Network},
  model::{Model, ModelError, ModelInfo, ModelKind},
  result::Roi,
  source::{Source, SourceError},
};

mod rate;
mod stream;

pub use self::stream::{Stream, StreamError};

#[derive(Error, Debug)]
pub enum DeviceError {
  #[error("尚未部署模型")]
  NotDeployed,
  #[error("设备正在输出数据流")]
  Busy,
  #[error("模型不兼容: {0}")]
  IncompatibleModel(String),
  #[error("模型缺少 {0} 能力")]
  MissingCapability(&'static str),
  #[error("模型文件不可用: {0}")]
  ModelFile(String),
  #[error("推理后端错误: {0}")]
  Backend(#[from] BackendError),
  #[error("打开输入源失败: {0}")]
  SourceOpen(#[source] SourceError),
  #[error("读取输入源失败: {0}")]
  SourceRead(#[source] SourceError),
  /// 单帧附带的张量描述无法解析，只影响当前帧
  #[error("帧元数据无效: {0}")]
  Metadata(#[source] SourceError),
  #[error("关闭输入源失败: {0}")]
  SourceClose(#[source] SourceError),
  #[error("等待帧超时 ({0:?})")]
  Timeout(Duration),
  #[error("后处理失败: {0}")]
  PostProcess(#[source] ModelError),
  #[error("预处理失败: {0}")]
  Preprocess(#[source] ModelError),
  #[error("帧中没有图像")]
  EmptyFrame,
  #[error("采集线程错误: {0}")]
  CaptureThread(String),
  #[error("无效的裁剪区域: {0:?}")]
  InvalidRoi(Roi),
  #[error("设备没有可用的输入源")]
  NoSource,
}

impl DeviceError {
  /// 超时可以重试；其他错误由调用方决定是否退出数据流。
  pub fn is_timeout(&self) -> bool {
    matches!(self, DeviceError::Timeout(_))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
  Idle,
  Deployed,
  Streaming,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
  pub headless: bool,
  /// 单次取帧的最长等待；`None` 表示一直等待
  pub timeout: Option<Duration>,
  /// 允许在主机上缩放、转换颜色以适配模型输入
  pub software_fallback: bool,
}

impl DeviceConfig {
  pub fn headless(mut self, headless: bool) -> Self {
    self.headless = headless;
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn software_fallback(mut self, enabled: bool) -> Self {
    self.software_fallback = enabled;
    self
  }
}

pub(crate) struct Deployment {
  pub(crate) model: Box<dyn Model>,
  /// 仅主机解释器使用
  pub(crate) network: Option<Box<dyn Network>>,
  pub(crate) roi: Roi,
  pub(crate) labels: Arc<[String]>,
}

pub struct Device {
  source: Option<Box<dyn Source>>,
  backend: ExecutionBackend,
  config: DeviceConfig,
  deployment: Option<Deployment>,
  streaming: bool,
}

fn incompatible(e: ModelError) -> DeviceError {
  DeviceError::IncompatibleModel(e.to_string())
}

/// 保持模型宽高比、居中于传感器画面的裁剪区域。
fn aspect_ratio_roi(sensor: (u32, u32), model: (u32, u32)) -> Roi {
  let sensor_ratio = sensor.0 as f32 / sensor.1 as f32;
  let model_ratio = model.0 as f32 / model.1 as f32;
  if sensor_ratio > model_ratio {
    let width = model_ratio / sensor_ratio;
    Roi::new((1.0 - width) / 2.0, 0.0, width, 1.0)
  } else {
    let height = sensor_ratio / model_ratio;
    Roi::new(0.0, (1.0 - height) / 2.0, 1.0, height)
  }
}

/// 加速器已载入新网络但部署失败时，重新载入之前的网络与裁剪区域。
fn restore_accelerator(accelerator: &mut dyn Accelerator, previous: Option<&Deployment>) {
  let restored = match previous {
    Some(previous) => accelerator
      .load_network(previous.model.info())
      .and_then(|()| {
        if previous.roi.is_full() {
          return Ok(());
        }
        let (w, h) = accelerator.sensor_resolution();
        accelerator.set_inference_roi(previous.roi.to_pixels(w, h))
      }),
    None => accelerator.unload_network(),
  };
  if let Err(e) = restored {
    error!("恢复加速器失败, 设备与加速器状态可能不一致: {}", e);
  }
}

impl Device {
  pub fn new<S: Source + 'static>(source: S, backend: ExecutionBackend) -> Self {
    Self {
      source: Some(Box::new(source)),
      backend,
      config: DeviceConfig::default(),
      deployment: None,
      streaming: false,
    }
  }

  pub fn with_config(mut self, config: DeviceConfig) -> Self {
    self.config = config;
    self
  }

  pub fn config(&self) -> &DeviceConfig {
    &self.config
  }

  pub fn backend(&self) -> &ExecutionBackend {
    &self.backend
  }

  pub fn state(&self) -> DeviceState {
    if self.streaming {
      DeviceState::Streaming
    } else if self.deployment.is_some() {
      DeviceState::Deployed
    } else {
      DeviceState::Idle
    }
  }

  pub fn model_info(&self) -> Option<&ModelInfo> {
    self.deployment.as_ref().map(|d| d.model.info())
  }

  pub fn roi(&self) -> Roi {
    self.deployment.as_ref().map(|d| d.roi).unwrap_or_default()
  }

  /// 交还输入源；数据流未正常关闭时可能已经丢失。
  pub fn into_source(self) -> Option<Box<dyn Source>> {
    self.source
  }

  /// 校验并绑定模型。全部检查通过后才替换当前部署，失败时设备状态不变。
  pub fn deploy<M: Model + 'static>(&mut self, model: M) -> Result<(), DeviceError> {
    if self.streaming {
      return Err(DeviceError::Busy);
    }
    let caps = self
      .source
      .as_ref()
      .ok_or(DeviceError::NoSource)?
      .capabilities();
    let info = model.info();
    info!(
      "部署模型 {} ({:?}) 到 {} 后端",
      info.name,
      info.file.kind,
      self.backend.name()
    );

    let (network, roi) = match &mut self.backend {
      ExecutionBackend::SoftwareInterpreter(interpreter) => {
        if model.as_preprocess().is_none() {
          return Err(DeviceError::MissingCapability("pre_process"));
        }
        if !interpreter.supports(info.file.kind) {
          return Err(DeviceError::IncompatibleModel(format!(
            "解释器 {} 不能运行 {:?} 模型",
            interpreter.name(),
            info.file.kind
          )));
        }
        info
          .validate(&caps, self.config.software_fallback)
          .map_err(incompatible)?;
        let network = interpreter.load(info)?;
        (Some(network), Roi::FULL)
      }
      ExecutionBackend::Hardware(accelerator) => {
        if !caps.embedded_inference {
          return Err(DeviceError::IncompatibleModel(
            "输入源不提供片上推理".to_string(),
          ));
        }
        if info.file.kind != ModelKind::RpkPackaged {
          return Err(DeviceError::IncompatibleModel(format!(
            "加速器只接受 .rpk 网络包, {:?} 模型需要先打包",
            info.file.kind
          )));
        }
        if !info.file.path.is_file() {
          return Err(DeviceError::ModelFile(format!(
            "{} 不存在",
            info.file.path.display()
          )));
        }
        info.validate(&caps, false).map_err(incompatible)?;

        let sensor = accelerator.sensor_resolution();
        let roi = if info.preserve_aspect_ratio {
          aspect_ratio_roi(sensor, (info.input_shape.width, info.input_shape.height))
        } else {
          Roi::FULL
        };
        let pixels = roi.to_pixels(sensor.0, sensor.1);
        if pixels.2 == 0 || pixels.3 == 0 {
          return Err(DeviceError::InvalidRoi(roi));
        }

        accelerator.load_network(info)?;
        if !roi.is_full()
          && let Err(e) = accelerator.set_inference_roi(pixels)
        {
          warn!("设置推理区域失败, 恢复之前的部署: {}", e);
          restore_accelerator(&mut **accelerator, self.deployment.as_ref());
          return Err(e.into());
        }
        (None, roi)
      }
    };

    let labels = Arc::from(info.labels.clone());
    self.deployment = Some(Deployment {
      model: Box::new(model),
      network,
      roi,
      labels,
    });
    debug!("模型部署完成, ROI: {:?}", roi);
    Ok(())
  }

  /// 设置输入张量的裁剪区域（归一化坐标）。
  pub fn set_input_tensor_cropping(&mut self, roi: Roi) -> Result<(), DeviceError> {
    if self.streaming {
      return Err(DeviceError::Busy);
    }
    let deployment = self.deployment.as_mut().ok_or(DeviceError::NotDeployed)?;
    if !roi.is_valid() || roi.width <= 0.0 || roi.height <= 0.0 {
      return Err(DeviceError::InvalidRoi(roi));
    }
    if let ExecutionBackend::Hardware(accelerator) = &mut self.backend {
      let (w, h) = accelerator.sensor_resolution();
      let pixels = roi.to_pixels(w, h);
      if pixels.2 == 0 || pixels.3 == 0 {
        return Err(DeviceError::InvalidRoi(roi));
      }
      accelerator.set_inference_roi(pixels)?;
    }
    deployment.roi = roi;
    info!("设置输入裁剪区域: {:?}", roi);
    Ok(())
  }

  /// 打开输入源并进入数据流。
  pub fn enter(&mut self) -> Result<Stream<'_>, DeviceError> {
    if self.streaming {
      return Err(DeviceError::Busy);
    }
    if !self.backend.is_hardware() && self.deployment.is_none() {
      return Err(DeviceError::NotDeployed);
    }
    let mut source = self.source.take().ok_or(DeviceError::NoSource)?;
    if let Err(e) = source.open() {
      self.source = Some(source);
      return Err(DeviceError::SourceOpen(e));
    }
    info!("打开输入源 {}", source.name());
    self.streaming = true;
    Stream::start(self, source)
  }

  /// 在作用域内使用数据流；无论作用域如何结束都会关闭输入源。
  ///
  /// 作用域与关闭都失败时两个错误一起返回。
  pub fn stream<T, E, F>(&mut self, body: F) -> Result<T, StreamError<E>>
  where
    F: FnOnce(&mut Stream<'_>) -> Result<T, E>,
  {
    let mut stream = self.enter().map_err(StreamError::Enter)?;
    let result = body(&mut stream);
    let teardown = stream.close();
    match (result, teardown) {
      (Ok(value), Ok(())) => Ok(value),
      (Err(body), Ok(())) => Err(StreamError::Body(body)),
      (Ok(_), Err(teardown)) => Err(StreamError::Teardown(teardown)),
      (Err(body), Err(teardown)) => {
        warn!("关闭数据流失败: {}", teardown);
        Err(StreamError::Both { body, teardown })
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn wide_sensor_crops_width() {
    let roi = aspect_ratio_roi((4056, 3040), (300, 300));
    assert!((roi.height - 1.0).abs() < 1e-6);
    assert!((roi.width - 3040.0 / 4056.0).abs() < 1e-4);
    assert!((roi.left * 2.0 + roi.width - 1.0).abs() < 1e-5);
  }

  #[test]
  fn tall_model_crops_height() {
    let roi = aspect_ratio_roi((640, 480), (640, 240));
    assert!((roi.width - 1.0).abs() < 1e-6);
    assert!((roi.height - 0.5).abs() < 1e-6);
    assert!((roi.top - 0.25).abs() < 1e-6);
  }

  #[test]
  fn timeout_is_retryable() {
    assert!(DeviceError::Timeout(Duration::from_millis(5)).is_timeout());
    assert!(!DeviceError::NotDeployed.is_timeout());
  }
}
