// 该文件是 Kanjian （看见） 项目的一部分。
// src/backend.rs - 推理执行后端
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

//! 网络计算的执行者。
//!
//! 设备按 [`ExecutionBackend`] 的标签分派：片上加速器把结果嵌入传感器数据流，
//! 主机解释器则由设备在前台逐帧调用。两条路径产出同样的 [`crate::frame::Frame`]。

use std::path::PathBuf;

use thiserror::Error;

use crate::{
  model::{ModelInfo, ModelKind},
  source::SourceCapabilities,
  tensor::Tensor,
};

mod replay;

#[cfg(feature = "rknpu")]
mod rknn;

pub use self::replay::ReplayAccelerator;

#[cfg(feature = "rknpu")]
pub use self::rknn::RknnInterpreter;

#[derive(Error, Debug)]
pub enum BackendError {
  #[error("读取模型文件 {path} 失败: {error}")]
  ModelFile {
    path: PathBuf,
    error: std::io::Error,
  },
  #[error("后端 {backend} 不支持 {kind:?} 模型")]
  Unsupported { backend: String, kind: ModelKind },
  #[error("网络加载失败: {0}")]
  Load(String),
  #[error("推理失败: {0}")]
  Invoke(String),
  #[error("推理区域设置失败: {0}")]
  Roi(String),
}

/// 已加载、可重复调用的网络。
pub trait Network {
  fn invoke(&mut self, input: &Tensor) -> Result<Vec<Tensor>, BackendError>;
}

/// 主机上的模型解释器。
pub trait Interpreter {
  fn name(&self) -> &str;

  fn supports(&self, kind: ModelKind) -> bool;

  /// 每次调用都返回独立的网络，加载失败不影响已部署的网络。
  fn load(&self, info: &ModelInfo) -> Result<Box<dyn Network>, BackendError>;
}

/// 与传感器集成的推理协处理器。
pub trait Accelerator {
  fn name(&self) -> &str;

  /// 传感器全分辨率 (宽, 高)。
  fn sensor_resolution(&self) -> (u32, u32);

  fn load_network(&mut self, info: &ModelInfo) -> Result<(), BackendError>;

  /// 卸载当前网络，回到未部署状态。
  fn unload_network(&mut self) -> Result<(), BackendError> {
    Ok(())
  }

  /// 以传感器像素坐标 (left, top, width, height) 设置输入张量的裁剪区域。
  fn set_inference_roi(&mut self, roi: (u32, u32, u32, u32)) -> Result<(), BackendError>;
}

pub enum ExecutionBackend {
  Hardware(Box<dyn Accelerator>),
  SoftwareInterpreter(Box<dyn Interpreter>),
}

impl ExecutionBackend {
  pub fn hardware<A: Accelerator + 'static>(accelerator: A) -> Self {
    ExecutionBackend::Hardware(Box::new(accelerator))
  }

  pub fn interpreter<I: Interpreter + 'static>(interpreter: I) -> Self {
    ExecutionBackend::SoftwareInterpreter(Box::new(interpreter))
  }

  pub fn name(&self) -> &str {
    match self {
      ExecutionBackend::Hardware(accelerator) => accelerator.name(),
      ExecutionBackend::SoftwareInterpreter(interpreter) => interpreter.name(),
    }
  }

  pub fn is_hardware(&self) -> bool {
    matches!(self, ExecutionBackend::Hardware(_))
  }

  /// 按输入源选择后端：带嵌入结果的输入源使用加速器，否则使用主机解释器。
  pub fn for_source(caps: &SourceCapabilities) -> Result<Self, BackendError> {
    if caps.embedded_inference {
      return Ok(Self::hardware(ReplayAccelerator::from_capabilities(caps)));
    }
    #[cfg(feature = "rknpu")]
    {
      Ok(Self::interpreter(RknnInterpreter::new()))
    }
    #[cfg(not(feature = "rknpu"))]
    {
      Err(BackendError::Load("没有可用的主机解释器, 请启用 rknpu 特性".to_string()))
    }
  }
}

impl std::fmt::Debug for ExecutionBackend {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ExecutionBackend::Hardware(a) => write!(f, "Hardware({})", a.name()),
      ExecutionBackend::SoftwareInterpreter(i) => write!(f, "SoftwareInterpreter({})", i.name()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn embedded_sources_get_an_accelerator() {
    let caps = SourceCapabilities::new(640, 480).with_embedded_inference(true);
    let backend = ExecutionBackend::for_source(&caps).unwrap();
    assert!(backend.is_hardware());
    assert_eq!(format!("{:?}", backend), format!("Hardware({})", backend.name()));
  }
}
