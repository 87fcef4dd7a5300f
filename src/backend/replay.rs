// 该文件是 Kanjian （看见） 项目的一部分。
// src/backend/replay.rs - 回放用加速器
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

use tracing::info;

use crate::{
  backend::{Accelerator, BackendError},
  model::ModelInfo,
  source::SourceCapabilities,
};

/// 配合录制数据流使用的加速器：推理结果已在录制中，这里只记录部署状态。
#[derive(Debug, Clone)]
pub struct ReplayAccelerator {
  resolution: (u32, u32),
  network: Option<String>,
  roi: Option<(u32, u32, u32, u32)>,
}

impl ReplayAccelerator {
  pub fn new(width: u32, height: u32) -> Self {
    Self {
      resolution: (width, height),
      network: None,
      roi: None,
    }
  }

  pub fn from_capabilities(caps: &SourceCapabilities) -> Self {
    Self::new(caps.width, caps.height)
  }

  pub fn network(&self) -> Option<&str> {
    self.network.as_deref()
  }

  pub fn roi(&self) -> Option<(u32, u32, u32, u32)> {
    self.roi
  }
}

impl Accelerator for ReplayAccelerator {
  fn name(&self) -> &str {
    "replay"
  }

  fn sensor_resolution(&self) -> (u32, u32) {
    self.resolution
  }

  fn load_network(&mut self, info: &ModelInfo) -> Result<(), BackendError> {
    info!("回放加速器载入网络 {}", info.name);
    self.network = Some(info.name.clone());
    self.roi = None;
    Ok(())
  }

  fn unload_network(&mut self) -> Result<(), BackendError> {
    self.network = None;
    self.roi = None;
    Ok(())
  }

  fn set_inference_roi(&mut self, roi: (u32, u32, u32, u32)) -> Result<(), BackendError> {
    let (w, h) = self.resolution;
    let (left, top, width, height) = roi;
    if width == 0 || height == 0 || left + width > w || top + height > h {
      return Err(BackendError::Roi(format!(
        "区域 {:?} 超出传感器范围 {}x{}",
        roi, w, h
      )));
    }
    self.roi = Some(roi);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::InputShape;

  #[test]
  fn records_network_and_roi() {
    let mut acc = ReplayAccelerator::new(4056, 3040);
    let info = ModelInfo::new("ssd", "/tmp/ssd.rpk", InputShape::new(300, 300));
    acc.load_network(&info).unwrap();
    acc.set_inference_roi((0, 0, 2028, 1520)).unwrap();
    assert_eq!(acc.network(), Some("ssd"));
    assert_eq!(acc.roi(), Some((0, 0, 2028, 1520)));
  }

  #[test]
  fn roi_outside_sensor_is_rejected() {
    let mut acc = ReplayAccelerator::new(100, 100);
    assert!(acc.set_inference_roi((50, 0, 60, 10)).is_err());
    assert!(acc.roi().is_none());
  }
}
