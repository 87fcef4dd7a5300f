// 该文件是 Kanjian （看见） 项目的一部分。
// src/backend/rknn.rs - RKNN NPU 解释器
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};

use crate::{
  backend::{BackendError, Interpreter, Network},
  model::{ModelInfo, ModelKind},
  tensor::{Tensor, TensorLayout},
};

const RKNN_NUM_INPUTS: u32 = 1;

/// 在 Rockchip NPU 上运行 `.rknn` 模型。
#[derive(Debug, Default)]
pub struct RknnInterpreter;

impl RknnInterpreter {
  pub fn new() -> Self {
    Self
  }
}

struct RknnNetwork {
  context: Context,
  num_outputs: usize,
  output_shapes: Vec<Vec<usize>>,
}

fn rknn_error(what: &str, e: rknpu::Error) -> BackendError {
  error!("{}: {}", what, e);
  BackendError::Load(format!("{}: {}", what, e))
}

impl Interpreter for RknnInterpreter {
  fn name(&self) -> &str {
    "rknn"
  }

  fn supports(&self, kind: ModelKind) -> bool {
    kind == ModelKind::Rknn
  }

  fn load(&self, info: &ModelInfo) -> Result<Box<dyn Network>, BackendError> {
    let path = &info.file.path;
    info!("加载模型文件: {}", path.display());
    let model_data = std::fs::read(path).map_err(|error| BackendError::ModelFile {
      path: path.clone(),
      error,
    })?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    let context =
      Context::new(&model_data, InitFlags::default()).map_err(|e| rknn_error("创建 RKNN 推理上下文失败", e))?;
    if let Ok(version) = context.sdk_version() {
      if let Ok(api_ver) = version.api_version() {
        debug!("模型 API 版本: {}", api_ver);
      }
      if let Ok(drv_ver) = version.driver_version() {
        debug!("模型驱动版本: {}", drv_ver);
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| rknn_error("无法获取输入数量", e))?;
    if num_inputs != RKNN_NUM_INPUTS {
      return Err(BackendError::Load(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      )));
    }
    let num_outputs = context
      .num_outputs()
      .map_err(|e| rknn_error("无法获取输出数量", e))? as usize;
    if !info.output_shapes.is_empty() && info.output_shapes.len() != num_outputs {
      return Err(BackendError::Load(format!(
        "模型声明 {} 个输出, 实际为 {}",
        info.output_shapes.len(),
        num_outputs
      )));
    }
    info!("模型加载完成, 输出数量: {}", num_outputs);

    Ok(Box::new(RknnNetwork {
      context,
      num_outputs,
      output_shapes: info.output_shapes.clone(),
    }))
  }
}

impl RknnNetwork {
  /// 声明的形状可以容纳数据时使用声明形状，否则视为一维。
  fn shape_for(&self, index: usize, len: usize) -> Vec<usize> {
    match self.output_shapes.get(index) {
      Some(shape) if !shape.contains(&0) && shape.iter().product::<usize>() == len => shape.clone(),
      _ => vec![len],
    }
  }
}

impl Network for RknnNetwork {
  fn invoke(&mut self, input: &Tensor) -> Result<Vec<Tensor>, BackendError> {
    let data = input
      .as_u8()
      .ok_or_else(|| BackendError::Invoke("RKNN 输入必须为 u8 张量".to_string()))?;
    let format = match input.layout().unwrap_or_default() {
      TensorLayout::Nhwc => TensorFormat::NHWC,
      TensorLayout::Nchw => TensorFormat::NCHW,
    };

    debug!("设置模型输入");
    self
      .context
      .set_input(0, data, format, TensorType::UInt8)
      .map_err(|e| BackendError::Invoke(format!("设置输入失败: {}", e)))?;
    debug!("执行模型推理");
    self
      .context
      .run()
      .map_err(|e| BackendError::Invoke(format!("推理失败: {}", e)))?;
    let output = self
      .context
      .get_outputs()
      .map_err(|e| BackendError::Invoke(format!("获取输出失败: {}", e)))?;

    let mut tensors = Vec::with_capacity(self.num_outputs);
    for index in 0..self.num_outputs {
      let values = output
        .get_f32(index)
        .map_err(|e| BackendError::Invoke(format!("获取第 {} 个输出失败: {}", index, e)))?
        .to_vec();
      let shape = self.shape_for(index, values.len());
      let tensor =
        Tensor::from_f32(shape, values).map_err(|e| BackendError::Invoke(e.to_string()))?;
      tensors.push(tensor);
    }
    Ok(tensors)
  }
}
