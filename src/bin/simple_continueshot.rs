// 该文件是 Kanjian （看见） 项目的一部分。
// src/bin/simple_continueshot.rs - 连续推理
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

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use kanjian::{
  FromUrl,
  backend::ExecutionBackend,
  device::{Device, DeviceConfig},
  model::NetworkModel,
  output::OutputWrapper,
  source::{Source, SourceWrapper},
  task::{ContinuousTask, Task},
};

/// Kanjian 连续推理参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型，如 `model:///path/net.rpk?pp=bscn&input=320x320`
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  /// 单帧等待上限（毫秒），超时后重试
  #[arg(long, value_name = "MILLIS")]
  pub timeout_ms: Option<u64>,

  #[arg(long)]
  pub headless: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let source = SourceWrapper::from_url(&args.input)?;
  let backend = ExecutionBackend::for_source(&source.capabilities())?;
  let model = NetworkModel::from_url(&args.model)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let mut config = DeviceConfig::default()
    .headless(args.headless)
    .software_fallback(true);
  if let Some(ms) = args.timeout_ms {
    config = config.with_timeout(Duration::from_millis(ms));
  }

  let mut device = Device::new(source, backend).with_config(config);
  device.deploy(model)?;

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_interrupt_handler(true)
    .run_task(&mut device, output)?;

  Ok(())
}
