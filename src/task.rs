// 该文件是 Kanjian （看见） 项目的一部分。
// src/task.rs - 任务循环
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

use std::{
  sync::{
    Once,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
  device::{Device, DeviceError, Stream, StreamError},
  frame::Frame,
  output::Render,
};

pub trait Task<O>: Sized {
  type Error;
  fn run_task(self, device: &mut Device, output: O) -> Result<(), Self::Error>;
}

fn flatten(error: StreamError<anyhow::Error>) -> anyhow::Error {
  match error {
    StreamError::Body(e) => e,
    StreamError::Both { body, teardown } => body.context(format!("关闭数据流同样失败: {}", teardown)),
    StreamError::Enter(e) | StreamError::Teardown(e) => e.into(),
  }
}

/// 取下一帧，超时后重试；输入结束返回 `None`。
fn next_frame(stream: &mut Stream<'_>, stop: impl Fn() -> bool) -> anyhow::Result<Option<Frame>> {
  loop {
    if stop() {
      return Ok(None);
    }
    match stream.next_frame() {
      Ok(frame) => return Ok(frame),
      Err(e) if e.is_timeout() => warn!("等待帧超时, 重试"),
      Err(e @ (DeviceError::SourceRead(_) | DeviceError::CaptureThread(_))) => return Err(e.into()),
      Err(e) => warn!("处理帧失败, 跳过: {}", e),
    }
  }
}

pub struct OneShotTask;

impl<O> Task<O> for OneShotTask
where
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, device: &mut Device, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    device
      .stream(|stream| -> anyhow::Result<_> {
        let now = std::time::Instant::now();
        let frame = next_frame(stream, || false)?.ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
        info!("推理完成，耗时: {:.2?}", now.elapsed());
        frame.display(&output)?;
        info!("渲染完成，耗时: {:.2?}", now.elapsed());
        Ok(())
      })
      .map_err(flatten)
  }
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static INSTALL_HANDLER: Once = Once::new();

fn install_interrupt_handler() {
  INSTALL_HANDLER.call_once(|| {
    let installed = ctrlc::set_handler(|| {
      info!("收到中断信号，准备退出...");
      INTERRUPTED.store(true, Ordering::Release);
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    });
    if let Err(e) = installed {
      warn!("无法设置 Ctrl-C 处理: {}", e);
    }
  });
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  handle_interrupt: bool,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 收到 Ctrl-C 时结束循环。
  pub fn with_interrupt_handler(mut self, enabled: bool) -> Self {
    self.handle_interrupt = enabled;
    self
  }
}

impl<O> Task<O> for ContinuousTask
where
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, device: &mut Device, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    if self.handle_interrupt {
      install_interrupt_handler();
    }
    let interrupted = || self.handle_interrupt && INTERRUPTED.load(Ordering::Acquire);

    let count = device
      .stream(|stream| -> anyhow::Result<_> {
        let mut count = 0usize;
        let mut now = std::time::Instant::now();
        while let Some(frame) = next_frame(stream, interrupted)? {
          count += 1;
          let elapsed_a = now.elapsed();
          frame.display(&output)?;
          let elapsed_b = now.elapsed();
          now = std::time::Instant::now();
          debug!("第 {} 帧，耗时: {:.2?} / {:.2?}", frame.index(), elapsed_a, elapsed_b);
          info!("帧率 {:.1} fps, 推理率 {:.1} dps", frame.fps(), frame.dps());
          if self.frame_number.is_some_and(|n| count >= n) {
            info!("达到指定帧数 {}, 退出任务循环", count);
            break;
          }
        }
        if interrupted() {
          warn!("中断信号接收，退出任务循环");
        }
        Ok(count)
      })
      .map_err(flatten)?;

    info!("任务完成，共处理 {} 帧", count);
    Ok(())
  }
}
