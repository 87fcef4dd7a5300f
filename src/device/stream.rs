// 该文件是 Kanjian （看见） 项目的一部分。
// src/device/stream.rs - 数据流与采集线程
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
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread::JoinHandle,
  time::Instant,
};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  device::{Device, DeviceError, rate::RateMeter},
  frame::Frame,
  result::Results,
  source::{RawFrame, Source, SourceError, SourceRead},
  tensor::Tensor,
};

/// 作用域数据流的错误；关闭时的错误不会掩盖作用域内的错误。
#[derive(Error, Debug)]
pub enum StreamError<E> {
  #[error("进入数据流失败: {0}")]
  Enter(DeviceError),
  #[error("{0}")]
  Body(E),
  #[error("关闭数据流失败: {0}")]
  Teardown(DeviceError),
  #[error("{body}; 关闭数据流同样失败: {teardown}")]
  Both { body: E, teardown: DeviceError },
}

enum Capture {
  Frame(RawFrame),
  Failed(SourceError),
  EndOfStream,
}

/// 采集线程：反复读取输入源，通过单槽通道交给前台。通道满时阻塞（背压）。
fn capture_loop(
  mut source: Box<dyn Source>,
  tx: Sender<Capture>,
  stop: Arc<AtomicBool>,
) -> Box<dyn Source> {
  while !stop.load(Ordering::Acquire) {
    let message = match source.read() {
      Ok(SourceRead::Frame(frame)) => Capture::Frame(frame),
      Ok(SourceRead::Idle) => continue,
      Ok(SourceRead::EndOfStream) => Capture::EndOfStream,
      Err(e) => {
        error!("读取输入源 {} 失败: {}", source.name(), e);
        Capture::Failed(e)
      }
    };
    let last = !matches!(message, Capture::Frame(_));
    if tx.send(message).is_err() || last {
      break;
    }
  }
  debug!("采集线程退出");
  source
}

/// 设备处于数据流状态期间的守卫，借用设备直到关闭。
pub struct Stream<'d> {
  device: &'d mut Device,
  rx: Option<Receiver<Capture>>,
  stop: Arc<AtomicBool>,
  handle: Option<JoinHandle<Option<Box<dyn Source>>>>,
  index: u64,
  finished: bool,
  closed: bool,
  frame_rate: RateMeter,
  detection_rate: RateMeter,
  last_results: Option<Results>,
}

impl<'d> Stream<'d> {
  pub(crate) fn start(device: &'d mut Device, source: Box<dyn Source>) -> Result<Self, DeviceError> {
    let (tx, rx) = bounded(1);
    // 线程启动成功后才交出输入源，启动失败时输入源仍归还设备
    let (source_tx, source_rx) = bounded::<Box<dyn Source>>(1);
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = stop.clone();
    let handle = std::thread::Builder::new()
      .name("kanjian-capture".to_string())
      .spawn(move || {
        let source = source_rx.recv().ok()?;
        Some(capture_loop(source, tx, thread_stop))
      });
    let handle = match handle {
      Ok(handle) => handle,
      Err(e) => {
        device.streaming = false;
        device.source = Some(source);
        return Err(DeviceError::CaptureThread(e.to_string()));
      }
    };
    if let Err(returned) = source_tx.send(source) {
      device.streaming = false;
      device.source = Some(returned.into_inner());
      return Err(DeviceError::CaptureThread("采集线程未能接收输入源".to_string()));
    }

    Ok(Self {
      device,
      rx: Some(rx),
      stop,
      handle: Some(handle),
      index: 0,
      finished: false,
      closed: false,
      frame_rate: RateMeter::default(),
      detection_rate: RateMeter::default(),
      last_results: None,
    })
  }

  fn receive(&self, deadline: Option<Instant>) -> Result<Capture, DeviceError> {
    let rx = self
      .rx
      .as_ref()
      .ok_or_else(|| DeviceError::CaptureThread("数据流已关闭".to_string()))?;
    let received = match deadline {
      Some(deadline) => rx.recv_deadline(deadline),
      None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };
    match received {
      Ok(capture) => Ok(capture),
      Err(RecvTimeoutError::Timeout) => Err(DeviceError::Timeout(
        self.device.config.timeout.unwrap_or_default(),
      )),
      Err(RecvTimeoutError::Disconnected) => {
        Err(DeviceError::CaptureThread("采集线程意外退出".to_string()))
      }
    }
  }

  /// 取下一帧。输入结束时返回 `Ok(None)`；超时返回可重试的 [`DeviceError::Timeout`]。
  ///
  /// 单帧的处理错误只影响当前帧，之后仍可继续取帧。
  pub fn next_frame(&mut self) -> Result<Option<Frame>, DeviceError> {
    if self.finished || self.closed {
      return Ok(None);
    }
    let deadline = self.device.config.timeout.map(|t| Instant::now() + t);
    loop {
      let raw = match self.receive(deadline)? {
        Capture::Frame(raw) => raw,
        Capture::EndOfStream => {
          info!("输入源结束, 共 {} 帧", self.index);
          self.finished = true;
          return Ok(None);
        }
        Capture::Failed(e) => {
          self.finished = true;
          return Err(DeviceError::SourceRead(e));
        }
      };
      self.frame_rate.tick();
      if let Some(frame) = self.assemble(raw)? {
        self.index += 1;
        return Ok(Some(frame));
      }
    }
  }

  fn assemble(&mut self, raw: RawFrame) -> Result<Option<Frame>, DeviceError> {
    let (outputs, results, new_detection) = if self.device.backend.is_hardware() {
      match self.embedded_results(&raw)? {
        Embedded::Fresh(outputs, results) => (outputs, results, true),
        Embedded::Reused(results) => (Vec::new(), Some(results), false),
        Embedded::Pending => {
          debug!("尚无推理结果, 跳过该帧");
          return Ok(None);
        }
      }
    } else {
      let (outputs, results) = self.infer_on_host(&raw)?;
      (outputs, Some(results), true)
    };
    if new_detection && results.is_some() {
      self.detection_rate.tick();
    }

    let mut frame = Frame::new(self.index, raw.image)
      .with_timestamp(raw.timestamp)
      .with_outputs(outputs)
      .with_rates(self.frame_rate.rate(), self.detection_rate.rate())
      .headless(self.device.config.headless);
    if let Some(deployment) = &self.device.deployment {
      frame = frame
        .with_roi(deployment.roi)
        .with_labels(deployment.labels.clone());
    }
    if let Some(results) = results {
      frame = frame.with_results(results, new_detection);
    }
    Ok(Some(frame))
  }

  fn infer_on_host(&mut self, raw: &RawFrame) -> Result<(Vec<Tensor>, Results), DeviceError> {
    let deployment = self
      .device
      .deployment
      .as_mut()
      .ok_or(DeviceError::NotDeployed)?;
    let image = raw.image.as_ref().ok_or(DeviceError::EmptyFrame)?;
    let pre = deployment
      .model
      .as_preprocess()
      .ok_or(DeviceError::MissingCapability("pre_process"))?;

    let tensor = if deployment.roi.is_full() {
      pre.pre_process(image)
    } else {
      let cropped = image
        .crop(&deployment.roi)
        .map_err(|e| DeviceError::Preprocess(e.into()))?;
      pre.pre_process(&cropped)
    }
    .map_err(DeviceError::Preprocess)?;

    let network = deployment.network.as_mut().ok_or(DeviceError::NotDeployed)?;
    let outputs = network.invoke(&tensor)?;
    let info = deployment.model.info();
    info.check_outputs(&outputs).map_err(DeviceError::PostProcess)?;
    let mut results = deployment
      .model
      .post_process(&outputs)
      .map_err(DeviceError::PostProcess)?;
    results.compensate_for_roi(&deployment.roi);
    Ok((outputs, results))
  }

  fn embedded_results(&mut self, raw: &RawFrame) -> Result<Embedded, DeviceError> {
    let Some(deployment) = &self.device.deployment else {
      // 未部署模型时只输出图像与原始张量
      let outputs = match &raw.metadata {
        Some(metadata) => metadata.output_tensors().map_err(DeviceError::Metadata)?,
        None => Vec::new(),
      };
      return Ok(Embedded::Fresh(outputs, None));
    };

    let fresh = raw.metadata.as_ref().filter(|m| m.has_output());
    match fresh {
      Some(metadata) => {
        let outputs = metadata.output_tensors().map_err(DeviceError::Metadata)?;
        let info = deployment.model.info();
        info.check_outputs(&outputs).map_err(DeviceError::PostProcess)?;
        let mut results = deployment
          .model
          .post_process(&outputs)
          .map_err(DeviceError::PostProcess)?;
        results.compensate_for_roi(&deployment.roi);
        self.last_results = Some(results.clone());
        Ok(Embedded::Fresh(outputs, Some(results)))
      }
      None => match &self.last_results {
        Some(results) => Ok(Embedded::Reused(results.clone())),
        None => Ok(Embedded::Pending),
      },
    }
  }

  /// 停止采集线程、关闭输入源，设备回到进入前的状态。
  pub fn close(mut self) -> Result<(), DeviceError> {
    self.shutdown()
  }

  fn shutdown(&mut self) -> Result<(), DeviceError> {
    if self.closed {
      return Ok(());
    }
    self.closed = true;
    self.stop.store(true, Ordering::Release);
    // 先丢弃接收端，阻塞在发送上的采集线程随即退出
    self.rx.take();

    let joined = match self.handle.take() {
      Some(handle) => handle.join(),
      None => return Ok(()),
    };
    self.device.streaming = false;
    let mut source = joined.ok().flatten().ok_or_else(|| {
      error!("采集线程崩溃, 输入源已丢失");
      DeviceError::CaptureThread("采集线程崩溃".to_string())
    })?;
    let closed = source.close();
    info!("关闭输入源 {}", source.name());
    self.device.source = Some(source);
    closed.map_err(DeviceError::SourceClose)
  }
}

enum Embedded {
  Fresh(Vec<Tensor>, Option<Results>),
  Reused(Results),
  Pending,
}

impl Iterator for Stream<'_> {
  type Item = Result<Frame, DeviceError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.next_frame().transpose()
  }
}

impl Drop for Stream<'_> {
  fn drop(&mut self) {
    if let Err(e) = self.shutdown() {
      warn!("释放数据流时出错: {}", e);
    }
  }
}
