// 该文件是 Kanjian （看见） 项目的一部分。
// src/source/v4l_input.rs - V4L2 摄像头输入源
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

use std::{io::ErrorKind, pin::Pin, time::Duration};

use tracing::{debug, info, warn};
use url::Url;
use v4l::{
  FourCC, buffer::Type, io::mmap::Stream, io::traits::CaptureStream, prelude::*,
  video::Capture,
};

use crate::{
  FromUrl, FromUrlWithScheme,
  raster::{ColorFormat, Image},
  source::{RawFrame, Source, SourceCapabilities, SourceError, SourceRead},
};

const V4L_INPUT_SCHEME: &str = "v4l";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Capturing {
  // stream 引用 device，必须先于 device 释放
  stream: Option<Stream<'static>>,
  device: Pin<Box<Device>>,
}

impl Drop for Capturing {
  fn drop(&mut self) {
    self.stream.take();
  }
}

/// V4L2 摄像头，按 YUYV 采集并转换为 RGB。
pub struct V4lSource {
  path: String,
  width: u32,
  height: u32,
  capturing: Option<Capturing>,
}

impl V4lSource {
  pub fn new(path: impl Into<String>, width: u32, height: u32) -> Self {
    Self {
      path: path.into(),
      width,
      height,
      capturing: None,
    }
  }
}

fn device_error(path: &str, e: std::io::Error) -> SourceError {
  SourceError::Device(format!("{}: {}", path, e))
}

/// YUYV (4:2:2) 转 RGB，每 4 字节输出两个像素。
pub(crate) fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let mut rgb = Vec::with_capacity((width * height * 3) as usize);
  let convert = |y: f32, u: f32, v: f32| {
    [
      (y + 1.402 * v).clamp(0.0, 255.0) as u8,
      (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8,
      (y + 1.772 * u).clamp(0.0, 255.0) as u8,
    ]
  };
  for chunk in yuyv.chunks_exact(4) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;
    rgb.extend_from_slice(&convert(chunk[0] as f32, u, v));
    rgb.extend_from_slice(&convert(chunk[2] as f32, u, v));
  }
  rgb
}

impl FromUrl for V4lSource {
  type Error = SourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != V4L_INPUT_SCHEME {
      return Err(SourceError::SchemeMismatch);
    }
    let mut width = 640;
    let mut height = 480;
    for (key, value) in url.query_pairs() {
      let parsed = value
        .parse::<u32>()
        .map_err(|_| SourceError::Config(format!("无效的 {}: {}", key, value)));
      match &*key {
        "width" => width = parsed?,
        "height" => height = parsed?,
        _ => warn!("忽略未知参数: {}", key),
      }
    }
    Ok(V4lSource::new(url.path(), width, height))
  }
}

impl FromUrlWithScheme for V4lSource {
  const SCHEME: &'static str = V4L_INPUT_SCHEME;
}

impl Source for V4lSource {
  fn name(&self) -> &str {
    &self.path
  }

  fn capabilities(&self) -> SourceCapabilities {
    SourceCapabilities::new(self.width, self.height).with_color_format(ColorFormat::Rgb)
  }

  fn open(&mut self) -> Result<(), SourceError> {
    self.close()?;

    let device = Box::pin(Device::with_path(&self.path).map_err(|e| device_error(&self.path, e))?);
    let mut format = device.format().map_err(|e| device_error(&self.path, e))?;
    format.width = self.width;
    format.height = self.height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format).map_err(|e| device_error(&self.path, e))?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(SourceError::Device(format!(
        "{} 不支持 YUYV 格式",
        self.path
      )));
    }
    self.width = format.width;
    self.height = format.height;

    let mut capturing = Capturing {
      stream: None,
      device,
    };
    // SAFETY: device 固定在堆上且与 stream 同属 Capturing，Drop 时先释放 stream
    let device_static: &'static Device = unsafe { std::mem::transmute(&*capturing.device) };
    let mut stream = Stream::with_buffers(device_static, Type::VideoCapture, 4)
      .map_err(|e| device_error(&self.path, e))?;
    stream.set_timeout(POLL_INTERVAL);
    capturing.stream = Some(stream);
    self.capturing = Some(capturing);

    info!("打开摄像头 {}: {}x{}", self.path, self.width, self.height);
    Ok(())
  }

  fn read(&mut self) -> Result<SourceRead, SourceError> {
    let (width, height) = (self.width, self.height);
    let path = &self.path;
    let Some(stream) = self.capturing.as_mut().and_then(|c| c.stream.as_mut()) else {
      return Err(SourceError::NotOpen(path.clone()));
    };

    match stream.next() {
      Ok((buffer, meta)) => {
        debug!("采集到第 {} 帧 ({} 字节)", meta.sequence, meta.bytesused);
        let used = buffer.len().min((width * height * 2) as usize);
        let rgb = yuyv_to_rgb(&buffer[..used], width, height);
        let image = Image::from_raw(width, height, ColorFormat::Rgb, rgb)?;
        Ok(SourceRead::Frame(RawFrame::new(image)))
      }
      Err(e) if e.kind() == ErrorKind::TimedOut => Ok(SourceRead::Idle),
      Err(e) => Err(device_error(path, e)),
    }
  }

  fn close(&mut self) -> Result<(), SourceError> {
    if self.capturing.take().is_some() {
      info!("关闭摄像头 {}", self.path);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn gray_yuyv_stays_gray() {
    let rgb = yuyv_to_rgb(&[100, 128, 200, 128], 2, 1);
    assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
  }

  #[test]
  fn url_parses_resolution() {
    let url = Url::parse("v4l:///dev/video2?width=1280&height=720").unwrap();
    let source = V4lSource::from_url(&url).unwrap();
    assert_eq!(source.name(), "/dev/video2");
    assert_eq!(source.capabilities().width, 1280);
    assert_eq!(source.capabilities().height, 720);
  }
}
