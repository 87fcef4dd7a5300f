// 该文件是 Kanjian （看见） 项目的一部分。
// src/source/gstreamer_input.rs - GStreamer 输入源
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

//! # GStreamer 输入源
//!
//! 通过 appsink 从 GStreamer 管道拉取 RGB 帧。支持两种 URL：
//!
//! - `gst://camera/dev/video0?width=640&height=480&fps=30&rotate=90`
//! - `gst://file/path/to/video.mp4?width=640&height=480`
//!
//! 管道在 `open` 时创建并进入 Playing 状态，`close` 时置为 Null。
//!
//! ## 系统依赖
//!
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  raster::{ColorFormat, Image},
  source::{RawFrame, Source, SourceCapabilities, SourceError, SourceRead},
};

const GSTREAMER_INPUT_SCHEME: &str = "gst";
const PULL_TIMEOUT_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq)]
enum PipelineItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    fps: u32,
  },
  Scale {
    width: u32,
    height: u32,
  },
  VideoFlip {
    method: u32,
  },
  TargetFormat,
}

impl PipelineItem {
  fn to_pipeline(&self) -> String {
    match self {
      PipelineItem::FileSource(path) => format!("filesrc location={} ! decodebin", path),
      PipelineItem::CameraSource {
        camera,
        io_mode,
        format,
        fps,
      } => {
        let io_mode = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},framerate={}/1",
          camera, io_mode, format, fps
        )
      }
      PipelineItem::Scale { width, height } => format!(
        "videoconvert ! videoscale ! video/x-raw,width={},height={}",
        width, height
      ),
      PipelineItem::VideoFlip { method } => format!("videoflip method={}", method),
      PipelineItem::TargetFormat => "videoconvert ! video/x-raw,format=RGB".to_string(),
    }
  }
}

fn video_flip(rotate: &str) -> Option<PipelineItem> {
  let method = match rotate {
    "90" => 1,
    "180" => 2,
    "270" => 3,
    _ => return None,
  };
  Some(PipelineItem::VideoFlip { method })
}

fn query_u32(query: &HashMap<String, String>, key: &str, default: u32) -> Result<u32, SourceError> {
  match query.get(key) {
    Some(value) => value
      .parse::<u32>()
      .map_err(|_| SourceError::Config(format!("无效的 {}: {}", key, value))),
    None => Ok(default),
  }
}

struct Running {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl Drop for Running {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}

/// GStreamer 管道输入，输出固定尺寸的 RGB 帧。
pub struct GStreamerSource {
  name: String,
  items: Vec<PipelineItem>,
  width: u32,
  height: u32,
  running: Option<Running>,
}

impl GStreamerSource {
  pub fn camera(device: &str, width: u32, height: u32, fps: u32) -> Self {
    Self::from_items(
      device,
      vec![PipelineItem::CameraSource {
        camera: device.to_string(),
        io_mode: None,
        format: "YUY2".to_string(),
        fps,
      }],
      width,
      height,
    )
  }

  pub fn file(path: &str, width: u32, height: u32) -> Self {
    Self::from_items(
      path,
      vec![PipelineItem::FileSource(path.to_string())],
      width,
      height,
    )
  }

  fn from_items(name: &str, mut items: Vec<PipelineItem>, width: u32, height: u32) -> Self {
    items.push(PipelineItem::Scale { width, height });
    Self {
      name: name.to_string(),
      items,
      width,
      height,
      running: None,
    }
  }

  fn with_rotation(mut self, rotate: Option<&String>) -> Self {
    if let Some(flip) = rotate.and_then(|r| video_flip(r)) {
      self.items.push(flip);
    }
    self
  }

  /// 完整的管道描述，以名为 sink 的 appsink 结尾。
  pub fn pipeline_description(&self) -> String {
    let body = self
      .items
      .iter()
      .chain(std::iter::once(&PipelineItem::TargetFormat))
      .map(PipelineItem::to_pipeline)
      .collect::<Vec<_>>()
      .join(" ! ");
    format!("{} ! appsink max-buffers=2 drop=true name=sink", body)
  }

  fn launch(&self) -> Result<Running, SourceError> {
    let gst_error = |e: &dyn std::fmt::Display| SourceError::Device(format!("GStreamer: {}", e));

    gst::init().map_err(|e| gst_error(&e))?;
    let description = self.pipeline_description();
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(&description)
      .map_err(|e| gst_error(&e))?
      .downcast::<gst::Pipeline>()
      .map_err(|_| SourceError::Device("无法创建 GStreamer 管道".to_string()))?;
    let appsink = pipeline
      .by_name("sink")
      .ok_or_else(|| SourceError::Device("找不到 appsink".to_string()))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| SourceError::Device("sink 不是 appsink".to_string()))?;
    pipeline
      .set_state(gst::State::Playing)
      .map_err(|e| gst_error(&e))?;

    Ok(Running { pipeline, appsink })
  }
}

fn sample_to_image(sample: &gst::Sample) -> Result<Image, SourceError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| SourceError::Device("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| SourceError::Device("样本中没有 caps".to_string()))?;
  let info = gst_video::VideoInfo::from_caps(caps)
    .map_err(|_| SourceError::Device("无法从 caps 获取视频信息".to_string()))?;

  let width = info.width();
  let height = info.height();
  let color_format = match info.format() {
    gst_video::VideoFormat::Rgb => ColorFormat::Rgb,
    gst_video::VideoFormat::Bgr => ColorFormat::Bgr,
    other => {
      return Err(SourceError::Device(format!("不支持的视频格式: {:?}", other)));
    }
  };

  let map = buffer
    .map_readable()
    .map_err(|e| SourceError::Device(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();
  let stride = info.stride()[0] as usize;
  let row = width as usize * 3;
  if stride < row || data.len() < stride * height as usize {
    return Err(SourceError::Device(format!(
      "缓冲区大小 {} 不足 {}x{}",
      data.len(),
      width,
      height
    )));
  }

  let mut packed = Vec::with_capacity(row * height as usize);
  for line in data.chunks(stride).take(height as usize) {
    packed.extend_from_slice(&line[..row]);
  }
  Ok(Image::from_raw(width, height, color_format, packed)?.to_color_format(ColorFormat::Rgb))
}

impl FromUrl for GStreamerSource {
  type Error = SourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != GSTREAMER_INPUT_SCHEME {
      return Err(SourceError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (k.into_owned(), v.into_owned()))
      .collect();
    let width = query_u32(&query, "width", 640)?;
    let height = query_u32(&query, "height", 480)?;

    let source = match url.host_str() {
      Some("camera") => {
        let mut source = Self::camera(url.path(), width, height, query_u32(&query, "fps", 15)?);
        if let Some(PipelineItem::CameraSource {
          io_mode, format, ..
        }) = source.items.first_mut()
        {
          *io_mode = query.get("io-mode").and_then(|v| v.parse().ok());
          if let Some(f) = query.get("format") {
            *format = f.clone();
          }
        }
        source
      }
      Some("file") => Self::file(url.path(), width, height),
      other => {
        return Err(SourceError::Config(format!(
          "未知的 GStreamer 输入类型: {:?}",
          other
        )));
      }
    };
    Ok(source.with_rotation(query.get("rotate")))
  }
}

impl FromUrlWithScheme for GStreamerSource {
  const SCHEME: &'static str = GSTREAMER_INPUT_SCHEME;
}

impl Source for GStreamerSource {
  fn name(&self) -> &str {
    &self.name
  }

  fn capabilities(&self) -> SourceCapabilities {
    SourceCapabilities::new(self.width, self.height)
  }

  fn open(&mut self) -> Result<(), SourceError> {
    self.running = None;
    self.running = Some(self.launch()?);
    Ok(())
  }

  fn read(&mut self) -> Result<SourceRead, SourceError> {
    let Some(running) = self.running.as_ref() else {
      return Err(SourceError::NotOpen(self.name.clone()));
    };
    match running
      .appsink
      .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
    {
      Some(sample) => Ok(SourceRead::Frame(RawFrame::new(sample_to_image(&sample)?))),
      None if running.appsink.is_eos() => Ok(SourceRead::EndOfStream),
      None => Ok(SourceRead::Idle),
    }
  }

  fn close(&mut self) -> Result<(), SourceError> {
    if self.running.take().is_some() {
      info!("关闭 GStreamer 输入 {}", self.name);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn camera_url_builds_pipeline() {
    let url = Url::parse("gst://camera/dev/video0?width=320&height=240&fps=30&rotate=180").unwrap();
    let source = GStreamerSource::from_url(&url).unwrap();
    assert_eq!(source.capabilities().width, 320);
    assert_eq!(
      source.pipeline_description(),
      "v4l2src device=/dev/video0 ! video/x-raw,format=YUY2,framerate=30/1 ! \
       videoconvert ! videoscale ! video/x-raw,width=320,height=240 ! \
       videoflip method=2 ! videoconvert ! video/x-raw,format=RGB ! \
       appsink max-buffers=2 drop=true name=sink"
    );
  }

  #[test]
  fn unknown_host_is_rejected() {
    let url = Url::parse("gst://rtsp/stream").unwrap();
    assert!(matches!(
      GStreamerSource::from_url(&url),
      Err(SourceError::Config(_))
    ));
  }

  #[test]
  fn read_before_open_fails() {
    let mut source = GStreamerSource::file("/tmp/none.mp4", 64, 64);
    assert!(matches!(source.read(), Err(SourceError::NotOpen(_))));
  }
}
