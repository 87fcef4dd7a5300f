// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  path::{Path, PathBuf},
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  output::{
    Render,
    draw::{Draw, Record},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体加载失败: {0}")]
  Font(String),
}

pub enum DrawWrapper {
  Draw(Box<Draw>),
  Record(Record),
}

impl DrawWrapper {
  pub fn save_result(&self, path: &Path, frame: &Frame) -> Result<(), DirectoryRecordOutputError> {
    match self {
      DrawWrapper::Draw(draw) => {
        if let Some(image) = draw.draw_frame(frame) {
          image.save(path)?;
        }
      }
      DrawWrapper::Record(record) => {
        if let Some(image) = frame.image() {
          image.to_rgb_image().save(path)?;
        }
        record.record(frame, path)?;
      }
    };

    Ok(())
  }

  pub fn with(kind: &str) -> Self {
    match kind {
      "record-name" => DrawWrapper::Record(Record {
        label_with_name: true,
      }),
      "record-id" => DrawWrapper::Record(Record {
        label_with_name: false,
      }),
      _ => DrawWrapper::Draw(Box::default()),
    }
  }
}

/// 按日期分目录保存每一帧：`年/月/日/时-分-秒-序号.png`。
///
/// 默认只保存有结果的帧；带 `always` 查询参数时保存所有帧。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: DrawWrapper,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let kind = match uri.query_pairs().find(|(k, _)| k == "record") {
      Some((_, v)) if v == "id" => "record-id",
      Some(_) => "record-name",
      None => "draw",
    };
    let draw = match (DrawWrapper::with(kind), uri.query_pairs().find(|(k, _)| k == "font")) {
      (DrawWrapper::Draw(inner), Some((_, font))) => {
        let inner = (*inner)
          .with_font_file(&*font)
          .map_err(DirectoryRecordOutputError::Font)?;
        DrawWrapper::Draw(Box::new(inner))
      }
      (draw, _) => draw,
    };

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      draw,
      frame_counter: AtomicU16::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render(&self, frame: &Frame) -> Result<(), Self::Error> {
    let has_results = frame.results().is_some_and(|r| !r.is_empty());
    if !self.always && !has_results {
      return Ok(());
    }
    let path = self.frame_path(frame.timestamp())?;
    debug!("记录帧 {} 到 {}", frame.index(), path.display());
    self.draw.save_result(&path, frame)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use url::Url;

  use super::*;
  use crate::{
    raster::{ColorFormat, Image},
    result::{DetectItem, Detections},
  };

  fn output(dir: &Path, query: &str) -> DirectoryRecordOutput {
    let url = Url::parse(&format!("folder://{}?{}", dir.display(), query)).unwrap();
    DirectoryRecordOutput::from_url(&url).unwrap()
  }

  fn frame(with_results: bool) -> Frame {
    let timestamp = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
    let frame = Frame::new(0, Some(Image::filled(4, 4, ColorFormat::Rgb, [9, 9, 9])))
      .with_timestamp(timestamp);
    if with_results {
      let detections = Detections::from_items([DetectItem::new([0.0, 0.0, 0.5, 0.5], 0.7, 0)]);
      frame.with_results(detections.into(), true)
    } else {
      frame
    }
  }

  #[test]
  fn empty_frames_are_skipped_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let day = dir.path().join("2026/03/04");

    output(dir.path(), "").render(&frame(false)).unwrap();
    assert!(!day.exists());

    output(dir.path(), "always").render(&frame(false)).unwrap();
    assert!(day.join("05-06-07-0001.png").exists());
  }

  #[test]
  fn record_writes_text_next_to_image() {
    let dir = tempfile::tempdir().unwrap();
    let output = output(dir.path(), "record=id");
    output.render(&frame(true)).unwrap();
    output.render(&frame(true)).unwrap();

    let day = dir.path().join("2026/03/04");
    assert!(day.join("05-06-07-0002.png").exists());
    let text = std::fs::read_to_string(day.join("05-06-07-0001.txt")).unwrap();
    assert!(text.starts_with("0, 0.7000"));
  }
}
