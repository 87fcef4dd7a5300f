// 该文件是 Kanjian （看见） 项目的一部分。
// src/source/memory.rs - 内存帧输入
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

use tracing::debug;

use crate::{
  raster::Image,
  source::{RawFrame, Source, SourceCapabilities, SourceError, SourceRead},
};

/// 按顺序回放一组内存中的帧。
pub struct ArraySource {
  name: String,
  frames: Vec<RawFrame>,
  capabilities: SourceCapabilities,
  looping: bool,
  cursor: usize,
  opened: bool,
}

impl ArraySource {
  /// 能力取自第一张图像；没有图像时为 0x0。
  pub fn new(frames: Vec<RawFrame>) -> Self {
    let capabilities = frames
      .iter()
      .find_map(|f| f.image.as_ref())
      .map(|image| {
        SourceCapabilities::new(image.width(), image.height()).with_color_format(image.color_format())
      })
      .unwrap_or_else(|| SourceCapabilities::new(0, 0));
    Self {
      name: "array".to_string(),
      frames,
      capabilities,
      looping: false,
      cursor: 0,
      opened: false,
    }
  }

  pub fn from_images<I: IntoIterator<Item = Image>>(images: I) -> Self {
    Self::new(images.into_iter().map(RawFrame::new).collect())
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn with_capabilities(mut self, capabilities: SourceCapabilities) -> Self {
    self.capabilities = capabilities;
    self
  }

  /// 读完后从头开始，成为无限输入。
  pub fn looping(mut self, looping: bool) -> Self {
    self.looping = looping;
    self
  }

  pub fn is_open(&self) -> bool {
    self.opened
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }
}

impl Source for ArraySource {
  fn name(&self) -> &str {
    &self.name
  }

  fn capabilities(&self) -> SourceCapabilities {
    self.capabilities
  }

  fn open(&mut self) -> Result<(), SourceError> {
    debug!("打开内存输入源 {} ({} 帧)", self.name, self.frames.len());
    self.cursor = 0;
    self.opened = true;
    Ok(())
  }

  fn read(&mut self) -> Result<SourceRead, SourceError> {
    if !self.opened {
      return Err(SourceError::NotOpen(self.name.clone()));
    }
    if self.cursor >= self.frames.len() {
      if !self.looping || self.frames.is_empty() {
        return Ok(SourceRead::EndOfStream);
      }
      self.cursor = 0;
    }
    let frame = self.frames[self.cursor].clone();
    self.cursor += 1;
    Ok(SourceRead::Frame(frame))
  }

  fn close(&mut self) -> Result<(), SourceError> {
    self.opened = false;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::raster::ColorFormat;

  fn source(n: usize) -> ArraySource {
    ArraySource::from_images((0..n).map(|i| Image::filled(4, 2, ColorFormat::Rgb, [i as u8; 3])))
  }

  #[test]
  fn read_requires_open() {
    let mut s = source(1);
    assert!(matches!(s.read(), Err(SourceError::NotOpen(_))));
  }

  #[test]
  fn finite_source_ends() {
    let mut s = source(2);
    s.open().unwrap();
    assert!(matches!(s.read().unwrap(), SourceRead::Frame(_)));
    assert!(matches!(s.read().unwrap(), SourceRead::Frame(_)));
    assert!(matches!(s.read().unwrap(), SourceRead::EndOfStream));
    s.close().unwrap();
    s.close().unwrap();
    assert!(!s.is_open());
  }

  #[test]
  fn reopening_restarts() {
    let mut s = source(2);
    s.open().unwrap();
    s.read().unwrap();
    s.open().unwrap();
    match s.read().unwrap() {
      SourceRead::Frame(frame) => assert_eq!(frame.image.unwrap().as_nhwc()[0], 0),
      other => panic!("unexpected read {:?}", other),
    }
  }

  #[test]
  fn looping_wraps_around() {
    let mut s = source(1).looping(true);
    s.open().unwrap();
    for _ in 0..3 {
      assert!(matches!(s.read().unwrap(), SourceRead::Frame(_)));
    }
  }

  #[test]
  fn capabilities_follow_first_image() {
    let s = source(1);
    assert_eq!((s.capabilities().width, s.capabilities().height), (4, 2));
  }
}
