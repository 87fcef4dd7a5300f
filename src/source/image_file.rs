// 该文件是 Kanjian （看见） 项目的一部分。
// src/source/image_file.rs - 从图像文件读取
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

use std::path::{Path, PathBuf};

use image::ImageReader;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  raster::Image,
  source::{RawFrame, Source, SourceCapabilities, SourceError, SourceRead},
};

const READ_IMAGE_FILE_SCHEME: &str = "image";
const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// 单张图像，或目录中按文件名排序的全部图像。
pub struct ImageFileSource {
  path: PathBuf,
  files: Vec<PathBuf>,
  capabilities: SourceCapabilities,
  looping: bool,
  cursor: usize,
  opened: bool,
}

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn list_images(path: &Path) -> Result<Vec<PathBuf>, SourceError> {
  if path.is_file() {
    return Ok(vec![path.to_path_buf()]);
  }
  let mut files = std::fs::read_dir(path)?
    .filter_map(|entry| entry.ok().map(|e| e.path()))
    .filter(|p| p.is_file() && is_image(p))
    .collect::<Vec<_>>();
  files.sort();
  Ok(files)
}

impl ImageFileSource {
  pub fn new(path: impl Into<PathBuf>) -> Result<Self, SourceError> {
    let path = path.into();
    let files = list_images(&path)?;
    let first = files
      .first()
      .ok_or_else(|| SourceError::Config(format!("{} 中没有图像文件", path.display())))?;
    let (width, height) = image::image_dimensions(first)?;
    info!(
      "图像输入源 {}: {} 个文件, {}x{}",
      path.display(),
      files.len(),
      width,
      height
    );

    Ok(Self {
      path,
      files,
      capabilities: SourceCapabilities::new(width, height),
      looping: false,
      cursor: 0,
      opened: false,
    })
  }

  pub fn looping(mut self, looping: bool) -> Self {
    self.looping = looping;
    self
  }
}

impl FromUrl for ImageFileSource {
  type Error = SourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != READ_IMAGE_FILE_SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        READ_IMAGE_FILE_SCHEME,
        url.scheme()
      );
      return Err(SourceError::SchemeMismatch);
    }

    let looping = url
      .query_pairs()
      .any(|(k, v)| k == "loop" && (v == "true" || v == "1"));
    Ok(ImageFileSource::new(url.path())?.looping(looping))
  }
}

impl FromUrlWithScheme for ImageFileSource {
  const SCHEME: &'static str = READ_IMAGE_FILE_SCHEME;
}

impl Source for ImageFileSource {
  fn name(&self) -> &str {
    self.path.to_str().unwrap_or("image")
  }

  fn capabilities(&self) -> SourceCapabilities {
    self.capabilities
  }

  fn open(&mut self) -> Result<(), SourceError> {
    self.cursor = 0;
    self.opened = true;
    Ok(())
  }

  fn read(&mut self) -> Result<SourceRead, SourceError> {
    if !self.opened {
      return Err(SourceError::NotOpen(self.path.display().to_string()));
    }
    if self.cursor >= self.files.len() {
      if !self.looping {
        return Ok(SourceRead::EndOfStream);
      }
      self.cursor = 0;
    }

    let file = &self.files[self.cursor];
    self.cursor += 1;
    debug!("读取图像: {}", file.display());
    let decoded = ImageReader::open(file)?.decode()?.to_rgb8();
    Ok(SourceRead::Frame(RawFrame::new(Image::from_rgb_image(decoded))))
  }

  fn close(&mut self) -> Result<(), SourceError> {
    self.opened = false;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  fn write_png(dir: &Path, name: &str, value: u8) {
    RgbImage::from_pixel(6, 4, image::Rgb([value, value, value]))
      .save(dir.join(name))
      .unwrap();
  }

  #[test]
  fn directory_is_read_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    write_png(dir.path(), "b.png", 20);
    write_png(dir.path(), "a.png", 10);
    std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

    let mut source = ImageFileSource::new(dir.path()).unwrap();
    assert_eq!(source.capabilities().width, 6);
    source.open().unwrap();
    let mut seen = Vec::new();
    while let SourceRead::Frame(frame) = source.read().unwrap() {
      seen.push(frame.image.unwrap().as_nhwc()[0]);
    }
    assert_eq!(seen, vec![10, 20]);
  }

  #[test]
  fn empty_directory_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      ImageFileSource::new(dir.path()),
      Err(SourceError::Config(_))
    ));
  }

  #[test]
  fn url_selects_file() {
    let dir = tempfile::tempdir().unwrap();
    write_png(dir.path(), "frame.png", 1);
    let url = Url::from_file_path(dir.path().join("frame.png")).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "image", 1)).unwrap();
    let source = ImageFileSource::from_url(&url).unwrap();
    assert_eq!(source.capabilities().height, 4);
  }
}
