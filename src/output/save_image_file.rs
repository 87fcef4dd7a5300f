// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  output::{Render, draw::Draw},
};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("字体加载失败: {0}")]
  Font(String),
}

/// 把叠加了结果的帧保存为图像文件，每帧覆盖同一路径。
pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let mut draw = Draw::default();
    if let Some((_, font)) = uri.query_pairs().find(|(k, _)| k == "font") {
      draw = draw.with_font_file(&*font).map_err(SaveImageFileError::Font)?;
    }

    Ok(SaveImageFileOutput {
      path: PathBuf::from(uri.path()),
      draw,
    })
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      draw: Draw::default(),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn save_image(&self, image: image::RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    info!("保存图像到文件: {}", self.path.display());

    Ok(())
  }
}

impl Render for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render(&self, frame: &Frame) -> Result<(), Self::Error> {
    match self.draw.draw_frame(frame) {
      Some(image) => self.save_image(image),
      None => {
        warn!("帧 {} 没有图像, 跳过保存", frame.index());
        Ok(())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::raster::{ColorFormat, Image};

  #[test]
  fn saves_into_nested_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a/b/out.png");
    let output = SaveImageFileOutput::new(&path);
    let frame = Frame::new(0, Some(Image::filled(4, 3, ColorFormat::Bgr, [0, 0, 255])));
    output.render(&frame).unwrap();

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved.dimensions(), (4, 3));
    assert_eq!(saved.get_pixel(0, 0).0, [255, 0, 0]);
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("folder:///tmp/x").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }
}
