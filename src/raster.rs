// 该文件是 Kanjian （看见） 项目的一部分。
// src/raster.rs - 解码后的图像缓冲区
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

use image::{RgbImage, imageops::FilterType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::result::Roi;

const RGB_CHANNELS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorFormat {
  #[default]
  Rgb,
  Bgr,
}

impl std::str::FromStr for ColorFormat {
  type Err = RasterError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "rgb" => Ok(ColorFormat::Rgb),
      "bgr" => Ok(ColorFormat::Bgr),
      other => Err(RasterError::UnknownColorFormat(other.to_string())),
    }
  }
}

#[derive(Error, Debug)]
pub enum RasterError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("未知颜色格式: {0}")]
  UnknownColorFormat(String),
  #[error("图像尺寸无效: {width}x{height}")]
  InvalidSize { width: u32, height: u32 },
}

/// 三通道 8 位图像，按 HWC（交织）顺序存储。
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
  width: u32,
  height: u32,
  color_format: ColorFormat,
  data: Box<[u8]>,
}

impl Image {
  pub fn from_raw(
    width: u32,
    height: u32,
    color_format: ColorFormat,
    data: Vec<u8>,
  ) -> Result<Self, RasterError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(RasterError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      color_format,
      data: data.into_boxed_slice(),
    })
  }

  /// 纯色图像，主要用于测试和占位。
  pub fn filled(width: u32, height: u32, color_format: ColorFormat, value: [u8; 3]) -> Self {
    let mut data = Vec::with_capacity(RGB_CHANNELS * width as usize * height as usize);
    for _ in 0..(width as usize * height as usize) {
      data.extend_from_slice(&value);
    }
    Self {
      width,
      height,
      color_format,
      data: data.into_boxed_slice(),
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn color_format(&self) -> ColorFormat {
    self.color_format
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  pub fn into_raw(self) -> Vec<u8> {
    self.data.into_vec()
  }

  pub fn to_nchw(&self) -> Vec<u8> {
    let height = self.height as usize;
    let width = self.width as usize;
    let mut planes = vec![0u8; self.data.len()];

    for h in 0..height {
      for w in 0..width {
        for c in 0..RGB_CHANNELS {
          let src_idx = (h * width + w) * RGB_CHANNELS + c;
          let dst_idx = c * height * width + h * width + w;
          planes[dst_idx] = self.data[src_idx];
        }
      }
    }
    planes
  }

  /// 转换到目标颜色格式；格式相同则直接克隆。
  pub fn to_color_format(&self, target: ColorFormat) -> Image {
    if self.color_format == target {
      return self.clone();
    }

    let mut data = self.data.clone();
    for pixel in data.chunks_exact_mut(RGB_CHANNELS) {
      pixel.swap(0, 2);
    }
    Image {
      width: self.width,
      height: self.height,
      color_format: target,
      data,
    }
  }

  /// 双线性缩放到指定尺寸，颜色格式保持不变。
  pub fn resize(&self, width: u32, height: u32) -> Result<Image, RasterError> {
    if width == 0 || height == 0 {
      return Err(RasterError::InvalidSize { width, height });
    }
    if width == self.width && height == self.height {
      return Ok(self.clone());
    }

    let buffer = self.as_rgb_buffer()?;
    let resized = image::imageops::resize(&buffer, width, height, FilterType::Triangle);
    Image::from_raw(width, height, self.color_format, resized.into_raw())
  }

  /// 按归一化 ROI 裁剪。
  pub fn crop(&self, roi: &Roi) -> Result<Image, RasterError> {
    let (left, top, width, height) = roi.to_pixels(self.width, self.height);
    if width == 0 || height == 0 {
      return Err(RasterError::InvalidSize { width, height });
    }

    let row_bytes = self.width as usize * RGB_CHANNELS;
    let mut data = Vec::with_capacity(width as usize * height as usize * RGB_CHANNELS);
    for y in top..top + height {
      let start = y as usize * row_bytes + left as usize * RGB_CHANNELS;
      let end = start + width as usize * RGB_CHANNELS;
      data.extend_from_slice(&self.data[start..end]);
    }
    Image::from_raw(width, height, self.color_format, data)
  }

  fn as_rgb_buffer(&self) -> Result<RgbImage, RasterError> {
    RgbImage::from_raw(self.width, self.height, self.data.to_vec()).ok_or(
      RasterError::LengthMismatch {
        expected: RGB_CHANNELS * self.width as usize * self.height as usize,
        actual: self.data.len(),
      },
    )
  }

  /// 以 RGB 顺序导出，供绘制与保存使用。
  pub fn to_rgb_image(&self) -> RgbImage {
    let rgb = self.to_color_format(ColorFormat::Rgb);
    let (width, height) = (rgb.width, rgb.height);
    RgbImage::from_raw(width, height, rgb.into_raw())
      .unwrap_or_else(|| RgbImage::new(width, height))
  }

  pub fn from_rgb_image(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      color_format: ColorFormat::Rgb,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}
