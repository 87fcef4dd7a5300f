// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/pre_process.rs - 标准前处理
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

use crate::{
  model::{InputShape, ModelError, ModelInfo, Preprocess},
  raster::{ColorFormat, Image},
  tensor::{Tensor, TensorLayout},
};

/// 逐通道 `(x - mean) / std`，按模型颜色顺序给出。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
  pub mean: [f32; 3],
  pub std: [f32; 3],
}

/// 颜色转换、双线性缩放、排布转换，可选归一化为 `f32`。
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessor {
  shape: InputShape,
  color_format: ColorFormat,
  layout: TensorLayout,
  normalization: Option<Normalization>,
}

impl Preprocessor {
  pub fn new(shape: InputShape, color_format: ColorFormat) -> Self {
    Self {
      shape,
      color_format,
      layout: TensorLayout::Nhwc,
      normalization: None,
    }
  }

  pub fn from_info(info: &ModelInfo) -> Self {
    Self::new(info.input_shape, info.color_format)
  }

  pub fn with_layout(mut self, layout: TensorLayout) -> Self {
    self.layout = layout;
    self
  }

  pub fn with_normalization(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
    self.normalization = Some(Normalization { mean, std });
    self
  }

  pub fn layout(&self) -> TensorLayout {
    self.layout
  }
}

impl Preprocess for Preprocessor {
  fn pre_process(&self, image: &Image) -> Result<Tensor, ModelError> {
    let (width, height) = (self.shape.width, self.shape.height);
    let image = image
      .to_color_format(self.color_format)
      .resize(width, height)?;

    let (w, h) = (width as usize, height as usize);
    let (data, shape) = match self.layout {
      TensorLayout::Nhwc => (image.as_nhwc().to_vec(), vec![1, h, w, 3]),
      TensorLayout::Nchw => (image.to_nchw(), vec![1, 3, h, w]),
    };

    let tensor = match self.normalization {
      None => Tensor::from_u8(shape, data)?,
      Some(Normalization { mean, std }) => {
        let plane = w * h;
        let layout = self.layout;
        let values = data
          .iter()
          .enumerate()
          .map(|(i, &v)| {
            let c = match layout {
              TensorLayout::Nhwc => i % 3,
              TensorLayout::Nchw => i / plane,
            };
            (v as f32 - mean[c]) / std[c]
          })
          .collect();
        Tensor::from_f32(shape, values)?
      }
    };
    Ok(tensor.with_layout(self.layout))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn converts_color_and_resizes() {
    let image = Image::filled(8, 8, ColorFormat::Rgb, [10, 20, 30]);
    let pre = Preprocessor::new(InputShape::new(4, 2), ColorFormat::Bgr);
    let tensor = pre.pre_process(&image).unwrap();
    assert_eq!(tensor.shape(), &[1, 2, 4, 3]);
    assert_eq!(&tensor.as_u8().unwrap()[..3], &[30, 20, 10]);
    assert_eq!(tensor.layout(), Some(TensorLayout::Nhwc));
  }

  #[test]
  fn nchw_with_normalisation() {
    let image = Image::filled(2, 2, ColorFormat::Rgb, [10, 20, 30]);
    let pre = Preprocessor::new(InputShape::new(2, 2), ColorFormat::Rgb)
      .with_layout(TensorLayout::Nchw)
      .with_normalization([10.0, 10.0, 10.0], [1.0, 2.0, 4.0]);
    let tensor = pre.pre_process(&image).unwrap();
    assert_eq!(tensor.shape(), &[1, 3, 2, 2]);
    let values = tensor.as_f32().unwrap();
    assert_eq!(&values[..4], &[0.0; 4]);
    assert_eq!(&values[4..8], &[5.0; 4]);
    assert_eq!(&values[8..], &[5.0; 4]);
  }

  #[test]
  fn pre_process_is_repeatable() {
    let image = Image::filled(5, 3, ColorFormat::Rgb, [1, 2, 3]);
    let pre = Preprocessor::new(InputShape::new(3, 3), ColorFormat::Rgb);
    assert_eq!(
      pre.pre_process(&image).unwrap(),
      pre.pre_process(&image).unwrap()
    );
  }
}
