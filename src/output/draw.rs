// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 推理结果可视化
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use tracing::warn;

use crate::{
  frame::Frame,
  raster::Image,
  result::{Anomaly, Classifications, Detections, Poses, Results, Segments},
};

/// 字体文件路径的环境变量
pub const FONT_ENV: &str = "KANJIAN_FONT";

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const KEYPOINT_RADIUS: i32 = 3;
const KEYPOINT_THRESHOLD: f32 = 0.3;
const MASK_ALPHA: f32 = 0.5;

const PALETTE: [[u8; 3]; 8] = [
  [0, 0, 255],
  [255, 56, 56],
  [72, 249, 10],
  [255, 157, 151],
  [0, 194, 255],
  [255, 112, 31],
  [146, 204, 23],
  [132, 56, 255],
];

fn class_color(class_id: u32) -> [u8; 3] {
  PALETTE[class_id as usize % PALETTE.len()]
}

/// 在图像上绘制检测框、关键点、分割掩码和异常热力图。
///
/// 没有字体时只绘制图形，不绘制文字标签。
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
}

impl Default for Draw {
  fn default() -> Self {
    let font = std::env::var_os(FONT_ENV).and_then(|path| match Self::load_font(Path::new(&path)) {
      Ok(font) => Some(font),
      Err(e) => {
        warn!("无法加载字体 {:?}: {}", path, e);
        None
      }
    });

    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
    }
  }
}

impl Draw {
  fn load_font(path: &Path) -> Result<FontVec, String> {
    let data = std::fs::read(path).map_err(|e| e.to_string())?;
    FontVec::try_from_vec(data).map_err(|e| e.to_string())
  }

  pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self, String> {
    self.font = Some(Self::load_font(path.as_ref())?);
    Ok(self)
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  fn draw_label(&self, image: &mut RgbImage, x: i32, y: i32, text: &str, color: [u8; 3]) {
    let Some(font) = &self.font else {
      return;
    };
    let w = image.width() as i32;
    let text_width = (text.chars().count() as f32 * self.label_char_width) as i32;
    let label_x = x.clamp(0, (w - 1).max(0));
    let label_y = (y - self.label_text_height).max(0);
    let label_width = text_width.min(w - label_x).max(0) as u32;
    if label_width == 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width, self.label_text_height as u32);
    draw_filled_rect_mut(image, rect, Rgb(color));
    draw_text_mut(
      image,
      Rgb([255u8, 255u8, 255u8]),
      label_x,
      label_y + self.label_text_vertical_padding,
      PxScale::from(self.font_size),
      font,
      text,
    );
  }

  /// bbox 为归一化坐标 [x_min, y_min, x_max, y_max]，边框加粗为 2 像素。
  fn draw_bbox(&self, image: &mut RgbImage, bbox: &[f32; 4], color: [u8; 3]) -> Option<(i32, i32)> {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let x_min = ((bbox[0] * w).floor() as i32).clamp(0, w as i32 - 1);
    let y_min = ((bbox[1] * h).floor() as i32).clamp(0, h as i32 - 1);
    let x_max = ((bbox[2] * w).ceil() as i32).clamp(0, w as i32 - 1);
    let y_max = ((bbox[3] * h).ceil() as i32).clamp(0, h as i32 - 1);
    if x_min >= x_max || y_min >= y_max {
      return None;
    }

    for thickness in 0..2 {
      let width = (x_max - x_min - 2 * thickness).max(1) as u32;
      let height = (y_max - y_min - 2 * thickness).max(1) as u32;
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width, height);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }
    Some((x_min, y_min))
  }

  fn draw_detections(&self, image: &mut RgbImage, detections: &Detections, frame: &Frame) {
    for item in detections.iter() {
      let color = class_color(item.class_id);
      if let Some((x, y)) = self.draw_bbox(image, &item.bbox, color) {
        let name = frame
          .label(item.class_id)
          .map(str::to_string)
          .unwrap_or_else(|| item.class_id.to_string());
        let text = match item.tracker_id {
          Some(id) if id >= 0 => format!("#{} {} {:.2}", id, name, item.score),
          _ => format!("{} {:.2}", name, item.score),
        };
        self.draw_label(image, x, y, &text, color);
      }
    }
  }

  fn draw_classifications(&self, image: &mut RgbImage, cls: &Classifications, frame: &Frame) {
    for (row, (score, class_id)) in cls.iter().take(3).enumerate() {
      let name = frame
        .label(class_id)
        .map(str::to_string)
        .unwrap_or_else(|| class_id.to_string());
      let y = (row as i32 + 1) * self.label_text_height;
      self.draw_label(image, 0, y, &format!("{} {:.2}", name, score), class_color(class_id));
    }
  }

  fn draw_poses(&self, image: &mut RgbImage, poses: &Poses) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    for (i, pose) in poses.iter().enumerate() {
      let color = class_color(i as u32);
      if let Some(bbox) = &pose.bbox {
        self.draw_bbox(image, bbox, color);
      }
      for kp in pose.keypoints.iter().filter(|k| k.score >= KEYPOINT_THRESHOLD) {
        let center = ((kp.x * w) as i32, (kp.y * h) as i32);
        draw_filled_circle_mut(image, center, KEYPOINT_RADIUS, Rgb(color));
      }
    }
  }

  fn blend(pixel: &mut Rgb<u8>, color: [u8; 3], alpha: f32) {
    for c in 0..3 {
      pixel[c] = (pixel[c] as f32 * (1.0 - alpha) + color[c] as f32 * alpha) as u8;
    }
  }

  /// 掩码按最近邻缩放到图像尺寸后叠加。
  fn overlay_grid<F>(image: &mut RgbImage, grid_w: usize, grid_h: usize, color_at: F)
  where
    F: Fn(usize) -> Option<([u8; 3], f32)>,
  {
    if grid_w == 0 || grid_h == 0 {
      return;
    }
    let (w, h) = (image.width() as usize, image.height() as usize);
    for y in 0..h {
      let gy = y * grid_h / h;
      for x in 0..w {
        let gx = x * grid_w / w;
        if let Some((color, alpha)) = color_at(gy * grid_w + gx) {
          Self::blend(image.get_pixel_mut(x as u32, y as u32), color, alpha);
        }
      }
    }
  }

  fn draw_segments(&self, image: &mut RgbImage, segments: &Segments) {
    let mask = segments.mask();
    Self::overlay_grid(
      image,
      segments.width(),
      segments.height(),
      |i| match mask[i] {
        0 => None,
        id => Some((class_color(id as u32), MASK_ALPHA)),
      },
    );
  }

  fn draw_anomaly(&self, image: &mut RgbImage, anomaly: &Anomaly) {
    let heatmap = anomaly.heatmap();
    Self::overlay_grid(
      image,
      anomaly.width(),
      anomaly.height(),
      |i| {
        let v = heatmap[i].clamp(0.0, 1.0);
        (v > 0.0).then_some(([255, 0, 0], v * MASK_ALPHA))
      },
    );
    self.draw_label(image, 0, self.label_text_height, &format!("anomaly {:.2}", anomaly.score()), [255, 0, 0]);
  }

  pub fn draw_results(&self, image: &mut RgbImage, frame: &Frame) {
    match frame.results() {
      Some(Results::Detections(d)) => self.draw_detections(image, d, frame),
      Some(Results::Classifications(c)) => self.draw_classifications(image, c, frame),
      Some(Results::Poses(p)) => self.draw_poses(image, p),
      Some(Results::Segments(s)) => self.draw_segments(image, s),
      Some(Results::Anomaly(a)) => self.draw_anomaly(image, a),
      None => {}
    }
  }

  /// 帧图像的 RGB 副本，并叠加推理结果；帧中没有图像时返回 `None`。
  pub fn draw_frame(&self, frame: &Frame) -> Option<RgbImage> {
    let mut image = frame.image().map(Image::to_rgb_image)?;
    self.draw_results(&mut image, frame);
    Some(image)
  }
}

/// 以文本记录检测结果，每行一个目标。
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn lines(&self, frame: &Frame) -> Vec<String> {
    let name = |class_id: u32| {
      if self.label_with_name {
        frame
          .label(class_id)
          .map(str::to_string)
          .unwrap_or_else(|| class_id.to_string())
      } else {
        class_id.to_string()
      }
    };
    match frame.results() {
      Some(Results::Detections(d)) => d
        .iter()
        .map(|item| {
          format!(
            "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
            name(item.class_id),
            item.score,
            item.bbox[0],
            item.bbox[1],
            item.bbox[2],
            item.bbox[3]
          )
        })
        .collect(),
      Some(Results::Classifications(c)) => c
        .iter()
        .map(|(score, class_id)| format!("{}, {:.4}", name(class_id), score))
        .collect(),
      _ => Vec::new(),
    }
  }

  /// 检测与分类写为 `.txt`，其余结果写为 `.json`。
  pub fn record(&self, frame: &Frame, path: &Path) -> Result<(), std::io::Error> {
    match frame.results() {
      Some(Results::Detections(_)) | Some(Results::Classifications(_)) => {
        std::fs::write(path.with_extension("txt"), self.lines(frame).join("\n"))
      }
      _ => {
        let json = frame
          .to_json()
          .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path.with_extension("json"), json.to_string())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    raster::ColorFormat,
    result::{DetectItem, Detections},
  };

  fn frame_with_box() -> Frame {
    let image = Image::filled(20, 20, ColorFormat::Rgb, [0, 0, 0]);
    let detections = Detections::from_items([DetectItem::new([0.25, 0.25, 0.75, 0.75], 0.8, 1)]);
    Frame::new(0, Some(image))
      .with_results(detections.into(), true)
      .with_labels(vec!["cat".to_string(), "dog".to_string()].into())
  }

  #[test]
  fn box_outline_is_drawn() {
    let draw = Draw {
      font: None,
      ..Draw::default()
    };
    let image = draw.draw_frame(&frame_with_box()).unwrap();
    assert_eq!(image.get_pixel(5, 10).0, class_color(1));
    assert_eq!(image.get_pixel(10, 10).0, [0, 0, 0]);
  }

  #[test]
  fn record_uses_label_names() {
    let record = Record {
      label_with_name: true,
    };
    assert_eq!(
      record.lines(&frame_with_box()),
      vec!["dog, 0.8000, 0.2500, 0.2500, 0.7500, 0.7500".to_string()]
    );
    let record = Record {
      label_with_name: false,
    };
    assert!(record.lines(&frame_with_box())[0].starts_with("1, "));
  }
}
