// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/yolo26.rs - YOLO26 无锚框检测解码
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

use std::path::PathBuf;

use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{InputShape, ModelError, ModelInfo, NetworkModel, PostProcessor, load_labels},
  result::{DetectItem, Detections},
  tensor::Tensor,
};

const YOLO26_SCHEME: &str = "yolo26";
const YOLO26_CLASS_NUM: usize = 80;
const YOLO26_INPUT_SIZE: u32 = 640;
const YOLO26_STRIDES: [u32; 3] = [8, 16, 32];
const YOLO26_OBJECT_THRESH: f32 = 0.5;

pub const COCO_LABELS: [&str; 80] = [
  "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
  "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
  "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
  "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
  "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
  "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
  "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
  "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
  "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
  "teddy bear", "hair drier", "toothbrush",
];

/// 解码参数：输入尺寸、类别数、置信度阈值与各检测头步长。
#[derive(Debug, Clone, PartialEq)]
pub struct Yolo26Config {
  pub input_width: u32,
  pub input_height: u32,
  pub classes: usize,
  pub threshold: f32,
  pub strides: Vec<u32>,
}

impl Default for Yolo26Config {
  fn default() -> Self {
    Self {
      input_width: YOLO26_INPUT_SIZE,
      input_height: YOLO26_INPUT_SIZE,
      classes: YOLO26_CLASS_NUM,
      threshold: YOLO26_OBJECT_THRESH,
      strides: YOLO26_STRIDES.to_vec(),
    }
  }
}

impl Yolo26Config {
  fn heads(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
    self.strides.iter().map(|&s| {
      (
        (self.input_height / s) as usize,
        (self.input_width / s) as usize,
        s as f32,
      )
    })
  }

  /// 每个检测头输出一对张量：回归 `4 x H x W` 与分类 `C x H x W`。
  pub fn output_count(&self) -> usize {
    self.strides.len() * 2
  }
}

pub struct Yolo26Builder {
  model_path: PathBuf,
  labels: Option<PathBuf>,
  config: Yolo26Config,
}

impl FromUrl for Yolo26Builder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != YOLO26_SCHEME {
      return Err(ModelError::Config(format!(
        "模型路径必须使用 {} 方案",
        YOLO26_SCHEME
      )));
    }

    let mut builder = Yolo26Builder::new(url.path());
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "threshold" => {
          let threshold = value
            .parse::<f32>()
            .map_err(|e| ModelError::Config(format!("阈值 {} 无效: {}", value, e)))?;
          builder = builder.threshold(threshold);
        }
        "input" => {
          let shape = value.parse::<InputShape>()?;
          builder = builder.input_size(shape.width, shape.height);
        }
        "labels" => builder.labels = Some(PathBuf::from(&*value)),
        other => debug!("忽略未知参数: {}", other),
      }
    }
    Ok(builder)
  }
}

impl FromUrlWithScheme for Yolo26Builder {
  const SCHEME: &'static str = YOLO26_SCHEME;
}

impl Yolo26Builder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      labels: None,
      config: Yolo26Config::default(),
    }
  }

  pub fn threshold(mut self, threshold: f32) -> Self {
    self.config.threshold = threshold;
    self
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.config.input_width = width;
    self.config.input_height = height;
    self
  }

  pub fn build(self) -> Result<NetworkModel, ModelError> {
    info!("构建 YOLO26 模型: {}", self.model_path.display());
    let labels = match &self.labels {
      Some(path) => load_labels(path)?,
      None => COCO_LABELS.iter().map(|s| s.to_string()).collect(),
    };
    if labels.len() != self.config.classes {
      debug!(
        "标签数量 {} 与类别数 {} 不一致",
        labels.len(),
        self.config.classes
      );
    }

    let info = ModelInfo::new(
      "yolo26",
      self.model_path,
      InputShape::new(self.config.input_width, self.config.input_height),
    )
    .with_labels(labels);
    Ok(NetworkModel::new(info, PostProcessor::Yolo26(self.config)))
  }
}

/// 根据张量大小匹配回归和分类输出
/// 返回 (reg, cls) 元组，如果大小不匹配则返回 None
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
  head_idx: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
    Some((tensor1, tensor2))
  } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
    debug!("检测头 {}: 输出顺序交换", head_idx);
    Some((tensor2, tensor1))
  } else {
    error!(
      "检测头 {}: 输出大小不匹配 - 张量1: {}, 张量2: {}, 期望回归: {}, 期望分类: {}",
      head_idx,
      tensor1.len(),
      tensor2.len(),
      reg_expected,
      cls_expected
    );
    None
  }
}

/// 解码全部检测头，框坐标按输入尺寸归一化。
pub(crate) fn decode(outputs: &[Tensor], config: &Yolo26Config) -> Result<Detections, ModelError> {
  if outputs.len() != config.output_count() {
    return Err(ModelError::OutputCount {
      expected: config.output_count(),
      actual: outputs.len(),
    });
  }

  let input_w = config.input_width as f32;
  let input_h = config.input_height as f32;
  let mut items = Vec::new();

  for (head_idx, (map_h, map_w, stride)) in config.heads().enumerate() {
    let spatial = map_h * map_w;
    let reg_expected = 4 * spatial;
    let cls_expected = config.classes * spatial;

    // 后端输出顺序可能不同，按张量大小区分回归与分类
    let tensor1 = outputs[head_idx * 2].values();
    let tensor2 = outputs[head_idx * 2 + 1].values();
    let (reg, cls) =
      match_reg_cls_tensors(&tensor1, &tensor2, reg_expected, cls_expected, head_idx)
        .ok_or_else(|| {
          ModelError::Decode(format!("检测头 {} 的输出大小与配置不符", head_idx))
        })?;

    for h in 0..map_h {
      for w in 0..map_w {
        let idx = h * map_w + w;

        let (score, class_id) = {
          let mut max_logit = f32::MIN;
          let mut cls_idx = 0usize;
          for c in 0..config.classes {
            let logit = cls[c * spatial + idx];
            if logit > max_logit {
              max_logit = logit;
              cls_idx = c;
            }
          }
          (sigmoid(max_logit), cls_idx as u32)
        };

        if score <= config.threshold {
          continue;
        }

        let grid_x = (w as f32) + 0.5;
        let grid_y = (h as f32) + 0.5;

        let xmin = ((grid_x - reg[idx]) * stride).clamp(0.0, input_w);
        let ymin = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, input_h);
        let xmax = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, input_w);
        let ymax = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, input_h);

        items.push(DetectItem::new(
          [
            xmin / input_w,
            ymin / input_h,
            xmax / input_w,
            ymax / input_h,
          ],
          score,
          class_id,
        ));
      }
    }
  }

  debug!("检测到 {} 个物体", items.len());
  Ok(Detections::from_items(items))
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn small_config() -> Yolo26Config {
    Yolo26Config {
      input_width: 4,
      input_height: 4,
      classes: 2,
      threshold: 0.5,
      strides: vec![2],
    }
  }

  #[test]
  fn decodes_single_anchor() {
    let config = small_config();
    // 2x2 网格，只在 (h=1, w=0) 处给出类别 1 的高分
    let spatial = 4;
    let mut cls = vec![-10.0f32; 2 * spatial];
    cls[spatial + 2] = 4.0;
    let mut reg = vec![0.0f32; 4 * spatial];
    reg[2] = 0.5;
    reg[spatial + 2] = 0.5;
    reg[2 * spatial + 2] = 0.5;
    reg[3 * spatial + 2] = 0.5;

    let outputs = [
      Tensor::from_f32(vec![1, 2, 2, 2], cls).unwrap(),
      Tensor::from_f32(vec![1, 4, 2, 2], reg).unwrap(),
    ];
    let d = decode(&outputs, &config).unwrap();
    assert_eq!(d.len(), 1);
    let item = d.get(0).unwrap();
    assert_eq!(item.class_id, 1);
    assert!(item.score > 0.98);
    assert_eq!(item.bbox, [0.0, 0.5, 0.5, 1.0]);
  }

  #[test]
  fn rejects_wrong_output_count() {
    let outputs = [Tensor::from_f32(vec![1], vec![0.0]).unwrap()];
    assert!(matches!(
      decode(&outputs, &small_config()),
      Err(ModelError::OutputCount { .. })
    ));
  }

  #[test]
  fn rejects_unexpected_sizes() {
    let outputs = [
      Tensor::from_f32(vec![3], vec![0.0; 3]).unwrap(),
      Tensor::from_f32(vec![5], vec![0.0; 5]).unwrap(),
    ];
    assert!(matches!(
      decode(&outputs, &small_config()),
      Err(ModelError::Decode(_))
    ));
  }

  #[test]
  fn builder_reads_query() {
    let url = Url::parse("yolo26:///models/yolo26n.rknn?threshold=0.3&input=320x320").unwrap();
    let model = Yolo26Builder::from_url(&url).unwrap().build().unwrap();
    use crate::model::Model;
    assert_eq!(model.info().input_shape, InputShape::new(320, 320));
    assert_eq!(model.info().labels.len(), 80);
    assert_eq!(model.info().file.path, PathBuf::from("/models/yolo26n.rknn"));
  }
}
