// 该文件是 Kanjian （看见） 项目的一部分。
// src/source/recording.rs - 传感器数据流回放
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

use chrono::{DateTime, Utc};
use image::ImageReader;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  raster::Image,
  source::{RawFrame, SensorMetadata, Source, SourceCapabilities, SourceError, SourceRead},
};

const RECORDING_SCHEME: &str = "recording";

/// 录制中的一帧；图像路径相对于录制文件所在目录。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordedFrame {
  #[serde(default)]
  pub image: Option<PathBuf>,
  #[serde(default, flatten)]
  pub metadata: SensorMetadata,
  #[serde(default)]
  pub timestamp: Option<DateTime<Utc>>,
}

/// 带内嵌推理输出的传感器数据流，以 JSON 保存。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
  pub capabilities: SourceCapabilities,
  pub frames: Vec<RecordedFrame>,
}

impl Recording {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, SourceError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
  }

  pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SourceError> {
    let content = serde_json::to_string_pretty(self)?;
    std::fs::write(path, content)?;
    Ok(())
  }
}

pub struct RecordingSource {
  name: String,
  base_dir: PathBuf,
  recording: Recording,
  cursor: usize,
  opened: bool,
}

impl RecordingSource {
  pub fn open_file(path: impl AsRef<Path>) -> Result<Self, SourceError> {
    let path = path.as_ref();
    let recording = Recording::load(path)?;
    info!(
      "加载录制文件 {}: {} 帧",
      path.display(),
      recording.frames.len()
    );
    let base_dir = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("."));
    Ok(Self::new(recording, base_dir).with_name(path.display().to_string()))
  }

  pub fn new(recording: Recording, base_dir: impl Into<PathBuf>) -> Self {
    Self {
      name: "recording".to_string(),
      base_dir: base_dir.into(),
      recording,
      cursor: 0,
      opened: false,
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  fn load_image(&self, path: &Path) -> Result<Image, SourceError> {
    let full = self.base_dir.join(path);
    debug!("读取录制图像: {}", full.display());
    let decoded = ImageReader::open(&full)?.decode()?.to_rgb8();
    let image = Image::from_rgb_image(decoded);
    Ok(image.to_color_format(self.recording.capabilities.color_format))
  }
}

impl FromUrl for RecordingSource {
  type Error = SourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != RECORDING_SCHEME {
      return Err(SourceError::SchemeMismatch);
    }
    RecordingSource::open_file(url.path())
  }
}

impl FromUrlWithScheme for RecordingSource {
  const SCHEME: &'static str = RECORDING_SCHEME;
}

impl Source for RecordingSource {
  fn name(&self) -> &str {
    &self.name
  }

  fn capabilities(&self) -> SourceCapabilities {
    self.recording.capabilities
  }

  fn open(&mut self) -> Result<(), SourceError> {
    self.cursor = 0;
    self.opened = true;
    Ok(())
  }

  fn read(&mut self) -> Result<SourceRead, SourceError> {
    if !self.opened {
      return Err(SourceError::NotOpen(self.name.clone()));
    }
    let Some(recorded) = self.recording.frames.get(self.cursor) else {
      return Ok(SourceRead::EndOfStream);
    };
    self.cursor += 1;

    let image = match &recorded.image {
      Some(path) => Some(self.load_image(path)?),
      None => None,
    };
    Ok(SourceRead::Frame(RawFrame {
      image,
      metadata: Some(recorded.metadata.clone()),
      timestamp: recorded.timestamp.unwrap_or_else(Utc::now),
    }))
  }

  fn close(&mut self) -> Result<(), SourceError> {
    self.opened = false;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn recording_round_trips_through_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stream.json");
    let recording = Recording {
      capabilities: SourceCapabilities::new(4056, 3040).with_embedded_inference(true),
      frames: vec![
        RecordedFrame {
          metadata: SensorMetadata {
            output_tensor: Some(vec![0.5]),
            output_tensor_info: None,
          },
          ..Default::default()
        },
        RecordedFrame::default(),
      ],
    };
    recording.save(&path).unwrap();

    let mut source = RecordingSource::open_file(&path).unwrap();
    assert!(source.capabilities().embedded_inference);
    source.open().unwrap();
    match source.read().unwrap() {
      SourceRead::Frame(frame) => {
        assert!(frame.image.is_none());
        assert_eq!(frame.metadata.unwrap().output_tensor, Some(vec![0.5]));
      }
      other => panic!("unexpected read {:?}", other),
    }
    assert!(matches!(source.read().unwrap(), SourceRead::Frame(_)));
    assert!(matches!(source.read().unwrap(), SourceRead::EndOfStream));
  }

  #[test]
  fn malformed_recording_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{\"frames\": 3}").unwrap();
    assert!(matches!(
      RecordingSource::open_file(&path),
      Err(SourceError::Json(_))
    ));
  }
}
