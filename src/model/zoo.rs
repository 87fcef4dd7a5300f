// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/zoo.rs - 模型目录与下载缓存
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
  fs,
  path::{Path, PathBuf},
  time::Duration,
};

use thiserror::Error;
use tracing::{info, warn};

const ZOO_ENV: &str = "KANJIAN_MODEL_ZOO";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Error, Debug)]
pub enum DownloadError {
  #[error("模型名称无效: {0}")]
  InvalidName(String),
  #[error("未配置模型仓库地址, 无法获取 {0} (可设置环境变量 KANJIAN_MODEL_ZOO)")]
  NotConfigured(String),
  #[error("无法确定缓存目录")]
  NoCacheDir,
  #[error("下载 {url} 失败: HTTP {status}")]
  Status { url: String, status: u16 },
  #[error("HTTP 请求错误: {0}")]
  Http(#[from] reqwest::Error),
  #[error("文件读写错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 本地路径或目录名称到模型文件的解析。
///
/// 目录名称对应 `<base_url>/<name>`，下载后保存在缓存目录中，之后直接复用。
/// 下载失败不会自动重试。
#[derive(Debug, Clone)]
pub struct ModelZoo {
  base_url: Option<String>,
  cache_dir: PathBuf,
}

impl ModelZoo {
  pub fn new(base_url: Option<String>, cache_dir: impl Into<PathBuf>) -> Self {
    Self {
      base_url,
      cache_dir: cache_dir.into(),
    }
  }

  /// 仓库地址取自环境变量，缓存位于用户缓存目录下的 `kanjian/models`。
  pub fn from_env() -> Result<Self, DownloadError> {
    let cache_dir = dirs::cache_dir()
      .ok_or(DownloadError::NoCacheDir)?
      .join("kanjian")
      .join("models");
    Ok(Self::new(std::env::var(ZOO_ENV).ok(), cache_dir))
  }

  pub fn cache_dir(&self) -> &Path {
    &self.cache_dir
  }

  pub fn resolve(&self, name_or_path: &str) -> Result<PathBuf, DownloadError> {
    let local = Path::new(name_or_path);
    if local.is_file() {
      return Ok(local.to_path_buf());
    }

    validate_name(name_or_path)?;
    let cached = self.cache_dir.join(name_or_path);
    if cached.is_file() {
      info!("使用缓存模型: {}", cached.display());
      return Ok(cached);
    }

    let base = self
      .base_url
      .as_deref()
      .ok_or_else(|| DownloadError::NotConfigured(name_or_path.to_string()))?;
    self.download(base, name_or_path, &cached)?;
    Ok(cached)
  }

  /// 下载中的临时文件，保留完整文件名以区分不同扩展名的模型。
  fn partial_path(&self, name: &str) -> PathBuf {
    self.cache_dir.join(format!("{}.part", name))
  }

  fn download(&self, base: &str, name: &str, target: &Path) -> Result<(), DownloadError> {
    let url = format!(
      "{}/{}",
      base.trim_end_matches('/'),
      urlencoding::encode(name)
    );
    info!("下载模型 {} 自 {}", name, url);

    let client = reqwest::blocking::Client::builder()
      .timeout(DOWNLOAD_TIMEOUT)
      .build()?;
    let response = client.get(&url).send()?;
    let status = response.status();
    if !status.is_success() {
      warn!("下载模型失败: {} 返回 {}", url, status);
      return Err(DownloadError::Status {
        url,
        status: status.as_u16(),
      });
    }
    let bytes = response.bytes()?;

    // 先写临时文件再改名，避免留下残缺的缓存
    fs::create_dir_all(&self.cache_dir)?;
    let partial = self.partial_path(name);
    fs::write(&partial, &bytes)?;
    if let Err(e) = fs::rename(&partial, target) {
      let _ = fs::remove_file(&partial);
      return Err(e.into());
    }

    info!("模型已保存: {} ({} 字节)", target.display(), bytes.len());
    Ok(())
  }
}

fn validate_name(name: &str) -> Result<(), DownloadError> {
  if name.is_empty()
    || name.len() > 255
    || name.contains("..")
    || name.contains('/')
    || name.contains('\\')
  {
    return Err(DownloadError::InvalidName(name.to_string()));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn local_paths_are_returned_as_is() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("net.rpk");
    fs::write(&file, b"rpk").unwrap();
    let zoo = ModelZoo::new(None, dir.path().join("cache"));
    assert_eq!(zoo.resolve(file.to_str().unwrap()).unwrap(), file);
  }

  #[test]
  fn traversal_names_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let zoo = ModelZoo::new(Some("http://127.0.0.1:9".to_string()), dir.path());
    for name in ["../etc/passwd", "a/b.rpk", "", "..\\x"] {
      assert!(matches!(
        zoo.resolve(name),
        Err(DownloadError::InvalidName(_))
      ));
    }
  }

  #[test]
  fn cached_models_skip_download() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("cached.rpk"), b"rpk").unwrap();
    let zoo = ModelZoo::new(None, dir.path());
    assert_eq!(
      zoo.resolve("cached.rpk").unwrap(),
      dir.path().join("cached.rpk")
    );
  }

  #[test]
  fn partial_files_keep_the_extension() {
    let zoo = ModelZoo::new(None, "/tmp/zoo");
    assert_ne!(zoo.partial_path("net.rpk"), zoo.partial_path("net.onnx"));
    assert_eq!(zoo.partial_path("net.rpk"), Path::new("/tmp/zoo/net.rpk.part"));
  }

  #[test]
  fn missing_base_url_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let zoo = ModelZoo::new(None, dir.path());
    assert!(matches!(
      zoo.resolve("net.rpk"),
      Err(DownloadError::NotConfigured(_))
    ));
  }
}
