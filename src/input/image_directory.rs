// 该文件是 Huamian （画面） 项目的一部分。
// src/input/image_directory.rs - 图像目录输入
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

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use super::read_image_file::read_rgb_image;
use crate::{FromUrl, FromUrlWithScheme, url_path};

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "gif", "webp"];

#[derive(Error, Debug)]
pub enum ImageDirectoryInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("目录中没有图像文件: {0}")]
  EmptyDirectory(String),
}

/// 按文件名顺序逐帧读取目录中的图像；无法解码的文件记录后跳过
pub struct ImageDirectoryInput {
  files: std::vec::IntoIter<PathBuf>,
}

impl FromUrlWithScheme for ImageDirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageDirectoryInput {
  type Error = ImageDirectoryInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageDirectoryInputError::SchemeMismatch);
    }

    Self::open(url_path(url))
  }
}

impl ImageDirectoryInput {
  pub fn open(dir: impl AsRef<Path>) -> Result<Self, ImageDirectoryInputError> {
    let dir = dir.as_ref();
    let mut files = std::fs::read_dir(dir)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| path.is_file() && is_image_file(path))
      .collect::<Vec<_>>();

    if files.is_empty() {
      return Err(ImageDirectoryInputError::EmptyDirectory(
        dir.display().to_string(),
      ));
    }

    files.sort();
    info!("图像目录 {} 中共 {} 个文件", dir.display(), files.len());

    Ok(Self {
      files: files.into_iter(),
    })
  }
}

fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    .unwrap_or(false)
}

impl Iterator for ImageDirectoryInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      match read_rgb_image(&path) {
        Ok(image) => {
          debug!("读取图像: {}", path.display());
          return Some(image);
        }
        Err(e) => warn!("跳过无法读取的图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}
