// 该文件是 Huamian （画面） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  path::PathBuf,
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{Datelike, Utc};
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Render, annotation::Annotation, draw::Draw},
  url_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 按日期目录逐帧保存
///
/// 默认保存绘制后的图像；`record` 模式保存原始帧并在旁边写入同名 `.json` 记录。
/// 结果为空的帧只有在 `always` 时才保存。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  record: bool,
  always: bool,
  frame_counter: AtomicU16,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let record = uri.query_pairs().any(|(k, _)| k == "record");
    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let draw = if record {
      Draw::without_font()
    } else {
      Draw::from_url(uri)
    };

    Ok(DirectoryRecordOutput::new(url_path(uri), draw, record, always))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, draw: Draw, record: bool, always: bool) -> Self {
    let directory = directory.into();
    info!(
      "目录记录输出: {}, 记录模式: {}, 总是保存: {}",
      directory.display(),
      record,
      always
    );
    Self {
      directory,
      draw,
      record,
      always,
      frame_counter: AtomicU16::new(0),
    }
  }

  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl<A: Annotation> Render<RgbImage, A> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &A) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      debug!("结果为空，跳过保存");
      return Ok(());
    }

    let path = self.frame_path()?;
    if self.record {
      frame.save(&path)?;
      let json = serde_json::to_string_pretty(&result.to_record())?;
      std::fs::write(path.with_extension("json"), json)?;
    } else {
      let mut image = frame.clone();
      result.draw(&self.draw, &mut image);
      image.save(&path)?;
    }
    debug!("保存帧: {}", path.display());

    Ok(())
  }
}
