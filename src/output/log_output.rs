// 该文件是 Huamian （画面） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Render, annotation::Annotation},
};

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 只把结果文本写入日志，不保存图像
#[derive(Default)]
pub struct LogOutput {
  frames: AtomicU64,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch);
    }
    Ok(LogOutput::default())
  }
}

impl<Frame, A: Annotation> Render<Frame, A> for LogOutput {
  type Error = LogOutputError;

  fn render_result(&self, _frame: &Frame, result: &A) -> Result<(), Self::Error> {
    let frame = self.frames.fetch_add(1, Ordering::Relaxed);
    if result.is_empty() {
      info!("第 {} 帧: 无结果", frame);
    }
    for line in result.to_lines() {
      info!("第 {} 帧: {}", frame, line);
    }
    Ok(())
  }
}
