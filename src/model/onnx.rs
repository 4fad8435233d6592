// 该文件是 Huamian （画面） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use std::sync::Mutex;

use ort::{GraphOptimizationLevel, Session, Tensor};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::OutputTensor, model::Executor, query_param, url_path};

const ONNX_DEFAULT_THREADS: usize = 1;

#[derive(Error, Debug)]
pub enum OnnxError {
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("推理会话已损坏")]
  SessionPoisoned,
}

/// 基于 ONNX Runtime 的 CPU 推理后端
///
/// URL 形如 `onnx:///path/to/model.onnx?threads=2`。
pub struct OnnxExecutor {
  session: Mutex<Session>,
}

impl FromUrlWithScheme for OnnxExecutor {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxExecutor {
  type Error = OnnxError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let threads = query_param(url, "threads").unwrap_or(ONNX_DEFAULT_THREADS);
    Self::open(&url_path(url), threads)
  }
}

impl OnnxExecutor {
  pub fn open(model_path: &str, threads: usize) -> Result<Self, OnnxError> {
    info!("加载 ONNX 模型: {}", model_path);
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(threads)?
      .commit_from_file(model_path)?;
    info!("模型加载完成");

    debug!(
      "模型输入数量: {}, 输出数量: {}",
      session.inputs.len(),
      session.outputs.len()
    );

    Ok(Self {
      session: Mutex::new(session),
    })
  }
}

impl Executor for OnnxExecutor {
  type Error = OnnxError;

  fn run(&self, input: &[f32], shape: [usize; 4]) -> Result<Vec<OutputTensor>, Self::Error> {
    let shape = shape.iter().map(|&d| d as i64).collect::<Vec<_>>();
    let tensor = Tensor::<f32>::from_array((shape, input.to_vec()))?;

    let session = self.session.lock().map_err(|_| OnnxError::SessionPoisoned)?;
    debug!("执行模型推理");
    let outputs = session.run(ort::inputs![tensor]?)?;

    let mut tensors = Vec::with_capacity(outputs.len());
    for i in 0..outputs.len() {
      let view = outputs[i].try_extract_tensor::<f32>()?;
      tensors.push(OutputTensor::new(
        view.shape().to_vec(),
        view.iter().copied().collect(),
      ));
    }
    debug!(
      "模型输出形状: {:?}",
      tensors.iter().map(|t| &t.shape).collect::<Vec<_>>()
    );
    Ok(tensors)
  }
}
