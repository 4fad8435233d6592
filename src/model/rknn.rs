// 该文件是 Huamian （画面） 项目的一部分。
// src/model/rknn.rs - RKNN NPU 推理后端
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::OutputTensor, model::Executor, query_param, url_path};

const RKNN_NUM_INPUTS: u32 = 1;

#[derive(Error, Debug)]
pub enum RknnError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

impl RknnError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnError::ModelInvalid(msg.to_string(), e)
  }
}

/// Rockchip NPU 推理后端
///
/// NPU 接收 u8 输入：每个值按 `(v + offset) * scale` 量化，
/// 参数来自 URL 查询，例如 `rknn:///model.rknn?scale=127.5&offset=1`。
pub struct RknnExecutor {
  context: Context,
  num_outputs: u32,
  scale: f32,
  offset: f32,
}

impl FromUrlWithScheme for RknnExecutor {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnExecutor {
  type Error = RknnError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let scale = query_param(url, "scale").unwrap_or(1.0);
    let offset = query_param(url, "offset").unwrap_or(0.0);
    Self::open(&url_path(url), InitFlags::default(), scale, offset)
  }
}

impl RknnExecutor {
  pub fn open(model_path: &str, flags: InitFlags, scale: f32, offset: f32) -> Result<Self, RknnError> {
    info!("加载模型文件: {}", model_path);
    let model_data = std::fs::read(model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, flags)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(RknnError::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknnError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknnError::invalid("无法获取输出数量", e))?;

    if num_inputs != RKNN_NUM_INPUTS {
      let msg = format!("预期模型输入数量为 {}, 实际为 {}", RKNN_NUM_INPUTS, num_inputs);
      error!("{}", msg);
      return Err(RknnError::invalid(&msg, rknpu::Error::InvalidModel));
    }
    debug!("模型输出数量: {}", num_outputs);
    info!("模型加载完成");

    Ok(Self {
      context,
      num_outputs,
      scale,
      offset,
    })
  }

  fn quantize(&self, input: &[f32]) -> Vec<u8> {
    input
      .iter()
      .map(|&v| ((v + self.offset) * self.scale).round().clamp(0.0, 255.0) as u8)
      .collect()
  }
}

impl Executor for RknnExecutor {
  type Error = RknnError;

  fn run(&self, input: &[f32], shape: [usize; 4]) -> Result<Vec<OutputTensor>, Self::Error> {
    debug!("设置模型输入, 形状: {:?}", shape);
    let quantized = self.quantize(input);
    self
      .context
      .set_input(0, &quantized, TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    self.context.run()?;

    debug!("获取模型输出");
    let output = self.context.get_outputs()?;
    let mut tensors = Vec::with_capacity(self.num_outputs as usize);
    for i in 0..self.num_outputs as usize {
      let data = output.get_f32(i)?;
      tensors.push(OutputTensor::flat(data.to_vec()));
    }
    Ok(tensors)
  }
}
