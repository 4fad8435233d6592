// 该文件是 Huamian （画面） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::{Parser, ValueEnum};
use url::Url;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
  /// MNIST 手写数字分类
  Digit,
  /// FER+ 表情分类
  Emotion,
  /// BlazeFace 人脸检测
  Face,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  /// 只处理第一帧
  Oneshot,
  /// 第一帧重复推理，测量平均耗时
  Repeat,
  /// 处理全部输入帧，Ctrl-C 结束
  Continuous,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorSize {
  #[value(name = "128")]
  Small,
  #[value(name = "256")]
  Large,
}

/// Huamian 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[arg(long, value_enum)]
  pub task: TaskKind,

  #[arg(long, value_enum, default_value = "oneshot")]
  pub mode: Mode,

  /// 模型路径，例如 onnx:///models/blazeface.onnx 或 rknn:///models/mnist.rknn?scale=255
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源，image:///path/to/image.png 或 folder:///path/to/images
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出，image:///out.png、folder:///records?record&always 或 log://
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 经典人脸检测器模型（表情任务使用）
  #[arg(long, value_name = "FILE")]
  pub cascade: Option<String>,

  /// 绘制文字使用的字体文件
  #[arg(long, value_name = "FILE")]
  pub font: Option<String>,

  /// 人脸检测置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub threshold: Option<f32>,

  /// 加权 NMS 的 IoU 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub iou_threshold: Option<f32>,

  /// BlazeFace 输入尺寸
  #[arg(long, value_enum, default_value = "128")]
  pub tensor_size: TensorSize,

  /// 连续模式下的最大帧数；重复模式下的重复次数
  #[arg(long, value_name = "COUNT")]
  pub frame_number: Option<usize>,
}
