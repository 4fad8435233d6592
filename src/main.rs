// 该文件是 Huamian （画面） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use huamian::{
  FromUrl,
  input::InputWrapper,
  letterbox::LetterboxMapper,
  model::{
    BlazeFaceBuilder, BlazeFaceParams, DigitClassifier, EmotionClassifier, ExecutorWrapper, Model,
  },
  output::{OutputWrapper, Render},
  roi::{CascadeDetector, NullCascade},
  task::{ContinuousTask, OneShotTask, Pipeline, RepeatShotTask, Task},
};

use args::{Args, Mode, TaskKind, TensorSize};

fn run_mode<M>(args: &Args, input: InputWrapper, model: M, output: OutputWrapper) -> Result<()>
where
  M: Model<Input = image::RgbImage>,
  M::Error: std::error::Error + Send + Sync + 'static,
  OutputWrapper: Render<image::RgbImage, M::Output, Error = huamian::output::OutputError>,
{
  let pipeline = Pipeline::new(model, output);
  match args.mode {
    Mode::Oneshot => OneShotTask.run_task(input, pipeline),
    Mode::Repeat => {
      let mut task = RepeatShotTask::default();
      if let Some(n) = args.frame_number {
        task = task.with_repeat_times(n);
      }
      task.run_task(input, pipeline)
    }
    Mode::Continuous => ContinuousTask::default()
      .with_frame_number(args.frame_number)
      .run_task(input, pipeline),
  }
}

fn cascade_detector(path: Option<&str>) -> Box<dyn CascadeDetector> {
  match path {
    #[cfg(feature = "rustface")]
    Some(path) => Box::new(huamian::roi::SeetaFaceDetector::open_or_disabled(path)),
    #[cfg(not(feature = "rustface"))]
    Some(path) => {
      tracing::error!("未启用 rustface 特性，忽略人脸检测模型 {}", path);
      Box::new(NullCascade)
    }
    None => Box::new(NullCascade),
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("任务: {:?}, 模式: {:?}", args.task, args.mode);
  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let mut output_url = args.output.clone();
  if let Some(font) = &args.font {
    output_url.query_pairs_mut().append_pair("font", font);
  }

  let input = InputWrapper::from_url(&args.input)?;
  let executor = ExecutorWrapper::from_url(&args.model)?;
  let output = OutputWrapper::from_url(&output_url)?;

  match args.task {
    TaskKind::Digit => run_mode(&args, input, DigitClassifier::new(executor), output),
    TaskKind::Emotion => {
      let cascade = cascade_detector(args.cascade.as_deref());
      run_mode(&args, input, EmotionClassifier::new(executor, cascade), output)
    }
    TaskKind::Face => {
      let mut params = BlazeFaceParams::from_url(&args.model);
      if let Some(threshold) = args.threshold {
        params.threshold = threshold;
      }
      if let Some(iou) = args.iou_threshold {
        params.iou_threshold = iou;
      }
      info!("人脸检测参数: {:?}, 输入尺寸: {:?}", params, args.tensor_size);

      let builder = BlazeFaceBuilder::new(executor).params(params);
      match args.tensor_size {
        TensorSize::Small => run_mode(&args, input, LetterboxMapper::new(builder.build::<128>()), output),
        TensorSize::Large => run_mode(&args, input, LetterboxMapper::new(builder.build::<256>()), output),
      }
    }
  }
}
