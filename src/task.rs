// 该文件是 Huamian （画面） 项目的一部分。
// src/task.rs - 任务驱动与推理流水线
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
  thread,
  time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{model::Model, output::Render};

/// 一个模型加一个输出端；一次只处理一帧
pub struct Pipeline<M, O> {
  model: M,
  output: O,
  frames: usize,
  elapsed: Duration,
}

impl<M, O> Pipeline<M, O>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render<M::Input, M::Output>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(model: M, output: O) -> Self {
    debug!("创建推理流水线");
    Self {
      model,
      output,
      frames: 0,
      elapsed: Duration::ZERO,
    }
  }

  /// 推理并渲染一帧，返回推理结果
  pub fn step(&mut self, frame: &M::Input) -> anyhow::Result<M::Output> {
    let now = Instant::now();
    let result = self.model.infer(frame)?;
    let infer_elapsed = now.elapsed();
    self.output.render_result(frame, &result)?;
    let total_elapsed = now.elapsed();

    self.frames += 1;
    self.elapsed += infer_elapsed;
    debug!(
      "({}) 推理耗时: {:.2?}, 含渲染: {:.2?}",
      self.frames, infer_elapsed, total_elapsed
    );
    Ok(result)
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  pub fn frames(&self) -> usize {
    self.frames
  }

  /// 显式释放模型与输出端
  pub fn dispose(self) {
    info!("释放推理流水线，共处理 {} 帧", self.frames);
  }
}

impl<M, O> Drop for Pipeline<M, O> {
  fn drop(&mut self) {
    if self.frames > 0 {
      debug!(
        "流水线平均推理时间: {:.2?}",
        self.elapsed / self.frames as u32
      );
    }
  }
}

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, pipeline: Pipeline<M, O>) -> Result<(), Self::Error>;
}

pub struct OneShotTask;

impl<I, M, O> Task<I, M, O> for OneShotTask
where
  I: Iterator<Item = M::Input>,
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render<M::Input, M::Output>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut pipeline: Pipeline<M, O>) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    pipeline.step(&frame)?;
    info!("推理与渲染完成，耗时: {:.2?}", now.elapsed());
    pipeline.dispose();

    Ok(())
  }
}

/// 同一帧重复推理，用于测量延迟；前两次作为预热不计入平均
pub struct RepeatShotTask {
  repeat_times: usize,
}

const REPEAT_WARMUP: usize = 2;

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { repeat_times: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times;
    self
  }
}

impl<I, M, O> Task<I, M, O> for RepeatShotTask
where
  I: Iterator<Item = M::Input>,
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render<M::Input, M::Output>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut pipeline: Pipeline<M, O>) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.repeat_times);
    for i in 0..self.repeat_times {
      let now = Instant::now();
      pipeline.step(&frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      times.push(elapsed);
    }

    if times.len() > REPEAT_WARMUP {
      warn!(
        "平均推理时间: {:.2?}",
        times.iter().skip(REPEAT_WARMUP).sum::<Duration>()
          / (times.len() - REPEAT_WARMUP) as u32
      );
    }
    pipeline.dispose();

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<I, M, O> Task<I, M, O> for ContinuousTask
where
  I: Iterator<Item = M::Input>,
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render<M::Input, M::Output>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, mut pipeline: Pipeline<M, O>) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    let handler = ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    });
    if let Err(e) = handler {
      warn!("无法设置 Ctrl-C 处理器: {}", e);
    }

    let mut frame_index = 0usize;
    for frame in input {
      frame_index = frame_index.wrapping_add(1);
      info!("处理第 {} 帧图像", frame_index);
      let now = Instant::now();
      pipeline.step(&frame)?;
      info!("推理完成，耗时: {:.2?}", now.elapsed());

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }
    pipeline.dispose();

    info!("任务完成，退出");
    Ok(())
  }
}
