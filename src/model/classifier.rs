// 该文件是 Huamian （画面） 项目的一部分。
// src/model/classifier.rs - 手写数字与表情分类
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

use image::{GrayImage, RgbImage, imageops};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  frame::{AsNhwcTensor, GrayTensor},
  model::{ClassifyResult, DigitLabel, EmotionLabel, Executor, Model, WithLabel, softmax},
  roi::{CascadeDetector, CascadeParams, crop_roi, select_face_roi},
};

pub const DIGIT_INPUT_SIZE: u32 = 28;
pub const EMOTION_INPUT_SIZE: u32 = 64;

#[derive(Error, Debug)]
pub enum ClassifierError {
  #[error("推理错误: {0}")]
  ExecutorError(Box<dyn std::error::Error + Send + Sync>),
  #[error("模型没有输出")]
  MissingOutput,
  #[error("模型输出大小不匹配: 期望至少 {expected}, 实际为 {actual}")]
  OutputSize { expected: usize, actual: usize },
}

/// 运行模型并对第一个输出的前 `T::NUM_CLASSES` 个分数做 softmax
fn run_and_normalize<E: Executor, T: WithLabel>(
  executor: &E,
  tensor: &impl AsNhwcTensor,
) -> Result<Box<[f32]>, ClassifierError> {
  let outputs = executor
    .run(tensor.as_nhwc(), tensor.shape())
    .map_err(|e| ClassifierError::ExecutorError(Box::new(e)))?;

  let scores = outputs.first().ok_or(ClassifierError::MissingOutput)?;
  if scores.len() < T::NUM_CLASSES {
    return Err(ClassifierError::OutputSize {
      expected: T::NUM_CLASSES,
      actual: scores.len(),
    });
  }

  let probs = softmax(&scores.data[..T::NUM_CLASSES]);
  debug!("分类概率: {:?}", probs);
  Ok(probs)
}

fn resize_gray(gray: &GrayImage, size: u32) -> GrayImage {
  imageops::resize(gray, size, size, imageops::FilterType::Triangle)
}

/// MNIST 手写数字分类：28×28 灰度，像素缩放到 [0, 1]
pub struct DigitClassifier<E> {
  executor: E,
}

impl<E: Executor> DigitClassifier<E> {
  pub fn new(executor: E) -> Self {
    info!("创建手写数字分类器");
    Self { executor }
  }

  pub fn preprocess(image: &RgbImage) -> GrayTensor<DIGIT_INPUT_SIZE, DIGIT_INPUT_SIZE> {
    let gray = imageops::grayscale(image);
    let resized = resize_gray(&gray, DIGIT_INPUT_SIZE);
    GrayTensor::from_gray_image(&resized, 1.0 / 255.0)
  }
}

impl<E: Executor> Model for DigitClassifier<E> {
  type Input = RgbImage;
  type Output = ClassifyResult<DigitLabel>;
  type Error = ClassifierError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let tensor = Self::preprocess(input);
    let probs = run_and_normalize::<E, DigitLabel>(&self.executor, &tensor)?;
    Ok(ClassifyResult::new(probs, None))
  }
}

/// FER+ 表情分类：先用经典检测器定位人脸，64×64 灰度，像素保持 [0, 255]
pub struct EmotionClassifier<E, D> {
  executor: E,
  detector: D,
  params: CascadeParams,
}

impl<E: Executor, D: CascadeDetector> EmotionClassifier<E, D> {
  pub fn new(executor: E, detector: D) -> Self {
    info!("创建表情分类器");
    Self {
      executor,
      detector,
      params: CascadeParams::default(),
    }
  }

  pub fn with_params(mut self, params: CascadeParams) -> Self {
    self.params = params;
    self
  }

  pub fn preprocess(
    &self,
    image: &RgbImage,
  ) -> (
    GrayTensor<EMOTION_INPUT_SIZE, EMOTION_INPUT_SIZE>,
    Option<crate::geometry::PixelRect>,
  ) {
    let gray = imageops::grayscale(image);

    let faces = self.detector.detect(&gray, &self.params);
    let roi = select_face_roi(&faces);
    match roi {
      Some(rect) => debug!("检测到人脸: {:?}", rect),
      None => debug!("未检测到人脸，使用整幅图像"),
    }

    let face = crop_roi(&gray, roi);
    let resized = resize_gray(&face, EMOTION_INPUT_SIZE);
    (GrayTensor::from_gray_image(&resized, 1.0), roi)
  }
}

impl<E: Executor, D: CascadeDetector> Model for EmotionClassifier<E, D> {
  type Input = RgbImage;
  type Output = ClassifyResult<EmotionLabel>;
  type Error = ClassifierError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (tensor, roi) = self.preprocess(input);
    let probs = run_and_normalize::<E, EmotionLabel>(&self.executor, &tensor)?;
    Ok(ClassifyResult::new(probs, roi))
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;

  use image::Rgb;

  use super::*;
  use crate::{frame::OutputTensor, geometry::PixelRect};

  /// 记录输入并返回固定输出的推理后端
  struct MockExecutor {
    outputs: Vec<OutputTensor>,
    seen: RefCell<Vec<(Vec<f32>, [usize; 4])>>,
  }

  impl MockExecutor {
    fn returning(scores: Vec<f32>) -> Self {
      Self {
        outputs: vec![OutputTensor::flat(scores)],
        seen: RefCell::new(Vec::new()),
      }
    }
  }

  impl Executor for MockExecutor {
    type Error = std::io::Error;

    fn run(&self, input: &[f32], shape: [usize; 4]) -> Result<Vec<OutputTensor>, Self::Error> {
      self.seen.borrow_mut().push((input.to_vec(), shape));
      Ok(self.outputs.clone())
    }
  }

  struct FailingExecutor;

  impl Executor for FailingExecutor {
    type Error = std::io::Error;

    fn run(&self, _input: &[f32], _shape: [usize; 4]) -> Result<Vec<OutputTensor>, Self::Error> {
      Err(std::io::Error::other("后端不可用"))
    }
  }

  struct FixedCascade(Vec<PixelRect>);

  impl CascadeDetector for FixedCascade {
    fn detect(&self, _gray: &GrayImage, _params: &CascadeParams) -> Vec<PixelRect> {
      self.0.clone()
    }
  }

  #[test]
  fn digit_black_image_with_zero_scores_is_uniform() {
    let executor = MockExecutor::returning(vec![0.0; 10]);
    let classifier = DigitClassifier::new(executor);
    let result = classifier.infer(&RgbImage::new(28, 28)).unwrap();

    assert_eq!(result.probs.len(), 10);
    assert!(result.probs.iter().all(|&p| (p - 0.1).abs() < 1e-6));
    assert_eq!(result.roi, None);

    let seen = classifier.executor.seen.borrow();
    assert_eq!(seen[0].1, [1, 28, 28, 1]);
    assert!(seen[0].0.iter().all(|&v| v == 0.0));
  }

  #[test]
  fn digit_input_is_scaled_to_unit_range() {
    let executor = MockExecutor::returning(vec![0.0; 10]);
    let classifier = DigitClassifier::new(executor);
    classifier
      .infer(&RgbImage::from_pixel(56, 56, Rgb([255, 255, 255])))
      .unwrap();

    let seen = classifier.executor.seen.borrow();
    assert!(seen[0].0.iter().all(|&v| (v - 1.0).abs() < 1e-6));
  }

  #[test]
  fn digit_best_follows_largest_score() {
    let mut scores = vec![0.0; 10];
    scores[7] = 5.0;
    let classifier = DigitClassifier::new(MockExecutor::returning(scores));
    let result = classifier.infer(&RgbImage::new(28, 28)).unwrap();
    assert_eq!(result.best().map(|(l, _)| l.to_label_id()), Some(7));
  }

  #[test]
  fn extra_scores_are_ignored() {
    let classifier = DigitClassifier::new(MockExecutor::returning(vec![1.0; 12]));
    let result = classifier.infer(&RgbImage::new(28, 28)).unwrap();
    assert_eq!(result.probs.len(), 10);
  }

  #[test]
  fn short_output_is_an_error() {
    let classifier = DigitClassifier::new(MockExecutor::returning(vec![0.0; 4]));
    let err = classifier.infer(&RgbImage::new(28, 28)).unwrap_err();
    assert!(matches!(
      err,
      ClassifierError::OutputSize {
        expected: 10,
        actual: 4
      }
    ));
  }

  #[test]
  fn executor_failure_propagates() {
    let classifier = DigitClassifier::new(FailingExecutor);
    let err = classifier.infer(&RgbImage::new(28, 28)).unwrap_err();
    assert!(matches!(err, ClassifierError::ExecutorError(_)));
  }

  #[test]
  fn emotion_without_face_uses_whole_image() {
    let executor = MockExecutor::returning(vec![0.0; 8]);
    let classifier = EmotionClassifier::new(executor, crate::roi::NullCascade);
    let result = classifier
      .infer(&RgbImage::from_pixel(100, 80, Rgb([128, 128, 128])))
      .unwrap();

    assert_eq!(result.roi, None);
    assert!(result.probs.iter().all(|&p| (p - 0.125).abs() < 1e-6));

    let seen = classifier.executor.seen.borrow();
    assert_eq!(seen[0].1, [1, 64, 64, 1]);
    // 像素保持 0..255 范围
    assert!(seen[0].0.iter().all(|&v| (v - 128.0).abs() < 1.0));
  }

  #[test]
  fn emotion_reports_squared_roi() {
    let executor = MockExecutor::returning(vec![0.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    let cascade = FixedCascade(vec![
      PixelRect::new(10, 10, 20, 40),
      PixelRect::new(60, 60, 10, 10),
    ]);
    let classifier = EmotionClassifier::new(executor, cascade);
    let result = classifier.infer(&RgbImage::new(100, 100)).unwrap();

    assert_eq!(result.roi, Some(PixelRect::new(0, 10, 40, 40)));
    assert_eq!(result.best().map(|(l, _)| l), Some(EmotionLabel::Happiness));
  }
}
