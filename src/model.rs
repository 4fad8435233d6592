// 该文件是 Huamian （画面） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl,
  frame::OutputTensor,
  geometry::{PixelRect, Point2},
};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 外部推理运行时：输入一个 NHWC 张量，返回全部输出张量
pub trait Executor {
  type Error: std::error::Error + Send + Sync + 'static;

  fn run(&self, input: &[f32], shape: [usize; 4]) -> Result<Vec<OutputTensor>, Self::Error>;
}

impl<E: Executor + ?Sized> Executor for Box<E> {
  type Error = E::Error;

  fn run(&self, input: &[f32], shape: [usize; 4]) -> Result<Vec<OutputTensor>, Self::Error> {
    (**self).run(input, shape)
  }
}

/// 六个人脸关键点
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Keypoints {
  pub left_eye: Point2,
  pub right_eye: Point2,
  pub nose: Point2,
  pub mouth: Point2,
  pub left_ear: Point2,
  pub right_ear: Point2,
}

impl Keypoints {
  pub const COUNT: usize = 6;

  pub fn from_array(points: [Point2; Self::COUNT]) -> Self {
    let [left_eye, right_eye, nose, mouth, left_ear, right_ear] = points;
    Self {
      left_eye,
      right_eye,
      nose,
      mouth,
      left_ear,
      right_ear,
    }
  }

  pub fn to_array(&self) -> [Point2; Self::COUNT] {
    [
      self.left_eye,
      self.right_eye,
      self.nose,
      self.mouth,
      self.left_ear,
      self.right_ear,
    ]
  }

  pub fn map(&self, f: impl Fn(Point2) -> Point2) -> Self {
    Self::from_array(self.to_array().map(f))
  }
}

/// 人脸检测结果，所有坐标均为归一化坐标
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FaceDetection {
  pub score: f32,
  pub center: Point2,
  /// (宽, 高)
  pub extent: Point2,
  pub keypoints: Keypoints,
}

impl FaceDetection {
  /// [x_min, y_min, x_max, y_max]
  pub fn bbox(&self) -> [f32; 4] {
    [
      self.center.x - self.extent.x / 2.0,
      self.center.y - self.extent.y / 2.0,
      self.center.x + self.extent.x / 2.0,
      self.center.y + self.extent.y / 2.0,
    ]
  }

  /// 将中心与关键点限制在 [0, 1] 内，尺寸不变。
  ///
  /// 模型输出本身不做限制；`Draw` 在绘制关键点前调用此方法。
  pub fn clamped(&self) -> Self {
    Self {
      center: self.center.clamped(),
      keypoints: self.keypoints.map(Point2::clamped),
      ..*self
    }
  }

  /// 分数、中心、尺寸与关键点均为有限值
  pub fn is_finite(&self) -> bool {
    self.score.is_finite()
      && self.center.is_finite()
      && self.extent.is_finite()
      && self.keypoints.to_array().iter().all(Point2::is_finite)
  }
}

#[derive(Debug, Clone, Default)]
pub struct FaceDetectResult {
  pub items: Box<[FaceDetection]>,
}

impl FaceDetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

pub trait WithLabel: Sized + Copy + std::fmt::Debug {
  const NUM_CLASSES: usize;
  /// 文本输出时标签的最小宽度
  const LABEL_WIDTH: usize = 0;

  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Option<Self>;
}

/// 分类结果：每个类别一个概率
#[derive(Debug, Clone)]
pub struct ClassifyResult<T> {
  pub probs: Box<[f32]>,
  /// 实际参与分类的图像区域，`None` 表示整幅图像
  pub roi: Option<PixelRect>,
  _label: std::marker::PhantomData<T>,
}

impl<T: WithLabel> ClassifyResult<T> {
  pub fn new(probs: Box<[f32]>, roi: Option<PixelRect>) -> Self {
    debug_assert_eq!(probs.len(), T::NUM_CLASSES);
    Self {
      probs,
      roi,
      _label: std::marker::PhantomData,
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (T, f32)> + '_ {
    self
      .probs
      .iter()
      .enumerate()
      .filter_map(|(id, &p)| T::from_label_id(id as u32).map(|label| (label, p)))
  }

  /// 概率最高的类别
  pub fn best(&self) -> Option<(T, f32)> {
    self.iter().max_by(|a, b| a.1.total_cmp(&b.1))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitLabel(u8);

impl WithLabel for DigitLabel {
  const NUM_CLASSES: usize = 10;

  fn to_label_str(&self) -> String {
    self.0.to_string()
  }

  fn to_label_id(&self) -> u32 {
    self.0 as u32
  }

  fn from_label_id(id: u32) -> Option<Self> {
    (id < Self::NUM_CLASSES as u32).then_some(DigitLabel(id as u8))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmotionLabel {
  Neutral,
  Happiness,
  Surprise,
  Sadness,
  Anger,
  Disgust,
  Fear,
  Contempt,
}

impl EmotionLabel {
  pub const ALL: [EmotionLabel; 8] = [
    EmotionLabel::Neutral,
    EmotionLabel::Happiness,
    EmotionLabel::Surprise,
    EmotionLabel::Sadness,
    EmotionLabel::Anger,
    EmotionLabel::Disgust,
    EmotionLabel::Fear,
    EmotionLabel::Contempt,
  ];
}

impl WithLabel for EmotionLabel {
  const NUM_CLASSES: usize = 8;
  const LABEL_WIDTH: usize = 12;

  fn to_label_str(&self) -> String {
    format!("{:?}", self)
  }

  fn to_label_id(&self) -> u32 {
    *self as u32
  }

  fn from_label_id(id: u32) -> Option<Self> {
    Self::ALL.get(id as usize).copied()
  }
}

mod softmax;
pub use self::softmax::softmax;

mod classifier;
pub use self::classifier::{
  ClassifierError, DIGIT_INPUT_SIZE, DigitClassifier, EMOTION_INPUT_SIZE, EmotionClassifier,
};

mod blazeface;
pub use self::blazeface::{
  BlazeFace, BlazeFaceBuilder, BlazeFaceError, BlazeFaceParams, anchors, decode_detections,
  weighted_nms,
};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxError, OnnxExecutor};

#[cfg(feature = "rknn")]
mod rknn;
#[cfg(feature = "rknn")]
pub use self::rknn::{RknnError, RknnExecutor};

#[derive(Error, Debug)]
pub enum ExecutorError {
  #[cfg(feature = "onnx")]
  #[error("ONNX 推理错误: {0}")]
  OnnxError(#[from] OnnxError),
  #[cfg(feature = "rknn")]
  #[error("RKNN 推理错误: {0}")]
  RknnError(#[from] RknnError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 根据 URL 方案选择推理后端
pub enum ExecutorWrapper {
  #[cfg(feature = "onnx")]
  Onnx(OnnxExecutor),
  #[cfg(feature = "rknn")]
  Rknn(RknnExecutor),
}

impl FromUrl for ExecutorWrapper {
  type Error = ExecutorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "onnx")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == OnnxExecutor::SCHEME {
        return Ok(ExecutorWrapper::Onnx(OnnxExecutor::from_url(url)?));
      }
    }
    #[cfg(feature = "rknn")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == RknnExecutor::SCHEME {
        return Ok(ExecutorWrapper::Rknn(RknnExecutor::from_url(url)?));
      }
    }
    Err(ExecutorError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Executor for ExecutorWrapper {
  type Error = ExecutorError;

  fn run(&self, input: &[f32], shape: [usize; 4]) -> Result<Vec<OutputTensor>, Self::Error> {
    match self {
      #[cfg(feature = "onnx")]
      ExecutorWrapper::Onnx(executor) => Ok(executor.run(input, shape)?),
      #[cfg(feature = "rknn")]
      ExecutorWrapper::Rknn(executor) => Ok(executor.run(input, shape)?),
      // 未启用任何推理后端时该枚举为空
      #[allow(unreachable_patterns)]
      _ => Err(ExecutorError::SchemeMismatch("未启用推理后端".to_string())),
    }
  }
}
