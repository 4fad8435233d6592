// 该文件是 Huamian （画面） 项目的一部分。
// src/model/blazeface.rs - BlazeFace 人脸检测模型
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
use tracing::{debug, error};
use url::Url;

use crate::{
  frame::{AsNhwcTensor, OutputTensor, RgbTensor},
  geometry::Point2,
  letterbox::SquareFaceDetector,
  model::{Executor, FaceDetection, Keypoints},
  query_param,
};

const BLAZEFACE_NUM_ANCHORS: usize = 896;
const BLAZEFACE_NUM_COORDS: usize = 16;
/// (特征图边长, 每个位置的锚点数)
const BLAZEFACE_LAYERS: [(usize, usize); 2] = [(16, 2), (8, 6)];
const BLAZEFACE_SCORE_CLIP: f32 = 100.0;
const BLAZEFACE_SCORE_THRESH: f32 = 0.75;
const BLAZEFACE_IOU_THRESH: f32 = 0.3;

#[derive(Error, Debug)]
pub enum BlazeFaceError {
  #[error("推理错误: {0}")]
  ExecutorError(Box<dyn std::error::Error + Send + Sync>),
  #[error("模型输出不匹配: {0}")]
  OutputMismatch(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlazeFaceParams {
  /// 置信度阈值 (0.0 - 1.0)
  pub threshold: f32,
  /// 加权 NMS 的 IoU 阈值
  pub iou_threshold: f32,
}

impl Default for BlazeFaceParams {
  fn default() -> Self {
    Self {
      threshold: BLAZEFACE_SCORE_THRESH,
      iou_threshold: BLAZEFACE_IOU_THRESH,
    }
  }
}

impl BlazeFaceParams {
  /// 从模型 URL 的查询参数读取 `threshold` 与 `iou`
  pub fn from_url(url: &Url) -> Self {
    let default = Self::default();
    Self {
      threshold: query_param(url, "threshold").unwrap_or(default.threshold),
      iou_threshold: query_param(url, "iou").unwrap_or(default.iou_threshold),
    }
  }
}

/// BlazeFace 锚点中心（归一化坐标），128 与 256 输入共用同一组锚点
pub fn anchors() -> Vec<Point2> {
  let mut anchors = Vec::with_capacity(BLAZEFACE_NUM_ANCHORS);
  for (size, per_cell) in BLAZEFACE_LAYERS {
    for row in 0..size {
      for col in 0..size {
        let center = Point2::new(
          (col as f32 + 0.5) / size as f32,
          (row as f32 + 0.5) / size as f32,
        );
        anchors.extend(std::iter::repeat_n(center, per_cell));
      }
    }
  }
  anchors
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

/// 解码回归与分类输出，得到张量归一化坐标下的候选框
pub fn decode_detections(
  regressors: &[f32],
  scores: &[f32],
  anchors: &[Point2],
  input_size: f32,
  threshold: f32,
) -> Vec<FaceDetection> {
  let mut detections = Vec::new();

  for (index, anchor) in anchors.iter().enumerate() {
    let Some(&logit) = scores.get(index) else {
      break;
    };
    let score = sigmoid(logit.clamp(-BLAZEFACE_SCORE_CLIP, BLAZEFACE_SCORE_CLIP));
    if score < threshold {
      continue;
    }

    let Some(raw) = regressors.get(index * BLAZEFACE_NUM_COORDS..(index + 1) * BLAZEFACE_NUM_COORDS)
    else {
      break;
    };

    let point = |i: usize| {
      Point2::new(
        raw[i] / input_size + anchor.x,
        raw[i + 1] / input_size + anchor.y,
      )
    };

    let detection = FaceDetection {
      score,
      center: point(0),
      extent: Point2::new(raw[2] / input_size, raw[3] / input_size),
      keypoints: Keypoints::from_array(std::array::from_fn(|k| point(4 + 2 * k))),
    };
    if !detection.is_finite() {
      debug!("跳过含非有限值的候选框: 锚点 {}", index);
      continue;
    }
    detections.push(detection);
  }

  detections
}

fn iou(a: &FaceDetection, b: &FaceDetection) -> f32 {
  let [ax0, ay0, ax1, ay1] = a.bbox();
  let [bx0, by0, bx1, by1] = b.bbox();

  let intersection = (ax1.min(bx1) - ax0.max(bx0)).max(0.0) * (ay1.min(by1) - ay0.max(by0)).max(0.0);
  let union = a.extent.x * a.extent.y + b.extent.x * b.extent.y - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

fn weighted_mean(cluster: &[FaceDetection], f: impl Fn(&FaceDetection) -> Point2) -> Point2 {
  let total: f32 = cluster.iter().map(|d| d.score).sum();
  let (x, y) = cluster.iter().fold((0.0, 0.0), |(x, y), d| {
    let p = f(d);
    (x + p.x * d.score, y + p.y * d.score)
  });
  Point2::new(x / total, y / total)
}

/// 加权非极大值抑制：与当前最高分框重叠的候选按分数加权合并，
/// 合并结果保留最高分。输出按分数降序排列。
pub fn weighted_nms(mut detections: Vec<FaceDetection>, iou_threshold: f32) -> Vec<FaceDetection> {
  detections.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut result = Vec::new();
  while !detections.is_empty() {
    let best = detections.remove(0);
    let (overlapping, rest): (Vec<_>, Vec<_>) = detections
      .into_iter()
      .partition(|d| iou(&best, d) > iou_threshold);
    detections = rest;

    let mut cluster = Vec::with_capacity(overlapping.len() + 1);
    cluster.push(best);
    cluster.extend(overlapping);

    let keypoints = std::array::from_fn(|k| weighted_mean(&cluster, |d| d.keypoints.to_array()[k]));
    result.push(FaceDetection {
      score: best.score,
      center: weighted_mean(&cluster, |d| d.center),
      extent: weighted_mean(&cluster, |d| d.extent),
      keypoints: Keypoints::from_array(keypoints),
    });
  }

  result
}

/// 根据张量大小区分回归输出与分类输出
fn match_reg_score_tensors(tensors: &[OutputTensor]) -> Option<(&[f32], &[f32])> {
  let reg_expected = BLAZEFACE_NUM_ANCHORS * BLAZEFACE_NUM_COORDS;
  let reg = tensors.iter().find(|t| t.len() == reg_expected)?;
  let score = tensors.iter().find(|t| t.len() == BLAZEFACE_NUM_ANCHORS)?;
  Some((&reg.data[..], &score.data[..]))
}

/// BlazeFace 模型，输入为 S×S RGB 张量（S = 128 或 256）
pub struct BlazeFace<E, const S: u32> {
  executor: E,
  params: BlazeFaceParams,
  anchors: Box<[Point2]>,
}

pub struct BlazeFaceBuilder<E> {
  executor: E,
  params: BlazeFaceParams,
}

impl<E: Executor> BlazeFaceBuilder<E> {
  pub fn new(executor: E) -> Self {
    Self {
      executor,
      params: BlazeFaceParams::default(),
    }
  }

  pub fn params(mut self, params: BlazeFaceParams) -> Self {
    self.params = params;
    self
  }

  pub fn threshold(mut self, threshold: f32) -> Self {
    self.params.threshold = threshold;
    self
  }

  pub fn build<const S: u32>(self) -> BlazeFace<E, S> {
    debug!("BlazeFace 输入大小: {}x{}, 参数: {:?}", S, S, self.params);
    BlazeFace {
      executor: self.executor,
      params: self.params,
      anchors: anchors().into_boxed_slice(),
    }
  }
}

impl<E, const S: u32> BlazeFace<E, S> {
  pub fn params(&self) -> &BlazeFaceParams {
    &self.params
  }
}

impl<E: Executor, const S: u32> SquareFaceDetector<S> for BlazeFace<E, S> {
  type Error = BlazeFaceError;

  fn detect_square(&self, tensor: &RgbTensor<S, S>) -> Result<Vec<FaceDetection>, Self::Error> {
    // [0, 1] -> [-1, 1]
    let input = tensor
      .as_nhwc()
      .iter()
      .map(|v| v * 2.0 - 1.0)
      .collect::<Vec<_>>();

    debug!("执行 BlazeFace 推理");
    let outputs = self
      .executor
      .run(&input, tensor.shape())
      .map_err(|e| BlazeFaceError::ExecutorError(Box::new(e)))?;

    let (regressors, scores) = match match_reg_score_tensors(&outputs) {
      Some(tensors) => tensors,
      None => {
        let sizes = outputs.iter().map(|t| t.len()).collect::<Vec<_>>();
        error!("BlazeFace 输出大小不匹配: {:?}", sizes);
        return Err(BlazeFaceError::OutputMismatch(format!(
          "期望 {} 与 {} 个元素, 实际为 {:?}",
          BLAZEFACE_NUM_ANCHORS * BLAZEFACE_NUM_COORDS,
          BLAZEFACE_NUM_ANCHORS,
          sizes
        )));
      }
    };

    let candidates = decode_detections(
      regressors,
      scores,
      &self.anchors,
      S as f32,
      self.params.threshold,
    );
    debug!("候选框 {} 个", candidates.len());

    Ok(weighted_nms(candidates, self.params.iou_threshold))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const EPS: f32 = 1e-5;

  fn face(score: f32, x: f32, y: f32, size: f32) -> FaceDetection {
    FaceDetection {
      score,
      center: Point2::new(x, y),
      extent: Point2::new(size, size),
      keypoints: Keypoints::from_array([Point2::new(x, y); Keypoints::COUNT]),
    }
  }

  #[test]
  fn anchor_layout() {
    let anchors = anchors();
    assert_eq!(anchors.len(), BLAZEFACE_NUM_ANCHORS);
    assert_eq!(anchors[0], Point2::new(1.0 / 32.0, 1.0 / 32.0));
    assert_eq!(anchors[1], anchors[0]);
    assert_eq!(anchors[2], Point2::new(3.0 / 32.0, 1.0 / 32.0));
    assert_eq!(anchors[512], Point2::new(1.0 / 16.0, 1.0 / 16.0));
    assert_eq!(anchors[517], anchors[512]);
    assert_eq!(anchors[895], Point2::new(15.0 / 16.0, 15.0 / 16.0));
  }

  #[test]
  fn low_scores_are_dropped() {
    let anchors = anchors();
    let regressors = vec![0.0; BLAZEFACE_NUM_ANCHORS * BLAZEFACE_NUM_COORDS];
    let scores = vec![-5.0; BLAZEFACE_NUM_ANCHORS];
    assert!(decode_detections(&regressors, &scores, &anchors, 128.0, 0.75).is_empty());
  }

  #[test]
  fn strong_anchor_decodes_offsets() {
    let anchors = anchors();
    let mut regressors = vec![0.0; BLAZEFACE_NUM_ANCHORS * BLAZEFACE_NUM_COORDS];
    let mut scores = vec![-100.0; BLAZEFACE_NUM_ANCHORS];
    let index = 512;
    scores[index] = 1000.0;
    let raw = &mut regressors[index * 16..index * 16 + 16];
    raw[0] = 12.8;
    raw[1] = -12.8;
    raw[2] = 32.0;
    raw[3] = 64.0;
    raw[4] = 6.4;

    let detections = decode_detections(&regressors, &scores, &anchors, 128.0, 0.75);
    assert_eq!(detections.len(), 1);
    let d = detections[0];
    assert!((d.score - 1.0).abs() < EPS);
    assert!((d.center.x - (1.0 / 16.0 + 0.1)).abs() < EPS);
    assert!((d.center.y - (1.0 / 16.0 - 0.1)).abs() < EPS);
    assert!((d.extent.x - 0.25).abs() < EPS);
    assert!((d.extent.y - 0.5).abs() < EPS);
    assert!((d.keypoints.left_eye.x - (1.0 / 16.0 + 0.05)).abs() < EPS);
    assert_eq!(d.keypoints.right_ear, anchors[index]);
  }

  #[test]
  fn overlapping_boxes_are_merged() {
    let merged = weighted_nms(vec![face(0.9, 0.5, 0.5, 0.2), face(0.6, 0.51, 0.5, 0.2)], 0.3);
    assert_eq!(merged.len(), 1);
    assert!((merged[0].score - 0.9).abs() < EPS);
    let expected_x = (0.5 * 0.9 + 0.51 * 0.6) / 1.5;
    assert!((merged[0].center.x - expected_x).abs() < EPS);
  }

  #[test]
  fn disjoint_boxes_are_kept_in_score_order() {
    let kept = weighted_nms(vec![face(0.8, 0.2, 0.2, 0.1), face(0.95, 0.8, 0.8, 0.1)], 0.3);
    assert_eq!(kept.len(), 2);
    assert!((kept[0].score - 0.95).abs() < EPS);
    assert!((kept[1].center.x - 0.2).abs() < EPS);
  }

  #[test]
  fn non_finite_regressors_are_skipped() {
    let anchors = anchors();
    let mut regressors = vec![0.0; BLAZEFACE_NUM_ANCHORS * BLAZEFACE_NUM_COORDS];
    let mut scores = vec![-100.0; BLAZEFACE_NUM_ANCHORS];
    scores[3] = 1000.0;
    regressors[3 * BLAZEFACE_NUM_COORDS] = f32::NAN;
    scores[7] = 1000.0;
    regressors[7 * BLAZEFACE_NUM_COORDS + 2] = f32::INFINITY;
    scores[9] = f32::NAN;

    assert!(decode_detections(&regressors, &scores, &anchors, 128.0, 0.75).is_empty());
  }

  #[test]
  fn nan_center_does_not_stall_merging() {
    let mut broken = face(0.9, 0.5, 0.5, 0.2);
    broken.center.x = f32::NAN;
    let kept = weighted_nms(vec![broken, face(0.8, 0.2, 0.2, 0.1)], 0.3);
    assert_eq!(kept.len(), 2);
    assert!((kept[1].center.x - 0.2).abs() < EPS);
  }

  #[test]
  fn zero_extent_candidates_stay_separate() {
    let kept = weighted_nms(vec![face(0.9, 0.5, 0.5, 0.0), face(0.8, 0.5, 0.5, 0.0)], 0.3);
    assert_eq!(kept.len(), 2);
    assert!((kept[0].score - 0.9).abs() < EPS);
    assert!((kept[0].center.x - 0.5).abs() < EPS);
    assert!((kept[1].center.y - 0.5).abs() < EPS);
  }

  /// 记录输入张量的推理后端，输出全为低分
  struct RecordingExecutor {
    seen: std::cell::RefCell<Vec<f32>>,
  }

  impl Executor for RecordingExecutor {
    type Error = std::io::Error;

    fn run(&self, input: &[f32], _shape: [usize; 4]) -> Result<Vec<OutputTensor>, Self::Error> {
      *self.seen.borrow_mut() = input.to_vec();
      Ok(vec![
        OutputTensor::flat(vec![0.0; BLAZEFACE_NUM_ANCHORS * BLAZEFACE_NUM_COORDS]),
        OutputTensor::flat(vec![-100.0; BLAZEFACE_NUM_ANCHORS]),
      ])
    }
  }

  #[test]
  fn input_is_shifted_to_signed_range() {
    use crate::{geometry::LetterboxTransform, letterbox::letterbox_tensor};

    let image = image::RgbImage::from_pixel(32, 16, image::Rgb([255, 255, 255]));
    let inverse = LetterboxTransform::fit(32, 16, 16, 16).inverse();
    let tensor = letterbox_tensor::<16>(&image, &inverse);

    let executor = RecordingExecutor {
      seen: std::cell::RefCell::new(Vec::new()),
    };
    let detector = BlazeFaceBuilder::new(executor).build::<16>();
    assert!(detector.detect_square(&tensor).unwrap().is_empty());

    let seen = detector.executor.seen.borrow();
    assert_eq!(seen.len(), 16 * 16 * 3);
    assert!(seen.iter().all(|v| (-1.0..=1.0).contains(v)));
    // 第 0 行为上方黑边，第 8 行为白色图像
    assert_eq!(seen[0], -1.0);
    assert!((seen[8 * 16 * 3] - 1.0).abs() < EPS);
  }

  #[test]
  fn params_from_url_query() {
    let url = Url::parse("onnx:///models/blazeface.onnx?threshold=0.6").unwrap();
    let params = BlazeFaceParams::from_url(&url);
    assert!((params.threshold - 0.6).abs() < EPS);
    assert!((params.iou_threshold - BLAZEFACE_IOU_THRESH).abs() < EPS);
  }
}
