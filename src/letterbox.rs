// 该文件是 Huamian （画面） 项目的一部分。
// src/letterbox.rs - 保持宽高比的检测映射
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

use image::RgbImage;
use tracing::debug;

use crate::{
  frame::RgbTensor,
  geometry::{LetterboxTransform, Point2},
  model::{FaceDetectResult, FaceDetection, Model},
};

/// 在正方形张量上工作的人脸检测器，输出张量归一化坐标
pub trait SquareFaceDetector<const S: u32> {
  type Error;

  fn detect_square(&self, tensor: &RgbTensor<S, S>) -> Result<Vec<FaceDetection>, Self::Error>;
}

/// 把图像按信箱方式采样到 S×S 张量，像素值归一化到 [0, 1]。
///
/// `inverse` 为逆变换：目标像素中心经逆变换得到源图像归一化坐标，
/// 落在 [0, 1] 之外的位置填充黑色。
pub fn letterbox_tensor<const S: u32>(
  image: &RgbImage,
  inverse: &LetterboxTransform,
) -> RgbTensor<S, S> {
  let mut tensor = RgbTensor::<S, S>::default();
  let (src_w, src_h) = (image.width() as f32, image.height() as f32);
  let size = S as f32;
  let slice = tensor.as_mut();

  for y in 0..S as usize {
    for x in 0..S as usize {
      let dst = Point2::new((x as f32 + 0.5) / size, (y as f32 + 0.5) / size);
      let src = inverse.apply_point(dst);
      if !(0.0..=1.0).contains(&src.x) || !(0.0..=1.0).contains(&src.y) {
        continue;
      }

      let rgb = sample_bilinear(image, src.x * src_w - 0.5, src.y * src_h - 0.5);
      let index = (y * S as usize + x) * 3;
      for c in 0..3 {
        slice[index + c] = rgb[c] / 255.0;
      }
    }
  }
  tensor
}

/// 双线性采样，坐标超出边界时取边缘像素
pub fn sample_bilinear(image: &RgbImage, fx: f32, fy: f32) -> [f32; 3] {
  let max_x = image.width().saturating_sub(1) as f32;
  let max_y = image.height().saturating_sub(1) as f32;
  let fx = fx.clamp(0.0, max_x);
  let fy = fy.clamp(0.0, max_y);

  let x0 = fx.floor() as u32;
  let x1 = fx.ceil() as u32;
  let y0 = fy.floor() as u32;
  let y1 = fy.ceil() as u32;
  let dx = fx - x0 as f32;
  let dy = fy - y0 as f32;

  let p1 = image.get_pixel(x0, y0).0;
  let p2 = image.get_pixel(x1, y0).0;
  let p3 = image.get_pixel(x0, y1).0;
  let p4 = image.get_pixel(x1, y1).0;

  std::array::from_fn(|c| {
    p1[c] as f32 * (1.0 - dx) * (1.0 - dy)
      + p2[c] as f32 * dx * (1.0 - dy)
      + p3[c] as f32 * (1.0 - dx) * dy
      + p4[c] as f32 * dx * dy
  })
}

/// 用逆变换把张量坐标下的检测结果映射回源图像坐标
pub fn remap_detection(detection: &FaceDetection, inverse: &LetterboxTransform) -> FaceDetection {
  FaceDetection {
    score: detection.score,
    center: inverse.apply_point(detection.center),
    extent: inverse.apply_extent(detection.extent),
    keypoints: detection.keypoints.map(|p| inverse.apply_point(p)),
  }
}

/// 逐个映射，保持顺序与数量不变
pub fn remap_detections(
  detections: &[FaceDetection],
  inverse: &LetterboxTransform,
) -> Vec<FaceDetection> {
  detections
    .iter()
    .map(|detection| remap_detection(detection, inverse))
    .collect()
}

/// 信箱预处理 + 正方形检测器 + 逆变换后处理
pub struct LetterboxMapper<D, const S: u32> {
  detector: D,
}

impl<D: SquareFaceDetector<S>, const S: u32> LetterboxMapper<D, S> {
  pub fn new(detector: D) -> Self {
    Self { detector }
  }

  pub fn detector(&self) -> &D {
    &self.detector
  }

  pub fn into_inner(self) -> D {
    self.detector
  }
}

impl<D: SquareFaceDetector<S>, const S: u32> Model for LetterboxMapper<D, S> {
  type Input = RgbImage;
  type Output = FaceDetectResult;
  type Error = D::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let forward = LetterboxTransform::fit(input.width(), input.height(), S, S);
    let inverse = forward.inverse();
    debug!("信箱变换: {:?}", forward);

    let tensor = letterbox_tensor::<S>(input, &inverse);
    let detections = self.detector.detect_square(&tensor)?;
    debug!("张量坐标下检测到 {} 张人脸", detections.len());

    Ok(FaceDetectResult {
      items: remap_detections(&detections, &inverse).into_boxed_slice(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Keypoints;
  use image::Rgb;

  const EPS: f32 = 1e-5;

  fn detection(center: Point2, extent: Point2) -> FaceDetection {
    FaceDetection {
      score: 0.8,
      center,
      extent,
      keypoints: Keypoints::from_array([center; Keypoints::COUNT]),
    }
  }

  #[test]
  fn remap_scales_extent_and_moves_center() {
    let inverse = LetterboxTransform {
      translate_x: 0.25,
      translate_y: 0.0,
      scale_x: 0.5,
      scale_y: 1.0,
    };
    let center = Point2::new(0.4, 0.6);
    let mapped = remap_detection(&detection(center, Point2::new(0.5, 0.5)), &inverse);
    assert!((mapped.extent.x - 0.25).abs() < EPS);
    assert!((mapped.extent.y - 0.5).abs() < EPS);
    assert!((mapped.center.x - (0.4 * 0.5 + 0.25)).abs() < EPS);
    assert!((mapped.center.y - 0.6).abs() < EPS);
    assert_eq!(mapped.keypoints.nose, mapped.center);
    assert_eq!(mapped.score, 0.8);
  }

  #[test]
  fn remap_keeps_order_and_count() {
    let inverse = LetterboxTransform::fit(640, 480, 128, 128).inverse();
    let input = (0..5)
      .map(|i| detection(Point2::new(i as f32 * 0.2, 0.5), Point2::new(0.1, 0.1)))
      .collect::<Vec<_>>();
    let output = remap_detections(&input, &inverse);
    assert_eq!(output.len(), input.len());
    for (a, b) in input.iter().zip(&output) {
      assert!((a.center.x - b.center.x).abs() < EPS);
    }
  }

  #[test]
  fn wide_image_has_black_bars() {
    let image = RgbImage::from_pixel(64, 32, Rgb([255, 255, 255]));
    let inverse = LetterboxTransform::fit(64, 32, 16, 16).inverse();
    let tensor = letterbox_tensor::<16>(&image, &inverse);
    // 上下各 4 行为黑边，中间为图像内容
    assert_eq!(tensor.get(8, 0, 0), 0.0);
    assert_eq!(tensor.get(8, 15, 2), 0.0);
    assert!((tensor.get(8, 8, 1) - 1.0).abs() < EPS);
  }

  #[test]
  fn square_image_fills_tensor() {
    let image = RgbImage::from_pixel(32, 32, Rgb([51, 102, 255]));
    let tensor = letterbox_tensor::<8>(&image, &LetterboxTransform::IDENTITY);
    assert!((tensor.get(0, 0, 0) - 0.2).abs() < 1e-4);
    assert!((tensor.get(7, 7, 2) - 1.0).abs() < 1e-4);
  }

  struct FixedDetector(Vec<FaceDetection>);

  impl SquareFaceDetector<16> for FixedDetector {
    type Error = std::convert::Infallible;

    fn detect_square(&self, _tensor: &RgbTensor<16, 16>) -> Result<Vec<FaceDetection>, Self::Error> {
      Ok(self.0.clone())
    }
  }

  #[test]
  fn mapper_returns_source_coordinates() {
    // 宽图上下留黑边：张量中 y = 0.125 对应源图像顶部
    let tensor_space = detection(Point2::new(0.5, 0.125), Point2::new(0.5, 0.375));
    let mapper = LetterboxMapper::<_, 16>::new(FixedDetector(vec![tensor_space]));
    let image = RgbImage::new(64, 48);
    let result = mapper.infer(&image).unwrap();
    assert_eq!(result.len(), 1);
    let face = result.items[0];
    assert!((face.center.x - 0.5).abs() < EPS);
    assert!(face.center.y.abs() < EPS);
    assert!((face.extent.x - 0.5).abs() < EPS);
    assert!((face.extent.y - 0.5).abs() < EPS);
  }

  #[test]
  fn mapper_passes_empty_results_through() {
    let mapper = LetterboxMapper::<_, 16>::new(FixedDetector(Vec::new()));
    let result = mapper.infer(&RgbImage::new(10, 30)).unwrap();
    assert!(result.is_empty());
  }
}
