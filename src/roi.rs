// 该文件是 Huamian （画面） 项目的一部分。
// src/roi.rs - 人脸感兴趣区域选择
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

use image::{GrayImage, imageops};
use thiserror::Error;
use tracing::debug;

use crate::geometry::PixelRect;

#[derive(Error, Debug)]
pub enum RoiError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("人脸检测模型无效: {0}")]
  ModelInvalid(String),
}

/// 经典人脸检测器参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeParams {
  /// 相邻金字塔层之间的缩放比例
  pub scale_factor: f32,
  /// 最小人脸边长占图像短边的比例
  pub min_size_ratio: f32,
  pub score_threshold: f64,
}

impl Default for CascadeParams {
  fn default() -> Self {
    Self {
      scale_factor: 1.1,
      min_size_ratio: 0.2,
      score_threshold: 2.0,
    }
  }
}

/// 经典（非神经网络）人脸检测器，返回像素坐标矩形
pub trait CascadeDetector {
  fn detect(&self, gray: &GrayImage, params: &CascadeParams) -> Vec<PixelRect>;
}

impl<D: CascadeDetector + ?Sized> CascadeDetector for Box<D> {
  fn detect(&self, gray: &GrayImage, params: &CascadeParams) -> Vec<PixelRect> {
    (**self).detect(gray, params)
  }
}

/// 从不检测到人脸的检测器
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCascade;

impl CascadeDetector for NullCascade {
  fn detect(&self, _gray: &GrayImage, _params: &CascadeParams) -> Vec<PixelRect> {
    Vec::new()
  }
}

/// 以矩形中心为中心、取宽高较大者为边长构造正方形
pub fn square_face_roi(face: PixelRect) -> PixelRect {
  let cx = face.x + face.width / 2;
  let cy = face.y + face.height / 2;
  let side = face.width.max(face.height);
  PixelRect::new(cx - side / 2, cy - side / 2, side, side)
}

/// 取第一个检测到的人脸并转为正方形；没有人脸时返回 `None`
pub fn select_face_roi(faces: &[PixelRect]) -> Option<PixelRect> {
  faces.first().copied().map(square_face_roi)
}

/// 按 ROI 裁剪灰度图；ROI 与图像无交集时返回整幅图像
pub fn crop_roi(gray: &GrayImage, roi: Option<PixelRect>) -> GrayImage {
  match roi.map(|r| r.intersect_image(gray.width(), gray.height())) {
    Some(rect) if !rect.is_empty() => imageops::crop_imm(
      gray,
      rect.x as u32,
      rect.y as u32,
      rect.width as u32,
      rect.height as u32,
    )
    .to_image(),
    Some(rect) => {
      debug!("ROI {:?} 超出图像范围，使用整幅图像", rect);
      gray.clone()
    }
    None => gray.clone(),
  }
}

#[cfg(feature = "rustface")]
mod seeta {
  use std::path::Path;

  use image::GrayImage;
  use tracing::{debug, error, info};

  use super::{CascadeDetector, CascadeParams, RoiError};
  use crate::geometry::PixelRect;

  const SEETA_MIN_FACE_SIZE: u32 = 20;
  const SEETA_WINDOW_STEP: u32 = 4;

  /// 基于 `rustface`（SeetaFace 引擎）的经典人脸检测器
  pub struct SeetaFaceDetector {
    model: Option<rustface::Model>,
  }

  impl SeetaFaceDetector {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RoiError> {
      let path = path.as_ref();
      info!("加载人脸检测模型: {}", path.display());
      let data = std::fs::read(path)?;
      let model = rustface::read_model(std::io::Cursor::new(data))
        .map_err(|e| RoiError::ModelInvalid(e.to_string()))?;
      Ok(Self { model: Some(model) })
    }

    /// 模型缺失或无效时只记录一次错误，返回始终检测不到人脸的检测器
    pub fn open_or_disabled(path: impl AsRef<Path>) -> Self {
      let path = path.as_ref();
      match Self::open(path) {
        Ok(detector) => detector,
        Err(e) => {
          error!("{} 无法加载: {}，人脸检测已禁用", path.display(), e);
          Self { model: None }
        }
      }
    }

    pub fn is_enabled(&self) -> bool {
      self.model.is_some()
    }
  }

  impl CascadeDetector for SeetaFaceDetector {
    fn detect(&self, gray: &GrayImage, params: &CascadeParams) -> Vec<PixelRect> {
      let Some(model) = &self.model else {
        return Vec::new();
      };

      let (width, height) = gray.dimensions();
      let min_size = ((width.min(height) as f32) * params.min_size_ratio) as u32;

      let mut detector = rustface::create_detector_with_model(model.clone());
      detector.set_min_face_size(min_size.max(SEETA_MIN_FACE_SIZE));
      detector.set_score_thresh(params.score_threshold);
      detector.set_pyramid_scale_factor(1.0 / params.scale_factor);
      detector.set_slide_window_step(SEETA_WINDOW_STEP, SEETA_WINDOW_STEP);

      let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));
      debug!("经典检测器检测到 {} 张人脸", faces.len());

      faces
        .iter()
        .map(|face| {
          let bbox = face.bbox();
          PixelRect::new(
            bbox.x() as i32,
            bbox.y() as i32,
            bbox.width() as i32,
            bbox.height() as i32,
          )
        })
        .collect()
    }
  }
}

#[cfg(feature = "rustface")]
pub use self::seeta::SeetaFaceDetector;
