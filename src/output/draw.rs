// 该文件是 Huamian （画面） 项目的一部分。
// src/output/draw.rs - 检测与分类结果可视化
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use tracing::{error, info};
use url::Url;

use crate::{
  geometry::{PixelRect, Point2},
  model::FaceDetection,
  query_param,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LINE_SPACING: i32 = 4;
const BOX_THICKNESS: i32 = 2;
const KEYPOINT_RADIUS: i32 = 5;
const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]); // 红色
const KEYPOINT_COLOR: Rgb<u8> = Rgb([255, 255, 0]); // 黄色
const LABEL_BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

pub const DEFAULT_FONT_PATH: &str = "assets/font.ttf";

pub struct Draw {
  font_size: f32,
  font: Option<FontVec>,
}

impl Default for Draw {
  fn default() -> Self {
    Self::without_font()
  }
}

impl Draw {
  /// 从字体文件创建；文件缺失或无效时只记录一次错误，之后不再绘制文字
  pub fn load(font_path: impl AsRef<Path>) -> Self {
    let font_path = font_path.as_ref();
    let font = std::fs::read(font_path)
      .map_err(|e| e.to_string())
      .and_then(|data| FontVec::try_from_vec(data).map_err(|e| e.to_string()));

    match font {
      Ok(font) => {
        info!("加载字体: {}", font_path.display());
        Self {
          font_size: LABEL_FONT_SIZE,
          font: Some(font),
        }
      }
      Err(e) => {
        error!("无法加载字体 {}: {}，将不绘制文字", font_path.display(), e);
        Self::without_font()
      }
    }
  }

  /// 只绘制框与关键点
  pub fn without_font() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      font: None,
    }
  }

  /// 从输出 URL 的 `font` 查询参数读取字体路径
  pub fn from_url(url: &Url) -> Self {
    let path: String = query_param(url, "font").unwrap_or_else(|| DEFAULT_FONT_PATH.to_string());
    Self::load(path)
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn draw_face(&self, image: &mut RgbImage, face: &FaceDetection) {
    let Some(rect) = normalized_bbox_to_pixels(image, &face.bbox()) else {
      return;
    };
    draw_thick_rect(image, rect, BOX_COLOR);

    for point in face.clamped().keypoints.to_array() {
      let (x, y) = to_pixel(image, point);
      draw_filled_circle_mut(image, (x, y), KEYPOINT_RADIUS, KEYPOINT_COLOR);
    }

    let label = format!("{:.2}", face.score);
    self.draw_label_above(image, rect.left(), rect.top(), &label);
  }

  pub fn draw_roi(&self, image: &mut RgbImage, roi: PixelRect) {
    let clipped = roi.intersect_image(image.width(), image.height());
    if clipped.is_empty() {
      return;
    }
    let rect = Rect::at(clipped.x, clipped.y).of_size(clipped.width as u32, clipped.height as u32);
    draw_thick_rect(image, rect, BOX_COLOR);
  }

  /// 从左上角开始逐行绘制文字
  pub fn draw_lines(&self, image: &mut RgbImage, lines: &[String]) {
    let Some(font) = &self.font else {
      return;
    };
    let scale = PxScale::from(self.font_size);
    let mut y = 0;
    for line in lines {
      let (_, height) = text_size(scale, font, line);
      draw_text_mut(image, LABEL_TEXT_COLOR, 0, y, scale, font, line);
      y += height as i32 + LINE_SPACING;
    }
  }

  fn draw_label_above(&self, image: &mut RgbImage, x: i32, y: i32, text: &str) {
    let Some(font) = &self.font else {
      return;
    };
    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = text_size(scale, font, text);
    let label_height = text_height as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;

    let label_x = x.max(0);
    let label_y = (y - label_height).max(0);
    let label_width = (text_width as i32).min(image.width() as i32 - label_x);
    if label_width <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
    draw_filled_rect_mut(image, rect, LABEL_BACKGROUND);
    draw_text_mut(
      image,
      LABEL_TEXT_COLOR,
      label_x,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      scale,
      font,
      text,
    );
  }
}

fn to_pixel(image: &RgbImage, point: Point2) -> (i32, i32) {
  (
    (point.x * image.width() as f32).round() as i32,
    (point.y * image.height() as f32).round() as i32,
  )
}

/// 归一化 [x_min, y_min, x_max, y_max] 转为像素矩形，并限制在图像范围内
fn normalized_bbox_to_pixels(image: &RgbImage, bbox: &[f32; 4]) -> Option<Rect> {
  let (w, h) = (image.width() as f32, image.height() as f32);
  let max_x = image.width() as i32 - 1;
  let max_y = image.height() as i32 - 1;

  let x_min = ((bbox[0] * w).floor() as i32).clamp(0, max_x);
  let y_min = ((bbox[1] * h).floor() as i32).clamp(0, max_y);
  let x_max = ((bbox[2] * w).ceil() as i32).clamp(0, max_x);
  let y_max = ((bbox[3] * h).ceil() as i32).clamp(0, max_y);

  if x_min >= x_max || y_min >= y_max {
    return None;
  }
  Some(Rect::at(x_min, y_min).of_size((x_max - x_min + 1) as u32, (y_max - y_min + 1) as u32))
}

fn draw_thick_rect(image: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
  for t in 0..BOX_THICKNESS {
    let width = rect.width() as i32 - 2 * t;
    let height = rect.height() as i32 - 2 * t;
    if width <= 0 || height <= 0 {
      break;
    }
    let inner = Rect::at(rect.left() + t, rect.top() + t).of_size(width as u32, height as u32);
    draw_hollow_rect_mut(image, inner, color);
  }
}
