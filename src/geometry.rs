// 该文件是 Huamian （画面） 项目的一部分。
// src/geometry.rs - 信箱变换与几何类型
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

/// 二维点（通常为归一化坐标）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2 {
  pub x: f32,
  pub y: f32,
}

impl Point2 {
  pub const fn new(x: f32, y: f32) -> Self {
    Self { x, y }
  }

  /// 限制到 [0, 1] 内，绘制关键点时使用
  pub fn clamped(self) -> Self {
    Self {
      x: self.x.clamp(0.0, 1.0),
      y: self.y.clamp(0.0, 1.0),
    }
  }

  pub fn is_finite(&self) -> bool {
    self.x.is_finite() && self.y.is_finite()
  }
}

/// 只含缩放与平移的轴对齐仿射变换: `p' = p * scale + translate`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
  pub translate_x: f32,
  pub translate_y: f32,
  pub scale_x: f32,
  pub scale_y: f32,
}

impl Default for LetterboxTransform {
  fn default() -> Self {
    Self::IDENTITY
  }
}

impl LetterboxTransform {
  pub const IDENTITY: Self = Self {
    translate_x: 0.0,
    translate_y: 0.0,
    scale_x: 1.0,
    scale_y: 1.0,
  };

  /// 计算将源图像保持宽高比放入目标图像（居中留黑边）的变换。
  ///
  /// 正向变换把源图像归一化坐标映射到目标图像归一化坐标。
  /// 宽高比相等时走第二个分支，结果恰好为单位变换。
  pub fn fit(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Self {
    debug_assert!(src_w > 0 && src_h > 0 && dst_w > 0 && dst_h > 0);

    let (src_w, src_h) = (src_w as f32, src_h as f32);
    let (dst_w, dst_h) = (dst_w as f32, dst_h as f32);
    let aspect_src = src_w / src_h;
    let aspect_dst = dst_w / dst_h;

    let mut transform = Self::IDENTITY;
    if aspect_src > aspect_dst {
      // 源图像更宽，上下留边
      let h = dst_w / aspect_src;
      transform.translate_y = (dst_h - h) / (2.0 * dst_h);
      transform.scale_y = h / dst_h;
    } else {
      let w = dst_h / (src_h / src_w);
      transform.translate_x = (dst_w - w) / (2.0 * dst_w);
      transform.scale_x = w / dst_w;
    }
    transform
  }

  pub fn inverse(&self) -> Self {
    Self {
      translate_x: -self.translate_x / self.scale_x,
      translate_y: -self.translate_y / self.scale_y,
      scale_x: 1.0 / self.scale_x,
      scale_y: 1.0 / self.scale_y,
    }
  }

  pub fn apply_point(&self, p: Point2) -> Point2 {
    Point2 {
      x: p.x * self.scale_x + self.translate_x,
      y: p.y * self.scale_y + self.translate_y,
    }
  }

  /// 尺寸只缩放，不平移
  pub fn apply_extent(&self, e: Point2) -> Point2 {
    Point2 {
      x: e.x * self.scale_x,
      y: e.y * self.scale_y,
    }
  }

  pub fn is_identity(&self) -> bool {
    *self == Self::IDENTITY
  }
}

/// 像素坐标下的整数矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelRect {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

impl PixelRect {
  pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.width <= 0 || self.height <= 0
  }

  pub fn right(&self) -> i32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> i32 {
    self.y + self.height
  }

  /// 与 `width`×`height` 的图像区域求交
  pub fn intersect_image(&self, width: u32, height: u32) -> Self {
    let x0 = self.x.max(0);
    let y0 = self.y.max(0);
    let x1 = self.right().min(width as i32);
    let y1 = self.bottom().min(height as i32);
    Self::new(x0, y0, (x1 - x0).max(0), (y1 - y0).max(0))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const EPS: f32 = 1e-5;

  fn assert_close(a: Point2, b: Point2) {
    assert!(
      (a.x - b.x).abs() < EPS && (a.y - b.y).abs() < EPS,
      "{:?} != {:?}",
      a,
      b
    );
  }

  #[test]
  fn equal_aspect_is_identity() {
    assert!(LetterboxTransform::fit(128, 128, 128, 128).is_identity());
    assert!(LetterboxTransform::fit(640, 640, 128, 128).is_identity());
    assert!(LetterboxTransform::fit(400, 200, 256, 128).is_identity());
  }

  #[test]
  fn wide_source_gets_vertical_bars() {
    let t = LetterboxTransform::fit(640, 480, 128, 128);
    assert_eq!(t.translate_x, 0.0);
    assert_eq!(t.scale_x, 1.0);
    assert!((t.scale_y - 0.75).abs() < EPS);
    assert!((t.translate_y - 0.125).abs() < EPS);
  }

  #[test]
  fn tall_source_gets_horizontal_bars() {
    let t = LetterboxTransform::fit(480, 640, 128, 128);
    assert_eq!(t.translate_y, 0.0);
    assert_eq!(t.scale_y, 1.0);
    assert!((t.scale_x - 0.75).abs() < EPS);
    assert!((t.translate_x - 0.125).abs() < EPS);
  }

  #[test]
  fn forward_then_inverse_round_trips() {
    let sizes = [(640, 480), (480, 640), (1920, 1080), (37, 211), (128, 128)];
    let points = [
      Point2::new(0.0, 0.0),
      Point2::new(1.0, 1.0),
      Point2::new(0.3, 0.7),
      Point2::new(-0.2, 1.4),
    ];
    let destinations = [(128, 128), (256, 256), (256, 128), (100, 300), (1, 7)];
    for &(w, h) in &sizes {
      for &(dst_w, dst_h) in &destinations {
        let forward = LetterboxTransform::fit(w, h, dst_w, dst_h);
        let inverse = forward.inverse();
        for &p in &points {
          assert_close(inverse.apply_point(forward.apply_point(p)), p);
        }
      }
    }
  }

  #[test]
  fn scales_are_positive_and_at_most_one() {
    for &(w, h) in &[(1, 1000), (1000, 1), (3, 2), (2, 3)] {
      let t = LetterboxTransform::fit(w, h, 128, 128);
      assert!(t.scale_x > 0.0 && t.scale_x <= 1.0);
      assert!(t.scale_y > 0.0 && t.scale_y <= 1.0);
    }
  }

  #[test]
  fn extent_ignores_translation() {
    let t = LetterboxTransform {
      translate_x: 0.25,
      translate_y: 0.0,
      scale_x: 0.5,
      scale_y: 1.0,
    };
    assert_close(t.apply_extent(Point2::new(0.5, 0.5)), Point2::new(0.25, 0.5));
    assert_close(t.apply_point(Point2::new(0.5, 0.5)), Point2::new(0.5, 0.5));
  }

  #[test]
  fn rect_intersection_with_image() {
    let rect = PixelRect::new(-10, 5, 40, 40);
    assert_eq!(rect.intersect_image(20, 30), PixelRect::new(0, 5, 20, 25));
    assert!(PixelRect::new(50, 50, 10, 10).intersect_image(20, 20).is_empty());
  }
}
