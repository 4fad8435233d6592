// 该文件是 Huamian （画面） 项目的一部分。
// src/frame.rs - NHWC 张量定义
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

use image::GrayImage;

pub trait AsNhwcTensor {
  fn as_nhwc(&self) -> &[f32];
  /// [batch, height, width, channels]
  fn shape(&self) -> [usize; 4];
}

/// 批大小为 1 的 NHWC 浮点张量
#[derive(Debug, Clone)]
pub struct NhwcTensor<const W: u32, const H: u32, const C: usize> {
  data: Box<[f32]>,
}

pub type GrayTensor<const W: u32, const H: u32> = NhwcTensor<W, H, 1>;
pub type RgbTensor<const W: u32, const H: u32> = NhwcTensor<W, H, 3>;

impl<const W: u32, const H: u32, const C: usize> From<Vec<f32>> for NhwcTensor<W, H, C> {
  fn from(data: Vec<f32>) -> Self {
    if data.len() != (C * W as usize * H as usize) {
      panic!(
        "数据长度不匹配: 期望长度 {}, 实际长度 {}",
        C * W as usize * H as usize,
        data.len()
      );
    }

    Self {
      data: data.into_boxed_slice(),
    }
  }
}

impl<const W: u32, const H: u32, const C: usize> Default for NhwcTensor<W, H, C> {
  fn default() -> Self {
    let size = C * (W as usize) * (H as usize);
    let data = vec![0f32; size].into_boxed_slice();
    Self { data }
  }
}

impl<const W: u32, const H: u32, const C: usize> NhwcTensor<W, H, C> {
  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    C
  }

  pub fn get(&self, x: usize, y: usize, c: usize) -> f32 {
    self.data[(y * W as usize + x) * C + c]
  }
}

impl<const W: u32, const H: u32> GrayTensor<W, H> {
  /// 将 W×H 灰度图转为张量，每个像素乘以 `scale`
  pub fn from_gray_image(image: &GrayImage, scale: f32) -> Self {
    debug_assert_eq!(image.dimensions(), (W, H));
    let data = image
      .as_raw()
      .iter()
      .map(|&v| v as f32 * scale)
      .collect::<Vec<_>>();
    Self::from(data)
  }
}

impl<const W: u32, const H: u32, const C: usize> AsMut<[f32]> for NhwcTensor<W, H, C> {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

impl<const W: u32, const H: u32, const C: usize> AsNhwcTensor for NhwcTensor<W, H, C> {
  fn as_nhwc(&self) -> &[f32] {
    &self.data
  }

  fn shape(&self) -> [usize; 4] {
    [1, H as usize, W as usize, C]
  }
}

/// 推理后端返回的输出张量
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
  pub shape: Box<[usize]>,
  pub data: Box<[f32]>,
}

impl OutputTensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
    Self {
      shape: shape.into_boxed_slice(),
      data: data.into_boxed_slice(),
    }
  }

  /// 形状为 [1, N] 的扁平输出
  pub fn flat(data: Vec<f32>) -> Self {
    let len = data.len();
    Self::new(vec![1, len], data)
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}
