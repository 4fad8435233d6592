// 该文件是 Huamian （画面） 项目的一部分。
// src/model/softmax.rs - 分数归一化
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

/// 数值稳定的 softmax：先减去最大值再取指数
pub fn softmax(scores: &[f32]) -> Box<[f32]> {
  if scores.is_empty() {
    return Box::new([]);
  }

  let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps = scores.iter().map(|&x| (x - max).exp()).collect::<Vec<_>>();
  // 最大值对应项为 1，和至少为 1
  let sum: f32 = exps.iter().sum();

  exps.into_iter().map(|e| e / sum).collect()
}
