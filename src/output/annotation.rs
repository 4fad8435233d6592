// 该文件是 Huamian （画面） 项目的一部分。
// src/output/annotation.rs - 推理结果的绘制、文本与记录
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
use serde_json::{Value, json};

use crate::{
  geometry::Point2,
  model::{ClassifyResult, FaceDetectResult, FaceDetection, WithLabel},
  output::draw::Draw,
};

/// 可被输出端消费的推理结果
pub trait Annotation {
  fn draw(&self, draw: &Draw, image: &mut RgbImage);
  fn to_lines(&self) -> Vec<String>;
  fn to_record(&self) -> Value;
  /// 没有任何可记录内容
  fn is_empty(&self) -> bool;
}

fn point_json(p: Point2) -> Value {
  json!([p.x, p.y])
}

fn face_json(face: &FaceDetection) -> Value {
  let k = &face.keypoints;
  json!({
    "score": face.score,
    "center": point_json(face.center),
    "extent": point_json(face.extent),
    "keypoints": {
      "left_eye": point_json(k.left_eye),
      "right_eye": point_json(k.right_eye),
      "nose": point_json(k.nose),
      "mouth": point_json(k.mouth),
      "left_ear": point_json(k.left_ear),
      "right_ear": point_json(k.right_ear),
    },
  })
}

impl Annotation for FaceDetectResult {
  fn draw(&self, draw: &Draw, image: &mut RgbImage) {
    for face in self.items.iter() {
      draw.draw_face(image, face);
    }
  }

  fn to_lines(&self) -> Vec<String> {
    self
      .items
      .iter()
      .enumerate()
      .map(|(i, face)| {
        let [x_min, y_min, x_max, y_max] = face.bbox();
        format!(
          "face {}: {:.2} [{:.3}, {:.3}, {:.3}, {:.3}]",
          i, face.score, x_min, y_min, x_max, y_max
        )
      })
      .collect()
  }

  fn to_record(&self) -> Value {
    json!({
      "faces": self.items.iter().map(face_json).collect::<Vec<_>>(),
    })
  }

  fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl<T: WithLabel> Annotation for ClassifyResult<T> {
  fn draw(&self, draw: &Draw, image: &mut RgbImage) {
    if let Some(roi) = self.roi {
      draw.draw_roi(image, roi);
    }
    draw.draw_lines(image, &self.to_lines());
  }

  fn to_lines(&self) -> Vec<String> {
    self
      .iter()
      .map(|(label, p)| format!("{:<width$}: {:.2}", label.to_label_str(), p, width = T::LABEL_WIDTH))
      .collect()
  }

  fn to_record(&self) -> Value {
    let probs = self
      .iter()
      .map(|(label, p)| json!({ "label": label.to_label_str(), "id": label.to_label_id(), "prob": p }))
      .collect::<Vec<_>>();
    json!({
      "best": self.best().map(|(label, _)| label.to_label_str()),
      "probs": probs,
      "roi": self.roi.map(|r| json!([r.x, r.y, r.width, r.height])),
    })
  }

  fn is_empty(&self) -> bool {
    self.probs.is_empty()
  }
}
