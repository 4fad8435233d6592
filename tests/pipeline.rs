use std::cell::Cell;

use image::{Rgb, RgbImage};

use huamian::{
  FromUrl,
  frame::OutputTensor,
  letterbox::LetterboxMapper,
  model::{BlazeFaceBuilder, DigitClassifier, EmotionClassifier, EmotionLabel, Executor},
  output::{Annotation, LogOutput, OutputWrapper},
  roi::NullCascade,
  task::Pipeline,
};

const EPS: f32 = 1e-4;

/// 返回固定输出并记录调用次数
struct FixedExecutor {
  outputs: Vec<OutputTensor>,
  calls: Cell<usize>,
}

impl FixedExecutor {
  fn new(outputs: Vec<OutputTensor>) -> Self {
    Self {
      outputs,
      calls: Cell::new(0),
    }
  }
}

impl Executor for FixedExecutor {
  type Error = std::io::Error;

  fn run(&self, _input: &[f32], _shape: [usize; 4]) -> Result<Vec<OutputTensor>, Self::Error> {
    self.calls.set(self.calls.get() + 1);
    Ok(self.outputs.clone())
  }
}

#[test]
fn digit_pipeline_on_black_image_is_uniform() {
  let executor = FixedExecutor::new(vec![OutputTensor::flat(vec![0.0; 10])]);
  let mut pipeline = Pipeline::new(DigitClassifier::new(executor), LogOutput::default());

  let result = pipeline.step(&RgbImage::new(28, 28)).unwrap();
  assert_eq!(result.probs.len(), 10);
  assert!(result.probs.iter().all(|&p| (p - 0.1).abs() < 1e-6));
  assert_eq!(result.to_lines()[3], "3: 0.10");
  pipeline.dispose();
}

#[test]
fn emotion_pipeline_without_face_keeps_whole_image() {
  let mut scores = vec![0.0; 8];
  scores[2] = 4.0;
  let executor = FixedExecutor::new(vec![OutputTensor::flat(scores)]);
  let model = EmotionClassifier::new(executor, NullCascade);
  let mut pipeline = Pipeline::new(model, LogOutput::default());

  let frame = RgbImage::from_pixel(120, 90, Rgb([90, 90, 90]));
  let result = pipeline.step(&frame).unwrap();
  assert_eq!(result.roi, None);
  assert_eq!(result.best().map(|(l, _)| l), Some(EmotionLabel::Surprise));
  let sum: f32 = result.probs.iter().sum();
  assert!((sum - 1.0).abs() < 1e-5);
}

/// 只有第 0 个锚点得分很高，回归值把人脸放在张量中心
fn single_face_outputs(size: f32) -> Vec<OutputTensor> {
  let anchor = 0.5 / 16.0;
  let offset = (0.5 - anchor) * size;
  let extent = 0.25 * size;

  let mut regressors = vec![0.0; 896 * 16];
  regressors[0] = offset;
  regressors[1] = offset;
  regressors[2] = extent;
  regressors[3] = extent;
  for k in 0..6 {
    regressors[4 + 2 * k] = offset;
    regressors[5 + 2 * k] = offset;
  }

  let mut scores = vec![-100.0; 896];
  scores[0] = 100.0;

  // 分类输出在前，检验按大小匹配
  vec![
    OutputTensor::new(vec![1, 896, 1], scores),
    OutputTensor::new(vec![1, 896, 16], regressors),
  ]
}

#[test]
fn face_pipeline_maps_detection_back_to_wide_image() {
  let executor = FixedExecutor::new(single_face_outputs(128.0));
  let detector = BlazeFaceBuilder::new(executor).build::<128>();
  let mut pipeline = Pipeline::new(LetterboxMapper::new(detector), LogOutput::default());

  // 256×128 放入 128×128：上下各留 1/4 黑边
  let result = pipeline.step(&RgbImage::new(256, 128)).unwrap();
  assert_eq!(result.len(), 1);

  let face = result.items[0];
  assert!(face.score > 0.99);
  assert!((face.center.x - 0.5).abs() < EPS);
  assert!((face.center.y - 0.5).abs() < EPS);
  assert!((face.extent.x - 0.25).abs() < EPS);
  assert!((face.extent.y - 0.5).abs() < EPS);
  assert!((face.keypoints.right_ear.y - 0.5).abs() < EPS);
}

#[test]
fn face_pipeline_with_256_input() {
  let executor = FixedExecutor::new(single_face_outputs(256.0));
  let detector = BlazeFaceBuilder::new(executor).build::<256>();
  let mapper = LetterboxMapper::new(detector);
  let mut pipeline = Pipeline::new(mapper, LogOutput::default());

  // 高图左右留边
  let result = pipeline.step(&RgbImage::new(100, 200)).unwrap();
  assert_eq!(result.len(), 1);
  let face = result.items[0];
  assert!((face.center.x - 0.5).abs() < EPS);
  assert!((face.extent.x - 0.5).abs() < EPS);
  assert!((face.extent.y - 0.25).abs() < EPS);
}

#[test]
fn face_pipeline_below_threshold_is_empty() {
  let executor = FixedExecutor::new(single_face_outputs(128.0));
  let detector = BlazeFaceBuilder::new(executor).threshold(1.1).build::<128>();
  let mut pipeline = Pipeline::new(LetterboxMapper::new(detector), LogOutput::default());

  let result = pipeline.step(&RgbImage::new(64, 64)).unwrap();
  assert!(result.is_empty());
}

#[test]
fn mismatched_outputs_are_an_error() {
  let executor = FixedExecutor::new(vec![OutputTensor::flat(vec![0.0; 10])]);
  let detector = BlazeFaceBuilder::new(executor).build::<128>();
  let mut pipeline = Pipeline::new(LetterboxMapper::new(detector), LogOutput::default());
  assert!(pipeline.step(&RgbImage::new(64, 64)).is_err());
}

#[test]
fn log_output_selected_by_scheme() {
  let url = url::Url::parse("log://").unwrap();
  let output = OutputWrapper::from_url(&url).unwrap();
  assert!(matches!(output, OutputWrapper::LogOutput(_)));

  let executor = FixedExecutor::new(vec![OutputTensor::flat(vec![1.0; 10])]);
  let mut pipeline = Pipeline::new(DigitClassifier::new(executor), output);
  pipeline.step(&RgbImage::new(10, 10)).unwrap();
  assert_eq!(pipeline.frames(), 1);
}
