// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/pipeline.rs - 检测流程编排
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

//! # 检测流程
//!
//! `DetectionContext` 在启动时构造一次，包含锚框、解码器与 NMS 配置，之后只读，
//! 可以放进 `Arc` 在多个线程之间共享。`DetectionPipeline` 把上下文与推理后端
//! 组合在一起：推理 -> 解码 -> 取每个锚框的最高类别 -> 单类别 NMS。

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::{
  anchor::{AnchorGenerator, AnchorSet, FeatureMapSpec, SecondarySquare},
  bbox::BoundingBox,
  decode::{BoxDecoder, DEFAULT_VARIANCES, SSD_VARIANCES},
  error::{DetectError, ensure_len},
  frame::FromEncodedImage,
  model::{InferenceBackend, Model, RawOutputs},
  nms::{DEFAULT_CONF_THRESH, DEFAULT_IOU_THRESH, SingleClassSuppressor},
};

/// 单个检测结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
  pub class_id: usize,
  pub confidence: f32,
  pub bbox: BoundingBox,
}

impl Detection {
  /// 丢弃边框坐标，只保留 `(类别, 置信度)`
  pub fn class_confidence(&self) -> (usize, f32) {
    (self.class_id, self.confidence)
  }
}

/// 每行取最大值与其下标，相同最大值时取第一个
fn arg_max_rows(scores: &[f32], num_classes: usize) -> (Vec<f32>, Vec<usize>) {
  scores
    .chunks_exact(num_classes)
    .map(|row| {
      let mut best = 0;
      for (c, &v) in row.iter().enumerate().skip(1) {
        if v > row[best] {
          best = c;
        }
      }
      (row[best], best)
    })
    .unzip()
}

/// 只读的检测上下文
#[derive(Debug, Clone)]
pub struct DetectionContext {
  anchors: AnchorSet,
  decoder: BoxDecoder,
  suppressor: SingleClassSuppressor,
}

impl DetectionContext {
  pub fn anchors(&self) -> &AnchorSet {
    &self.anchors
  }

  pub fn decoder(&self) -> &BoxDecoder {
    &self.decoder
  }

  pub fn suppressor(&self) -> &SingleClassSuppressor {
    &self.suppressor
  }

  /// 使用构造时的阈值处理一次推理输出
  pub fn postprocess(&self, outputs: &RawOutputs) -> Result<Vec<Detection>, DetectError> {
    self.postprocess_with(outputs, &self.suppressor)
  }

  pub fn postprocess_with(
    &self,
    outputs: &RawOutputs,
    suppressor: &SingleClassSuppressor,
  ) -> Result<Vec<Detection>, DetectError> {
    let num_anchors = self.anchors.len();
    let num_classes = outputs.num_classes;
    if num_classes == 0 {
      // 按得分张量长度推算应有的类别数
      return Err(DetectError::shape(
        "推理输出类别数",
        outputs.class_scores.len() / num_anchors.max(1),
        0,
      ));
    }

    let expected_scores = num_anchors
      .checked_mul(num_classes)
      .ok_or_else(|| {
        DetectError::shape("分类得分张量长度", usize::MAX, outputs.class_scores.len())
      })?;
    ensure_len("分类得分张量长度", expected_scores, outputs.class_scores.len())?;
    let boxes = self
      .decoder
      .decode_flat(self.anchors.as_slice(), &outputs.offsets)?;

    let (scores, classes) = arg_max_rows(&outputs.class_scores, num_classes);
    let keep = suppressor.suppress(&boxes, &scores)?;

    debug!("锚框 {} 个, 类别 {} 个, 保留 {} 个", num_anchors, num_classes, keep.len());

    Ok(
      keep
        .into_iter()
        .map(|idx| Detection {
          class_id: classes[idx],
          confidence: scores[idx],
          bbox: boxes[idx],
        })
        .collect(),
    )
  }
}

/// 检测流程构造器，所有配置错误都在 `build` 时报告
#[derive(Debug, Clone)]
pub struct DetectionPipelineBuilder {
  specs: Option<Vec<FeatureMapSpec>>,
  secondary: SecondarySquare,
  variances: [f32; 4],
  conf_thresh: f32,
  iou_thresh: f32,
  keep_top_k: Option<usize>,
}

impl Default for DetectionPipelineBuilder {
  fn default() -> Self {
    Self {
      specs: None,
      secondary: SecondarySquare::default(),
      variances: DEFAULT_VARIANCES,
      conf_thresh: DEFAULT_CONF_THRESH,
      iou_thresh: DEFAULT_IOU_THRESH,
      keep_top_k: None,
    }
  }
}

impl DetectionPipelineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// 与参考口罩检测模型训练时一致的锚框与解码参数
  pub fn reference_model() -> Self {
    Self::default()
      .secondary_square(SecondarySquare::MaxSize)
      .variances(SSD_VARIANCES)
  }

  /// 不设置时使用参考特征图配置
  pub fn feature_maps(mut self, specs: Vec<FeatureMapSpec>) -> Self {
    self.specs = Some(specs);
    self
  }

  pub fn secondary_square(mut self, secondary: SecondarySquare) -> Self {
    self.secondary = secondary;
    self
  }

  pub fn variances(mut self, variances: [f32; 4]) -> Self {
    self.variances = variances;
    self
  }

  pub fn conf_thresh(mut self, conf_thresh: f32) -> Self {
    self.conf_thresh = conf_thresh;
    self
  }

  pub fn iou_thresh(mut self, iou_thresh: f32) -> Self {
    self.iou_thresh = iou_thresh;
    self
  }

  pub fn keep_top_k(mut self, keep_top_k: Option<usize>) -> Self {
    self.keep_top_k = keep_top_k;
    self
  }

  pub fn build_context(self) -> Result<DetectionContext, DetectError> {
    let generator = match self.specs {
      Some(specs) => AnchorGenerator::new(specs)?,
      None => AnchorGenerator::reference(),
    }
    .secondary_square(self.secondary);

    if self.variances.iter().any(|v| !v.is_finite() || *v <= 0.0) {
      return Err(DetectError::config(format!(
        "解码方差必须为正: {:?}",
        self.variances
      )));
    }

    let suppressor =
      SingleClassSuppressor::new(self.conf_thresh, self.iou_thresh)?.keep_top_k(self.keep_top_k);

    let anchors = generator.generate();
    info!(
      "检测上下文初始化完成: {} 个尺度, {} 个锚框",
      generator.specs().len(),
      anchors.len()
    );

    Ok(DetectionContext {
      anchors,
      decoder: BoxDecoder::with_variances(self.variances),
      suppressor,
    })
  }

  pub fn build<B: InferenceBackend>(self, backend: B) -> Result<DetectionPipeline<B>, DetectError> {
    let context = self.build_context()?;
    Ok(DetectionPipeline::new(Arc::new(context), backend))
  }
}

pub struct DetectionPipeline<B> {
  context: Arc<DetectionContext>,
  backend: B,
}

impl<B: InferenceBackend> DetectionPipeline<B> {
  /// 多个流程可以共享同一个上下文
  pub fn new(context: Arc<DetectionContext>, backend: B) -> Self {
    Self { context, backend }
  }

  pub fn context(&self) -> &Arc<DetectionContext> {
    &self.context
  }

  pub fn backend(&self) -> &B {
    &self.backend
  }

  fn infer_raw(&self, image: &B::Input) -> Result<RawOutputs, DetectError> {
    debug!("执行模型推理");
    self.backend.infer(image).map_err(DetectError::backend)
  }

  /// 使用构造时的阈值
  pub fn run(&self, image: &B::Input) -> Result<Vec<Detection>, DetectError> {
    let outputs = self.infer_raw(image)?;
    self.context.postprocess(&outputs)
  }

  pub fn run_with(
    &self,
    image: &B::Input,
    conf_thresh: f32,
    iou_thresh: f32,
  ) -> Result<Vec<Detection>, DetectError> {
    let suppressor = SingleClassSuppressor::new(conf_thresh, iou_thresh)?
      .keep_top_k(self.context.suppressor().keep_top_k_limit());
    let outputs = self.infer_raw(image)?;
    self.context.postprocess_with(&outputs, &suppressor)
  }
}

impl<B> DetectionPipeline<B>
where
  B: InferenceBackend,
  B::Input: FromEncodedImage,
{
  /// 编码图像 -> 带边框的检测结果
  pub fn detect(&self, raw_image: &[u8]) -> Result<Vec<Detection>, DetectError> {
    let frame = B::Input::from_encoded(raw_image)?;
    self.run(&frame)
  }

  /// 编码图像 -> `(类别, 置信度)` 列表
  pub fn predict(&self, raw_image: &[u8]) -> Result<Vec<(usize, f32)>, DetectError> {
    Ok(
      self
        .detect(raw_image)?
        .iter()
        .map(Detection::class_confidence)
        .collect(),
    )
  }
}

impl<B: InferenceBackend> Model for DetectionPipeline<B> {
  type Input = B::Input;
  type Output = Vec<Detection>;
  type Error = DetectError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.run(input)
  }
}
