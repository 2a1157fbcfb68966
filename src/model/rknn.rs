// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/model/rknn.rs - RKNN 推理后端
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

use std::{marker::PhantomData, sync::Mutex};

use rknpu::{Context, InitFlags, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  anchor::AnchorGenerator,
  frame::NormalizedFrame,
  model::{InferenceBackend, MASK_CLASS_NUM, RawOutputs},
};

const RKNN_NUM_INPUTS: u32 = 1;
const RKNN_NUM_OUTPUTS: u32 = 2;

#[derive(Error, Debug)]
pub enum RknnBackendError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("RKNN 错误: {0}")]
  RknnError(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("输出大小不匹配: 张量1 {0}, 张量2 {1}")]
  OutputMismatch(usize, usize),
  #[error("推理上下文不可用")]
  ContextPoisoned,
}

impl From<rknpu::Error> for RknnBackendError {
  fn from(err: rknpu::Error) -> Self {
    RknnBackendError::RknnError(err.to_string())
  }
}

impl RknnBackendError {
  fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnBackendError::ModelInvalid(format!("{}: {}", msg, e))
  }
}

/// `rknn:///path/to/face_mask.rknn?classes=2&anchors=5972`
pub struct RknnBackendBuilder {
  model_path: String,
  flags: InitFlags,
  num_classes: usize,
  num_anchors: usize,
}

impl FromUrlWithScheme for RknnBackendBuilder {
  const SCHEME: &'static str = "rknn";
}

fn query_usize(url: &Url, key: &str) -> Result<Option<usize>, RknnBackendError> {
  match url.query_pairs().find(|(k, _)| k == key) {
    Some((_, v)) => v
      .parse::<usize>()
      .map(Some)
      .map_err(|e| RknnBackendError::ModelPathError(format!("{}={}: {}", key, v, e))),
    None => Ok(None),
  }
}

impl FromUrl for RknnBackendBuilder {
  type Error = RknnBackendError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnBackendError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let num_anchors = match query_usize(url, "anchors")? {
      Some(n) => n,
      None => AnchorGenerator::reference().num_anchors(),
    };

    Ok(RknnBackendBuilder {
      model_path: url.path().to_string(),
      flags: InitFlags::default(),
      num_classes: query_usize(url, "classes")?.unwrap_or(MASK_CLASS_NUM),
      num_anchors,
    })
  }
}

impl RknnBackendBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn num_classes(mut self, num_classes: usize) -> Self {
    self.num_classes = num_classes;
    self
  }

  pub fn num_anchors(mut self, num_anchors: usize) -> Self {
    self.num_anchors = num_anchors;
    self
  }

  pub fn build<const W: u32, const H: u32>(self) -> Result<RknnBackend<W, H>, RknnBackendError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(RknnBackendError::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknnBackendError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknnBackendError::invalid("无法获取输出数量", e))?;

    if num_inputs != RKNN_NUM_INPUTS || num_outputs != RKNN_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        RKNN_NUM_INPUTS, RKNN_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(RknnBackendError::ModelInvalid(msg));
    }

    info!(
      "模型加载完成: {} 个类别, {} 个锚框",
      self.num_classes, self.num_anchors
    );

    Ok(RknnBackend {
      context: Mutex::new(context),
      num_classes: self.num_classes,
      num_anchors: self.num_anchors,
      _phantom: PhantomData,
    })
  }
}

/// 同一个上下文不能并发推理，调用之间用互斥锁串行化
pub struct RknnBackend<const W: u32, const H: u32> {
  context: Mutex<Context>,
  num_classes: usize,
  num_anchors: usize,
  _phantom: PhantomData<NormalizedFrame<W, H>>,
}

/// `(分类得分长度, 框偏移长度)`，溢出时为 `None`
fn expected_output_lens(num_anchors: usize, num_classes: usize) -> Option<(usize, usize)> {
  num_anchors
    .checked_mul(num_classes)
    .zip(num_anchors.checked_mul(4))
}

/// 输出顺序不固定，按张量大小区分分类得分与框偏移。
/// 返回 `(scores, offsets)`
fn match_score_offset_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  score_expected: usize,
  offset_expected: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  if tensor1.len() == score_expected && tensor2.len() == offset_expected {
    Some((tensor1, tensor2))
  } else if tensor1.len() == offset_expected && tensor2.len() == score_expected {
    debug!("输出顺序交换: 索引 0 是框偏移, 索引 1 是分类得分");
    Some((tensor2, tensor1))
  } else {
    None
  }
}

impl<const W: u32, const H: u32> InferenceBackend for RknnBackend<W, H> {
  type Input = NormalizedFrame<W, H>;
  type Error = RknnBackendError;

  fn infer(&self, input: &Self::Input) -> Result<RawOutputs, Self::Error> {
    let context = self
      .context
      .lock()
      .map_err(|_| RknnBackendError::ContextPoisoned)?;

    debug!("设置模型输入");
    context.set_input(
      0,
      &input.to_u8_nhwc(),
      rknpu::TensorFormat::NHWC,
      TensorType::UInt8,
    )?;

    debug!("执行模型推理");
    context.run()?;

    debug!("获取模型输出");
    let output = context.get_outputs()?;
    let tensor1 = output.get_f32(0)?;
    let tensor2 = output.get_f32(1)?;

    let (score_expected, offset_expected) =
      expected_output_lens(self.num_anchors, self.num_classes)
        .ok_or(RknnBackendError::OutputMismatch(tensor1.len(), tensor2.len()))?;

    let (scores, offsets) = match_score_offset_tensors(
      tensor1,
      tensor2,
      score_expected,
      offset_expected,
    )
    .ok_or_else(|| {
      error!(
        "输出大小不匹配 - 张量1: {}, 张量2: {}, 锚框 {}, 类别 {}",
        tensor1.len(),
        tensor2.len(),
        self.num_anchors,
        self.num_classes
      );
      RknnBackendError::OutputMismatch(tensor1.len(), tensor2.len())
    })?;

    Ok(RawOutputs::new(
      scores.to_vec(),
      self.num_classes,
      offsets.to_vec(),
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_match_tensors_by_size() {
    let scores = [0.0f32; 6];
    let offsets = [0.0f32; 12];
    let (s, o) = match_score_offset_tensors(&scores, &offsets, 6, 12).unwrap();
    assert_eq!((s.len(), o.len()), (6, 12));
    let (s, o) = match_score_offset_tensors(&offsets, &scores, 6, 12).unwrap();
    assert_eq!((s.len(), o.len()), (6, 12));
    assert!(match_score_offset_tensors(&scores, &scores, 6, 12).is_none());
  }

  #[test]
  fn test_expected_output_lens_overflow() {
    assert_eq!(expected_output_lens(5972, 2), Some((11944, 23888)));
    assert_eq!(expected_output_lens(2, usize::MAX / 2 + 1), None);
    assert_eq!(expected_output_lens(usize::MAX / 2, 1), None);
  }

  #[test]
  fn test_builder_from_url() {
    let url = Url::parse("rknn:///opt/face_mask.rknn?classes=3").unwrap();
    let builder = RknnBackendBuilder::from_url(&url).unwrap();
    assert_eq!(builder.num_classes, 3);
    assert_eq!(builder.num_anchors, 5972);
    assert_eq!(builder.model_path, "/opt/face_mask.rknn");

    let url = Url::parse("yolo:///opt/face_mask.rknn").unwrap();
    assert!(RknnBackendBuilder::from_url(&url).is_err());
  }
}
