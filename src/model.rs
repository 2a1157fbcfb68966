// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/model.rs - 模型与推理后端
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

use std::marker::PhantomData;

use serde::Serialize;

use crate::{bbox::BoundingBox, error::DetectError, pipeline::Detection};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 推理调用的原始输出，批维度已去掉
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawOutputs {
  /// `[N, C]` 行优先展平
  pub class_scores: Vec<f32>,
  pub num_classes: usize,
  /// `[N, 4]` 行优先展平
  pub offsets: Vec<f32>,
}

impl RawOutputs {
  pub fn new(class_scores: Vec<f32>, num_classes: usize, offsets: Vec<f32>) -> Self {
    Self {
      class_scores,
      num_classes,
      offsets,
    }
  }
}

/// 外部推理调用：固定尺寸的归一化图像 -> (分类得分, 框偏移)
///
/// `infer` 只拿 `&self`，不能并发调用的后端需要在内部串行化。
pub trait InferenceBackend {
  type Input;
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, input: &Self::Input) -> Result<RawOutputs, Self::Error>;
}

/// 把闭包包装成推理后端
pub struct FnBackend<I, F> {
  f: F,
  _phantom: PhantomData<fn(&I)>,
}

pub fn backend_fn<I, E, F>(f: F) -> FnBackend<I, F>
where
  F: Fn(&I) -> Result<RawOutputs, E>,
{
  FnBackend {
    f,
    _phantom: PhantomData,
  }
}

impl<I, E, F> InferenceBackend for FnBackend<I, F>
where
  F: Fn(&I) -> Result<RawOutputs, E>,
  E: std::error::Error + Send + Sync + 'static,
{
  type Input = I;
  type Error = E;

  fn infer(&self, input: &I) -> Result<RawOutputs, E> {
    (self.f)(input)
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  /// 标签集中的类别数，编号为 `0..CLASS_NUM`
  const CLASS_NUM: usize;

  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Option<Self>;
}

/// 参考模型的两个类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaskLabel {
  Mask = 0,
  NoMask = 1,
}

pub const MASK_CLASS_NUM: usize = 2;

impl WithLabel for MaskLabel {
  const CLASS_NUM: usize = MASK_CLASS_NUM;

  fn to_label_str(&self) -> String {
    match self {
      MaskLabel::Mask => "mask".to_string(),
      MaskLabel::NoMask => "no-mask".to_string(),
    }
  }

  fn to_label_id(&self) -> u32 {
    *self as u32
  }

  fn from_label_id(id: u32) -> Option<Self> {
    match id {
      0 => Some(MaskLabel::Mask),
      1 => Some(MaskLabel::NoMask),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> DetectResult<T> {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem<T>> {
    self.items.iter()
  }
}

impl<T: WithLabel> TryFrom<&[Detection]> for DetectResult<T> {
  type Error = DetectError;

  fn try_from(detections: &[Detection]) -> Result<Self, Self::Error> {
    let items = detections
      .iter()
      .map(|d| {
        let kind = u32::try_from(d.class_id)
          .ok()
          .and_then(T::from_label_id)
          .ok_or(DetectError::shape("类别编号上限", T::CLASS_NUM, d.class_id.saturating_add(1)))?;
        Ok(DetectItem {
          kind,
          score: d.confidence,
          bbox: d.bbox,
        })
      })
      .collect::<Result<Vec<_>, DetectError>>()?;

    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}

#[cfg(feature = "rknpu_backend")]
mod rknn;
#[cfg(feature = "rknpu_backend")]
pub use self::rknn::{RknnBackend, RknnBackendBuilder, RknnBackendError};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_mask_label_ids() {
    for label in [MaskLabel::Mask, MaskLabel::NoMask] {
      assert_eq!(MaskLabel::from_label_id(label.to_label_id()), Some(label));
    }
    assert_eq!(MaskLabel::from_label_id(2), None);
    assert_eq!(MaskLabel::NoMask.to_label_str(), "no-mask");
  }

  #[test]
  fn test_detect_result_from_detections() {
    let detections = [Detection {
      class_id: 1,
      confidence: 0.8,
      bbox: BoundingBox::new(0.1, 0.1, 0.4, 0.5),
    }];
    let result = DetectResult::<MaskLabel>::try_from(&detections[..]).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].kind, MaskLabel::NoMask);

    let unknown = [Detection {
      class_id: 7,
      ..detections[0]
    }];
    let err = DetectResult::<MaskLabel>::try_from(&unknown[..]).unwrap_err();
    assert!(matches!(
      err,
      DetectError::ShapeMismatch {
        expected: MASK_CLASS_NUM,
        actual: 8,
        ..
      }
    ));
  }

  #[test]
  fn test_fn_backend() {
    let backend = backend_fn(|input: &u32| -> Result<RawOutputs, std::io::Error> {
      Ok(RawOutputs::new(vec![*input as f32], 1, vec![0.0; 4]))
    });
    assert_eq!(backend.infer(&3).unwrap().class_scores, vec![3.0]);
  }
}
