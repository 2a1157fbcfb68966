// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/summary.rs - 多帧分类汇总
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

//! 同一场景连续拍摄的若干帧，只有每帧人脸数一致、且所有人脸类别一致时，
//! 才给出确定的结论。

use serde::Serialize;
use tracing::debug;

use crate::{model::WithLabel, pipeline::Detection};

/// 汇总结论达标所需的平均置信度
pub const DEFAULT_PASS_THRESHOLD: f32 = 0.8;
/// 每次汇总取最近的帧数
pub const DEFAULT_SAMPLE_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
  /// 各帧之间人脸数或类别不一致
  Unsure,
  /// 没有检测到人脸
  NotFound,
  Class(usize),
}

impl Verdict {
  pub fn label<T: WithLabel>(&self) -> Option<T> {
    match self {
      Verdict::Class(id) => u32::try_from(*id).ok().and_then(T::from_label_id),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationSummary {
  pub verdict: Verdict,
  /// 每帧的人脸数
  pub faces: usize,
  pub accuracy: f32,
  pub min_accuracy: f32,
  pub max_accuracy: f32,
  pub samples: usize,
}

impl ClassificationSummary {
  fn undecided(verdict: Verdict, samples: usize) -> Self {
    Self {
      verdict,
      faces: 0,
      accuracy: 0.0,
      min_accuracy: 0.0,
      max_accuracy: 0.0,
      samples,
    }
  }

  /// 没有任何样本时返回 `None`
  pub fn from_samples<S: AsRef<[Detection]>>(samples: &[S]) -> Option<Self> {
    let first = samples.first()?.as_ref();
    let faces = first.len();
    let Some(class_id) = first.first().map(|d| d.class_id) else {
      // 第一帧没有人脸，其余帧也必须没有
      let verdict = if samples.iter().all(|s| s.as_ref().is_empty()) {
        Verdict::NotFound
      } else {
        Verdict::Unsure
      };
      return Some(Self::undecided(verdict, samples.len()));
    };

    let mut total = 0.0;
    let mut min_accuracy = f32::INFINITY;
    let mut max_accuracy = f32::NEG_INFINITY;

    for (idx, sample) in samples.iter().enumerate() {
      let sample = sample.as_ref();
      if sample.len() != faces {
        debug!("第 {} 帧人脸数 {} 与首帧 {} 不一致", idx, sample.len(), faces);
        return Some(Self::undecided(Verdict::Unsure, samples.len()));
      }
      for detection in sample {
        if detection.class_id != class_id {
          debug!("第 {} 帧出现类别 {}, 首帧为 {}", idx, detection.class_id, class_id);
          return Some(Self::undecided(Verdict::Unsure, samples.len()));
        }
        total += detection.confidence;
        min_accuracy = min_accuracy.min(detection.confidence);
        max_accuracy = max_accuracy.max(detection.confidence);
      }
    }

    Some(Self {
      verdict: Verdict::Class(class_id),
      faces,
      accuracy: total / (samples.len() * faces) as f32,
      min_accuracy,
      max_accuracy,
      samples: samples.len(),
    })
  }

  pub fn passed(&self, threshold: f32) -> bool {
    matches!(self.verdict, Verdict::Class(_)) && self.accuracy >= threshold
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{bbox::BoundingBox, model::MaskLabel};

  fn det(class_id: usize, confidence: f32) -> Detection {
    Detection {
      class_id,
      confidence,
      bbox: BoundingBox::new(0.2, 0.2, 0.6, 0.6),
    }
  }

  #[test]
  fn test_no_samples() {
    let samples: Vec<Vec<Detection>> = Vec::new();
    assert!(ClassificationSummary::from_samples(&samples).is_none());
  }

  #[test]
  fn test_consistent_samples() {
    let samples = vec![vec![det(1, 0.9)], vec![det(1, 0.7)]];
    let summary = ClassificationSummary::from_samples(&samples).unwrap();
    assert_eq!(summary.verdict, Verdict::Class(1));
    assert_eq!(summary.verdict.label::<MaskLabel>(), Some(MaskLabel::NoMask));
    assert_eq!(summary.faces, 1);
    assert_eq!(summary.samples, 2);
    assert!((summary.accuracy - 0.8).abs() < 1e-6);
    assert_eq!(summary.min_accuracy, 0.7);
    assert_eq!(summary.max_accuracy, 0.9);
    assert!(summary.passed(DEFAULT_PASS_THRESHOLD - 1e-6));
    assert!(!summary.passed(0.85));
  }

  #[test]
  fn test_face_count_mismatch_is_unsure() {
    let samples = vec![vec![det(0, 0.9)], vec![det(0, 0.9), det(0, 0.8)]];
    let summary = ClassificationSummary::from_samples(&samples).unwrap();
    assert_eq!(summary.verdict, Verdict::Unsure);
    assert_eq!(summary.accuracy, 0.0);
    assert!(!summary.passed(0.0));
  }

  #[test]
  fn test_class_mismatch_is_unsure() {
    let samples = vec![vec![det(0, 0.9)], vec![det(1, 0.95)]];
    let summary = ClassificationSummary::from_samples(&samples).unwrap();
    assert_eq!(summary.verdict, Verdict::Unsure);
  }

  #[test]
  fn test_no_faces() {
    let samples: Vec<Vec<Detection>> = vec![vec![], vec![]];
    let summary = ClassificationSummary::from_samples(&samples).unwrap();
    assert_eq!(summary.verdict, Verdict::NotFound);
    assert_eq!(summary.faces, 0);

    let samples = vec![vec![], vec![det(0, 0.9)]];
    let summary = ClassificationSummary::from_samples(&samples).unwrap();
    assert_eq!(summary.verdict, Verdict::Unsure);
  }
}
