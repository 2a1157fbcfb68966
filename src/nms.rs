// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/nms.rs - 单类别非极大值抑制
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

//! # 单类别 NMS
//!
//! 每个框只保留一个得分（获胜类别的概率），所有框在同一个池子里做抑制，
//! 不区分类别。

use tracing::{debug, error};

use crate::{
  bbox::BoundingBox,
  error::{DetectError, ensure_len},
};

pub const DEFAULT_CONF_THRESH: f32 = 0.5;
pub const DEFAULT_IOU_THRESH: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SingleClassSuppressor {
  conf_thresh: f32,
  iou_thresh: f32,
  keep_top_k: Option<usize>,
}

impl Default for SingleClassSuppressor {
  fn default() -> Self {
    Self {
      conf_thresh: DEFAULT_CONF_THRESH,
      iou_thresh: DEFAULT_IOU_THRESH,
      keep_top_k: None,
    }
  }
}

fn check_unit_range(name: &str, value: f32) -> Result<(), DetectError> {
  if !(0.0..=1.0).contains(&value) {
    error!("{} 超出 [0, 1] 范围: {}", name, value);
    return Err(DetectError::config(format!("{} 必须位于 [0, 1]: {}", name, value)));
  }
  Ok(())
}

impl SingleClassSuppressor {
  pub fn new(conf_thresh: f32, iou_thresh: f32) -> Result<Self, DetectError> {
    check_unit_range("置信度阈值", conf_thresh)?;
    check_unit_range("IoU 阈值", iou_thresh)?;
    Ok(Self {
      conf_thresh,
      iou_thresh,
      keep_top_k: None,
    })
  }

  /// 最多保留的框数，`None` 表示不限制
  pub fn keep_top_k(mut self, keep_top_k: Option<usize>) -> Self {
    self.keep_top_k = keep_top_k;
    self
  }

  pub fn conf_thresh(&self) -> f32 {
    self.conf_thresh
  }

  pub fn iou_thresh(&self) -> f32 {
    self.iou_thresh
  }

  pub fn keep_top_k_limit(&self) -> Option<usize> {
    self.keep_top_k
  }

  /// 返回保留下来的下标（指向原始输入），按接受顺序即置信度降序排列
  pub fn suppress(&self, boxes: &[BoundingBox], scores: &[f32]) -> Result<Vec<usize>, DetectError> {
    ensure_len("得分数量", boxes.len(), scores.len())?;

    // NaN 不满足比较，自然被过滤
    let mut order: Vec<usize> = (0..scores.len())
      .filter(|&i| scores[i] >= self.conf_thresh)
      .collect();
    if order.is_empty() {
      debug!("没有候选框达到置信度阈值 {}", self.conf_thresh);
      return Ok(Vec::new());
    }

    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    debug!("置信度过滤后候选框 {} 个", order.len());

    let limit = self.keep_top_k.unwrap_or(usize::MAX);
    let mut suppressed = vec![false; order.len()];
    let mut keep = Vec::new();

    for (pos, &best) in order.iter().enumerate() {
      if keep.len() >= limit {
        break;
      }
      if suppressed[pos] {
        continue;
      }
      keep.push(best);

      let best_box = &boxes[best];
      for (other, &idx) in order.iter().enumerate().skip(pos + 1) {
        if !suppressed[other] && best_box.iou(&boxes[idx]) > self.iou_thresh {
          suppressed[other] = true;
        }
      }
    }

    debug!("NMS 后保留 {} 个框", keep.len());
    Ok(keep)
  }
}

/// 单次调用的便捷入口
pub fn suppress(
  boxes: &[BoundingBox],
  scores: &[f32],
  conf_thresh: f32,
  iou_thresh: f32,
) -> Result<Vec<usize>, DetectError> {
  SingleClassSuppressor::new(conf_thresh, iou_thresh)?.suppress(boxes, scores)
}
