// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/bbox.rs - 边界框与 IoU
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

use serde::{Deserialize, Serialize};

/// 归一化坐标下的角点式边界框 `[x_min, y_min, x_max, y_max]`，不做裁剪
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub xmin: f32,
  pub ymin: f32,
  pub xmax: f32,
  pub ymax: f32,
}

impl BoundingBox {
  pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
    Self {
      xmin,
      ymin,
      xmax,
      ymax,
    }
  }

  /// 由中心点和宽高构造
  pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
    Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
  }

  pub fn width(&self) -> f32 {
    self.xmax - self.xmin
  }

  pub fn height(&self) -> f32 {
    self.ymax - self.ymin
  }

  pub fn center(&self) -> (f32, f32) {
    ((self.xmin + self.xmax) / 2.0, (self.ymin + self.ymax) / 2.0)
  }

  pub fn is_degenerate(&self) -> bool {
    !(self.width() > 0.0 && self.height() > 0.0)
  }

  /// 退化框（宽或高非正）面积为 0
  pub fn area(&self) -> f32 {
    if self.is_degenerate() {
      0.0
    } else {
      self.width() * self.height()
    }
  }

  pub fn intersection(&self, other: &BoundingBox) -> f32 {
    let w = self.xmax.min(other.xmax) - self.xmin.max(other.xmin);
    let h = self.ymax.min(other.ymax) - self.ymin.max(other.ymin);
    if w <= 0.0 || h <= 0.0 {
      return 0.0;
    }
    w * h
  }

  /// 交并比。任一方为退化框时恒为 0
  pub fn iou(&self, other: &BoundingBox) -> f32 {
    if self.is_degenerate() || other.is_degenerate() {
      return 0.0;
    }

    let intersection = self.intersection(other);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }

  pub fn to_array(&self) -> [f32; 4] {
    [self.xmin, self.ymin, self.xmax, self.ymax]
  }
}

impl From<[f32; 4]> for BoundingBox {
  fn from([xmin, ymin, xmax, ymax]: [f32; 4]) -> Self {
    Self::new(xmin, ymin, xmax, ymax)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_iou_with_itself() {
    let b = BoundingBox::new(0.1, 0.2, 0.5, 0.9);
    assert_eq!(b.iou(&b), 1.0);
  }

  #[test]
  fn test_iou_disjoint() {
    let a = BoundingBox::new(0.0, 0.0, 0.2, 0.2);
    let b = BoundingBox::new(0.5, 0.5, 0.7, 0.7);
    assert_eq!(a.iou(&b), 0.0);
    // 仅在一个轴上重叠
    let c = BoundingBox::new(0.1, 0.5, 0.3, 0.7);
    assert_eq!(a.iou(&c), 0.0);
    // 仅边界接触
    let d = BoundingBox::new(0.2, 0.0, 0.4, 0.2);
    assert_eq!(a.iou(&d), 0.0);
  }

  #[test]
  fn test_iou_partial_overlap() {
    let a = BoundingBox::new(0.0, 0.0, 2.0, 2.0);
    let b = BoundingBox::new(1.0, 0.0, 3.0, 2.0);
    // 交 2, 并 6
    assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    assert_eq!(a.iou(&b), b.iou(&a));
  }

  #[test]
  fn test_degenerate_box_has_zero_iou() {
    let flat = BoundingBox::new(0.1, 0.1, 0.5, 0.1);
    let inverted = BoundingBox::new(0.5, 0.5, 0.1, 0.9);
    let normal = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    assert_eq!(flat.area(), 0.0);
    assert_eq!(inverted.area(), 0.0);
    assert_eq!(flat.iou(&normal), 0.0);
    assert_eq!(inverted.iou(&inverted), 0.0);
  }

  #[test]
  fn test_out_of_frame_box() {
    let a = BoundingBox::from_center(0.0, 0.0, 0.4, 0.4);
    assert_eq!(a.to_array(), [-0.2, -0.2, 0.2, 0.2]);
    let b = BoundingBox::new(-0.1, -0.1, 0.1, 0.1);
    assert!(a.iou(&b) > 0.0);
  }
}
