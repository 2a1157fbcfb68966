// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/anchor.rs - 多尺度锚框生成
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

//! # 锚框生成
//!
//! 锚框顺序必须与网络输出偏移量的顺序完全一致：
//! 先按尺度（特征图给出的顺序），再按单元格（先行 `j` 后列 `i`），
//! 最后按单元格内的框序号。顺序错位会让所有解码结果悄无声息地出错。

use tracing::{debug, error};

use crate::error::DetectError;

pub const REFERENCE_INPUT_W: u32 = 260;
pub const REFERENCE_INPUT_H: u32 = 260;
pub const REFERENCE_FEATURE_MAPS: [u32; 5] = [33, 17, 9, 5, 3];
pub const REFERENCE_ANCHOR_SIZES: [[f32; 2]; 5] = [
  [0.04, 0.056],
  [0.08, 0.11],
  [0.16, 0.22],
  [0.32, 0.45],
  [0.64, 0.72],
];
pub const REFERENCE_ANCHOR_RATIOS: [f32; 3] = [1.0, 0.62, 0.42];

/// 单个检测尺度的特征图配置
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMapSpec {
  pub grid_width: u32,
  pub grid_height: u32,
  /// `[s_min, s_max]`
  pub base_sizes: [f32; 2],
  /// 第一个比例必须是 1.0
  pub aspect_ratios: Vec<f32>,
}

impl FeatureMapSpec {
  pub fn new(grid_width: u32, grid_height: u32, base_sizes: [f32; 2], aspect_ratios: &[f32]) -> Self {
    Self {
      grid_width,
      grid_height,
      base_sizes,
      aspect_ratios: aspect_ratios.to_vec(),
    }
  }

  pub fn square(grid: u32, base_sizes: [f32; 2], aspect_ratios: &[f32]) -> Self {
    Self::new(grid, grid, base_sizes, aspect_ratios)
  }

  pub fn boxes_per_cell(&self) -> usize {
    self.aspect_ratios.len() + 1
  }

  pub fn num_anchors(&self) -> usize {
    self.grid_width as usize * self.grid_height as usize * self.boxes_per_cell()
  }

  fn validate(&self, idx: usize) -> Result<(), DetectError> {
    if self.grid_width == 0 || self.grid_height == 0 {
      return Err(DetectError::config(format!(
        "特征图 {} 的网格尺寸必须为正: {}x{}",
        idx, self.grid_width, self.grid_height
      )));
    }
    if self.base_sizes.iter().any(|s| !s.is_finite() || *s <= 0.0) {
      return Err(DetectError::config(format!(
        "特征图 {} 的基础尺寸必须为正: {:?}",
        idx, self.base_sizes
      )));
    }
    match self.aspect_ratios.first() {
      Some(&first) if first == 1.0 => {}
      _ => {
        return Err(DetectError::config(format!(
          "特征图 {} 的宽高比必须以 1.0 开头: {:?}",
          idx, self.aspect_ratios
        )));
      }
    }
    if self.aspect_ratios.iter().any(|r| !r.is_finite() || *r <= 0.0) {
      return Err(DetectError::config(format!(
        "特征图 {} 的宽高比必须为正: {:?}",
        idx, self.aspect_ratios
      )));
    }
    Ok(())
  }

  /// 单元格内各个框的半宽、半高，顺序固定
  fn cell_half_sizes(&self, secondary: SecondarySquare) -> Vec<(f32, f32)> {
    let [s_min, s_max] = self.base_sizes;
    let second = match secondary {
      SecondarySquare::GeometricMean => (s_min * s_max).sqrt(),
      SecondarySquare::MaxSize => s_max,
    };

    let mut sizes = Vec::with_capacity(self.boxes_per_cell());
    sizes.push((s_min / 2.0, s_min / 2.0));
    sizes.push((second / 2.0, second / 2.0));
    for &ratio in &self.aspect_ratios[1..] {
      let r = ratio.sqrt();
      sizes.push((s_min * r / 2.0, s_min / r / 2.0));
    }
    sizes
  }
}

/// 第二个正方形框的边长取法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecondarySquare {
  /// `sqrt(s_min * s_max)`
  #[default]
  GeometricMean,
  /// `s_max`，参考模型训练时使用
  MaxSize,
}

/// 归一化坐标下的锚框 `(cx, cy, half_w, half_h)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
  pub cx: f32,
  pub cy: f32,
  pub half_w: f32,
  pub half_h: f32,
}

/// 按网络输出顺序排列的全部锚框，生成后只读
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorSet {
  anchors: Box<[Anchor]>,
}

impl AnchorSet {
  pub fn len(&self) -> usize {
    self.anchors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.anchors.is_empty()
  }

  pub fn as_slice(&self) -> &[Anchor] {
    &self.anchors
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Anchor> {
    self.anchors.iter()
  }

  pub fn get(&self, idx: usize) -> Option<&Anchor> {
    self.anchors.get(idx)
  }
}

impl AsRef<[Anchor]> for AnchorSet {
  fn as_ref(&self) -> &[Anchor] {
    &self.anchors
  }
}

/// 锚框生成器。构造时校验配置，之后生成过程不会失败。
#[derive(Debug, Clone)]
pub struct AnchorGenerator {
  specs: Vec<FeatureMapSpec>,
  secondary: SecondarySquare,
}

impl AnchorGenerator {
  pub fn new(specs: Vec<FeatureMapSpec>) -> Result<Self, DetectError> {
    if specs.is_empty() {
      error!("锚框配置为空");
      return Err(DetectError::config("至少需要一个特征图配置"));
    }
    for (idx, spec) in specs.iter().enumerate() {
      if let Err(e) = spec.validate(idx) {
        error!("锚框配置无效: {}", e);
        return Err(e);
      }
    }

    Ok(Self {
      specs,
      secondary: SecondarySquare::default(),
    })
  }

  /// 参考口罩检测模型的特征图配置（260x260 输入，5 个尺度，每格 4 个框）
  pub fn reference() -> Self {
    let specs = REFERENCE_FEATURE_MAPS
      .iter()
      .zip(REFERENCE_ANCHOR_SIZES)
      .map(|(&grid, sizes)| FeatureMapSpec::square(grid, sizes, &REFERENCE_ANCHOR_RATIOS))
      .collect();

    Self {
      specs,
      secondary: SecondarySquare::default(),
    }
  }

  pub fn secondary_square(mut self, secondary: SecondarySquare) -> Self {
    self.secondary = secondary;
    self
  }

  pub fn specs(&self) -> &[FeatureMapSpec] {
    &self.specs
  }

  pub fn num_anchors(&self) -> usize {
    self.specs.iter().map(FeatureMapSpec::num_anchors).sum()
  }

  pub fn generate(&self) -> AnchorSet {
    let mut anchors = Vec::with_capacity(self.num_anchors());

    for spec in &self.specs {
      let half_sizes = spec.cell_half_sizes(self.secondary);
      let (w, h) = (spec.grid_width as f32, spec.grid_height as f32);

      for j in 0..spec.grid_height {
        let cy = (j as f32 + 0.5) / h;
        for i in 0..spec.grid_width {
          let cx = (i as f32 + 0.5) / w;
          for &(half_w, half_h) in &half_sizes {
            anchors.push(Anchor {
              cx,
              cy,
              half_w,
              half_h,
            });
          }
        }
      }

      debug!(
        "特征图 {}x{}: 每格 {} 个框, 共 {} 个锚框",
        spec.grid_width,
        spec.grid_height,
        half_sizes.len(),
        spec.num_anchors()
      );
    }

    debug!("锚框生成完成, 总数 {}", anchors.len());

    AnchorSet {
      anchors: anchors.into_boxed_slice(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn two_scale() -> AnchorGenerator {
    AnchorGenerator::new(vec![
      FeatureMapSpec::square(4, [0.1, 0.2], &[1.0, 0.5, 2.0]),
      FeatureMapSpec::new(3, 2, [0.3, 0.6], &[1.0]),
    ])
    .unwrap()
  }

  #[test]
  fn test_anchor_count_matches_config() {
    let generator = two_scale();
    let anchors = generator.generate();
    assert_eq!(anchors.len(), 4 * 4 * 4 + 3 * 2 * 2);
    assert_eq!(anchors.len(), generator.num_anchors());
  }

  #[test]
  fn test_generation_is_deterministic() {
    let generator = two_scale();
    let a = generator.generate();
    let b = generator.generate();
    let bits = |set: &AnchorSet| {
      set
        .iter()
        .flat_map(|a| [a.cx, a.cy, a.half_w, a.half_h])
        .map(f32::to_bits)
        .collect::<Vec<_>>()
    };
    assert_eq!(bits(&a), bits(&b));
  }

  #[test]
  fn test_half_extents_are_positive() {
    for anchor in AnchorGenerator::reference().generate().iter() {
      assert!(anchor.half_w > 0.0);
      assert!(anchor.half_h > 0.0);
    }
  }

  #[test]
  fn test_reference_anchor_count() {
    assert_eq!(AnchorGenerator::reference().generate().len(), 5972);
  }

  #[test]
  fn test_single_cell_unit_ratio() {
    let generator =
      AnchorGenerator::new(vec![FeatureMapSpec::square(1, [0.5, 0.5], &[1.0])]).unwrap();
    let anchors = generator.generate();
    assert_eq!(anchors.len(), 2);
    for anchor in anchors.iter() {
      assert_eq!(anchor.cx, 0.5);
      assert_eq!(anchor.cy, 0.5);
      assert_eq!(anchor.half_w, 0.25);
      assert_eq!(anchor.half_h, 0.25);
    }
  }

  #[test]
  fn test_cell_order_is_row_major() {
    let generator =
      AnchorGenerator::new(vec![FeatureMapSpec::new(2, 2, [0.2, 0.2], &[1.0])]).unwrap();
    let centers: Vec<(f32, f32)> = generator
      .generate()
      .iter()
      .step_by(2)
      .map(|a| (a.cx, a.cy))
      .collect();
    assert_eq!(
      centers,
      vec![(0.25, 0.25), (0.75, 0.25), (0.25, 0.75), (0.75, 0.75)]
    );
  }

  #[test]
  fn test_box_order_within_cell() {
    let generator =
      AnchorGenerator::new(vec![FeatureMapSpec::square(1, [0.16, 0.25], &[1.0, 4.0])]).unwrap();
    let anchors = generator.generate();
    let sizes: Vec<(f32, f32)> = anchors.iter().map(|a| (a.half_w, a.half_h)).collect();
    assert_eq!(sizes.len(), 3);
    assert!((sizes[0].0 - 0.08).abs() < 1e-6 && (sizes[0].1 - 0.08).abs() < 1e-6);
    assert!((sizes[1].0 - 0.1).abs() < 1e-6 && (sizes[1].1 - 0.1).abs() < 1e-6);
    assert!((sizes[2].0 - 0.16).abs() < 1e-6 && (sizes[2].1 - 0.04).abs() < 1e-6);
  }

  #[test]
  fn test_secondary_square_max_size() {
    let generator = AnchorGenerator::new(vec![FeatureMapSpec::square(1, [0.16, 0.25], &[1.0])])
      .unwrap()
      .secondary_square(SecondarySquare::MaxSize);
    let second = generator.generate().as_slice()[1];
    assert!((second.half_w - 0.125).abs() < 1e-6);
  }

  #[test]
  fn test_invalid_specs_are_rejected() {
    assert!(AnchorGenerator::new(vec![]).is_err());
    assert!(AnchorGenerator::new(vec![FeatureMapSpec::new(0, 3, [0.1, 0.2], &[1.0])]).is_err());
    assert!(AnchorGenerator::new(vec![FeatureMapSpec::square(3, [0.0, 0.2], &[1.0])]).is_err());
    assert!(AnchorGenerator::new(vec![FeatureMapSpec::square(3, [0.1, 0.2], &[0.5, 1.0])]).is_err());
    assert!(AnchorGenerator::new(vec![FeatureMapSpec::square(3, [0.1, 0.2], &[])]).is_err());
    assert!(matches!(
      AnchorGenerator::new(vec![FeatureMapSpec::square(3, [0.1, 0.2], &[1.0, -0.5])]),
      Err(DetectError::Configuration(_))
    ));
  }
}
