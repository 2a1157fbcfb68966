// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/decode.rs - 偏移量解码
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

use crate::{
  anchor::Anchor,
  bbox::BoundingBox,
  error::{DetectError, ensure_len},
};

/// 网络输出的单个锚框偏移量 `(dx, dy, dw, dh)`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawOffset {
  pub dx: f32,
  pub dy: f32,
  pub dw: f32,
  pub dh: f32,
}

impl From<[f32; 4]> for RawOffset {
  fn from([dx, dy, dw, dh]: [f32; 4]) -> Self {
    Self { dx, dy, dw, dh }
  }
}

/// 默认方差，等价于 `cx + dx * half_w`、`w * exp(dw)`
pub const DEFAULT_VARIANCES: [f32; 4] = [0.5, 0.5, 1.0, 1.0];
/// SSD 训练时常用的方差
pub const SSD_VARIANCES: [f32; 4] = [0.1, 0.1, 0.2, 0.2];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxDecoder {
  variances: [f32; 4],
}

impl Default for BoxDecoder {
  fn default() -> Self {
    Self {
      variances: DEFAULT_VARIANCES,
    }
  }
}

impl BoxDecoder {
  pub fn with_variances(variances: [f32; 4]) -> Self {
    Self { variances }
  }

  pub fn ssd() -> Self {
    Self::with_variances(SSD_VARIANCES)
  }

  pub fn variances(&self) -> [f32; 4] {
    self.variances
  }

  pub fn decode_one(&self, anchor: &Anchor, offset: &RawOffset) -> BoundingBox {
    let [vx, vy, vw, vh] = self.variances;
    let (aw, ah) = (anchor.half_w * 2.0, anchor.half_h * 2.0);

    let cx = anchor.cx + offset.dx * vx * aw;
    let cy = anchor.cy + offset.dy * vy * ah;
    let w = aw * (offset.dw * vw).exp();
    let h = ah * (offset.dh * vh).exp();

    BoundingBox::from_center(cx, cy, w, h)
  }

  /// 逐个锚框解码，长度不一致返回 `ShapeMismatch`
  pub fn decode(&self, anchors: &[Anchor], offsets: &[RawOffset]) -> Result<Vec<BoundingBox>, DetectError> {
    ensure_len("偏移量数量", anchors.len(), offsets.len())?;

    Ok(
      anchors
        .iter()
        .zip(offsets)
        .map(|(anchor, offset)| self.decode_one(anchor, offset))
        .collect(),
    )
  }

  /// 输入为展平的 `[N, 4]` 张量
  pub fn decode_flat(&self, anchors: &[Anchor], offsets: &[f32]) -> Result<Vec<BoundingBox>, DetectError> {
    ensure_len("偏移量张量长度", anchors.len() * 4, offsets.len())?;

    Ok(
      anchors
        .iter()
        .zip(offsets.chunks_exact(4))
        .map(|(anchor, o)| {
          let offset = RawOffset {
            dx: o[0],
            dy: o[1],
            dw: o[2],
            dh: o[3],
          };
          self.decode_one(anchor, &offset)
        })
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn anchor(cx: f32, cy: f32, half_w: f32, half_h: f32) -> Anchor {
    Anchor {
      cx,
      cy,
      half_w,
      half_h,
    }
  }

  #[test]
  fn test_zero_offset_reproduces_anchor() {
    let anchors = [anchor(0.5, 0.5, 0.25, 0.25), anchor(0.1, 0.9, 0.05, 0.125)];
    let offsets = [RawOffset::default(); 2];

    for decoder in [BoxDecoder::default(), BoxDecoder::ssd()] {
      let boxes = decoder.decode(&anchors, &offsets).unwrap();
      assert_eq!(boxes[0].to_array(), [0.25, 0.25, 0.75, 0.75]);
      for (b, a) in boxes.iter().zip(&anchors) {
        let (cx, cy) = b.center();
        assert!((cx - a.cx).abs() < 1e-6);
        assert!((cy - a.cy).abs() < 1e-6);
        assert!((b.width() - 2.0 * a.half_w).abs() < 1e-6);
        assert!((b.height() - 2.0 * a.half_h).abs() < 1e-6);
      }
    }
  }

  #[test]
  fn test_variance_free_formula() {
    let a = anchor(0.5, 0.5, 0.1, 0.2);
    let offset = RawOffset::from([1.0, -0.5, 2.0_f32.ln(), 0.0]);
    let b = BoxDecoder::default().decode_one(&a, &offset);
    let (cx, cy) = b.center();
    assert!((cx - 0.6).abs() < 1e-6);
    assert!((cy - 0.4).abs() < 1e-6);
    assert!((b.width() - 0.4).abs() < 1e-6);
    assert!((b.height() - 0.4).abs() < 1e-6);
  }

  #[test]
  fn test_ssd_variances() {
    let a = anchor(0.5, 0.5, 0.1, 0.1);
    let offset = RawOffset::from([1.0, 0.0, 5.0, 0.0]);
    let b = BoxDecoder::ssd().decode_one(&a, &offset);
    let (cx, _) = b.center();
    // cx + 1.0 * 0.1 * 0.2, w * exp(5.0 * 0.2)
    assert!((cx - 0.52).abs() < 1e-6);
    assert!((b.width() - 0.2 * 1.0_f32.exp()).abs() < 1e-5);
  }

  #[test]
  fn test_no_clamping() {
    let a = anchor(0.02, 0.98, 0.05, 0.05);
    let b = BoxDecoder::default().decode_one(&a, &RawOffset::default());
    assert!(b.xmin < 0.0);
    assert!(b.ymax > 1.0);
  }

  #[test]
  fn test_length_mismatch() {
    let anchors = [anchor(0.5, 0.5, 0.1, 0.1); 3];
    let offsets = [RawOffset::default(); 2];
    let err = BoxDecoder::default().decode(&anchors, &offsets).unwrap_err();
    assert!(err.is_shape_mismatch());

    let err = BoxDecoder::default()
      .decode_flat(&anchors, &[0.0; 11])
      .unwrap_err();
    assert!(err.is_shape_mismatch());
  }

  #[test]
  fn test_flat_matches_structured() {
    let anchors = [anchor(0.3, 0.3, 0.1, 0.2), anchor(0.7, 0.6, 0.2, 0.1)];
    let flat = [0.1, -0.2, 0.3, -0.4, 0.5, 0.6, -0.7, 0.8];
    let structured = [
      RawOffset::from([0.1, -0.2, 0.3, -0.4]),
      RawOffset::from([0.5, 0.6, -0.7, 0.8]),
    ];
    let decoder = BoxDecoder::default();
    assert_eq!(
      decoder.decode_flat(&anchors, &flat).unwrap(),
      decoder.decode(&anchors, &structured).unwrap()
    );
  }
}
