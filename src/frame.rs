// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/frame.rs - 归一化 NHWC 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage, imageops::FilterType};
use tracing::debug;

use crate::{
  anchor::{REFERENCE_INPUT_H, REFERENCE_INPUT_W},
  error::{DetectError, ensure_len},
};

const RGB_CHANNELS: usize = 3;

/// 参考模型的输入帧
pub type MaskFrame = NormalizedFrame<REFERENCE_INPUT_W, REFERENCE_INPUT_H>;

/// 由编码图像（JPEG、PNG 等）构造模型输入
pub trait FromEncodedImage: Sized {
  fn from_encoded(bytes: &[u8]) -> Result<Self, DetectError>;
}

/// NHWC 布局、取值 [0, 1] 的浮点帧，批大小为 1
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFrame<const W: u32, const H: u32> {
  data: Box<[f32]>,
}

impl<const W: u32, const H: u32> NormalizedFrame<W, H> {
  pub const LEN: usize = RGB_CHANNELS * W as usize * H as usize;

  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[f32] {
    &self.data
  }

  /// 任意尺寸的 RGB 图像缩放到 `W x H` 后归一化
  pub fn from_rgb_image(image: &RgbImage) -> Self {
    let resized = if image.dimensions() == (W, H) {
      image.clone()
    } else {
      debug!("缩放图像 {:?} -> {}x{}", image.dimensions(), W, H);
      image::imageops::resize(image, W, H, FilterType::Lanczos3)
    };

    let data = resized
      .into_raw()
      .into_iter()
      .map(|v| v as f32 / 255.0)
      .collect::<Vec<_>>();

    Self {
      data: data.into_boxed_slice(),
    }
  }

  /// 反量化回 8 位像素，用于整型输入的推理后端
  pub fn to_u8_nhwc(&self) -> Vec<u8> {
    self
      .data
      .iter()
      .map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
      .collect()
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    let raw = self.to_u8_nhwc();
    ImageBuffer::from_fn(W, H, |x, y| {
      let idx = (y as usize * W as usize + x as usize) * RGB_CHANNELS;
      Rgb([raw[idx], raw[idx + 1], raw[idx + 2]])
    })
  }
}

impl<const W: u32, const H: u32> Default for NormalizedFrame<W, H> {
  fn default() -> Self {
    Self {
      data: vec![0.0; Self::LEN].into_boxed_slice(),
    }
  }
}

impl<const W: u32, const H: u32> TryFrom<Vec<f32>> for NormalizedFrame<W, H> {
  type Error = DetectError;

  fn try_from(data: Vec<f32>) -> Result<Self, Self::Error> {
    ensure_len("帧数据长度", Self::LEN, data.len())?;
    Ok(Self {
      data: data.into_boxed_slice(),
    })
  }
}

impl<const W: u32, const H: u32> FromEncodedImage for NormalizedFrame<W, H> {
  fn from_encoded(bytes: &[u8]) -> Result<Self, DetectError> {
    let image = image::load_from_memory(bytes)?.to_rgb8();
    Ok(Self::from_rgb_image(&image))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  fn encode_png(image: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
      .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
      .unwrap();
    bytes
  }

  #[test]
  fn test_from_encoded_resizes_and_normalizes() {
    let image = RgbImage::from_pixel(32, 16, Rgb([255, 0, 51]));
    let frame = NormalizedFrame::<8, 8>::from_encoded(&encode_png(&image)).unwrap();
    assert_eq!(frame.as_nhwc().len(), 8 * 8 * 3);
    for px in frame.as_nhwc().chunks_exact(3) {
      assert!((px[0] - 1.0).abs() < 0.01);
      assert!(px[1].abs() < 0.01);
      assert!((px[2] - 0.2).abs() < 0.01);
    }
  }

  #[test]
  fn test_invalid_image_bytes() {
    let err = NormalizedFrame::<8, 8>::from_encoded(b"not an image").unwrap_err();
    assert!(matches!(err, DetectError::InvalidImage(_)));
  }

  #[test]
  fn test_rgb_round_trip_at_model_size() {
    let image = RgbImage::from_fn(4, 4, |x, y| Rgb([(x * 60) as u8, (y * 60) as u8, 7]));
    let frame = NormalizedFrame::<4, 4>::from_rgb_image(&image);
    assert_eq!(frame.to_rgb_image(), image);
  }

  #[test]
  fn test_try_from_checks_length() {
    assert!(NormalizedFrame::<2, 2>::try_from(vec![0.0; 12]).is_ok());
    assert!(
      NormalizedFrame::<2, 2>::try_from(vec![0.0; 11])
        .unwrap_err()
        .is_shape_mismatch()
    );
  }
}
