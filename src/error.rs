// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/error.rs - 检测错误定义
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

use thiserror::Error;

/// 检测流程中的错误。任何一种错误都会中止当前调用，不返回部分结果。
#[derive(Error, Debug)]
pub enum DetectError {
  #[error("形状不匹配: {what}, 期望 {expected}, 实际 {actual}")]
  ShapeMismatch {
    what: &'static str,
    expected: usize,
    actual: usize,
  },
  #[error("无效图像: {0}")]
  InvalidImage(#[from] image::ImageError),
  #[error("配置错误: {0}")]
  Configuration(String),
  #[error("推理后端错误: {0}")]
  Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl DetectError {
  pub fn shape(what: &'static str, expected: usize, actual: usize) -> Self {
    DetectError::ShapeMismatch {
      what,
      expected,
      actual,
    }
  }

  pub fn config(msg: impl Into<String>) -> Self {
    DetectError::Configuration(msg.into())
  }

  pub fn backend<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    DetectError::Backend(Box::new(err))
  }

  pub fn is_shape_mismatch(&self) -> bool {
    matches!(self, DetectError::ShapeMismatch { .. })
  }
}

/// 长度不一致时返回 `ShapeMismatch`
pub(crate) fn ensure_len(what: &'static str, expected: usize, actual: usize) -> Result<(), DetectError> {
  if expected != actual {
    return Err(DetectError::shape(what, expected, actual));
  }
  Ok(())
}
