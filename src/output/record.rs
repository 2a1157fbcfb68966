// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/output/record.rs - 检测结果记录
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

use std::{
  marker::PhantomData,
  path::{Path, PathBuf},
};

use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  bbox::BoundingBox,
  model::WithLabel,
  output::{Render, label_name},
  pipeline::Detection,
};

#[derive(Error, Debug)]
pub enum RecordOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordEntry {
  pub label: String,
  pub class_id: usize,
  pub confidence: f32,
  pub bbox: BoundingBox,
}

impl RecordEntry {
  pub fn from_detection<T: WithLabel>(detection: &Detection) -> Self {
    Self {
      label: label_name::<T>(detection.class_id),
      class_id: detection.class_id,
      confidence: detection.confidence,
      bbox: detection.bbox,
    }
  }
}

pub(crate) fn write_record<T: WithLabel>(
  path: &Path,
  detections: &[Detection],
) -> Result<(), RecordOutputError> {
  let entries: Vec<RecordEntry> = detections
    .iter()
    .map(RecordEntry::from_detection::<T>)
    .collect();
  let json = serde_json::to_string_pretty(&entries)?;
  std::fs::write(path, json)?;
  Ok(())
}

/// 把检测结果写成 JSON 数组，`record:///tmp/result.json`
pub struct RecordOutput<T> {
  path: PathBuf,
  _phantom: PhantomData<fn() -> T>,
}

impl<T> FromUrlWithScheme for RecordOutput<T> {
  const SCHEME: &'static str = "record";
}

impl<T> FromUrl for RecordOutput<T> {
  type Error = RecordOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(RecordOutputError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(RecordOutput {
      path: PathBuf::from(uri.path()),
      _phantom: PhantomData,
    })
  }
}

impl<T> RecordOutput<T> {
  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl<F, T: WithLabel> Render<F, Vec<Detection>> for RecordOutput<T> {
  type Error = RecordOutputError;

  fn render_result(&self, _frame: &F, result: &Vec<Detection>) -> Result<(), Self::Error> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    write_record::<T>(&self.path, result)?;
    info!("写入 {} 条检测结果到 {}", result.len(), self.path.display());
    Ok(())
  }
}
