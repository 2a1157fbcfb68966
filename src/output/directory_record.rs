// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  sync::atomic::{AtomicU32, Ordering},
};

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::WithLabel,
  output::{
    Render, ToRgbImage,
    draw::Draw,
    record::{RecordOutputError, write_record},
  },
  pipeline::Detection,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录错误: {0}")]
  RecordError(#[from] RecordOutputError),
}

/// 按日期分目录保存每帧结果：`<dir>/YYYY/MM/DD/HH-MM-SS-XXXX.png`
///
/// - `?record` 额外写一份同名 `.json`，图像不画框
/// - `?always` 没有检测结果的帧也保存
pub struct DirectoryRecordOutput<T> {
  directory: PathBuf,
  draw: Option<Draw>,
  frame_counter: AtomicU32,
  always: bool,
  _phantom: PhantomData<fn() -> T>,
}

impl<T> FromUrlWithScheme for DirectoryRecordOutput<T> {
  const SCHEME: &'static str = "folder";
}

impl<T> FromUrl for DirectoryRecordOutput<T> {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let record = uri.query_pairs().any(|(k, _)| k == "record");
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      draw: if record { None } else { Some(Draw::default()) },
      frame_counter: AtomicU32::new(0),
      always,
      _phantom: PhantomData,
    })
  }
}

impl<T> DirectoryRecordOutput<T> {
  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl<F: ToRgbImage, T: WithLabel> Render<F, Vec<Detection>> for DirectoryRecordOutput<T> {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &F, result: &Vec<Detection>) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let path = self.frame_path()?;
    match &self.draw {
      Some(draw) => draw.draw_detection(frame, result).save(&path)?,
      None => {
        frame.to_rgb_image().save(&path)?;
        write_record::<T>(&path.with_extension("json"), result)?;
      }
    }
    debug!("保存帧到 {}", path.display());

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{bbox::BoundingBox, model::MaskLabel};
  use image::RgbImage;

  fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
      for entry in std::fs::read_dir(&dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else {
          files.push(path);
        }
      }
    }
    files.sort();
    files
  }

  #[test]
  fn test_record_mode_writes_json_sidecar() {
    let dir = std::env::temp_dir().join(format!("kouzhao-folder-{}", std::process::id()));
    let url = url::Url::parse(&format!("folder://{}?record", dir.display())).unwrap();
    let output = DirectoryRecordOutput::<MaskLabel>::from_url(&url).unwrap();

    let frame = RgbImage::new(8, 8);
    // 没有检测结果且未设置 always，不保存
    output.render_result(&frame, &Vec::new()).unwrap();
    assert!(!dir.exists() || files_under(&dir).is_empty());

    let detections = vec![Detection {
      class_id: 0,
      confidence: 0.9,
      bbox: BoundingBox::new(0.1, 0.1, 0.6, 0.6),
    }];
    output.render_result(&frame, &detections).unwrap();

    let files = files_under(&dir);
    assert_eq!(files.len(), 2);
    assert!(files.iter().any(|p| p.extension().is_some_and(|e| e == "json")));
    assert!(files.iter().any(|p| p.extension().is_some_and(|e| e == "png")));

    std::fs::remove_dir_all(&dir).unwrap();
  }
}
