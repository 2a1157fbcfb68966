// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/input/read_folder.rs - 目录图像输入
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

use std::path::{Path, PathBuf};

use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::FromEncodedImage,
  input::{EncodedFrames, InputError},
};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

fn is_image_file(path: &Path) -> bool {
  path.is_file()
    && path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
      .unwrap_or(false)
}

/// 目录中的全部图像，按文件名排序。
///
/// `folder:///captures?last=2` 只保留最后两张。
pub struct FolderInput {
  paths: Vec<PathBuf>,
}

impl FromUrlWithScheme for FolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for FolderInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let last = match url.query_pairs().find(|(k, _)| k == "last") {
      Some((_, v)) => Some(
        v.parse::<usize>()
          .map_err(|e| InputError::QueryError(format!("last={}: {}", v, e)))?,
      ),
      None => None,
    };

    let mut paths = std::fs::read_dir(url.path())?
      .map(|entry| entry.map(|e| e.path()))
      .collect::<Result<Vec<_>, _>>()?;
    paths.retain(|p| is_image_file(p));
    paths.sort();

    if let Some(last) = last {
      let skip = paths.len().saturating_sub(last);
      paths.drain(..skip);
    }

    info!("目录 {} 中读取 {} 张图像", url.path(), paths.len());

    Ok(FolderInput { paths })
  }
}

impl FolderInput {
  pub fn len(&self) -> usize {
    self.paths.len()
  }

  pub fn is_empty(&self) -> bool {
    self.paths.is_empty()
  }

  pub fn into_frames<F: FromEncodedImage>(self) -> EncodedFrames<F> {
    EncodedFrames::new(self.paths)
  }
}
