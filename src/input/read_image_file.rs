// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::PathBuf;

use tracing::error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::FromEncodedImage,
  input::{EncodedFrames, InputError},
};

/// 单张图像文件，`image:///path/to/face.jpg`
pub struct ImageFileInput {
  path: PathBuf,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
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

    let path = PathBuf::from(url.path());
    if !path.is_file() {
      error!("图像文件不存在: {}", path.display());
      return Err(InputError::IoError(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("图像文件不存在: {}", path.display()),
      )));
    }

    Ok(ImageFileInput { path })
  }
}

impl ImageFileInput {
  pub fn path(&self) -> &std::path::Path {
    &self.path
  }

  pub fn into_frames<F: FromEncodedImage>(self) -> EncodedFrames<F> {
    EncodedFrames::new(vec![self.path])
  }
}
