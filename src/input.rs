// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/input.rs - 图像输入
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

use std::{marker::PhantomData, path::PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::{FromUrl, FromUrlWithScheme, error::DetectError, frame::FromEncodedImage};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::ImageFileInput;

#[cfg(feature = "read_image_file")]
mod read_folder;
#[cfg(feature = "read_image_file")]
pub use self::read_folder::FolderInput;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  DecodeError(#[from] DetectError),
  #[error("URI 参数错误: {0}")]
  QueryError(String),
}

/// 按顺序逐个读取并解码图像文件
pub struct EncodedFrames<F> {
  paths: std::vec::IntoIter<PathBuf>,
  _phantom: PhantomData<fn() -> F>,
}

impl<F> EncodedFrames<F> {
  pub(crate) fn new(paths: Vec<PathBuf>) -> Self {
    Self {
      paths: paths.into_iter(),
      _phantom: PhantomData,
    }
  }
}

impl<F: FromEncodedImage> Iterator for EncodedFrames<F> {
  type Item = Result<F, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.paths.next()?;
    debug!("读取图像: {}", path.display());
    Some(
      std::fs::read(&path)
        .map_err(InputError::from)
        .and_then(|bytes| F::from_encoded(&bytes).map_err(InputError::from)),
    )
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    self.paths.size_hint()
  }
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ImageFile(ImageFileInput),
  #[cfg(feature = "read_image_file")]
  Folder(FolderInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      if url.scheme() == ImageFileInput::SCHEME {
        return Ok(InputWrapper::ImageFile(ImageFileInput::from_url(url)?));
      }
      if url.scheme() == FolderInput::SCHEME {
        return Ok(InputWrapper::Folder(FolderInput::from_url(url)?));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl InputWrapper {
  pub fn into_frames<F: FromEncodedImage>(self) -> EncodedFrames<F> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageFile(input) => input.into_frames(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::Folder(input) => input.into_frames(),
    }
  }
}
