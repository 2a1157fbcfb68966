// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::{marker::PhantomData, path::Path};

use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::WithLabel,
  output::{Render, ToRgbImage, draw::Draw},
  pipeline::Detection,
};

pub struct SaveImageFileOutput<T> {
  path: String,
  draw: Draw,
  _phantom: PhantomData<fn() -> T>,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl<T> FromUrlWithScheme for SaveImageFileOutput<T> {
  const SCHEME: &'static str = "image";
}

impl<T> FromUrl for SaveImageFileOutput<T> {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let thickness = uri
      .query_pairs()
      .find(|(k, _)| k == "thickness")
      .and_then(|(_, v)| v.parse::<u32>().ok());
    let draw = match thickness {
      Some(thickness) => Draw::default().with_thickness(thickness),
      None => Draw::default(),
    };

    Ok(SaveImageFileOutput {
      path: uri.path().to_string(),
      draw,
      _phantom: PhantomData,
    })
  }
}

impl<T> SaveImageFileOutput<T> {
  fn save_image(&self, image: image::RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(SaveImageFileError::IoError)?;
    }

    image
      .save(&self.path)
      .map_err(SaveImageFileError::ImageError)?;

    warn!("保存图像到文件: {}", self.path);

    Ok(())
  }
}

impl<F: ToRgbImage, T: WithLabel> Render<F, Vec<Detection>> for SaveImageFileOutput<T> {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &F, result: &Vec<Detection>) -> Result<(), Self::Error> {
    let image = self.draw.draw_detection(frame, result);
    self.save_image(image)
  }
}
