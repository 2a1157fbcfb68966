// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/output.rs - 输出定义
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

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::NormalizedFrame,
  model::WithLabel,
  pipeline::Detection,
};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

pub trait ToRgbImage {
  fn to_rgb_image(&self) -> RgbImage;
}

impl<const W: u32, const H: u32> ToRgbImage for NormalizedFrame<W, H> {
  fn to_rgb_image(&self) -> RgbImage {
    NormalizedFrame::<W, H>::to_rgb_image(self)
  }
}

impl ToRgbImage for RgbImage {
  fn to_rgb_image(&self) -> RgbImage {
    self.clone()
  }
}

/// 未知类别编号直接输出数字
pub fn label_name<T: WithLabel>(class_id: usize) -> String {
  u32::try_from(class_id)
    .ok()
    .and_then(T::from_label_id)
    .map(|label| label.to_label_str())
    .unwrap_or_else(|| class_id.to_string())
}

#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
pub mod draw;

mod record;
pub use self::record::{RecordEntry, RecordOutput, RecordOutputError};

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("记录输出错误: {0}")]
  RecordOutputError(#[from] RecordOutputError),
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper<T> {
  Record(RecordOutput<T>),
  #[cfg(feature = "save_image_file")]
  SaveImageFile(SaveImageFileOutput<T>),
  #[cfg(feature = "directory_record")]
  DirectoryRecord(DirectoryRecordOutput<T>),
}

impl<T: WithLabel> FromUrl for OutputWrapper<T> {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      RecordOutput::<T>::SCHEME => Ok(OutputWrapper::Record(RecordOutput::from_url(url)?)),
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::<T>::SCHEME => Ok(OutputWrapper::SaveImageFile(
        SaveImageFileOutput::from_url(url)?,
      )),
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::<T>::SCHEME => Ok(OutputWrapper::DirectoryRecord(
        DirectoryRecordOutput::from_url(url)?,
      )),
      scheme => Err(OutputError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl<F: ToRgbImage, T: WithLabel> Render<F, Vec<Detection>> for OutputWrapper<T> {
  type Error = OutputError;

  fn render_result(&self, frame: &F, result: &Vec<Detection>) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Record(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFile(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}
