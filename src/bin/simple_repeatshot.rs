// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/bin/simple_repeatshot.rs - 重复推理计时
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use kouzhao::{
  DetectionPipelineBuilder, FromUrl, MaskFrame,
  anchor::{REFERENCE_INPUT_H, REFERENCE_INPUT_W},
  input::InputWrapper,
  model::{MaskLabel, RknnBackendBuilder},
  output::OutputWrapper,
  task::{RepeatShotTask, Task},
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// RKNN 模型，例如 rknn:///opt/face_mask.rknn
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 推理次数
  #[arg(long, default_value_t = 1000, value_name = "COUNT")]
  pub repeat: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?;
  let backend = RknnBackendBuilder::from_url(&args.model)?
    .build::<REFERENCE_INPUT_W, REFERENCE_INPUT_H>()?;
  let pipeline = DetectionPipelineBuilder::reference_model().build(backend)?;
  let output = OutputWrapper::<MaskLabel>::from_url(&args.output)?;

  RepeatShotTask::default()
    .with_repeat_times(args.repeat)
    .run_task(input.into_frames::<MaskFrame>(), pipeline, output)?;

  Ok(())
}
