// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/task.rs - 任务定义
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
  collections::VecDeque,
  time::{Duration, Instant},
};
use tracing::{info, warn};

use crate::{
  model::Model,
  output::Render,
  pipeline::Detection,
  summary::{ClassificationSummary, DEFAULT_PASS_THRESHOLD, DEFAULT_SAMPLE_COUNT, Verdict},
};

pub trait Task<I, M, O>: Sized {
  type Error;
  type Output;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

pub struct OneShotTask;

impl<F, D, IE, ME, RE, I, M, O> Task<I, M, O> for OneShotTask
where
  IE: std::error::Error + Sync + Send + 'static,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<F, IE>>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
{
  type Error = anyhow::Error;
  type Output = D;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<D, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))??;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}", elapsed);
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(result)
  }
}

/// 同一帧重复推理，统计平均耗时
pub struct RepeatShotTask {
  repeat_times: usize,
  warmup: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      repeat_times: 1000,
      warmup: 2,
    }
  }
}

impl RepeatShotTask {
  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times;
    self
  }

  pub fn with_warmup(mut self, warmup: usize) -> Self {
    self.warmup = warmup;
    self
  }
}

impl<F, D, IE, ME, RE, I, M, O> Task<I, M, O> for RepeatShotTask
where
  IE: std::error::Error + Sync + Send + 'static,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<F, IE>>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
{
  type Error = anyhow::Error;
  /// 去掉预热后的平均推理时间，次数不足时为 `None`
  type Output = Option<Duration>;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))??;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.repeat_times);
    for i in 0..self.repeat_times {
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      info!("({})渲染完成，耗时: {:.2?}", i, now.elapsed());
      times.push(elapsed);
    }

    let measured = times.len().saturating_sub(self.warmup);
    if measured == 0 {
      warn!("推理次数不足 {} 次，不统计平均时间", self.warmup + 1);
      return Ok(None);
    }
    let average = times.iter().skip(self.warmup).sum::<Duration>() / measured as u32;
    warn!("平均推理时间: {:.2?}", average);

    Ok(Some(average))
  }
}

/// 取输入的最后若干帧逐帧检测，再汇总成一个结论
pub struct SampledTask {
  sample_count: usize,
  pass_threshold: f32,
}

impl Default for SampledTask {
  fn default() -> Self {
    Self {
      sample_count: DEFAULT_SAMPLE_COUNT,
      pass_threshold: DEFAULT_PASS_THRESHOLD,
    }
  }
}

impl SampledTask {
  pub fn with_sample_count(mut self, sample_count: usize) -> Self {
    self.sample_count = sample_count.max(1);
    self
  }

  pub fn with_pass_threshold(mut self, pass_threshold: f32) -> Self {
    self.pass_threshold = pass_threshold;
    self
  }
}

impl<F, IE, ME, RE, I, M, O> Task<I, M, O> for SampledTask
where
  IE: std::error::Error + Sync + Send + 'static,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<F, IE>>,
  M: Model<Input = F, Output = Vec<Detection>, Error = ME>,
  O: Render<F, Vec<Detection>, Error = RE>,
{
  type Error = anyhow::Error;
  type Output = ClassificationSummary;

  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    // 只保留最后 sample_count 个读取结果，更早的坏帧不影响结论
    let mut recent = VecDeque::with_capacity(self.sample_count);
    let mut total = 0usize;
    for frame in input {
      if recent.len() == self.sample_count {
        recent.pop_front();
      }
      recent.push_back(frame);
      total += 1;
    }
    info!("共 {} 帧，使用最后 {} 帧", total, recent.len());

    let frames = recent.into_iter().collect::<Result<Vec<F>, IE>>()?;
    let mut samples = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
      let now = Instant::now();
      let result = model.infer(frame)?;
      info!("({})推理完成，{} 个目标，耗时: {:.2?}", i, result.len(), now.elapsed());
      output.render_result(frame, &result)?;
      samples.push(result);
    }

    let summary =
      ClassificationSummary::from_samples(&samples).ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    match summary.verdict {
      Verdict::Class(class_id) if summary.passed(self.pass_threshold) => info!(
        "结论: 类别 {}，{} 个人脸，平均置信度 {:.3}",
        class_id, summary.faces, summary.accuracy
      ),
      Verdict::Class(class_id) => warn!(
        "类别 {} 平均置信度 {:.3} 低于阈值 {:.2}",
        class_id, summary.accuracy, self.pass_threshold
      ),
      Verdict::NotFound => warn!("没有检测到人脸"),
      Verdict::Unsure => warn!("各帧结果不一致，无法确定"),
    }

    Ok(summary)
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, convert::Infallible};

  use super::*;
  use crate::bbox::BoundingBox;

  struct EchoModel;

  impl Model for EchoModel {
    type Input = u32;
    type Output = Vec<Detection>;
    type Error = std::io::Error;

    fn infer(&self, input: &u32) -> Result<Vec<Detection>, std::io::Error> {
      Ok(vec![Detection {
        class_id: (*input % 2) as usize,
        confidence: 0.9,
        bbox: BoundingBox::new(0.1, 0.1, 0.5, 0.5),
      }])
    }
  }

  #[derive(Default)]
  struct CountingOutput {
    frames: RefCell<Vec<u32>>,
  }

  impl Render<u32, Vec<Detection>> for &CountingOutput {
    type Error = std::io::Error;

    fn render_result(&self, frame: &u32, _result: &Vec<Detection>) -> Result<(), Self::Error> {
      self.frames.borrow_mut().push(*frame);
      Ok(())
    }
  }

  fn frames(values: &[u32]) -> impl Iterator<Item = Result<u32, Infallible>> + '_ {
    values.iter().map(|v| Ok(*v))
  }

  #[test]
  fn test_one_shot_uses_first_frame() {
    let output = CountingOutput::default();
    let result = OneShotTask
      .run_task(frames(&[3, 4]), EchoModel, &output)
      .unwrap();
    assert_eq!(result[0].class_id, 1);
    assert_eq!(*output.frames.borrow(), vec![3]);
  }

  #[test]
  fn test_one_shot_without_input() {
    let output = CountingOutput::default();
    assert!(OneShotTask.run_task(frames(&[]), EchoModel, &output).is_err());
  }

  #[test]
  fn test_repeat_shot_average() {
    let output = CountingOutput::default();
    let average = RepeatShotTask::default()
      .with_repeat_times(5)
      .run_task(frames(&[2]), EchoModel, &output)
      .unwrap();
    assert!(average.is_some());
    assert_eq!(output.frames.borrow().len(), 5);

    let average = RepeatShotTask::default()
      .with_repeat_times(2)
      .run_task(frames(&[2]), EchoModel, &output)
      .unwrap();
    assert!(average.is_none());
  }

  #[test]
  fn test_sampled_uses_last_frames() {
    let output = CountingOutput::default();
    let summary = SampledTask::default()
      .run_task(frames(&[2, 3, 5, 7]), EchoModel, &output)
      .unwrap();
    assert_eq!(*output.frames.borrow(), vec![5, 7]);
    assert_eq!(summary.verdict, Verdict::Class(1));
    assert!(summary.passed(DEFAULT_PASS_THRESHOLD));
  }

  #[test]
  fn test_sampled_inconsistent_frames() {
    let output = CountingOutput::default();
    let summary = SampledTask::default()
      .with_sample_count(3)
      .run_task(frames(&[2, 3, 5]), EchoModel, &output)
      .unwrap();
    assert_eq!(summary.verdict, Verdict::Unsure);
  }

  #[test]
  fn test_sampled_input_error() {
    let output = CountingOutput::default();
    let input = vec![
      Ok(1u32),
      Err(std::io::Error::other("读取失败")),
    ];
    assert!(
      SampledTask::default()
        .run_task(input.into_iter(), EchoModel, &output)
        .is_err()
    );
  }

  #[test]
  fn test_sampled_ignores_bad_early_frames() {
    let output = CountingOutput::default();
    let input = vec![
      Err(std::io::Error::other("读取失败")),
      Ok(2u32),
      Ok(3u32),
      Ok(5u32),
    ];
    let summary = SampledTask::default()
      .run_task(input.into_iter(), EchoModel, &output)
      .unwrap();
    assert_eq!(*output.frames.borrow(), vec![3, 5]);
    assert_eq!(summary.verdict, Verdict::Class(1));
  }
}
