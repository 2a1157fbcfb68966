// 该文件是 Kouzhao （口罩） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::{bbox::BoundingBox, output::ToRgbImage, pipeline::Detection};

const BOX_THICKNESS: u32 = 2;
// 类别 0 绿色，类别 1 红色，其余蓝色
const CLASS_COLORS: [[u8; 3]; 3] = [[0, 200, 0], [230, 0, 0], [0, 0, 255]];

pub struct Draw {
  thickness: u32,
  colors: Vec<[u8; 3]>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      thickness: BOX_THICKNESS,
      colors: CLASS_COLORS.to_vec(),
    }
  }
}

impl Draw {
  pub fn with_thickness(mut self, thickness: u32) -> Self {
    self.thickness = thickness.max(1);
    self
  }

  pub fn color_of(&self, class_id: usize) -> [u8; 3] {
    let last = self.colors.len() - 1;
    self.colors[class_id.min(last)]
  }

  /// 归一化坐标 -> 像素坐标，裁剪到图像范围内。
  /// 裁剪后为空时返回 `None`
  fn pixel_rect(bbox: &BoundingBox, width: u32, height: u32) -> Option<(i32, i32, i32, i32)> {
    let (w, h) = (width as f32, height as f32);
    let max_x = width as i32 - 1;
    let max_y = height as i32 - 1;

    let x_min = ((bbox.xmin * w).floor() as i32).clamp(0, max_x);
    let y_min = ((bbox.ymin * h).floor() as i32).clamp(0, max_y);
    let x_max = ((bbox.xmax * w).ceil() as i32).clamp(0, max_x);
    let y_max = ((bbox.ymax * h).ceil() as i32).clamp(0, max_y);

    if x_min >= x_max || y_min >= y_max {
      return None;
    }
    Some((x_min, y_min, x_max, y_max))
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, detections: &[Detection]) {
    if image.width() == 0 || image.height() == 0 {
      return;
    }
    for detection in detections {
      let Some((x_min, y_min, x_max, y_max)) =
        Self::pixel_rect(&detection.bbox, image.width(), image.height())
      else {
        continue;
      };
      let color = Rgb(self.color_of(detection.class_id));

      // 向内收缩加粗
      for t in 0..self.thickness as i32 {
        let w = x_max - x_min - 2 * t;
        let h = y_max - y_min - 2 * t;
        if w <= 0 || h <= 0 {
          break;
        }
        let rect = Rect::at(x_min + t, y_min + t).of_size(w as u32 + 1, h as u32 + 1);
        draw_hollow_rect_mut(image, rect, color);
      }
    }
  }

  pub fn draw_detection<F: ToRgbImage>(&self, frame: &F, detections: &[Detection]) -> RgbImage {
    let mut image = frame.to_rgb_image();
    self.draw_detections_on_image(&mut image, detections);
    image
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detection(class_id: usize, bbox: BoundingBox) -> Detection {
    Detection {
      class_id,
      confidence: 0.9,
      bbox,
    }
  }

  #[test]
  fn test_draws_box_edges() {
    let draw = Draw::default();
    let mut image = RgbImage::new(20, 20);
    let det = detection(1, BoundingBox::new(0.25, 0.25, 0.75, 0.75));
    draw.draw_detections_on_image(&mut image, &[det]);

    let red = Rgb(CLASS_COLORS[1]);
    assert_eq!(*image.get_pixel(5, 5), red);
    assert_eq!(*image.get_pixel(15, 10), red);
    assert_eq!(*image.get_pixel(6, 6), red);
    // 内部保持原样
    assert_eq!(*image.get_pixel(10, 10), Rgb([0, 0, 0]));
  }

  #[test]
  fn test_skips_degenerate_box() {
    let draw = Draw::default();
    let mut image = RgbImage::new(10, 10);
    let det = detection(0, BoundingBox::new(0.5, 0.5, 0.5, 0.5));
    draw.draw_detections_on_image(&mut image, &[det]);
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn test_box_outside_is_clamped() {
    let draw = Draw::default().with_thickness(1);
    let mut image = RgbImage::new(10, 10);
    let det = detection(0, BoundingBox::new(-0.5, -0.5, 2.0, 2.0));
    draw.draw_detections_on_image(&mut image, &[det]);
    let green = Rgb(CLASS_COLORS[0]);
    assert_eq!(*image.get_pixel(0, 0), green);
    assert_eq!(*image.get_pixel(9, 9), green);
    assert_eq!(*image.get_pixel(5, 5), Rgb([0, 0, 0]));
  }

  #[test]
  fn test_unknown_class_uses_last_color() {
    let draw = Draw::default();
    assert_eq!(draw.color_of(9), CLASS_COLORS[2]);
  }
}
