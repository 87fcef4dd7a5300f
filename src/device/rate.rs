// 该文件是 Kanjian （看见） 项目的一部分。
// src/device/rate.rs - 帧率统计
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

use std::{collections::VecDeque, time::Instant};

const WINDOW: usize = 30;

/// 最近 30 个间隔内的平均速率（次/秒）。
#[derive(Debug, Clone, Default)]
pub(crate) struct RateMeter {
  ticks: VecDeque<Instant>,
}

impl RateMeter {
  pub(crate) fn tick(&mut self) {
    self.tick_at(Instant::now());
  }

  pub(crate) fn tick_at(&mut self, at: Instant) {
    if self.ticks.len() > WINDOW {
      self.ticks.pop_front();
    }
    self.ticks.push_back(at);
  }

  pub(crate) fn rate(&self) -> f64 {
    let (Some(first), Some(last)) = (self.ticks.front(), self.ticks.back()) else {
      return 0.0;
    };
    let elapsed = last.duration_since(*first).as_secs_f64();
    if elapsed <= 0.0 {
      return 0.0;
    }
    (self.ticks.len() - 1) as f64 / elapsed
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  #[test]
  fn empty_and_single_tick_have_no_rate() {
    let mut meter = RateMeter::default();
    assert_eq!(meter.rate(), 0.0);
    meter.tick();
    assert_eq!(meter.rate(), 0.0);
  }

  #[test]
  fn steady_ticks() {
    let start = Instant::now();
    let mut meter = RateMeter::default();
    for i in 0..5 {
      meter.tick_at(start + Duration::from_millis(100 * i));
    }
    assert!((meter.rate() - 10.0).abs() < 1e-6);
  }

  #[test]
  fn window_forgets_old_ticks() {
    let start = Instant::now();
    let mut meter = RateMeter::default();
    // 前 10 次间隔 1 秒，之后 40 次间隔 50 毫秒
    let mut at = start;
    for _ in 0..10 {
      at += Duration::from_secs(1);
      meter.tick_at(at);
    }
    for _ in 0..40 {
      at += Duration::from_millis(50);
      meter.tick_at(at);
    }
    assert!((meter.rate() - 20.0).abs() < 1e-6);
  }
}
