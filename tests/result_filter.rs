// 该文件是 Kanjian （看见） 项目的一部分。
// tests/result_filter.rs - 结果筛选性质测试
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

use proptest::prelude::*;

use kanjian::result::{Classifications, DetectItem, Detections};

fn detect_item() -> impl Strategy<Value = DetectItem> {
  (0.0f32..1.0, 0.0f32..1.0, 0.0f32..1.0, 0.0f32..1.0, 0.0f32..1.0, 0u32..80).prop_map(
    |(x0, y0, x1, y1, score, class_id)| {
      DetectItem::new([x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)], score, class_id)
    },
  )
}

fn detections_with_mask() -> impl Strategy<Value = (Detections, Vec<bool>)> {
  prop::collection::vec((detect_item(), any::<bool>()), 0..32).prop_map(|pairs| {
    let (items, mask): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
    (Detections::from_items(items), mask)
  })
}

proptest! {
  #[test]
  fn filter_keeps_selected_records_in_order((detections, mask) in detections_with_mask()) {
    let filtered = detections.filter(&mask).unwrap();
    prop_assert_eq!(filtered.len(), mask.iter().filter(|&&m| m).count());

    let expected: Vec<DetectItem> = detections
      .iter()
      .zip(&mask)
      .filter(|(_, m)| **m)
      .map(|(item, _)| item)
      .collect();
    prop_assert_eq!(filtered.iter().collect::<Vec<_>>(), expected);
  }

  #[test]
  fn mismatched_mask_is_rejected(
    (detections, mut mask) in detections_with_mask(),
    extra in 1usize..4,
  ) {
    let before = detections.clone();
    mask.extend(std::iter::repeat_n(true, extra));
    prop_assert!(detections.filter(&mask).is_err());
    prop_assert_eq!(detections, before);
  }

  #[test]
  fn short_mask_is_rejected(
    (detections, mut mask) in detections_with_mask(),
    missing in 1usize..4,
  ) {
    prop_assume!(!mask.is_empty());
    let before = detections.clone();
    mask.truncate(mask.len().saturating_sub(missing));
    prop_assert!(detections.filter(&mask).is_err());
    prop_assert_eq!(detections, before);
  }

  #[test]
  fn classification_filter_matches_mask(
    scores in prop::collection::vec(0.0f32..1.0, 0..16),
    seed in any::<u64>(),
  ) {
    let ids = (0..scores.len() as u32).collect::<Vec<_>>();
    let mask = (0..scores.len()).map(|i| (seed >> (i % 64)) & 1 == 1).collect::<Vec<_>>();
    let cls = Classifications::new(scores, ids).unwrap();
    let filtered = cls.filter(&mask).unwrap();
    prop_assert_eq!(filtered.len(), mask.iter().filter(|&&m| m).count());
    prop_assert!(filtered.class_id().windows(2).all(|w| w[0] < w[1]));
  }
}
