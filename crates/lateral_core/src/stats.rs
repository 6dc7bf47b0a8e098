use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::SkipReason;

/// What kind of candidate a skip refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Lateral,
    Tap,
}

/// A candidate left out of the output, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRecord {
    pub kind: RecordKind,
    pub reference: String,
    pub asset_key: Option<String>,
    pub reason: SkipReason,
}

/// Batch counters returned with every run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    /// Laterals emitted.
    pub processed_count: usize,
    /// Matched inspections that produced no lateral.
    pub skipped_count: usize,
    /// Defects attached to emitted laterals.
    pub defect_count: usize,
    /// Taps emitted.
    pub tap_count: usize,
    /// Tap defects that produced no tap.
    pub tap_skipped_count: usize,
    pub promoted_tap_count: usize,
    pub unmatched_inspections: usize,
    pub unmatched_tap_defects: usize,
    pub duplicate_assets: usize,
    /// Records emitted point-only because their stub failed validation.
    pub stub_fallbacks: usize,
    pub geocode_failures: usize,
    pub skipped_by_reason: BTreeMap<SkipReason, usize>,
}

impl ProcessingStats {
    pub fn record_skip(&mut self, skip: &SkippedRecord) {
        match (skip.kind, &skip.reason) {
            (RecordKind::Lateral, SkipReason::UnresolvableJoin) => self.unmatched_inspections += 1,
            (RecordKind::Lateral, _) => self.skipped_count += 1,
            (RecordKind::Tap, SkipReason::UnresolvableJoin) => self.unmatched_tap_defects += 1,
            (RecordKind::Tap, _) => self.tap_skipped_count += 1,
        }
        *self.skipped_by_reason.entry(skip.reason.clone()).or_default() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skip(kind: RecordKind, reason: SkipReason) -> SkippedRecord {
        SkippedRecord {
            kind,
            reference: "r".into(),
            asset_key: None,
            reason,
        }
    }

    #[test]
    fn skips_are_counted_per_category_and_reason() {
        let mut stats = ProcessingStats::default();
        stats.record_skip(&skip(RecordKind::Lateral, SkipReason::MissingTapDistance));
        stats.record_skip(&skip(RecordKind::Lateral, SkipReason::UnresolvableJoin));
        stats.record_skip(&skip(RecordKind::Tap, SkipReason::UnresolvableJoin));
        stats.record_skip(&skip(RecordKind::Tap, SkipReason::InvalidCoordinate));

        assert_eq!(stats.skipped_count, 1);
        assert_eq!(stats.unmatched_inspections, 1);
        assert_eq!(stats.unmatched_tap_defects, 1);
        assert_eq!(stats.tap_skipped_count, 1);
        assert_eq!(stats.skipped_by_reason[&SkipReason::UnresolvableJoin], 2);
    }

    #[test]
    fn reasons_serialize_as_snake_case_keys() {
        let mut stats = ProcessingStats::default();
        stats.record_skip(&skip(RecordKind::Lateral, SkipReason::MissingClockPosition));

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["skippedByReason"]["missing_clock_position"], 1);
        assert_eq!(json["processedCount"], 0);
    }
}
