use std::cmp::Ordering;

use serde::Serialize;

use crate::calc::{
    round_off_1_decimal, round_off_2_decimals, ComputedRecord, FinalStatus, Status, QUARTER_COUNT,
};

/// Strictly above this consolidated grade a student counts as a high
/// performer. Exactly 8.0 does not qualify.
pub const HIGH_PERFORMER_FLOOR: f64 = 8.0;

/// Class-wide statistics over one subject-class offering. Ephemeral:
/// computed on demand from the recomputed records, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAnalytics {
    pub class_average: f64,
    pub per_quarter_averages: [f64; QUARTER_COUNT],
    pub median: f64,
    pub approved_count: usize,
    pub failed_count: usize,
    pub recovery_count: usize,
    pub high_performer_count: usize,
    pub approval_rate_percent: f64,
    pub valid_record_count: usize,
}

/// Post-recovery status where known, pre-recovery status otherwise.
fn effective_status(record: &ComputedRecord) -> Option<Status> {
    match record.final_status {
        Some(FinalStatus::Approved) => Some(Status::Approved),
        Some(FinalStatus::Failed) => Some(Status::Failed),
        None => record.status,
    }
}

fn compute_median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[(n / 2) - 1] + sorted[n / 2]) / 2.0
    }
}

pub fn aggregate(records: &[ComputedRecord]) -> ClassAnalytics {
    // Records without any graded quarter carry no consolidated grade and do
    // not participate in any statistic.
    let grades: Vec<f64> = records
        .iter()
        .filter_map(|r| r.consolidated_grade)
        .collect();
    let valid_count = grades.len();

    let class_average = if valid_count > 0 {
        round_off_2_decimals(grades.iter().sum::<f64>() / valid_count as f64)
    } else {
        0.0
    };

    // Each quarter filters independently: a student missing quarter 2 still
    // contributes to quarter 1's average.
    let mut per_quarter_averages = [0.0_f64; QUARTER_COUNT];
    for (q, slot) in per_quarter_averages.iter_mut().enumerate() {
        let mut sum = 0.0_f64;
        let mut count = 0_usize;
        for r in records {
            if let Some(v) = r.quarters[q] {
                sum += v;
                count += 1;
            }
        }
        if count > 0 {
            *slot = round_off_2_decimals(sum / count as f64);
        }
    }

    let mut approved_count = 0_usize;
    let mut failed_count = 0_usize;
    let mut recovery_count = 0_usize;
    let mut high_performer_count = 0_usize;

    for r in records {
        match effective_status(r) {
            Some(Status::Approved) => approved_count += 1,
            Some(Status::Failed) => failed_count += 1,
            _ => {}
        }
        if r.status == Some(Status::Recovery) && r.final_status.is_none() {
            recovery_count += 1;
        }
        if let Some(c) = r.consolidated_grade {
            if c > HIGH_PERFORMER_FLOOR {
                high_performer_count += 1;
            }
        }
    }

    let approval_rate_percent = if valid_count > 0 {
        round_off_1_decimal(approved_count as f64 / valid_count as f64 * 100.0)
    } else {
        0.0
    };

    ClassAnalytics {
        class_average,
        per_quarter_averages,
        median: round_off_2_decimals(compute_median(&grades)),
        approved_count,
        failed_count,
        recovery_count,
        high_performer_count,
        approval_rate_percent,
        valid_record_count: valid_count,
    }
}
