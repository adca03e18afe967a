use serde::{Deserialize, Serialize};

pub const QUARTER_COUNT: usize = 4;

/// Score domain accepted at the boundary. The calculator itself assumes
/// inputs are already inside this range or absent.
pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 10.0;

/// Grading thresholds. `final_pass` is kept separate from `pass` because the
/// legacy clients disagreed on it (5.0 vs 6.0); the default unifies on 6.0
/// and a workspace can override it via the settings store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeConfig {
    pub pass: f64,
    pub recovery_floor: f64,
    pub final_pass: f64,
}

impl Default for GradeConfig {
    fn default() -> Self {
        Self {
            pass: 6.0,
            recovery_floor: 4.0,
            final_pass: 6.0,
        }
    }
}

/// Standard half-away-from-zero rounding to 2 decimal places.
pub fn round_off_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn round_off_1_decimal(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Raw per-quarter scores for one student in one subject-class offering.
/// `None` means not graded yet, which is a normal state, not an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSet {
    pub quarters: [Option<f64>; QUARTER_COUNT],
    pub recovery_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Approved,
    Recovery,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Approved,
    Failed,
}

/// Projection derived from a ScoreSet. Never persisted; recomputed on every
/// read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedRecord {
    pub quarters: [Option<f64>; QUARTER_COUNT],
    pub recovery_score: Option<f64>,
    pub quarterly_mean: Option<f64>,
    pub consolidated_grade: Option<f64>,
    pub final_grade: Option<f64>,
    pub status: Option<Status>,
    pub final_status: Option<FinalStatus>,
}

/// Mean of whichever quarterly scores are present, rounded to 2 decimals.
/// `None` iff no quarter has been graded.
pub fn quarterly_mean(set: &ScoreSet) -> Option<f64> {
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    for q in set.quarters.iter().flatten() {
        sum += q;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(round_off_2_decimals(sum / count as f64))
    }
}

/// Currently identical to the quarterly mean. Kept as its own function so a
/// weighted formula can land here without touching any call site.
pub fn consolidated_grade(set: &ScoreSet) -> Option<f64> {
    quarterly_mean(set)
}

/// Whether a recovery-exam score may be recorded at all for this
/// consolidated grade.
pub fn recovery_eligible(consolidated: f64, config: &GradeConfig) -> bool {
    consolidated >= config.recovery_floor && consolidated < config.pass
}

pub fn recalculate(set: &ScoreSet, config: &GradeConfig) -> ComputedRecord {
    let mean = quarterly_mean(set);
    let consolidated = consolidated_grade(set);

    let Some(c) = consolidated else {
        // Nothing graded yet: every derived field stays absent.
        return ComputedRecord {
            quarters: set.quarters,
            recovery_score: set.recovery_score,
            quarterly_mean: None,
            consolidated_grade: None,
            final_grade: None,
            status: None,
            final_status: None,
        };
    };

    let status = if c >= config.pass {
        Status::Approved
    } else if c >= config.recovery_floor {
        Status::Recovery
    } else {
        Status::Failed
    };

    // The recovery exam only counts inside the recovery band. Approved
    // students never need it; failed students never earned it.
    let final_grade = match (status, set.recovery_score) {
        (Status::Recovery, Some(r)) => round_off_2_decimals((c + r) / 2.0),
        _ => c,
    };

    let final_status = match status {
        Status::Approved => Some(FinalStatus::Approved),
        Status::Failed => Some(FinalStatus::Failed),
        Status::Recovery => match set.recovery_score {
            // Pending the recovery exam.
            None => None,
            Some(_) => {
                if final_grade >= config.final_pass {
                    Some(FinalStatus::Approved)
                } else {
                    Some(FinalStatus::Failed)
                }
            }
        },
    };

    ComputedRecord {
        quarters: set.quarters,
        recovery_score: set.recovery_score,
        quarterly_mean: mean,
        consolidated_grade: consolidated,
        final_grade: Some(final_grade),
        status: Some(status),
        final_status,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreInputError {
    NotANumber,
    OutOfRange,
}

impl ScoreInputError {
    pub fn message(self) -> &'static str {
        match self {
            ScoreInputError::NotANumber => "not a number",
            ScoreInputError::OutOfRange => "out of range",
        }
    }
}

/// Boundary validation for a user-typed score. Everything that reaches the
/// calculator has already been through here (or arrived as NULL).
pub fn parse_score_input(raw: &str) -> Result<f64, ScoreInputError> {
    let parsed: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ScoreInputError::NotANumber)?;
    if !parsed.is_finite() {
        return Err(ScoreInputError::NotANumber);
    }
    validate_score_value(parsed)
}

/// Range check shared by the text and numeric input paths.
pub fn validate_score_value(value: f64) -> Result<f64, ScoreInputError> {
    if !value.is_finite() || value < SCORE_MIN || value > SCORE_MAX {
        return Err(ScoreInputError::OutOfRange);
    }
    Ok(value)
}
