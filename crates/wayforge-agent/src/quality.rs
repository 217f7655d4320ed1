//! The `QualityScores` weight table: a process-wide constant table
//! turning "overall is a weighted sum" into concrete numbers. See
//! DESIGN.md for the rationale (correctness/completeness/coverage
//! front-loaded as the dimensions most load-bearing for a code-generation
//! quality gate).

use crate::model::QualityDimensions;

pub struct Weights;

impl Weights {
    pub const CORRECTNESS: f64 = 0.20;
    pub const COMPLETENESS: f64 = 0.12;
    pub const ROBUSTNESS: f64 = 0.10;
    pub const READABILITY: f64 = 0.08;
    pub const MAINTAINABILITY: f64 = 0.08;
    pub const COMPLEXITY: f64 = 0.07;
    pub const DUPLICATION: f64 = 0.05;
    pub const TEST_COVERAGE: f64 = 0.12;
    pub const TEST_QUALITY: f64 = 0.08;
    pub const SECURITY: f64 = 0.06;
    pub const DOCUMENTATION: f64 = 0.02;
    pub const STYLE: f64 = 0.02;
}

/// `overall = round(sum(weight_i * dimension_i))`, clamped to `[0, 100]`.
pub fn compute_overall(dimensions: &QualityDimensions) -> f64 {
    let raw = dimensions.correctness * Weights::CORRECTNESS
        + dimensions.completeness * Weights::COMPLETENESS
        + dimensions.robustness * Weights::ROBUSTNESS
        + dimensions.readability * Weights::READABILITY
        + dimensions.maintainability * Weights::MAINTAINABILITY
        + dimensions.complexity * Weights::COMPLEXITY
        + dimensions.duplication * Weights::DUPLICATION
        + dimensions.test_coverage * Weights::TEST_COVERAGE
        + dimensions.test_quality * Weights::TEST_QUALITY
        + dimensions.security * Weights::SECURITY
        + dimensions.documentation * Weights::DOCUMENTATION
        + dimensions.style * Weights::STYLE;
    raw.round().clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_dimensions_at_100_yields_100_overall() {
        let dims = QualityDimensions {
            correctness: 100.0,
            completeness: 100.0,
            robustness: 100.0,
            readability: 100.0,
            maintainability: 100.0,
            complexity: 100.0,
            duplication: 100.0,
            test_coverage: 100.0,
            test_quality: 100.0,
            security: 100.0,
            documentation: 100.0,
            style: 100.0,
        };
        assert_eq!(compute_overall(&dims), 100.0);
    }

    #[test]
    fn all_dimensions_at_zero_yields_zero_overall() {
        assert_eq!(compute_overall(&QualityDimensions::default()), 0.0);
    }

    #[test]
    fn weights_sum_to_one() {
        let sum = Weights::CORRECTNESS
            + Weights::COMPLETENESS
            + Weights::ROBUSTNESS
            + Weights::READABILITY
            + Weights::MAINTAINABILITY
            + Weights::COMPLEXITY
            + Weights::DUPLICATION
            + Weights::TEST_COVERAGE
            + Weights::TEST_QUALITY
            + Weights::SECURITY
            + Weights::DOCUMENTATION
            + Weights::STYLE;
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
