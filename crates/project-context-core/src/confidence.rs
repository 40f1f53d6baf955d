//! Overall confidence for a project analysis.
//!
//! The analyzer reports which corroborating signals it found; each one
//! raises confidence, and a failed analysis is floored low regardless of
//! what was found before the failure.

use serde::{Deserialize, Serialize};

const BASE: f64 = 0.3;
const MANIFEST_BONUS: f64 = 0.25;
const TYPE_CONFIG_BONUS: f64 = 0.15;
const LAYOUT_BONUS: f64 = 0.15;
const TECHNOLOGY_BONUS: f64 = 0.15;
const ERROR_FLOOR: f64 = 0.1;

/// Signals observed while analyzing a project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisSignals {
    /// A package manifest (`Cargo.toml`, `package.json`, ...) was found.
    pub manifest_found: bool,
    /// A type-system config (`tsconfig.json`, `mypy.ini`, ...) was found.
    pub type_config_found: bool,
    /// The directory layout matched a known convention.
    pub recognized_layout: bool,
    pub technologies_detected: usize,
    /// The analysis hit an error part-way through.
    pub analysis_error: bool,
}

/// Combine signals into a confidence in `[0.0, 1.0]`.
pub fn overall_confidence(signals: &AnalysisSignals) -> f64 {
    if signals.analysis_error {
        return ERROR_FLOOR;
    }
    let mut score = BASE;
    if signals.manifest_found {
        score += MANIFEST_BONUS;
    }
    if signals.type_config_found {
        score += TYPE_CONFIG_BONUS;
    }
    if signals.recognized_layout {
        score += LAYOUT_BONUS;
    }
    if signals.technologies_detected > 0 {
        score += TECHNOLOGY_BONUS;
    }
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_signal_increases() {
        let none = AnalysisSignals::default();
        let base = overall_confidence(&none);
        let variants = [
            AnalysisSignals { manifest_found: true, ..none },
            AnalysisSignals { type_config_found: true, ..none },
            AnalysisSignals { recognized_layout: true, ..none },
            AnalysisSignals { technologies_detected: 2, ..none },
        ];
        for v in &variants {
            assert!(overall_confidence(v) > base, "{:?}", v);
        }
    }

    #[test]
    fn test_all_signals_bounded() {
        let all = AnalysisSignals {
            manifest_found: true,
            type_config_found: true,
            recognized_layout: true,
            technologies_detected: 10,
            analysis_error: false,
        };
        let c = overall_confidence(&all);
        assert!(c > 0.9 && c <= 1.0);
    }

    #[test]
    fn test_error_floors() {
        let failed = AnalysisSignals {
            manifest_found: true,
            technologies_detected: 3,
            analysis_error: true,
            ..Default::default()
        };
        assert!((overall_confidence(&failed) - 0.1).abs() < 1e-9);
    }
}
