//! Pass/fail classification of SLA values

use serde::{Deserialize, Serialize};

/// Default SLA cutoff in percent
pub const DEFAULT_THRESHOLD: f64 = 99.5;

/// Outcome of comparing one value against the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Ok,
    Nok,
    Unknown,
}

impl Classification {
    /// CSS class / export tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Ok => "ok",
            Classification::Nok => "nok",
            Classification::Unknown => "unknown",
        }
    }
}

/// Classify a value: absent is unknown, below the threshold is nok
pub fn classify(value: Option<f64>, threshold: f64) -> Classification {
    match value {
        None => Classification::Unknown,
        Some(v) if v < threshold => Classification::Nok,
        Some(_) => Classification::Ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_inclusive() {
        assert_eq!(classify(Some(99.5), 99.5), Classification::Ok);
        assert_eq!(classify(Some(99.49), 99.5), Classification::Nok);
        assert_eq!(classify(Some(100.0), 99.5), Classification::Ok);
    }

    #[test]
    fn test_absent_is_unknown() {
        assert_eq!(classify(None, 99.5), Classification::Unknown);
        assert_eq!(classify(None, 0.0), Classification::Unknown);
    }

    #[test]
    fn test_zero_threshold_passes_everything_present() {
        assert_eq!(classify(Some(0.0), 0.0), Classification::Ok);
    }

    #[test]
    fn test_as_str() {
        assert_eq!(Classification::Ok.as_str(), "ok");
        assert_eq!(Classification::Nok.as_str(), "nok");
        assert_eq!(Classification::Unknown.as_str(), "unknown");
    }
}
