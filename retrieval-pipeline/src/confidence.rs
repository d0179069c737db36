//! Confidence grading for a verified (or unverified) answer, combining
//! verification status, top score, the gap to the runner-up, and whether a
//! conflict was detected.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

/// Reason taxonomy for a `low` grade, checked in this priority order.
pub fn low_reason(verified: bool, conflict: bool, s_top: f32) -> &'static str {
    if !verified {
        "unverified"
    } else if conflict {
        "conflict"
    } else if s_top < 0.70 {
        "weak-match"
    } else {
        "ambiguous"
    }
}

/// `(confidence, reason)`. `reason` is empty for `high`/`medium`.
pub fn calculate_confidence(
    verified: bool,
    s_top: f32,
    s_next: f32,
    conflict: bool,
) -> (Confidence, &'static str) {
    let gap = s_top - s_next;

    if verified && s_top >= 0.85 && gap >= 0.08 && !conflict {
        return (Confidence::High, "");
    }
    if verified && s_top >= 0.70 && !conflict {
        return (Confidence::Medium, "");
    }
    (Confidence::Low, low_reason(verified, conflict, s_top))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_requires_verification_gap_and_no_conflict() {
        let (confidence, reason) = calculate_confidence(true, 0.90, 0.80, false);
        assert_eq!(confidence, Confidence::High);
        assert_eq!(reason, "");
    }

    #[test]
    fn narrow_gap_falls_to_medium() {
        let (confidence, _) = calculate_confidence(true, 0.90, 0.87, false);
        assert_eq!(confidence, Confidence::Medium);
    }

    #[test]
    fn unverified_is_always_low() {
        let (confidence, reason) = calculate_confidence(false, 0.95, 0.10, false);
        assert_eq!(confidence, Confidence::Low);
        assert_eq!(reason, "unverified");
    }

    #[test]
    fn conflict_overrides_otherwise_high_score() {
        let (confidence, reason) = calculate_confidence(true, 0.90, 0.89, true);
        assert_eq!(confidence, Confidence::Low);
        assert_eq!(reason, "conflict");
    }

    #[test]
    fn weak_match_below_medium_threshold() {
        let (confidence, reason) = calculate_confidence(true, 0.50, 0.10, false);
        assert_eq!(confidence, Confidence::Low);
        assert_eq!(reason, "weak-match");
    }

    #[test]
    fn low_reason_defaults_to_ambiguous_when_verified_and_strong() {
        assert_eq!(low_reason(true, false, 0.75), "ambiguous");
    }
}
