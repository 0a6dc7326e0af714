//! Biometric matching - feature extraction and 1:N verification
//!
//! Matching is pure: extract features from a sample, verify against each
//! stored template. The candidate scan is first-match-wins; if two
//! templates would both verify against one sample there is no tie-break,
//! the earlier roster entry wins. This is a known precision tradeoff.
//!
//! Verification carries no cryptographic identity guarantee.

use crate::domain::types::{FeatureSet, Member, Sample, Template};
use crate::io::directory::Candidate;

/// Sample rejected because the capture quality is too low for feature
/// extraction. The capture loop skips these silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageQualityError;

impl std::fmt::Display for ImageQualityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sample quality too low for feature extraction")
    }
}

impl std::error::Error for ImageQualityError {}

/// Result of verifying one feature set against one template
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifyResult {
    pub matched: bool,
    /// Similarity in [0, 1]; informational only
    pub score: f64,
}

/// Pure matching operations, no side effects
pub trait Matcher: Send + Sync {
    fn extract_features(&self, sample: &Sample) -> Result<FeatureSet, ImageQualityError>;

    fn verify(&self, features: &FeatureSet, template: &Template) -> VerifyResult;
}

/// Outcome of running one sample through the full candidate set
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// The first candidate whose template verified
    Matched(Member),
    /// No candidate verified
    NoMatch,
    /// Feature extraction rejected the sample
    QualityError,
}

impl MatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchOutcome::Matched(_) => "matched",
            MatchOutcome::NoMatch => "no_match",
            MatchOutcome::QualityError => "quality_error",
        }
    }
}

/// Scan the candidate set, stopping at the first template that verifies
pub fn scan_candidates(
    matcher: &dyn Matcher,
    features: &FeatureSet,
    candidates: &[Candidate],
) -> MatchOutcome {
    for candidate in candidates {
        if matcher.verify(features, &candidate.template).matched {
            return MatchOutcome::Matched(candidate.member.clone());
        }
    }
    MatchOutcome::NoMatch
}

/// Extract features and scan the candidate set in one step
pub fn classify_sample(
    matcher: &dyn Matcher,
    sample: &Sample,
    candidates: &[Candidate],
) -> MatchOutcome {
    match matcher.extract_features(sample) {
        Ok(features) => scan_candidates(matcher, &features, candidates),
        Err(ImageQualityError) => MatchOutcome::QualityError,
    }
}

/// Minimum sample length accepted by the similarity matcher
const MIN_SAMPLE_LEN: usize = 16;

/// Byte-similarity matcher
///
/// Features are the raw sample bytes; verification scores positional byte
/// agreement against the template. Stands in for a vendor matching SDK
/// behind the same trait.
pub struct SimilarityMatcher {
    threshold: f64,
}

impl SimilarityMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Matcher for SimilarityMatcher {
    fn extract_features(&self, sample: &Sample) -> Result<FeatureSet, ImageQualityError> {
        let bytes = sample.as_bytes();
        if bytes.len() < MIN_SAMPLE_LEN {
            return Err(ImageQualityError);
        }
        // A flat capture carries no ridge information
        if bytes.iter().all(|&b| b == bytes[0]) {
            return Err(ImageQualityError);
        }
        Ok(FeatureSet(bytes.to_vec()))
    }

    fn verify(&self, features: &FeatureSet, template: &Template) -> VerifyResult {
        let f = features.as_bytes();
        let t = template.as_bytes();
        let longest = f.len().max(t.len());
        if longest == 0 {
            return VerifyResult { matched: false, score: 0.0 };
        }

        let agreeing = f.iter().zip(t.iter()).filter(|(a, b)| a == b).count();
        let score = agreeing as f64 / longest as f64;
        VerifyResult { matched: score >= self.threshold, score }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::MemberId;
    use chrono::NaiveDate;

    fn member(id: &str) -> Member {
        Member {
            id: MemberId::from(id),
            name: "Test".to_string(),
            surname: id.to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            template: None,
        }
    }

    fn candidate(id: &str, template: &[u8]) -> Candidate {
        Candidate { member: member(id), template: Template::new(template.to_vec()) }
    }

    fn sample_bytes(seed: u8) -> Vec<u8> {
        (0..32u8).map(|i| i.wrapping_mul(7).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_extract_rejects_short_sample() {
        let matcher = SimilarityMatcher::new(0.85);
        assert_eq!(
            matcher.extract_features(&Sample::new(vec![1, 2, 3])),
            Err(ImageQualityError)
        );
    }

    #[test]
    fn test_extract_rejects_flat_sample() {
        let matcher = SimilarityMatcher::new(0.85);
        assert_eq!(
            matcher.extract_features(&Sample::new(vec![7; 32])),
            Err(ImageQualityError)
        );
    }

    #[test]
    fn test_verify_identical_bytes_matches() {
        let matcher = SimilarityMatcher::new(0.85);
        let bytes = sample_bytes(0);
        let features = matcher.extract_features(&Sample::new(bytes.clone())).unwrap();
        let result = matcher.verify(&features, &Template::new(bytes));
        assert!(result.matched);
        assert!((result.score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_verify_different_bytes_no_match() {
        let matcher = SimilarityMatcher::new(0.85);
        let features = matcher.extract_features(&Sample::new(sample_bytes(0))).unwrap();
        let result = matcher.verify(&features, &Template::new(sample_bytes(100)));
        assert!(!result.matched);
    }

    #[test]
    fn test_scan_first_match_wins() {
        let matcher = SimilarityMatcher::new(0.85);
        let bytes = sample_bytes(0);
        // Two candidates carry the same template; the scan must stop at the first
        let candidates = vec![
            candidate("A1", &sample_bytes(50)),
            candidate("A2", &bytes),
            candidate("A3", &bytes),
        ];

        let features = matcher.extract_features(&Sample::new(bytes)).unwrap();
        match scan_candidates(&matcher, &features, &candidates) {
            MatchOutcome::Matched(m) => assert_eq!(m.id, MemberId::from("A2")),
            other => panic!("expected match, got {:?}", other.as_str()),
        }
    }

    #[test]
    fn test_scan_no_match() {
        let matcher = SimilarityMatcher::new(0.85);
        let features = matcher.extract_features(&Sample::new(sample_bytes(0))).unwrap();
        let candidates = vec![candidate("A1", &sample_bytes(50))];
        assert_eq!(scan_candidates(&matcher, &features, &candidates), MatchOutcome::NoMatch);
    }

    #[test]
    fn test_classify_tags_quality_error() {
        let matcher = SimilarityMatcher::new(0.85);
        let candidates = vec![candidate("A1", &sample_bytes(0))];
        assert_eq!(
            classify_sample(&matcher, &Sample::new(vec![1, 2]), &candidates),
            MatchOutcome::QualityError
        );
    }

    #[test]
    fn test_empty_candidate_set_is_no_match() {
        let matcher = SimilarityMatcher::new(0.85);
        assert_eq!(
            classify_sample(&matcher, &Sample::new(sample_bytes(0)), &[]),
            MatchOutcome::NoMatch
        );
    }
}
