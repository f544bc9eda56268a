//! Healthcare keyword filter.
//!
//! Pure substring matching over the lower-cased title + description. No
//! stemming and no word boundaries: "health" matching "unhealthy" is an
//! accepted trade-off in exchange for zero tuning. The vocabulary spans
//! clinical terms, digital-health/interoperability terms, and the handful of
//! vendor names relevant to the business.

/// Fixed domain vocabulary. Ordering is cosmetic; matching is a flat scan.
pub const HEALTHCARE_KEYWORDS: &[&str] = &[
    // Clinical / care delivery
    "health",
    "hospital",
    "medical",
    "clinical",
    "patient",
    "pharmac",
    "nursing",
    "aged care",
    "mental health",
    "ambulance",
    "pathology",
    "radiology",
    "oncology",
    "dental",
    "allied health",
    "primary care",
    "telehealth",
    "immunisation",
    "maternity",
    // Digital health / interoperability
    "electronic medical record",
    "electronic health record",
    " emr",
    " ehr",
    "health information",
    "interoperability",
    "fhir",
    "hl7",
    "pacs",
    "e-referral",
    "patient administration system",
    "clinical information system",
    "practice management software",
    // Vendors / products the business tracks
    "cerner",
    "epic systems",
    "orion health",
    "intersystems",
    "meditech",
    "dedalus",
    "telstra health",
    "best practice software",
    "medicaldirector",
];

/// Case-insensitive substring test of title + description against the fixed
/// vocabulary.
pub fn is_healthcare_related(title: &str, description: Option<&str>) -> bool {
    let haystack = haystack(title, description);
    HEALTHCARE_KEYWORDS.iter().any(|kw| haystack.contains(kw))
}

/// Diagnostic variant: which keywords fired for this listing.
pub fn matched_keywords(title: &str, description: Option<&str>) -> Vec<&'static str> {
    let haystack = haystack(title, description);
    HEALTHCARE_KEYWORDS
        .iter()
        .filter(|kw| haystack.contains(*kw))
        .copied()
        .collect()
}

fn haystack(title: &str, description: Option<&str>) -> String {
    let mut s = String::with_capacity(title.len() + description.map_or(0, str::len) + 2);
    // Leading/trailing space so the padded short keywords (" emr") can match
    // at text edges too.
    s.push(' ');
    s.push_str(title);
    s.push(' ');
    if let Some(d) = description {
        s.push_str(d);
        s.push(' ');
    }
    s.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_match_is_case_insensitive() {
        assert!(is_healthcare_related(
            "Supply of IT Services",
            Some("for the Royal Hospital")
        ));
        assert!(is_healthcare_related("HEALTHCARE data platform", None));
    }

    #[test]
    fn test_unrelated_tender_rejected() {
        assert!(!is_healthcare_related("Office furniture tender", None));
        assert!(!is_healthcare_related("Road resurfacing works", Some("asphalt supply")));
    }

    #[test]
    fn test_substring_not_word_boundary() {
        // Intentional: "health" matches inside larger words.
        assert!(is_healthcare_related("Unhealthy building audit", None));
    }

    #[test]
    fn test_matched_keywords_diagnostics() {
        let hits = matched_keywords(
            "Hospital patient administration system refresh",
            Some("FHIR interoperability required"),
        );
        assert!(hits.contains(&"hospital"));
        assert!(hits.contains(&"patient"));
        assert!(hits.contains(&"patient administration system"));
        assert!(hits.contains(&"fhir"));
        assert!(hits.contains(&"interoperability"));
        assert!(matched_keywords("Office furniture", None).is_empty());
    }

    #[test]
    fn test_padded_short_keywords_match_at_edges() {
        assert!(is_healthcare_related("Statewide EMR", None));
        assert!(!is_healthcare_related("Memristor supply", None));
    }
}
