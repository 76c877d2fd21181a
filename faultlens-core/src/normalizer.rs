//! Message canonicalization.
//!
//! A [`Normalizer`] maps a raw message to the signature that identifies its
//! error family plus a human-readable label. The aggregator only ever sees
//! `dyn Normalizer`, so rule sets can be swapped without touching anything
//! downstream.

use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const DEFAULT_MAX_SIGNATURE_LENGTH: usize = 512;
pub const DEFAULT_MAX_LABEL_LENGTH: usize = 140;

static WHITESPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Failed to compile whitespace regex"));

/// Placeholder rules applied in order by the default rule set. Earlier rules
/// protect their matches from later ones (a UUID is never seen as numbers).
const DEFAULT_RULES: &[(&str, &str)] = &[
    (r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b", "<ID>"),
    (r#""[^"]*""#, "<STR>"),
    (r"(^|[\s=:(\[,{])'[^']*'", "${1}<STR>"),
    (r"\b[a-zA-Z][a-zA-Z0-9+.\-]*://\S+", "<URL>"),
    (r"\b[A-Za-z]:\\\S+", "<PATH>"),
    (r"(?:/[A-Za-z_.~][\w.\-~]*)(?:/[\w.\-~]+)+/?", "<PATH>"),
    (r"\b\d{1,3}(?:\.\d{1,3}){3}(?::\d+)?\b", "<IP>"),
    (r"(?i)\b0x[0-9a-f]+\b", "<HEX>"),
    (r"(?i)\b\d+(?:\.\d+)?(?:ms|us|ns|s|m|h|d|kb|mb|gb|b|%)?\b", "<NUM>"),
    (
        r"\b(?:[0-9a-fA-F]*[0-9][0-9a-fA-F]*[a-fA-F][0-9a-fA-F]*|[0-9a-fA-F]*[a-fA-F][0-9a-fA-F]*[0-9][0-9a-fA-F]*)\b",
        "<HEX>",
    ),
];

/// Result of canonicalizing one message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Normalized {
    pub signature: String,
    pub label: String,
}

/// Capability that maps a raw message to `(signature, label)`.
///
/// Implementations must be pure: the same input always yields the same
/// output, on any thread.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, message: &str) -> Normalized;

    /// Strategy identifier reported in run metadata.
    fn name(&self) -> &str;
}

/// A user-facing substitution rule, as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone)]
struct Substitution {
    regex: Regex,
    replacement: String,
}

/// Ordered regex substitutions, then whitespace collapsing and truncation.
#[derive(Debug, Clone)]
pub struct RuleSetNormalizer {
    name: String,
    rules: Vec<Substitution>,
    max_signature_length: usize,
    max_label_length: usize,
}

impl RuleSetNormalizer {
    /// The built-in rule set: `<ID>`, `<STR>`, `<URL>`, `<PATH>`, `<IP>`,
    /// `<HEX>` and `<NUM>` placeholders.
    pub fn standard(max_signature_length: usize, max_label_length: usize) -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .map(|(pattern, replacement)| Substitution {
                regex: Regex::new(pattern).expect("Failed to compile built-in normalizer rule"),
                replacement: (*replacement).to_string(),
            })
            .collect();

        Self {
            name: "default".to_string(),
            rules,
            max_signature_length,
            max_label_length,
        }
    }

    /// A rule set supplied by the user, applied in the given order.
    pub fn from_specs(
        specs: &[RuleSpec],
        max_signature_length: usize,
        max_label_length: usize,
    ) -> Result<Self, ConfigError> {
        if specs.is_empty() {
            return Err(ConfigError::MissingRules);
        }

        let rules = specs
            .iter()
            .map(|spec| {
                Regex::new(&spec.pattern)
                    .map(|regex| Substitution {
                        regex,
                        replacement: spec.replacement.clone(),
                    })
                    .map_err(|source| ConfigError::InvalidRule {
                        pattern: spec.pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: "custom".to_string(),
            rules,
            max_signature_length,
            max_label_length,
        })
    }

    fn canonicalize(&self, message: &str) -> String {
        let mut canonical = message.to_string();
        for rule in &self.rules {
            if rule.regex.is_match(&canonical) {
                canonical = rule
                    .regex
                    .replace_all(&canonical, rule.replacement.as_str())
                    .into_owned();
            }
        }
        WHITESPACE_REGEX.replace_all(canonical.trim(), " ").into_owned()
    }
}

impl Normalizer for RuleSetNormalizer {
    fn normalize(&self, message: &str) -> Normalized {
        let canonical = self.canonicalize(message);
        let signature = truncate_chars(&canonical, self.max_signature_length).to_string();
        let label = display_label(&signature, self.max_label_length);
        Normalized { signature, label }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A family recognised by fixed markers rather than by canonical text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownFamily {
    pub markers: Vec<String>,
    pub label: String,
}

impl KnownFamily {
    pub fn new(markers: &[&str], label: &str) -> Self {
        Self {
            markers: markers.iter().map(|m| m.to_string()).collect(),
            label: label.to_string(),
        }
    }

    fn matches(&self, message: &str) -> bool {
        self.markers.iter().any(|marker| message.contains(marker.as_str()))
    }
}

/// Checks a list of known families first and falls back to `inner`.
pub struct KnownFamilyNormalizer {
    name: String,
    families: Vec<KnownFamily>,
    inner: Box<dyn Normalizer>,
    max_signature_length: usize,
    max_label_length: usize,
}

impl KnownFamilyNormalizer {
    pub fn new(name: impl Into<String>, families: Vec<KnownFamily>, inner: Box<dyn Normalizer>) -> Self {
        Self {
            name: name.into(),
            families,
            inner,
            max_signature_length: DEFAULT_MAX_SIGNATURE_LENGTH,
            max_label_length: DEFAULT_MAX_LABEL_LENGTH,
        }
    }

    /// Caps applied to the fixed family labels, matching the inner normalizer's.
    pub fn with_limits(mut self, max_signature_length: usize, max_label_length: usize) -> Self {
        self.max_signature_length = max_signature_length;
        self.max_label_length = max_label_length;
        self
    }

    /// Well-known FileNet Content Platform Engine failure families.
    pub fn filenet(inner: Box<dyn Normalizer>) -> Self {
        let families = vec![
            KnownFamily::new(
                &["WSIAuthenticatorImpl"],
                "WSIAuthenticatorImpl login exception (authentication failures)",
            ),
            KnownFamily::new(
                &["MethodName: checkNameCollision", "E_NOT_UNIQUE", "FNRCE0043E"],
                "checkNameCollision / FNRCE0043E (E_NOT_UNIQUE) - Name already exists",
            ),
            KnownFamily::new(&["MethodName: getContent"], "getContent failures (content retrieval)"),
            KnownFamily::new(
                &["FNRCE0066E", "E_UNEXPECTED_EXCEPTION"],
                "FNRCE0066E (E_UNEXPECTED_EXCEPTION) - unexpected error",
            ),
            KnownFamily::new(&["TTLStreamReaper"], "TTLStreamReaper scheduling issue"),
        ];
        Self::new("filenet", families, inner)
    }
}

impl Normalizer for KnownFamilyNormalizer {
    fn normalize(&self, message: &str) -> Normalized {
        match self.families.iter().find(|family| family.matches(message)) {
            Some(family) => {
                let signature = truncate_chars(&family.label, self.max_signature_length).to_string();
                let label = display_label(&signature, self.max_label_length);
                Normalized { signature, label }
            }
            None => self.inner.normalize(message),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn display_label(signature: &str, max_chars: usize) -> String {
    let cut = truncate_chars(signature, max_chars);
    if cut.len() < signature.len() {
        format!("{}…", cut)
    } else {
        cut.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn standard() -> RuleSetNormalizer {
        RuleSetNormalizer::standard(DEFAULT_MAX_SIGNATURE_LENGTH, DEFAULT_MAX_LABEL_LENGTH)
    }

    #[test]
    fn test_placeholders() {
        let normalizer = standard();
        let cases = vec![
            ("conn id=123 failed", "conn id=<NUM> failed"),
            ("object {3F2504E0-4F89-11D3-9A0C-0305E82C3301} locked", "object {<ID>} locked"),
            ("user \"alice\" denied", "user <STR> denied"),
            ("user 'bob' denied", "user <STR> denied"),
            ("can't open it", "can't open it"),
            ("cannot read /opt/IBM/FileNet/logs/p8_server_error.log", "cannot read <PATH>"),
            ("cannot read C:\\logs\\app.log now", "cannot read <PATH> now"),
            ("call to https://ce.example.com/wsi/FNCEWS40MTOM failed", "call to <URL> failed"),
            ("peer 10.0.0.12:9443 reset", "peer <IP> reset"),
            ("bad pointer 0x7ffe12ab", "bad pointer <HEX>"),
            ("thread 0000004a stuck for 250ms", "thread <HEX> stuck for <NUM>"),
            ("FNRCE0043E E_NOT_UNIQUE occurred", "FNRCE0043E E_NOT_UNIQUE occurred"),
            ("  too    many\tspaces  ", "too many spaces"),
        ];

        for (input, expected) in cases {
            assert_eq!(normalizer.normalize(input).signature, expected, "Failed for input: '{}'", input);
        }
    }

    #[test]
    fn test_signature_and_label_truncation() {
        let normalizer = RuleSetNormalizer::standard(20, 10);
        let normalized = normalizer.normalize("abcdefghij klmnopqrst uvwxyz");

        assert_eq!(normalized.signature, "abcdefghij klmnopqrs");
        assert_eq!(normalized.label, "abcdefghij…");
    }

    #[test]
    fn test_short_label_is_not_suffixed() {
        let normalized = standard().normalize("disk full");
        assert_eq!(normalized.label, "disk full");
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let normalizer = RuleSetNormalizer::standard(3, 2);
        let normalized = normalizer.normalize("ééééé");

        assert_eq!(normalized.signature, "ééé");
        assert_eq!(normalized.label, "éé…");
    }

    #[test]
    fn test_custom_rules_replace_the_default_set() {
        let specs = vec![RuleSpec {
            pattern: r"order-\w+".to_string(),
            replacement: "<ORDER>".to_string(),
        }];
        let normalizer = RuleSetNormalizer::from_specs(&specs, 100, 100).unwrap();

        let normalized = normalizer.normalize("order-A17 failed after 3 retries");
        assert_eq!(normalized.signature, "<ORDER> failed after 3 retries");
        assert_eq!(normalizer.name(), "custom");
    }

    #[test]
    fn test_custom_rules_validation() {
        assert!(matches!(
            RuleSetNormalizer::from_specs(&[], 10, 10),
            Err(ConfigError::MissingRules)
        ));

        let bad = vec![RuleSpec {
            pattern: "(".to_string(),
            replacement: "x".to_string(),
        }];
        assert!(matches!(
            RuleSetNormalizer::from_specs(&bad, 10, 10),
            Err(ConfigError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_filenet_known_families() {
        let normalizer = KnownFamilyNormalizer::filenet(Box::new(standard()));

        let auth = normalizer.normalize("[WSIAuthenticatorImpl] login exception for user 42");
        assert_eq!(auth.signature, "WSIAuthenticatorImpl login exception (authentication failures)");

        let collision = normalizer.normalize("MethodName: checkNameCollision, FNRCE0043E: name exists");
        assert_eq!(collision.signature, "checkNameCollision / FNRCE0043E (E_NOT_UNIQUE) - Name already exists");

        let other = normalizer.normalize("socket 17 closed");
        assert_eq!(other.signature, "socket <NUM> closed");
        assert_eq!(normalizer.name(), "filenet");
    }

    #[test]
    fn test_known_family_labels_respect_limits() {
        let normalizer =
            KnownFamilyNormalizer::filenet(Box::new(RuleSetNormalizer::standard(20, 10))).with_limits(20, 10);

        let auth = normalizer.normalize("[WSIAuthenticatorImpl] login exception for user 42");
        assert_eq!(auth.signature, "WSIAuthenticatorImpl");
        assert_eq!(auth.label, "WSIAuthent…");
        assert!(auth.signature.chars().count() <= 20);
    }

    proptest! {
        #[test]
        fn numeric_and_uuid_substrings_do_not_split_families(
            prefix in "[a-z]{1,8}( [a-z]{1,8}){0,3}",
            suffix in "[a-z]{1,8}( [a-z]{1,8}){0,3}",
            first in any::<u32>(),
            second in any::<u32>(),
            a in any::<u128>(),
            b in any::<u128>(),
        ) {
            let normalizer = standard();
            let uuid = |v: u128| {
                let hex = format!("{:032x}", v);
                format!("{}-{}-{}-{}-{}", &hex[..8], &hex[8..12], &hex[12..16], &hex[16..20], &hex[20..])
            };

            let n1 = normalizer.normalize(&format!("{} {} {}", prefix, first, suffix));
            let n2 = normalizer.normalize(&format!("{} {} {}", prefix, second, suffix));
            prop_assert_eq!(n1.signature, n2.signature);

            let u1 = normalizer.normalize(&format!("{} {} {}", prefix, uuid(a), suffix));
            let u2 = normalizer.normalize(&format!("{} {} {}", prefix, uuid(b), suffix));
            prop_assert_eq!(u1.signature, u2.signature);
        }

        #[test]
        fn normalization_is_deterministic(message in ".{0,200}") {
            let normalizer = standard();
            prop_assert_eq!(normalizer.normalize(&message), normalizer.normalize(&message));
        }

        #[test]
        fn signature_never_exceeds_cap(message in ".{0,300}", cap in 1usize..64) {
            let normalizer = RuleSetNormalizer::standard(cap, cap);
            prop_assert!(normalizer.normalize(&message).signature.chars().count() <= cap);
        }
    }
}
