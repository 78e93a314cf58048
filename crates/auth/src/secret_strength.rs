//! Signing-secret strength analysis.
//!
//! [`SecretValidator::validate`] is a pure function of the candidate and the
//! policy it was built from: no I/O, no panics, identical input always yields
//! an identical [`ValidationReport`]. Reports never echo the candidate.
//!
//! The entropy figure is a heuristic (`length × log2(alphabet)`, where the
//! alphabet is the union of character classes actually present), not an
//! information-theoretic measure. It overestimates structured secrets, which
//! is why the structural pattern checks exist alongside it.

use std::sync::LazyLock;

use {
    agora_config::{PatternSeverity, SecretPolicyConfig},
    regex::Regex,
    serde::Serialize,
    tracing::warn,
};

/// Runs of a single character at least this long are a structural weakness.
const LONG_RUN: usize = 8;
/// Ascending/descending runs (`12345678`, `hgfedcba`) at least this long.
const SEQUENTIAL_RUN: usize = 8;
/// Longest unit considered when testing whether a secret is one short
/// substring repeated.
const MAX_REPEAT_UNIT: usize = 8;

const LOWER_ALPHABET: f64 = 26.0;
const UPPER_ALPHABET: f64 = 26.0;
const DIGIT_ALPHABET: f64 = 10.0;
const SYMBOL_ALPHABET: f64 = 33.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrengthSeverity {
    Ok,
    High,
    Critical,
}

impl From<PatternSeverity> for StrengthSeverity {
    fn from(s: PatternSeverity) -> Self {
        match s {
            PatternSeverity::High => Self::High,
            PatternSeverity::Critical => Self::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub severity: StrengthSeverity,
    pub length: usize,
    pub required_length: usize,
    pub length_ok: bool,
    pub character_type_count: usize,
    pub entropy_estimate: f64,
    pub has_excessive_repeats: bool,
    pub matched_weak_patterns: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone)]
struct WeakEntry {
    value: String,
    severity: StrengthSeverity,
}

#[derive(Debug, Clone)]
struct PatternCheck {
    name: String,
    regex: Regex,
    severity: StrengthSeverity,
}

/// Strength policy compiled from [`SecretPolicyConfig`].
#[derive(Debug, Clone)]
pub struct SecretValidator {
    min_length: usize,
    production_min_length: usize,
    min_character_classes: usize,
    max_repeat_run: usize,
    min_entropy_bits: f64,
    exact: Vec<WeakEntry>,
    fragments: Vec<String>,
    patterns: Vec<PatternCheck>,
}

impl Default for SecretValidator {
    fn default() -> Self {
        Self::from_policy(&SecretPolicyConfig::default())
    }
}

static DEFAULT_VALIDATOR: LazyLock<SecretValidator> = LazyLock::new(SecretValidator::default);

/// Validate `candidate` against the default policy.
pub fn validate(candidate: &str, is_production: bool) -> ValidationReport {
    DEFAULT_VALIDATOR.validate(candidate, is_production)
}

impl SecretValidator {
    /// Build a validator from config. Pattern rules whose regex fails to
    /// compile are skipped with a warning.
    pub fn from_policy(policy: &SecretPolicyConfig) -> Self {
        let min_length = policy.min_length.max(1);
        let production_min_length = if policy.production_min_length > min_length {
            policy.production_min_length
        } else {
            warn!(
                min_length,
                production_min_length = policy.production_min_length,
                "production minimum must exceed the base minimum, raising it"
            );
            min_length + 1
        };

        let patterns = policy
            .patterns
            .iter()
            .filter_map(|rule| match Regex::new(&rule.regex) {
                Ok(regex) => Some(PatternCheck {
                    name: rule.name.clone(),
                    regex,
                    severity: rule.severity.into(),
                }),
                Err(e) => {
                    warn!(rule = %rule.name, error = %e, "skipping invalid secret pattern rule");
                    None
                },
            })
            .collect();

        Self {
            min_length,
            production_min_length,
            min_character_classes: policy.min_character_classes.clamp(1, 4),
            max_repeat_run: policy.max_repeat_run.max(1),
            min_entropy_bits: policy.min_entropy_bits.max(0.0),
            exact: policy
                .exact
                .iter()
                .filter(|e| !e.value.is_empty())
                .map(|e| WeakEntry {
                    value: e.value.to_lowercase(),
                    severity: e.severity.into(),
                })
                .collect(),
            fragments: policy
                .fragments
                .iter()
                .filter(|f| !f.is_empty())
                .map(|f| f.to_lowercase())
                .collect(),
            patterns,
        }
    }

    pub fn required_length(&self, is_production: bool) -> usize {
        if is_production {
            self.production_min_length
        } else {
            self.min_length
        }
    }

    pub fn validate(&self, candidate: &str, is_production: bool) -> ValidationReport {
        let chars: Vec<char> = candidate.chars().collect();
        let lower = candidate.to_lowercase();
        let length = chars.len();
        let required_length = self.required_length(is_production);
        let length_ok = length >= required_length;

        let classes = CharClasses::of(&chars);
        let character_type_count = classes.count();
        let entropy_estimate = entropy_estimate(length, &classes);
        let longest_run = longest_run(&chars);
        let has_excessive_repeats = longest_run > self.max_repeat_run;

        let mut matched = Vec::new();
        let mut recommendations = Vec::new();
        let mut severity = StrengthSeverity::Ok;
        let mut hit = |name: String, s: StrengthSeverity, matched: &mut Vec<String>| {
            severity = severity.max(s);
            matched.push(name);
        };

        if let Some(entry) = self.exact.iter().find(|e| matches_padded(&lower, &e.value)) {
            // The catalogued value itself is always critical; the entry's
            // severity applies to padded variants.
            let entry_severity = if lower.trim() == entry.value {
                StrengthSeverity::Critical
            } else {
                entry.severity
            };
            hit("known_weak_secret".into(), entry_severity, &mut matched);
            recommendations
                .push("replace the placeholder/default secret with a randomly generated value".into());
        }

        for rule in &self.patterns {
            if rule.regex.is_match(candidate) {
                hit(rule.name.clone(), rule.severity, &mut matched);
                recommendations.push(format!("avoid predictable structure ({})", rule.name));
            }
        }

        if longest_run >= LONG_RUN {
            hit("repeated_character_run".into(), StrengthSeverity::High, &mut matched);
        }
        if has_sequential_run(&lower) {
            hit("sequential_run".into(), StrengthSeverity::High, &mut matched);
            recommendations.push("avoid keyboard or alphabetical sequences".into());
        }
        if is_repeated_unit(&chars) || has_repeated_substring(&chars) {
            hit("repeated_substring".into(), StrengthSeverity::High, &mut matched);
            recommendations.push("avoid repeating the same short substring".into());
        }

        for fragment in &self.fragments {
            if lower.contains(fragment.as_str()) {
                hit(format!("fragment:{fragment}"), StrengthSeverity::High, &mut matched);
                recommendations.push(format!("remove dictionary words such as '{fragment}'"));
            }
        }

        if !length_ok {
            severity = severity.max(if is_production {
                StrengthSeverity::Critical
            } else {
                StrengthSeverity::High
            });
            recommendations.push(format!(
                "use at least {required_length} characters (currently {length})"
            ));
        }
        let classes_ok = character_type_count >= self.min_character_classes;
        if !classes_ok {
            severity = severity.max(StrengthSeverity::High);
            recommendations.push(format!(
                "mix at least {} of: lowercase, uppercase, digits, symbols (currently {character_type_count})",
                self.min_character_classes
            ));
        }
        if has_excessive_repeats {
            recommendations.push(format!(
                "avoid runs of more than {} identical characters",
                self.max_repeat_run
            ));
        }
        let entropy_ok = entropy_estimate >= self.min_entropy_bits;
        if !entropy_ok {
            recommendations.push(format!(
                "increase randomness: estimated {entropy_estimate:.0} bits, want at least {:.0}",
                self.min_entropy_bits
            ));
        }

        let is_valid = length_ok
            && classes_ok
            && entropy_ok
            && !has_excessive_repeats
            && severity == StrengthSeverity::Ok;
        if !is_valid {
            recommendations.push(format!(
                "generate a replacement with e.g. `openssl rand -base64 {}`",
                required_length.div_ceil(4) * 3
            ));
        }

        ValidationReport {
            is_valid,
            severity,
            length,
            required_length,
            length_ok,
            character_type_count,
            entropy_estimate,
            has_excessive_repeats,
            matched_weak_patterns: matched,
            recommendations,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CharClasses {
    lower: bool,
    upper: bool,
    digit: bool,
    symbol: bool,
}

impl CharClasses {
    fn of(chars: &[char]) -> Self {
        let mut c = Self::default();
        for ch in chars {
            match ch {
                'a'..='z' => c.lower = true,
                'A'..='Z' => c.upper = true,
                '0'..='9' => c.digit = true,
                _ => c.symbol = true,
            }
        }
        c
    }

    fn count(&self) -> usize {
        [self.lower, self.upper, self.digit, self.symbol]
            .iter()
            .filter(|b| **b)
            .count()
    }

    fn alphabet(&self) -> f64 {
        let mut size = 0.0;
        if self.lower {
            size += LOWER_ALPHABET;
        }
        if self.upper {
            size += UPPER_ALPHABET;
        }
        if self.digit {
            size += DIGIT_ALPHABET;
        }
        if self.symbol {
            size += SYMBOL_ALPHABET;
        }
        size
    }
}

fn entropy_estimate(length: usize, classes: &CharClasses) -> f64 {
    let alphabet = classes.alphabet();
    if length == 0 || alphabet <= 1.0 {
        return 0.0;
    }
    length as f64 * alphabet.log2()
}

/// `candidate` equals `entry`, or is `entry` followed by a run of one filler
/// character (`your-secret-keyxxxxxxxx`).
fn matches_padded(candidate: &str, entry: &str) -> bool {
    let candidate = candidate.trim();
    let Some(rest) = candidate.strip_prefix(entry) else {
        return false;
    };
    let mut rest = rest.chars();
    match rest.next() {
        None => true,
        Some(pad) => rest.all(|c| c == pad),
    }
}

fn longest_run(chars: &[char]) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut prev = None;
    for &c in chars {
        if Some(c) == prev {
            current += 1;
        } else {
            current = 1;
            prev = Some(c);
        }
        longest = longest.max(current);
    }
    longest
}

fn has_sequential_run(lower: &str) -> bool {
    let mut ascending = 1;
    let mut descending = 1;
    let mut prev: Option<char> = None;
    for c in lower.chars() {
        let step = prev
            .filter(|p| same_sequence_class(*p, c))
            .map(|p| c as i64 - p as i64);
        match step {
            Some(1) => {
                ascending += 1;
                descending = 1;
            },
            Some(-1) => {
                descending += 1;
                ascending = 1;
            },
            _ => {
                ascending = 1;
                descending = 1;
            },
        }
        if ascending >= SEQUENTIAL_RUN || descending >= SEQUENTIAL_RUN {
            return true;
        }
        prev = Some(c);
    }
    false
}

fn same_sequence_class(a: char, b: char) -> bool {
    (a.is_ascii_digit() && b.is_ascii_digit())
        || (a.is_ascii_lowercase() && b.is_ascii_lowercase())
}

/// The whole candidate is one short unit repeated (`abcabc`).
fn is_repeated_unit(chars: &[char]) -> bool {
    let n = chars.len();
    (2..=MAX_REPEAT_UNIT.min(n / 2))
        .filter(|unit| n % unit == 0)
        .any(|unit| (unit..n).all(|i| chars[i] == chars[i - unit]))
}

/// A unit of 2–4 characters repeated at least four times back to back
/// anywhere in the candidate (`..xyxyxyxy..`).
fn has_repeated_substring(chars: &[char]) -> bool {
    (2..=4).any(|unit| {
        let mut streak = 0;
        for i in unit..chars.len() {
            if chars[i] == chars[i - unit] {
                streak += 1;
                if streak >= unit * 3 {
                    return true;
                }
            } else {
                streak = 0;
            }
        }
        false
    })
}
