//! Shared lexical patterns for the verification tiers.
//!
//! Deontic markers, negation cues and exception clauses used by the lexical
//! tier, plus the sentence extractors the semantic and entailment tiers
//! build their comparisons from.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

use crate::rule::Modality;
use crate::text;

lazy_static! {
    // =========================================================================
    // DEONTIC MARKERS
    // =========================================================================

    /// Prohibitions. Matched first and masked, so that "shall not" or
    /// "may not" is never also counted as an obligation or a permission.
    pub static ref PROHIBITION_MARKERS: Regex = Regex::new(concat!(
        r"(?i)\b(no person shall|shall not|must not|may not|cannot",
        r"|is not permitted|are not permitted|is not allowed|are not allowed",
        r"|(?:is|are) prohibited|prohibited|forbidden)\b",
    )).unwrap();

    pub static ref OBLIGATION_MARKERS: Regex = Regex::new(
        r"(?i)\b(shall|must|(?:is|are) required to|(?:is|are) obliged to|obliged|obligation)\b"
    ).unwrap();

    pub static ref PERMISSION_MARKERS: Regex = Regex::new(
        r"(?i)\b(may|(?:is|are) permitted to|permitted|(?:is|are) allowed to|allowed|can)\b"
    ).unwrap();

    /// Any normative marker, used to pick out deontic sentences.
    pub static ref DEONTIC_MARKERS: Regex = Regex::new(
        r"(?i)\b(shall|must|may|required|permitted|obliged|prohibited|forbidden)\b"
    ).unwrap();

    /// Markers that make a rule description read as an obligation.
    pub static ref OBLIGATION_WORDS: Regex = Regex::new(
        r"(?i)\b(shall|must|required|obliged)\b"
    ).unwrap();

    // =========================================================================
    // NEGATION & EXCEPTIONS
    // =========================================================================

    /// Negation cues for polarity comparison of whole statements.
    pub static ref NEGATION: Regex = Regex::new(
        r"(?i)\b(not|no|never|without|prohibited|forbidden|excluded|denied)\b|n't\b"
    ).unwrap();

    /// A negation cue followed by the term it binds, e.g. "not authorised",
    /// "without a licence", "non-EU".
    pub static ref NEGATED_TERM: Regex = Regex::new(concat!(
        r"(?i)\b(?:not|no|without)\s+(?:a\s+|an\s+|the\s+|be\s+|been\s+|being\s+)?",
        r"([a-z][a-z\-]{2,})|\bnon-([a-z][a-z\-]{1,})",
    )).unwrap();

    pub static ref EXCEPTION_MARKERS: Regex = Regex::new(concat!(
        r"(?i)\b(except|unless|provided that|by way of derogation|does not apply",
        r"|shall not apply|exempt(?:ed)?|notwithstanding)\b",
    )).unwrap();

    // =========================================================================
    // ACTOR & INSTRUMENT LEXICON
    // =========================================================================

    /// Field names that constrain who a rule addresses.
    pub static ref ACTOR_FIELD: Regex = Regex::new(
        r"(?i)(actor|entity|issuer|offeror|provider|institution|firm|person|operator)"
    ).unwrap();

    /// Field names that constrain what a rule is about.
    pub static ref INSTRUMENT_FIELD: Regex = Regex::new(
        r"(?i)(instrument|token|asset|product)"
    ).unwrap();

    /// Surface forms under which a type code appears in legal text.
    pub static ref TYPE_SYNONYMS: HashMap<&'static str, &'static [&'static str]> = {
        let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        m.insert("art", &["asset-referenced token", "asset referenced token"]);
        m.insert("emt", &["e-money token", "electronic money token"]);
        m.insert("stablecoin", &["stablecoin", "asset-referenced token", "e-money token"]);
        m.insert("casp", &["crypto-asset service provider", "crypto asset service provider"]);
        m.insert("crypto_asset", &["crypto-asset", "crypto asset"]);
        m.insert("utility_token", &["utility token"]);
        m.insert("security", &["transferable security", "financial instrument", "security"]);
        m.insert("credit_institution", &["credit institution"]);
        m.insert("emi", &["electronic money institution", "e-money institution"]);
        m.insert("investment_firm", &["investment firm"]);
        m.insert("issuer", &["issuer", "offeror"]);
        m.insert("offeror", &["offeror", "issuer"]);
        m
    };
}

/// Counts of deontic markers per modality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModalCounts {
    pub obligation: usize,
    pub permission: usize,
    pub prohibition: usize,
}

impl ModalCounts {
    fn total(&self) -> usize {
        self.obligation + self.permission + self.prohibition
    }

    pub fn count(&self, modality: Modality) -> usize {
        match modality {
            Modality::Obligation => self.obligation,
            Modality::Permission => self.permission,
            Modality::Prohibition => self.prohibition,
        }
    }

    /// The most frequent modality. Ties resolve towards prohibition, then
    /// obligation.
    pub fn dominant(&self) -> Option<Modality> {
        if self.total() == 0 {
            return None;
        }
        [
            (Modality::Prohibition, self.prohibition),
            (Modality::Obligation, self.obligation),
            (Modality::Permission, self.permission),
        ]
        .into_iter()
        .fold(None, |best: Option<(Modality, usize)>, (m, n)| match best {
            Some((_, b)) if b >= n => best,
            _ => Some((m, n)),
        })
        .map(|(m, _)| m)
    }
}

/// Count deontic markers in text.
pub fn modal_counts(text: &str) -> ModalCounts {
    let prohibition = PROHIBITION_MARKERS.find_iter(text).count();
    let masked = PROHIBITION_MARKERS.replace_all(text, " ");
    ModalCounts {
        obligation: OBLIGATION_MARKERS.find_iter(&masked).count(),
        permission: PERMISSION_MARKERS.find_iter(&masked).count(),
        prohibition,
    }
}

/// Check if text contains a negation cue.
pub fn has_negation(text: &str) -> bool {
    NEGATION.is_match(text)
}

/// Terms bound by a negation cue, lower-cased, with the matched span.
pub fn negated_terms(text: &str) -> Vec<(String, String)> {
    NEGATED_TERM
        .captures_iter(text)
        .filter_map(|caps| {
            let term = caps.get(1).or_else(|| caps.get(2))?;
            let span = caps.get(0)?.as_str().to_string();
            Some((term.as_str().to_lowercase(), span))
        })
        .collect()
}

/// Sentences of the text containing an exception clause.
pub fn exception_clauses(text: &str) -> Vec<String> {
    text::split_sentences(text)
        .into_iter()
        .filter(|s| EXCEPTION_MARKERS.is_match(s))
        .collect()
}

/// Sentences of the text carrying a deontic marker.
pub fn deontic_sentences(text: &str) -> Vec<String> {
    text::split_sentences(text)
        .into_iter()
        .filter(|s| DEONTIC_MARKERS.is_match(s))
        .collect()
}

/// Deontic sentences long enough to stand as a clause of their own.
pub fn normative_clauses(text: &str) -> Vec<String> {
    deontic_sentences(text)
        .into_iter()
        .filter(|s| s.chars().count() > 10)
        .collect()
}

/// Whether a type code (or one of its synonyms) is mentioned in the text.
pub fn mentions_type(text_lower: &str, code: &str) -> bool {
    let code = code.trim().to_lowercase();
    if code.is_empty() {
        return false;
    }
    let plain = text::humanize(&code);
    if contains_phrase(text_lower, &plain) || contains_phrase(text_lower, &code) {
        return true;
    }
    TYPE_SYNONYMS
        .get(code.as_str())
        .map(|forms| forms.iter().any(|form| contains_phrase(text_lower, form)))
        .unwrap_or(false)
}

/// Whole-word phrase search; tolerates a trailing plural "s".
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    haystack.match_indices(phrase).any(|(start, _)| {
        if haystack[..start].chars().next_back().is_some_and(is_word_char) {
            return false;
        }
        let mut rest = haystack[start + phrase.len()..].chars();
        match rest.next() {
            None => true,
            Some('s') => !rest.next().is_some_and(is_word_char),
            Some(c) => !is_word_char(c),
        }
    })
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
