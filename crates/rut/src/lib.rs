//! Parses a Chilean RUT (national ID number) out of noisy ASR transcript
//! text and validates its check digit.
//!
//! The algorithm runs two passes over the normalized text: a fast path for
//! the common case where the caller simply read out the digits, and a slow,
//! compositional path for fully spelled-out numbers ("catorce millones
//! trescientos cuarenta y ocho mil...").

mod normalize;
mod validate;
mod words;

use once_cell::sync::Lazy;
use regex::Regex;

pub use validate::check_digit;

/// Valid RUT bodies fall in this range (7 to 9 decimal digits). Chilean RUTs
/// issued to date are 7-8 digits; 9 is reserved for future growth and still
/// accepted so the parser doesn't need a cutover date baked in.
const MIN_BODY: u32 = 1_000_000;
const MAX_BODY: u32 = 999_999_999;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    pub body: Option<u32>,
    pub dv: Option<char>,
    pub rut: Option<String>,
    pub ok: bool,
    pub reason: Option<String>,
}

impl ParseResult {
    fn reject(reason: &str) -> Self {
        Self {
            body: None,
            dv: None,
            rut: None,
            ok: false,
            reason: Some(reason.to_string()),
        }
    }

    fn from_body_and_dv(body: u32, dv: Option<char>) -> Self {
        if body < MIN_BODY || body > MAX_BODY {
            return Self::reject("out_of_range");
        }

        let expected = validate::check_digit(body);
        match dv {
            None => Self {
                body: Some(body),
                dv: None,
                rut: None,
                ok: false,
                reason: Some("missing_dv".to_string()),
            },
            Some(d) if d.to_ascii_uppercase() == expected => {
                let rut = format!("{body}-{expected}");
                Self {
                    body: Some(body),
                    dv: Some(expected),
                    rut: Some(rut),
                    ok: true,
                    reason: None,
                }
            }
            Some(_) => Self {
                body: Some(body),
                dv: None,
                rut: None,
                ok: false,
                reason: Some("dv_mismatch".to_string()),
            },
        }
    }
}

/// Matches a run of grouped digits (with optional `.` thousands separators)
/// followed by an optional `-`/`k`-style check digit. Applied to text that
/// has already gone through `normalize::normalize`.
static FAST_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,3}(?:\.?\d{3}){1,2}|\d{6,9})\s*-?\s*([0-9k])?\b").unwrap()
});

/// Six or more consecutive digits is unambiguously the RUT body even without
/// a recognizable separator; short-circuits straight to the fast path.
static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{6,}").unwrap());

/// Full parse: normalization, fast path, slow (compositional) path, range
/// check and validation.
pub fn parse(text: &str) -> ParseResult {
    let normalized = normalize::normalize(text);

    if DIGIT_RUN.is_match(&normalized) {
        if let Some(result) = try_fast_path(&normalized) {
            return result;
        }
    }

    if let Some(result) = try_fast_path(&normalized) {
        return result;
    }

    try_slow_path(&normalized).unwrap_or_else(|| ParseResult::reject("no_number_found"))
}

fn try_fast_path(normalized: &str) -> Option<ParseResult> {
    let caps = FAST_PATH.captures(normalized)?;
    let digits: String = caps[1].chars().filter(|c| c.is_ascii_digit()).collect();
    let body: u32 = digits.parse().ok()?;
    let dv = caps.get(2).and_then(|m| m.as_str().chars().next());
    Some(ParseResult::from_body_and_dv(body, dv.map(|c| c.to_ascii_uppercase())))
}

fn try_slow_path(normalized: &str) -> Option<ParseResult> {
    let tokens = normalize::tokenize(normalized);
    let tokens: Vec<&str> = tokens
        .iter()
        .map(|s| s.as_str())
        .filter(|t| !words::is_filler(t))
        .collect();

    // The check digit, when spelled out, follows a literal "-" token (itself
    // produced by normalize() rewriting "guion"/"menos"/etc.) or is a bare
    // trailing "k". Split the token run there.
    let dash_pos = tokens.iter().rposition(|&t| t == "-");

    let (body_tokens, dv): (&[&str], Option<char>) = match dash_pos {
        Some(pos) => {
            let dv_tokens = &tokens[pos + 1..];
            let dv = dv_tokens.iter().find_map(|&t| match t {
                "k" => Some('K'),
                other => other
                    .parse::<u8>()
                    .ok()
                    .filter(|d| *d <= 9)
                    .map(|d| std::char::from_digit(d as u32, 10).unwrap())
                    .or_else(|| words::single_digit_word(other).map(|d| std::char::from_digit(d as u32, 10).unwrap())),
            });
            (&tokens[..pos], dv)
        }
        None => (&tokens[..], None),
    };

    let body = words::parse_compositional(body_tokens)?;
    if body > u32::MAX as u64 {
        return Some(ParseResult::reject("out_of_range"));
    }

    Some(ParseResult::from_body_and_dv(body as u32, dv))
}

/// Normalizes fully spelled-out Spanish number words to a digit string,
/// without any dv/range validation. Used by the RUT capture orchestrator's
/// semantic filter, which only needs a digit count, not a parsed RUT.
pub fn digits_from_words(text: &str) -> Option<String> {
    let normalized = normalize::normalize(text);
    let tokens = normalize::tokenize(&normalized);
    let tokens: Vec<&str> = tokens.iter().map(|s| s.as_str()).filter(|t| !words::is_filler(t)).collect();
    words::parse_compositional(&tokens).map(|n| n.to_string())
}

pub fn validate(rut: &str) -> bool {
    let normalized = normalize::normalize(rut);
    let mut parts = normalized.splitn(2, '-');
    let body_part = parts.next().unwrap_or("").trim();
    let dv_part = parts.next().unwrap_or("").trim();

    let digits: String = body_part.chars().filter(|c| c.is_ascii_digit()).collect();
    let Ok(body) = digits.parse::<u32>() else {
        return false;
    };
    let Some(dv) = dv_part.chars().next() else {
        return false;
    };

    validate::is_valid(body, dv)
}

/// Returns the RUT substring if the text contains an already-formatted RUT
/// (e.g. copy-pasted from a document), bypassing the slow path entirely.
pub fn hard_extract(text: &str) -> Option<String> {
    let result = try_fast_path(&normalize::normalize(text))?;
    result.rut
}
