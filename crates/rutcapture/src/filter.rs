//! Semantic filter: a pure function deciding whether completed
//! text is plausibly a spoken RUT, run before the validation webhook is ever
//! invoked.

const CONFUSION_PHRASES: &[&str] = &["cuanto", "telefono", "direccion", "fecha", "nombre", "hora"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    /// `rut` is populated when `callcore_rut::parse` already produced an
    /// in-range body; the webhook can validate or ask for the missing `dv`.
    Accepted { rut: Option<String> },
    Rejected { reason: &'static str },
}

fn strip_accents(c: char) -> char {
    match c {
        'á' => 'a',
        'é' => 'e',
        'í' => 'i',
        'ó' => 'o',
        'ú' => 'u',
        'ñ' => 'n',
        other => other,
    }
}

fn digit_run_at_least(text: &str, min_len: usize) -> bool {
    let mut run = 0usize;
    for c in text.chars() {
        if c.is_ascii_digit() {
            run += 1;
            if run >= min_len {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Runs `callcore_rut::parse` first; falls back to a normalized-digit-count
/// heuristic; rejects on confusion phrases, short text, or too few digits.
pub fn semantic_filter(text: &str) -> FilterOutcome {
    let trimmed = text.trim();
    if trimmed.len() < 3 {
        return FilterOutcome::Rejected { reason: "too_short" };
    }

    let lower: String = trimmed.to_lowercase().chars().map(strip_accents).collect();
    if CONFUSION_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return FilterOutcome::Rejected { reason: "confusion_phrase" };
    }

    let parsed = callcore_rut::parse(trimmed);
    if let Some(body) = parsed.body {
        let _ = body;
        return FilterOutcome::Accepted { rut: parsed.rut };
    }

    let digits: String = callcore_rut::digits_from_words(trimmed)
        .unwrap_or_else(|| trimmed.chars().filter(|c| c.is_ascii_digit()).collect());
    let digit_count = digits.chars().filter(|c| c.is_ascii_digit()).count();
    if !(7..=9).contains(&digit_count) {
        return FilterOutcome::Rejected { reason: "digit_count_out_of_range" };
    }
    if !digit_run_at_least(&digits, 4) {
        return FilterOutcome::Rejected { reason: "no_sufficient_digit_run" };
    }

    FilterOutcome::Accepted { rut: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_already_parseable_rut_with_value() {
        let outcome = semantic_filter("mi rut es 14.348.258-8");
        assert_eq!(outcome, FilterOutcome::Accepted { rut: Some("14348258-8".to_string()) });
    }

    #[test]
    fn accepts_spelled_out_digits_without_check_digit() {
        let outcome = semantic_filter("catorce millones trescientos cuarenta y ocho mil doscientos cincuenta y ocho");
        assert!(matches!(outcome, FilterOutcome::Accepted { .. }));
    }

    #[test]
    fn rejects_confusion_phrase() {
        let outcome = semantic_filter("cual es tu telefono");
        assert_eq!(outcome, FilterOutcome::Rejected { reason: "confusion_phrase" });
    }

    #[test]
    fn rejects_too_short_text() {
        let outcome = semantic_filter("eh");
        assert_eq!(outcome, FilterOutcome::Rejected { reason: "too_short" });
    }

    #[test]
    fn rejects_text_with_no_digit_run() {
        let outcome = semantic_filter("no se mi numero ahora mismo");
        assert!(matches!(outcome, FilterOutcome::Rejected { .. }));
    }
}
