use once_cell::sync::Lazy;
use regex::Regex;

use crate::words::NUMBER_WORDS;

/// Separator words that stand in for the literal check-digit dash when they
/// appear immediately before a digit, the letter K, or a spelled-out Spanish
/// number word (e.g. "guión ocho" needs the same dash as "guión 8").
static SEPARATOR_BEFORE_DIGIT: Lazy<Regex> = Lazy::new(|| {
    let word_alt = NUMBER_WORDS
        .iter()
        .map(|&(w, _)| w)
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(
        r"(?i)\b(guion|guión|raya|menos|coma)\b\s*(?=[0-9kK]\b|(?:{word_alt})\b)"
    ))
    .unwrap()
});

static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.,;:()]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Step 1 of the parsing pipeline: lowercase, strip punctuation,
/// contextually rewrite separator words to a literal dash, collapse
/// whitespace.
pub fn normalize(text: &str) -> String {
    let lower = text.to_lowercase();
    let no_punct = PUNCTUATION.replace_all(&lower, " ");
    let with_dash = SEPARATOR_BEFORE_DIGIT.replace_all(&no_punct, " - ");
    WHITESPACE
        .replace_all(&with_dash, " ")
        .trim()
        .to_string()
}

/// Fold Spanish accented vowels so token matching doesn't need accented and
/// unaccented spellings of the same word (e.g. `guión`/`guion`).
pub fn fold_accents(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            other => other,
        })
        .collect()
}

pub fn tokenize(text: &str) -> Vec<String> {
    fold_accents(text)
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_collapses_whitespace() {
        assert_eq!(normalize("ru.t:   14,348,258"), "ru t 14 348 258");
    }

    #[test]
    fn rewrites_separator_word_before_digit() {
        assert_eq!(normalize("ocho guion 5"), "ocho - 5");
        assert_eq!(normalize("ocho guión K"), "ocho - K".to_lowercase());
    }

    #[test]
    fn does_not_rewrite_separator_word_before_letters() {
        assert_eq!(normalize("el guion del texto"), "el guion del texto");
    }

    #[test]
    fn rewrites_separator_word_before_spelled_out_digit() {
        assert_eq!(
            normalize("cincuenta y ocho, guión ocho"),
            "cincuenta y ocho - ocho"
        );
    }

    #[test]
    fn tokenize_folds_accents() {
        assert_eq!(tokenize("guión verificador"), vec!["guion", "verificador"]);
    }
}
