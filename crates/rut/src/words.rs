//! Spanish number-word table used by the slow (compositional) parse path.

/// Words that carry no numeric meaning and are discarded before parsing.
const FILLER: &[&str] = &[
    "rut", "mi", "el", "la", "es", "por", "favor", "numero", "número", "dv", "mio", "mío", "su",
    "de", "del",
];

pub fn is_filler(word: &str) -> bool {
    FILLER.contains(&word)
}

/// Every Spanish number word recognized by the slow path, paired with its
/// additive value in `[0, 999]`. Standard Spanish numbers compose additively
/// (hundreds + tens + units all occupy disjoint decimal places), so summing
/// these across a token run reconstructs the correct value — see
/// `parse_compositional`. Exposed so `normalize` can recognize the same
/// vocabulary when deciding where to insert the check-digit separator.
pub(crate) const NUMBER_WORDS: &[(&str, u32)] = &[
    ("cero", 0),
    ("uno", 1),
    ("un", 1),
    ("dos", 2),
    ("tres", 3),
    ("cuatro", 4),
    ("cinco", 5),
    ("seis", 6),
    ("siete", 7),
    ("ocho", 8),
    ("nueve", 9),
    ("diez", 10),
    ("once", 11),
    ("doce", 12),
    ("trece", 13),
    ("catorce", 14),
    ("quince", 15),
    ("dieciseis", 16),
    ("diecisiete", 17),
    ("dieciocho", 18),
    ("diecinueve", 19),
    ("veinte", 20),
    ("veintiuno", 21),
    ("veintiun", 21),
    ("veintidos", 22),
    ("veintitres", 23),
    ("veinticuatro", 24),
    ("veinticinco", 25),
    ("veintiseis", 26),
    ("veintisiete", 27),
    ("veintiocho", 28),
    ("veintinueve", 29),
    ("treinta", 30),
    ("cuarenta", 40),
    ("cincuenta", 50),
    ("sesenta", 60),
    ("setenta", 70),
    ("ochenta", 80),
    ("noventa", 90),
    ("cien", 100),
    ("ciento", 100),
    ("doscientos", 200),
    ("trescientos", 300),
    ("cuatrocientos", 400),
    ("quinientos", 500),
    ("seiscientos", 600),
    ("setecientos", 700),
    ("ochocientos", 800),
    ("novecientos", 900),
];

fn word_value(word: &str) -> Option<u32> {
    NUMBER_WORDS.iter().find_map(|&(w, v)| (w == word).then_some(v))
}

/// Value of a word that stands for a single decimal digit (0-9), used for
/// the check-digit phrase (e.g. "ocho" after "guion").
pub fn single_digit_word(word: &str) -> Option<u8> {
    match word_value(word) {
        Some(v) if v <= 9 => Some(v as u8),
        _ => None,
    }
}

/// Parse a run of Spanish number-word tokens (with "mil"/"millon(es)"
/// multipliers) into an integer. Returns `None` if no recognizable number
/// word is present.
pub fn parse_compositional(tokens: &[&str]) -> Option<u64> {
    let mut total: u64 = 0;
    let mut segment: u32 = 0;
    let mut saw_any = false;

    for &tok in tokens {
        match tok {
            "millon" | "millones" => {
                let coefficient = if segment == 0 { 1 } else { segment };
                total += coefficient as u64 * 1_000_000;
                segment = 0;
                saw_any = true;
            }
            "mil" => {
                let coefficient = if segment == 0 { 1 } else { segment };
                total += coefficient as u64 * 1_000;
                segment = 0;
                saw_any = true;
            }
            "y" => {}
            other => {
                if let Some(v) = word_value(other) {
                    segment += v;
                    saw_any = true;
                }
            }
        }
    }

    total += segment as u64;

    if saw_any {
        Some(total)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_long_compositional_number() {
        let tokens: Vec<&str> = "catorce millones trescientos cuarenta y ocho mil doscientos cincuenta y ocho"
            .split_whitespace()
            .collect();
        assert_eq!(parse_compositional(&tokens), Some(14_348_258));
    }

    #[test]
    fn parses_bare_mil_with_implicit_coefficient() {
        let tokens: Vec<&str> = "mil doscientos".split_whitespace().collect();
        assert_eq!(parse_compositional(&tokens), Some(1_200));
    }

    #[test]
    fn parses_tens_and_units_idiom() {
        let tokens: Vec<&str> = "treinta y cinco".split_whitespace().collect();
        assert_eq!(parse_compositional(&tokens), Some(35));
    }

    #[test]
    fn returns_none_without_number_words() {
        let tokens: Vec<&str> = "hola que tal".split_whitespace().collect();
        assert_eq!(parse_compositional(&tokens), None);
    }

    #[test]
    fn single_digit_word_maps_ocho_to_8() {
        assert_eq!(single_digit_word("ocho"), Some(8));
        assert_eq!(single_digit_word("diez"), None);
    }
}
