//! Text normalization: diacritic folding, tokenization, phonetic codes,
//! canonical keys, literal sanitizers, and quality-marker extraction.
//!
//! Every function here is total: invalid input produces an empty string
//! (or an empty list), never an error.
//!
//! # Example
//!
//! ```rust
//! use arxiu_core::normalize::{canonical_surname_key, fold, phonetic_code};
//!
//! assert_eq!(fold("Martí-Çabrera"), "marti cabrera");
//! assert_eq!(canonical_surname_key("d'Alòs"), "DALOS");
//! assert_eq!(phonetic_code("robert"), "R163");
//! ```

use crate::models::{merge_quality, Quality};

/// Append the folded form of an already-lowercased character.
fn fold_char(c: char, out: &mut String) {
    match c {
        'à' | 'á' | 'â' | 'ä' | 'ã' | 'å' | 'ā' => out.push('a'),
        'è' | 'é' | 'ê' | 'ë' | 'ē' => out.push('e'),
        'ì' | 'í' | 'î' | 'ï' | 'ī' => out.push('i'),
        'ò' | 'ó' | 'ô' | 'ö' | 'õ' | 'ō' | 'ø' => out.push('o'),
        'ù' | 'ú' | 'û' | 'ü' | 'ū' => out.push('u'),
        'ý' | 'ÿ' => out.push('y'),
        'ç' => out.push('c'),
        'ñ' => out.push('n'),
        'æ' => out.push_str("ae"),
        'œ' => out.push_str("oe"),
        'ß' => out.push_str("ss"),
        '·' | '\'' | '’' | '‘' | '´' | '`' | 'ʼ' => {}
        '-' | '.' | ',' => out.push(' '),
        c if c.is_whitespace() => out.push(' '),
        c => out.push(c),
    }
}

/// Lowercase, strip diacritics, drop apostrophes and middle dots, turn
/// `-` `.` `,` into spaces, and collapse whitespace.
pub fn fold(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        fold_char(c, &mut out);
    }
    collapse_whitespace(&out)
}

/// Remove diacritics from letters, keeping case and punctuation.
pub fn strip_diacritics(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let lower = c.to_lowercase().next().unwrap_or(c);
        let base = match lower {
            'à' | 'á' | 'â' | 'ä' | 'ã' | 'å' | 'ā' => Some('a'),
            'è' | 'é' | 'ê' | 'ë' | 'ē' => Some('e'),
            'ì' | 'í' | 'î' | 'ï' | 'ī' => Some('i'),
            'ò' | 'ó' | 'ô' | 'ö' | 'õ' | 'ō' => Some('o'),
            'ù' | 'ú' | 'û' | 'ü' | 'ū' => Some('u'),
            'ý' | 'ÿ' => Some('y'),
            'ç' => Some('c'),
            'ñ' => Some('n'),
            _ => None,
        };
        match base {
            Some(b) if c.is_uppercase() => out.push(b.to_ascii_uppercase()),
            Some(b) => out.push(b),
            None => out.push(c),
        }
    }
    out
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn canonical_key(text: &str) -> String {
    fold(text)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Equality key for surnames: folded, separator-free, uppercase.
pub fn canonical_surname_key(text: &str) -> String {
    canonical_key(text)
}

/// Equality key for given names: folded, separator-free, uppercase.
pub fn canonical_given_name_key(text: &str) -> String {
    canonical_key(text)
}

/// Fold every part, split on whitespace, and deduplicate while keeping
/// first-seen order.
pub fn tokenize<S: AsRef<str>>(parts: &[S]) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for part in parts {
        for tok in fold(part.as_ref()).split(' ') {
            if tok.is_empty() {
                continue;
            }
            if !tokens.iter().any(|t| t == tok) {
                tokens.push(tok.to_string());
            }
        }
    }
    tokens
}

fn soundex_digit(c: char) -> u8 {
    match c {
        'b' | 'f' | 'p' | 'v' => 1,
        'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => 2,
        'd' | 't' => 3,
        'l' => 4,
        'm' | 'n' => 5,
        'r' => 6,
        _ => 0,
    }
}

/// Four-character Soundex variant.
///
/// Vowels separate equal codes; `h` and `w` do not. Tokens without any
/// ASCII letter yield an empty string.
pub fn phonetic_code(token: &str) -> String {
    let letters: Vec<char> = fold(token)
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect();
    let Some(&first) = letters.first() else {
        return String::new();
    };

    let mut code = String::with_capacity(4);
    code.push(first.to_ascii_uppercase());
    let mut prev = soundex_digit(first);

    for &c in &letters[1..] {
        if code.len() == 4 {
            break;
        }
        let d = soundex_digit(c);
        if d == 0 {
            if c != 'h' && c != 'w' {
                prev = 0;
            }
            continue;
        }
        if d != prev {
            code.push((b'0' + d) as char);
        }
        prev = d;
    }

    while code.len() < 4 {
        code.push('0');
    }
    code
}

/// Phonetic codes for a token list, deduplicated, space-joined.
pub fn phonetic_string<S: AsRef<str>>(tokens: &[S]) -> String {
    let mut codes: Vec<String> = Vec::new();
    for t in tokens {
        let c = phonetic_code(t.as_ref());
        if !c.is_empty() && !codes.contains(&c) {
            codes.push(c);
        }
    }
    codes.join(" ")
}

const BRACKETS: &[char] = &['(', ')', '[', ']', '{', '}', '<', '>'];

fn sanitize_literal(text: &str) -> String {
    let collapsed = collapse_whitespace(text);
    if collapsed.is_empty() {
        return String::new();
    }
    let mut letters = 0usize;
    for c in collapsed.chars() {
        if c.is_ascii_digit() || BRACKETS.contains(&c) {
            return String::new();
        }
        if c.is_alphabetic() {
            letters += 1;
            continue;
        }
        match c {
            ' ' | '-' | '\'' | '’' | '·' | '.' => {}
            _ => return String::new(),
        }
    }
    if letters < 2 {
        return String::new();
    }
    collapsed
}

/// Validate a given-name literal for frequency roll-ups.
///
/// Returns the whitespace-collapsed literal, or `""` if it contains digits,
/// brackets, disallowed punctuation, or fewer than two letters.
pub fn sanitize_name_literal(text: &str) -> String {
    sanitize_literal(text)
}

/// Validate a surname literal for frequency roll-ups.
///
/// Same rules as [`sanitize_name_literal`], and a literal made only of
/// particles (`de`, `i`, …) is rejected.
pub fn sanitize_surname_literal(text: &str) -> String {
    let s = sanitize_literal(text);
    if s.is_empty() {
        return s;
    }
    let only_particles = fold(&s)
        .split(' ')
        .all(|t| crate::names::is_joiner(t) || crate::names::is_article(t));
    if only_particles {
        String::new()
    } else {
        s
    }
}

/// Strip transcriber quality markers from a value.
///
/// `¿` marks no record, `?` doubt, `[...]`/`...`/`…` an incomplete reading,
/// and `[il·legible]` an illegible one. Returns the cleaned text and the
/// worst quality found (or `None` when no marker was present).
pub fn extract_quality_marker(text: &str) -> (String, Option<Quality>) {
    let mut quality: Option<Quality> = None;
    let mut s = text.to_string();

    for marker in ["[il·legible]", "[illegible]", "[il.legible]", "[ilegible]"] {
        if s.to_lowercase().contains(marker) {
            s = replace_ci(&s, marker, " ");
            quality = merge_quality(quality, Some(Quality::Illegible));
        }
    }
    for marker in ["[...]", "[…]", "...", "…"] {
        if s.contains(marker) {
            s = s.replace(marker, " ");
            quality = merge_quality(quality, Some(Quality::Incomplete));
        }
    }
    if s.contains('¿') {
        quality = merge_quality(quality, Some(Quality::NoRecord));
    } else if s.contains('?') {
        quality = merge_quality(quality, Some(Quality::Doubtful));
    }
    s = s.replace(['¿', '?'], " ");

    (collapse_whitespace(&s), quality)
}

fn replace_ci(haystack: &str, needle: &str, with: &str) -> String {
    let lower = haystack.to_lowercase();
    match lower.find(needle) {
        // Lowercasing can change byte lengths; fall back to a plain replace then.
        Some(pos) if lower.len() == haystack.len() => {
            let mut out = String::with_capacity(haystack.len());
            out.push_str(&haystack[..pos]);
            out.push_str(with);
            out.push_str(&haystack[pos + needle.len()..]);
            out
        }
        _ => haystack.replace(needle, with),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_diacritics_and_separators() {
        assert_eq!(fold("  Àngela  Ñúñez-Pérez "), "angela nunez perez");
        assert_eq!(fold("Col·lell"), "collell");
        assert_eq!(fold("d’Alòs, J."), "dalos j");
        assert_eq!(fold(""), "");
    }

    #[test]
    fn test_strip_diacritics_keeps_case() {
        assert_eq!(strip_diacritics("Àngel Martí-Çapdevila"), "Angel Marti-Capdevila");
        assert_eq!(strip_diacritics("Col·lell"), "Col·lell");
    }

    #[test]
    fn test_canonical_keys() {
        assert_eq!(canonical_surname_key("Puig i Ferrer"), "PUIGIFERRER");
        assert_eq!(canonical_surname_key("Font-Sagué"), "FONTSAGUE");
        assert_eq!(canonical_given_name_key("Josep Maria"), "JOSEPMARIA");
        assert_eq!(canonical_surname_key("Pujol"), canonical_surname_key("PUJOL"));
    }

    #[test]
    fn test_tokenize_dedup_in_order() {
        let toks = tokenize(&["Joan Puig", "puig Ferrer", "Joan"]);
        assert_eq!(toks, vec!["joan", "puig", "ferrer"]);
        assert!(tokenize::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_phonetic_code() {
        assert_eq!(phonetic_code("Robert"), "R163");
        assert_eq!(phonetic_code("Rupert"), "R163");
        assert_eq!(phonetic_code("Puig"), "P200");
        assert_eq!(phonetic_code("Ferrer"), "F660");
        assert_eq!(phonetic_code("Ashcraft"), "A261");
        assert_eq!(phonetic_code("123"), "");
    }

    #[test]
    fn test_phonetic_variants_collide() {
        assert_eq!(phonetic_code("Vilanova"), phonetic_code("Vilanoba"));
    }

    #[test]
    fn test_sanitize_name_literal() {
        assert_eq!(sanitize_name_literal("  Joan   Baptista "), "Joan Baptista");
        assert_eq!(sanitize_name_literal("Joan2"), "");
        assert_eq!(sanitize_name_literal("(Joan)"), "");
        assert_eq!(sanitize_name_literal("J"), "");
        assert_eq!(sanitize_name_literal("Joan?"), "");
        assert_eq!(sanitize_name_literal("Col·lell"), "Col·lell");
    }

    #[test]
    fn test_sanitize_surname_rejects_particles() {
        assert_eq!(sanitize_surname_literal("de la"), "");
        assert_eq!(sanitize_surname_literal("de la Torre"), "de la Torre");
        assert_eq!(sanitize_surname_literal("d'Alòs"), "d'Alòs");
    }

    #[test]
    fn test_extract_quality_marker() {
        assert_eq!(extract_quality_marker("Joan"), ("Joan".to_string(), None));
        assert_eq!(
            extract_quality_marker("Joan?"),
            ("Joan".to_string(), Some(Quality::Doubtful))
        );
        assert_eq!(
            extract_quality_marker("¿"),
            (String::new(), Some(Quality::NoRecord))
        );
        assert_eq!(
            extract_quality_marker("Fer[...]"),
            ("Fer".to_string(), Some(Quality::Incomplete))
        );
        assert_eq!(
            extract_quality_marker("[il·legible]"),
            (String::new(), Some(Quality::Illegible))
        );
    }
}
