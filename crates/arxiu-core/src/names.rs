//! Person-name parsing and marriage-order extraction.
//!
//! Transcribed person fragments look like `Puig i Ferrer Joan (pagès) (Valls)`
//! (surname-first) or `Joan Puig i Ferrer (Valls)` (given-name-first). The
//! parsers split such a fragment into given name, first and second surname,
//! municipality and notes, each with its own quality.
//!
//! # Surname joining
//!
//! A surname starts with one token. While the next token is a *joiner*
//! (`de`, `del`, `i`, `van`, any token ending in an apostrophe, …) the
//! joiner and the token after it are absorbed too; after `de` an article
//! (`la`, `el`, `l'`, `los`, `las`, `les`) may sit between them. The second
//! surname is only taken while at least one token remains for the given
//! name.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{merge_quality, QualifiedText, Quality};
use crate::normalize::collapse_whitespace;

/// Prefix particles and conjunctions that glue surname tokens together.
const JOINERS: &[&str] = &[
    "de", "del", "dels", "da", "das", "di", "do", "dos", "du", "des", "della", "delle", "dello",
    "van", "von", "der", "den", "ten", "ter", "zu", "i", "y", "e",
];

/// Conjunctions join the tokens on both sides; other joiners only prefix.
const CONJUNCTIONS: &[&str] = &["i", "y", "e"];

const ARTICLES: &[&str] = &["la", "el", "l'", "l’", "los", "las", "les", "lo"];

fn ends_with_apostrophe(token: &str) -> bool {
    token.ends_with('\'') || token.ends_with('’')
}

/// True for surname joiners, including any token ending in an apostrophe.
pub fn is_joiner(token: &str) -> bool {
    let t = token.to_lowercase();
    JOINERS.contains(&t.as_str()) || ends_with_apostrophe(&t)
}

/// True for articles allowed after `de`.
pub fn is_article(token: &str) -> bool {
    ARTICLES.contains(&token.to_lowercase().as_str())
}

fn is_conjunction(token: &str) -> bool {
    CONJUNCTIONS.contains(&token.to_lowercase().as_str())
}

fn is_de(token: &str) -> bool {
    token.eq_ignore_ascii_case("de")
}

/// Which side of the fragment carries the given name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameOrder {
    /// `Puig Ferrer Joan`.
    SurnameFirst,
    /// `Joan Puig Ferrer`.
    GivenFirst,
}

/// Where parenthetical groups end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParenPolicy {
    /// Every parenthetical goes to notes.
    AllNotes,
    /// The last parenthetical is the municipality; earlier ones are notes.
    LastIsMunicipality,
}

/// Output of the person-name parsers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedPerson {
    pub given_name: QualifiedText,
    pub surname1: QualifiedText,
    pub surname2: QualifiedText,
    pub municipality: QualifiedText,
    pub notes: String,
    /// Every parenthetical group, in order.
    pub extras: Vec<String>,
}

impl ParsedPerson {
    /// Swap the two surnames when both are present (maternal-first inputs).
    pub fn swap_surnames(&mut self) {
        if !self.surname1.is_empty() && !self.surname2.is_empty() {
            std::mem::swap(&mut self.surname1, &mut self.surname2);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.given_name.is_empty()
            && self.surname1.is_empty()
            && self.surname2.is_empty()
            && self.municipality.is_empty()
            && self.notes.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Token {
    text: String,
    quality: Option<Quality>,
}

/// Split `text` into its core and its top-level parenthetical groups.
///
/// An unclosed group runs to the end of the text.
pub fn extract_parentheticals(text: &str) -> (String, Vec<String>) {
    let mut core = String::new();
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();

    for c in text.chars() {
        match c {
            '(' => {
                if depth > 0 {
                    current.push(c);
                }
                depth += 1;
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    groups.push(collapse_whitespace(&current));
                    current.clear();
                    core.push(' ');
                } else {
                    current.push(c);
                }
            }
            _ if depth > 0 => current.push(c),
            _ => core.push(c),
        }
    }
    if depth > 0 {
        groups.push(collapse_whitespace(&current));
    }

    groups.retain(|g| !g.is_empty());
    (collapse_whitespace(&core), groups)
}

/// Remove every parenthetical group from `text`.
pub fn strip_parentheticals(text: &str) -> String {
    extract_parentheticals(text).0
}

fn tokenize_with_quality(core: &str) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut pending: Option<Quality> = None;

    for raw in core.split_whitespace() {
        let mut quality = None;
        if raw.contains('¿') {
            quality = Some(Quality::NoRecord);
        } else if raw.contains('?') {
            quality = Some(Quality::Doubtful);
        }
        let text: String = raw.chars().filter(|c| *c != '?' && *c != '¿').collect();

        if text.is_empty() {
            // A standalone marker qualifies its neighbour.
            match tokens.last_mut() {
                Some(prev) => prev.quality = merge_quality(prev.quality, quality),
                None => pending = merge_quality(pending, quality),
            }
            continue;
        }

        let quality = merge_quality(quality, pending.take());
        tokens.push(Token { text, quality });
    }
    tokens
}

fn join_tokens(tokens: &[Token]) -> QualifiedText {
    if tokens.is_empty() {
        return QualifiedText::default();
    }
    let value = tokens
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let quality = tokens
        .iter()
        .fold(Some(Quality::Clear), |acc, t| merge_quality(acc, t.quality));
    QualifiedText::new(value, quality)
}

/// Consume one surname starting at `start`, never going past `limit`.
///
/// Returns the exclusive end index.
fn take_surname_forward(tokens: &[Token], start: usize, limit: usize) -> usize {
    if start >= limit {
        return start;
    }
    let mut i = start + 1;
    let mut open_joiner: Option<&str> = if is_joiner(&tokens[start].text) {
        Some(tokens[start].text.as_str())
    } else {
        None
    };

    while i < limit {
        if let Some(joiner) = open_joiner {
            if is_de(joiner) && is_article(&tokens[i].text) {
                i += 1;
                if i >= limit {
                    break;
                }
            }
            let complement = tokens[i].text.as_str();
            i += 1;
            open_joiner = if is_joiner(complement) {
                Some(complement)
            } else {
                None
            };
            continue;
        }
        if is_joiner(&tokens[i].text) {
            open_joiner = Some(tokens[i].text.as_str());
            i += 1;
            continue;
        }
        break;
    }
    i
}

/// Consume one surname ending at `end`, never going below `floor`.
///
/// Returns the inclusive start index.
fn take_surname_backward(tokens: &[Token], end: usize, floor: usize) -> usize {
    if end <= floor {
        return end;
    }
    let mut s = end - 1;
    while s > floor {
        let prev = tokens[s - 1].text.as_str();
        if is_article(prev) && s >= floor + 2 && is_de(&tokens[s - 2].text) {
            s -= 2;
        } else if is_conjunction(prev) {
            if s >= floor + 2 {
                s -= 2;
            } else {
                break;
            }
        } else if is_joiner(prev) {
            s -= 1;
        } else {
            break;
        }
    }
    s
}

/// Parse a person fragment.
///
/// ```rust
/// use arxiu_core::names::{parse_person, NameOrder, ParenPolicy};
///
/// let p = parse_person("Puig i Ferrer Joan (pagès) (Valls)", NameOrder::SurnameFirst, ParenPolicy::LastIsMunicipality);
/// assert_eq!(p.given_name.value, "Joan");
/// assert_eq!(p.surname1.value, "Puig i Ferrer");
/// assert_eq!(p.municipality.value, "Valls");
/// assert_eq!(p.notes, "pagès");
/// ```
pub fn parse_person(text: &str, order: NameOrder, policy: ParenPolicy) -> ParsedPerson {
    let (core, groups) = extract_parentheticals(text);
    let tokens = tokenize_with_quality(&core);
    let n = tokens.len();

    let mut parsed = ParsedPerson {
        extras: groups.clone(),
        ..Default::default()
    };

    match order {
        NameOrder::SurnameFirst => {
            // A lone token is a surname; otherwise the last token is always given.
            let s1_limit = if n > 1 { n - 1 } else { n };
            let s1_end = take_surname_forward(&tokens, 0, s1_limit);
            let s2_end = if n.saturating_sub(s1_end) >= 2 {
                take_surname_forward(&tokens, s1_end, n - 1)
            } else {
                s1_end
            };
            parsed.surname1 = join_tokens(&tokens[..s1_end]);
            parsed.surname2 = join_tokens(&tokens[s1_end..s2_end]);
            parsed.given_name = join_tokens(&tokens[s2_end..]);
        }
        NameOrder::GivenFirst => {
            let mut units: Vec<(usize, usize)> = Vec::new();
            let mut end = n;
            while units.len() < 2 && end > 1 {
                let start = take_surname_backward(&tokens, end, 1);
                units.push((start, end));
                end = start;
            }
            parsed.given_name = join_tokens(&tokens[..end]);
            match units.as_slice() {
                [(s, e)] => parsed.surname1 = join_tokens(&tokens[*s..*e]),
                [(s2, e2), (s1, e1)] => {
                    parsed.surname1 = join_tokens(&tokens[*s1..*e1]);
                    parsed.surname2 = join_tokens(&tokens[*s2..*e2]);
                }
                _ => {}
            }
        }
    }

    match policy {
        ParenPolicy::AllNotes => parsed.notes = groups.join("; "),
        ParenPolicy::LastIsMunicipality => {
            if let Some((last, earlier)) = groups.split_last() {
                parsed.municipality = QualifiedText::new(last.clone(), Some(Quality::Clear));
                parsed.notes = earlier.join("; ");
            }
        }
    }

    parsed
}

/// Surname-first parser attaching the last parenthetical to the municipality.
pub fn parse_person_surname_first(text: &str) -> ParsedPerson {
    parse_person(text, NameOrder::SurnameFirst, ParenPolicy::LastIsMunicipality)
}

/// Given-name-first parser attaching the last parenthetical to the municipality.
pub fn parse_person_given_first(text: &str) -> ParsedPerson {
    parse_person(text, NameOrder::GivenFirst, ParenPolicy::LastIsMunicipality)
}

/// Split `text` on the first standalone ` i ` (couple separator).
///
/// Returns `(left, right)`; `right` is empty when there is no separator.
pub fn split_couple(text: &str) -> (String, String) {
    let padded = format!(" {} ", collapse_whitespace(text));
    match padded.find(" i ") {
        Some(pos) => (
            padded[..pos].trim().to_string(),
            padded[pos + 3..].trim().to_string(),
        ),
        None => (padded.trim().to_string(), String::new()),
    }
}

// ─── Marriage order ─────────────────────────────────────────────────

static ORDER_BEFORE_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(?\s*(\d+)\s*(?:r|n|t|er|on|a|è|e)?\.?\s+matrimonis?\s*\)?").unwrap()
});

static ORDER_AFTER_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\(?\s*matrimonis?\s+(\d+)\s*\)?").unwrap());

static ORDER_PAREN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\s*(\d+)\s*\)").unwrap());

static ORDER_ORDINAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+)\s*(?:r|n|t)\b").unwrap());

fn find_marriage_order(text: &str) -> Option<(i64, std::ops::Range<usize>)> {
    for re in [
        &*ORDER_BEFORE_WORD,
        &*ORDER_AFTER_WORD,
        &*ORDER_PAREN,
        &*ORDER_ORDINAL,
    ] {
        if let Some(caps) = re.captures(text) {
            let whole = caps.get(0)?;
            let n = caps.get(1)?.as_str().parse::<i64>().ok()?;
            return Some((n, whole.range()));
        }
    }
    None
}

/// Recognize `(N)`, `Nr`/`Nn`/`Nt`, `matrimoni N` and `N matrimoni`.
pub fn parse_marriage_order(text: &str) -> Option<i64> {
    find_marriage_order(text).map(|(n, _)| n)
}

/// Remove the recognized marriage-order literal and tidy what remains.
pub fn strip_marriage_order_text(text: &str) -> String {
    let Some((_, range)) = find_marriage_order(text) else {
        return collapse_whitespace(text);
    };
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..range.start]);
    out.push(' ');
    out.push_str(&text[range.end..]);
    let out = out.replace("()", " ");
    collapse_whitespace(&out)
        .trim_matches(|c: char| c == ',' || c == ';' || c == ':' || c == '-' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surname_first_with_joiner_and_parentheticals() {
        let p = parse_person_surname_first("Puig i Ferrer Joan (pagès) (Valls)");
        assert_eq!(p.given_name, QualifiedText::new("Joan", Some(Quality::Clear)));
        assert_eq!(p.surname1, QualifiedText::new("Puig i Ferrer", Some(Quality::Clear)));
        assert_eq!(p.surname2, QualifiedText::default());
        assert_eq!(p.notes, "pagès");
        assert_eq!(p.municipality, QualifiedText::new("Valls", Some(Quality::Clear)));
        assert_eq!(p.extras, vec!["pagès", "Valls"]);
    }

    #[test]
    fn test_surname_first_keeps_given_name_after_joiner() {
        let p = parse_person_surname_first("Puig i Joan");
        assert_eq!(p.given_name.value, "Joan");
        assert_eq!(p.surname1.value, "Puig i");
        assert_eq!(p.surname2.value, "");

        let p = parse_person_surname_first("Sala d' Anna");
        assert_eq!(p.given_name.value, "Anna");
        assert_eq!(p.surname1.value, "Sala d'");

        let p = parse_person_surname_first("Puig");
        assert_eq!(p.surname1.value, "Puig");
        assert!(p.given_name.is_empty());
    }

    #[test]
    fn test_surname_first_two_surnames() {
        let p = parse_person_surname_first("Puig Ferrer Joan Maria");
        assert_eq!(p.surname1.value, "Puig");
        assert_eq!(p.surname2.value, "Ferrer");
        assert_eq!(p.given_name.value, "Joan Maria");
    }

    #[test]
    fn test_surname_first_article_after_de() {
        let p = parse_person_surname_first("Puig de la Torre Vila Pere");
        assert_eq!(p.surname1.value, "Puig de la Torre");
        assert_eq!(p.surname2.value, "Vila");
        assert_eq!(p.given_name.value, "Pere");
    }

    #[test]
    fn test_surname_first_apostrophe_joiner() {
        let p = parse_person_surname_first("Sala d' Alòs Anna");
        assert_eq!(p.surname1.value, "Sala d' Alòs");
        assert_eq!(p.given_name.value, "Anna");
    }

    #[test]
    fn test_surname_first_quality_markers() {
        let p = parse_person_surname_first("Puig? Joan");
        assert_eq!(p.surname1, QualifiedText::new("Puig", Some(Quality::Doubtful)));
        assert_eq!(p.given_name, QualifiedText::new("Joan", Some(Quality::Clear)));

        let p = parse_person_surname_first("Puig Ferrer ¿");
        assert_eq!(p.surname1.value, "Puig");
        assert_eq!(p.given_name, QualifiedText::new("Ferrer", Some(Quality::NoRecord)));
    }

    #[test]
    fn test_given_first() {
        let p = parse_person_given_first("Joan Puig i Ferrer (Reus)");
        assert_eq!(p.given_name.value, "Joan");
        assert_eq!(p.surname1.value, "Puig i Ferrer");
        assert_eq!(p.surname2.value, "");
        assert_eq!(p.municipality.value, "Reus");

        let p = parse_person_given_first("Joan Maria Puig Ferrer");
        assert_eq!(p.given_name.value, "Joan Maria");
        assert_eq!(p.surname1.value, "Puig");
        assert_eq!(p.surname2.value, "Ferrer");

        let p = parse_person_given_first("Anna de la Torre");
        assert_eq!(p.given_name.value, "Anna");
        assert_eq!(p.surname1.value, "de la Torre");
    }

    #[test]
    fn test_all_notes_policy() {
        let p = parse_person("Puig Joan (pagès) (Valls)", NameOrder::SurnameFirst, ParenPolicy::AllNotes);
        assert_eq!(p.notes, "pagès; Valls");
        assert!(p.municipality.is_empty());
    }

    #[test]
    fn test_swap_surnames() {
        let mut p = parse_person_surname_first("Puig Ferrer Joan");
        p.swap_surnames();
        assert_eq!(p.surname1.value, "Ferrer");
        assert_eq!(p.surname2.value, "Puig");
    }

    #[test]
    fn test_split_couple() {
        assert_eq!(
            split_couple("Joan Puig i Maria Vila"),
            ("Joan Puig".to_string(), "Maria Vila".to_string())
        );
        assert_eq!(split_couple("Joan Puig"), ("Joan Puig".to_string(), String::new()));
    }

    #[test]
    fn test_marriage_order() {
        assert_eq!(parse_marriage_order("Joan X (2n matrimoni)"), Some(2));
        assert_eq!(strip_marriage_order_text("Joan X (2n matrimoni)"), "Joan X");
        assert_eq!(parse_marriage_order("matrimoni 3"), Some(3));
        assert_eq!(parse_marriage_order("vidu (1)"), Some(1));
        assert_eq!(parse_marriage_order("Pere, 4t"), Some(4));
        assert_eq!(strip_marriage_order_text("Pere, 4t"), "Pere");
        assert_eq!(parse_marriage_order("Pere Vila"), None);
        assert_eq!(strip_marriage_order_text("  Pere  Vila "), "Pere Vila");
    }

    #[test]
    fn test_extract_parentheticals_nested_and_unclosed() {
        let (core, groups) = extract_parentheticals("Puig (fill (2n)) Joan (Valls");
        assert_eq!(core, "Puig Joan");
        assert_eq!(groups, vec!["fill (2n)", "Valls"]);
    }
}
