//! Name, slug and term rules.

use std::sync::LazyLock;

use civicetl_shared::{CivicError, Result, Term};
use regex::Regex;

/// Join trimmed first and last names. Both parts must be non-blank.
pub fn contact_name(first: &str, last: &str) -> Result<String> {
    let (first, last) = (first.trim(), last.trim());
    if first.is_empty() || last.is_empty() {
        return Err(CivicError::IncompleteIdentity {
            name: format!("{first} {last}").trim().to_string(),
        });
    }
    Ok(format!("{first} {last}"))
}

/// Lowercase, hyphen-separated identifier for `text`.
///
/// Common Latin accents are folded to ASCII, apostrophes are dropped, and
/// every other run of whitespace or punctuation becomes a single `-`.
pub fn slugify(text: &str) -> Result<String> {
    if text.trim().is_empty() {
        return Err(CivicError::EmptyInput);
    }

    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.chars().flat_map(char::to_lowercase) {
        if matches!(ch, '\'' | '\u{2019}' | '`') {
            continue;
        }
        let piece = if ch.is_ascii_alphanumeric() {
            Some(Folded::Char(ch))
        } else {
            fold_accent(ch)
                .map(Folded::Str)
                .or_else(|| ch.is_alphanumeric().then_some(Folded::Char(ch)))
        };
        match piece {
            Some(piece) => {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                match piece {
                    Folded::Char(c) => slug.push(c),
                    Folded::Str(s) => slug.push_str(s),
                }
            }
            None => pending_dash = true,
        }
    }

    if slug.is_empty() {
        return Err(CivicError::SlugificationFailure {
            input: text.to_string(),
        });
    }
    Ok(slug)
}

enum Folded {
    Char(char),
    Str(&'static str),
}

fn fold_accent(ch: char) -> Option<&'static str> {
    let folded = match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'æ' => "ae",
        'ç' | 'ć' | 'č' => "c",
        'ď' | 'đ' => "d",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => "e",
        'ğ' => "g",
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'ı' => "i",
        'ł' => "l",
        'ñ' | 'ń' | 'ň' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => "o",
        'œ' => "oe",
        'ř' => "r",
        'ś' | 'š' | 'ş' => "s",
        'ß' => "ss",
        'ť' => "t",
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => "u",
        'ý' | 'ÿ' => "y",
        'ź' | 'ż' | 'ž' => "z",
        _ => return None,
    };
    Some(folded)
}

/// Find the first `YYYY-YYYY` term in a label such as a resource name.
pub fn extract_term(label: &str) -> Result<Term> {
    static TERM_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[0-9]{4}-[0-9]{4}").expect("valid regex"));

    let found = TERM_RE.find(label).ok_or_else(|| CivicError::TermNotFound {
        label: label.to_string(),
    })?;
    Term::try_from(found.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_name_trims_and_joins() {
        assert_eq!(contact_name("  Ana ", " Bailão").unwrap(), "Ana Bailão");
        assert_eq!(
            contact_name("Ana", "Bailão").unwrap(),
            contact_name("\tAna\n", "Bailão  ").unwrap()
        );
    }

    #[test]
    fn contact_name_requires_both_parts() {
        assert!(matches!(
            contact_name("", "Perks"),
            Err(CivicError::IncompleteIdentity { .. })
        ));
        assert!(matches!(
            contact_name("Gord", "   "),
            Err(CivicError::IncompleteIdentity { .. })
        ));
    }

    #[test]
    fn slugify_basic_names() {
        assert_eq!(slugify("Gord Perks").unwrap(), "gord-perks");
        assert_eq!(slugify("  Paula   Fletcher ").unwrap(), "paula-fletcher");
        assert_eq!(slugify("Ana Bailão").unwrap(), "ana-bailao");
        assert_eq!(slugify("Mike Colle-Smith").unwrap(), "mike-colle-smith");
        assert_eq!(slugify("Etobicoke North (1)").unwrap(), "etobicoke-north-1");
        assert_eq!(slugify("Shelley O'Brien").unwrap(), "shelley-obrien");
        assert_eq!(slugify("City Council").unwrap(), "city-council");
    }

    #[test]
    fn slugify_is_deterministic() {
        assert_eq!(
            slugify("Jennifer McKelvie").unwrap(),
            slugify("Jennifer McKelvie").unwrap()
        );
    }

    #[test]
    fn slugify_rejects_blank_and_symbol_only_input() {
        assert!(matches!(slugify(""), Err(CivicError::EmptyInput)));
        assert!(matches!(slugify("   "), Err(CivicError::EmptyInput)));
        assert!(matches!(
            slugify("!!! --- ???"),
            Err(CivicError::SlugificationFailure { .. })
        ));
    }

    #[test]
    fn extract_term_from_label() {
        let term = extract_term("2023 Voting Record (2022-2026)").unwrap();
        assert_eq!(term.as_str(), "2022-2026");
        assert_eq!(
            extract_term("Contact Information 2018-2022.csv").unwrap().as_str(),
            "2018-2022"
        );
    }

    #[test]
    fn extract_term_missing() {
        assert!(matches!(
            extract_term("2023 Voting Record"),
            Err(CivicError::TermNotFound { .. })
        ));
        assert!(matches!(
            extract_term("22-26"),
            Err(CivicError::TermNotFound { .. })
        ));
    }
}
