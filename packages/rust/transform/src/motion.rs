//! Motion identity hashing and mover/seconder extraction from item titles.

use std::sync::LazyLock;

use civicetl_shared::Result;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::text::slugify;

/// Stable content hash identifying a motion across imports.
///
/// Each field is length-prefixed before hashing so that moving text between
/// adjacent fields always changes the hash.
pub fn motion_identity(
    agenda_item_number: &str,
    motion_type: &str,
    vote_description: &str,
    result: &str,
    date_time: &str,
) -> String {
    let mut hasher = Sha256::new();
    for field in [agenda_item_number, motion_type, vote_description, result, date_time] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// An agenda item title split from its "- by ..., seconded by ..." suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoverSeconder {
    pub title: String,
    pub moved_by: Option<String>,
    pub seconded_by: Option<Vec<String>>,
}

/// Split a title like `"Item - by Councillor A, seconded by Mayor B"` into
/// the bare title plus mover and seconder slugs.
///
/// Best effort: when the `" - by "` delimiter is absent the whole title is
/// kept and both slots are `None`. A clause naming only an office (e.g.
/// `"Deputy Mayor"`) yields no slug rather than an error.
pub fn extract_mover_seconder(title: &str) -> Result<MoverSeconder> {
    static BY_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i) - by ").expect("valid regex"));
    static SECONDED_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i), seconded by").expect("valid regex"));

    let Some(by) = BY_RE.find(title) else {
        return Ok(MoverSeconder {
            title: title.trim().to_string(),
            moved_by: None,
            seconded_by: None,
        });
    };

    let bare_title = title[..by.start()].trim().to_string();
    let by_line = &title[by.end()..];

    let (mover_clause, seconder_clauses) = match SECONDED_RE.find(by_line) {
        Some(sec) => (&by_line[..sec.start()], Some(&by_line[sec.end()..])),
        None => (by_line, None),
    };

    let moved_by = person_slug(mover_clause)?;
    let seconded_by = match seconder_clauses {
        Some(clauses) => {
            let mut slugs = Vec::new();
            for clause in clauses.split(',') {
                if let Some(slug) = person_slug(clause)? {
                    slugs.push(slug);
                }
            }
            (!slugs.is_empty()).then_some(slugs)
        }
        None => None,
    };

    Ok(MoverSeconder {
        title: bare_title,
        moved_by,
        seconded_by,
    })
}

/// Strip honorifics and commas from a clause and slugify what remains.
fn person_slug(clause: &str) -> Result<Option<String>> {
    static HONORIFIC_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(councillor|mayor|deputy|and)\b").expect("valid regex")
    });

    let cleaned = HONORIFIC_RE.replace_all(clause, "").replace(',', "");
    if cleaned.trim().is_empty() {
        return Ok(None);
    }
    slugify(&cleaned).map(Some)
}
