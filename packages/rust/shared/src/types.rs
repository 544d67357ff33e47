//! Core domain types shared between ingestion, transformation and staging.

use serde::{Deserialize, Serialize};

use crate::error::{CivicError, Result};

// ---------------------------------------------------------------------------
// Term
// ---------------------------------------------------------------------------

/// A council term, always formatted `YYYY-YYYY`.
///
/// Fixed width, so lexical ordering is chronological ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Term(String);

impl Term {
    /// Borrow the `YYYY-YYYY` text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Term {
    type Error = CivicError;

    fn try_from(value: &str) -> Result<Self> {
        let bytes = value.as_bytes();
        let well_formed = bytes.len() == 9
            && bytes[4] == b'-'
            && bytes[..4].iter().all(u8::is_ascii_digit)
            && bytes[5..].iter().all(u8::is_ascii_digit);
        if !well_formed {
            return Err(CivicError::TermNotFound {
                label: value.to_string(),
            });
        }
        Ok(Self(value.to_string()))
    }
}

impl TryFrom<String> for Term {
    type Error = CivicError;

    fn try_from(value: String) -> Result<Self> {
        Term::try_from(value.as_str())
    }
}

impl From<Term> for String {
    fn from(term: Term) -> Self {
        term.0
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Staging rows
// ---------------------------------------------------------------------------

/// One person in one term, as staged into `RawContacts`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContactRow {
    pub term: Term,
    pub contact_name: String,
    pub contact_slug: String,
    pub primary_role: String,
    pub ward_id: Option<String>,
    pub ward_name: Option<String>,
    pub ward_slug: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
    pub website: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub locality: Option<String>,
    pub postal_code: Option<String>,
    pub province: Option<String>,
    pub phone: Option<String>,
    pub fax: Option<String>,
    pub personal_website: Option<String>,
    /// The source CSV's `id` column.
    pub input_row_number: Option<i64>,
}

/// One voter on one motion, as staged into `RawVotes`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVoteRow {
    pub term: Term,
    pub committee_name: String,
    pub committee_slug: String,
    pub date_time: String,
    pub agenda_item_number: String,
    /// Title with any trailing "- by ..., seconded by ..." clause removed.
    pub agenda_item_title: String,
    /// Content hash, see `civicetl_transform::motion_identity`.
    pub motion_id: String,
    pub motion_type: String,
    pub vote_description: String,
    pub result: String,
    pub vote: String,
    pub contact_name: String,
    pub contact_slug: String,
    pub moved_by: Option<String>,
    pub seconded_by: Option<Vec<String>>,
    pub input_row_number: i64,
}

// ---------------------------------------------------------------------------
// Agenda items (council API)
// ---------------------------------------------------------------------------

/// A JSON scalar the council API sends as either a number or a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextOrNumber {
    Number(i64),
    Decimal(f64),
    Text(String),
}

impl std::fmt::Display for TextOrNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Decimal(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// `null`, a missing field and `null` entries all read as "no ward".
fn nullable_ward_ids<'de, D>(deserializer: D) -> std::result::Result<Vec<TextOrNumber>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let ids: Option<Vec<Option<TextOrNumber>>> = Option::deserialize(deserializer)?;
    Ok(ids.into_iter().flatten().flatten().collect())
}

/// One record from the council agenda-item search API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaItemRecord {
    pub id: TextOrNumber,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub meeting_date: Option<TextOrNumber>,
    #[serde(default)]
    pub agenda_item_title: Option<String>,
    #[serde(default, rename = "wardId", deserialize_with = "nullable_ward_ids")]
    pub ward_ids: Vec<TextOrNumber>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_accepts_fixed_width_years() {
        let term = Term::try_from("2022-2026").expect("valid term");
        assert_eq!(term.as_str(), "2022-2026");
        assert_eq!(term.to_string(), "2022-2026");
    }

    #[test]
    fn term_rejects_other_shapes() {
        for bad in ["2022-26", "2022/2026", " 2022-2026", "abcd-efgh", ""] {
            assert!(Term::try_from(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn terms_order_chronologically() {
        let older = Term::try_from("2014-2018").unwrap();
        let newer = Term::try_from("2022-2026").unwrap();
        assert!(newer > older);
    }

    #[test]
    fn vote_row_serializes_camel_case() {
        let row = RawVoteRow {
            term: Term::try_from("2022-2026").unwrap(),
            committee_name: "City Council".into(),
            committee_slug: "city-council".into(),
            date_time: "2023-02-07 10:15 AM".into(),
            agenda_item_number: "2023.CC3.1".into(),
            agenda_item_title: "Budget".into(),
            motion_id: "abc".into(),
            motion_type: "Adopt Item".into(),
            vote_description: "Majority Required".into(),
            result: "Carried, 20-3".into(),
            vote: "Yes".into(),
            contact_name: "Ana Bailao".into(),
            contact_slug: "ana-bailao".into(),
            moved_by: None,
            seconded_by: Some(vec!["gord-perks".into()]),
            input_row_number: 7,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["term"], "2022-2026");
        assert_eq!(json["agendaItemNumber"], "2023.CC3.1");
        assert!(json["movedBy"].is_null());
        assert_eq!(json["secondedBy"][0], "gord-perks");
        assert_eq!(json["inputRowNumber"], 7);
    }

    #[test]
    fn agenda_item_accepts_mixed_scalars() {
        let json = r#"{
            "id": 12345,
            "reference": "2024.PH15.3",
            "meetingDate": 1727755200000,
            "agendaItemTitle": "Zoning Amendment",
            "wardId": [4, "5"],
            "decisionBody": "ignored"
        }"#;
        let item: AgendaItemRecord = serde_json::from_str(json).unwrap();
        assert_eq!(item.id, TextOrNumber::Number(12345));
        assert_eq!(item.ward_ids.len(), 2);
        assert_eq!(item.ward_ids[1].to_string(), "5");
        assert_eq!(item.meeting_date.unwrap().to_string(), "1727755200000");
    }

    #[test]
    fn agenda_item_tolerates_nulls() {
        let json = r#"{
            "id": "A-1",
            "reference": null,
            "meetingDate": null,
            "agendaItemTitle": "Citywide Item",
            "wardId": null
        }"#;
        let item: AgendaItemRecord = serde_json::from_str(json).unwrap();
        assert!(item.ward_ids.is_empty());
        assert_eq!(item.meeting_date, None);

        let item: AgendaItemRecord =
            serde_json::from_str(r#"{"id": 7, "wardId": [3, null, "4"]}"#).unwrap();
        let wards: Vec<_> = item.ward_ids.iter().map(ToString::to_string).collect();
        assert_eq!(wards, ["3", "4"]);
        assert_eq!(item.agenda_item_title, None);
    }

    #[test]
    fn agenda_item_accepts_fractional_numbers() {
        let item: AgendaItemRecord =
            serde_json::from_str(r#"{"id": 7, "meetingDate": 1727755200000.5}"#).unwrap();
        assert_eq!(
            item.meeting_date,
            Some(TextOrNumber::Decimal(1727755200000.5))
        );
        assert!(item.ward_ids.is_empty());
    }
}
