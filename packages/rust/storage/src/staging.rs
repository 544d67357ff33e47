//! Staging loader: whole-table replacement of the raw import tables.
//!
//! Each load drops and recreates its table, then inserts every row with a
//! single `INSERT .. SELECT` over `json_each(?1)`. All three steps share one
//! transaction, so a failed load leaves the previous contents in place.

use civicetl_shared::{AgendaItemRecord, CivicError, RawContactRow, RawVoteRow, Result};
use libsql::params;
use serde::Serialize;
use tracing::{info, instrument};

use crate::Storage;

const RAW_CONTACTS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "RawContacts" (
    term            TEXT NOT NULL,
    contactName     TEXT NOT NULL,
    contactSlug     TEXT NOT NULL,
    primaryRole     TEXT NOT NULL,
    wardId          TEXT,
    wardName        TEXT,
    wardSlug        TEXT,
    email           TEXT,
    photoUrl        TEXT,
    website         TEXT,
    addressLine1    TEXT,
    addressLine2    TEXT,
    locality        TEXT,
    postalCode      TEXT,
    province        TEXT,
    phone           TEXT,
    fax             TEXT,
    personalWebsite TEXT,
    inputRowNumber  INTEGER
);
"#;

const RAW_VOTES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "RawVotes" (
    term             TEXT NOT NULL,
    committeeName    TEXT NOT NULL,
    committeeSlug    TEXT NOT NULL,
    dateTime         TEXT NOT NULL,
    agendaItemNumber TEXT NOT NULL,
    agendaItemTitle  TEXT NOT NULL,
    motionId         TEXT NOT NULL,
    motionType       TEXT NOT NULL,
    voteDescription  TEXT NOT NULL,
    result           TEXT NOT NULL,
    vote             TEXT NOT NULL,
    contactName      TEXT NOT NULL,
    contactSlug      TEXT NOT NULL,
    movedBy          TEXT,
    secondedBy       TEXT,
    inputRowNumber   INTEGER NOT NULL
);
"#;

const RAW_AGENDA_ITEMS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "RawAgendaItems" (
    id              TEXT NOT NULL,
    reference       TEXT,
    meetingDate     TEXT,
    agendaItemTitle TEXT,
    wardIds         TEXT NOT NULL
);
"#;

const INSERT_RAW_CONTACTS: &str = r#"
INSERT INTO "RawContacts" (
    term, contactName, contactSlug, primaryRole, wardId, wardName, wardSlug,
    email, photoUrl, website, addressLine1, addressLine2, locality, postalCode,
    province, phone, fax, personalWebsite, inputRowNumber
)
SELECT
    json_extract(value, '$.term'),
    json_extract(value, '$.contactName'),
    json_extract(value, '$.contactSlug'),
    json_extract(value, '$.primaryRole'),
    json_extract(value, '$.wardId'),
    json_extract(value, '$.wardName'),
    json_extract(value, '$.wardSlug'),
    json_extract(value, '$.email'),
    json_extract(value, '$.photoUrl'),
    json_extract(value, '$.website'),
    json_extract(value, '$.addressLine1'),
    json_extract(value, '$.addressLine2'),
    json_extract(value, '$.locality'),
    json_extract(value, '$.postalCode'),
    json_extract(value, '$.province'),
    json_extract(value, '$.phone'),
    json_extract(value, '$.fax'),
    json_extract(value, '$.personalWebsite'),
    json_extract(value, '$.inputRowNumber')
FROM json_each(?1)
"#;

const INSERT_RAW_VOTES: &str = r#"
INSERT INTO "RawVotes" (
    term, committeeName, committeeSlug, dateTime, agendaItemNumber,
    agendaItemTitle, motionId, motionType, voteDescription, result, vote,
    contactName, contactSlug, movedBy, secondedBy, inputRowNumber
)
SELECT
    json_extract(value, '$.term'),
    json_extract(value, '$.committeeName'),
    json_extract(value, '$.committeeSlug'),
    json_extract(value, '$.dateTime'),
    json_extract(value, '$.agendaItemNumber'),
    json_extract(value, '$.agendaItemTitle'),
    json_extract(value, '$.motionId'),
    json_extract(value, '$.motionType'),
    json_extract(value, '$.voteDescription'),
    json_extract(value, '$.result'),
    json_extract(value, '$.vote'),
    json_extract(value, '$.contactName'),
    json_extract(value, '$.contactSlug'),
    json_extract(value, '$.movedBy'),
    json_extract(value, '$.secondedBy'),
    json_extract(value, '$.inputRowNumber')
FROM json_each(?1)
"#;

const INSERT_RAW_AGENDA_ITEMS: &str = r#"
INSERT INTO "RawAgendaItems" (id, reference, meetingDate, agendaItemTitle, wardIds)
SELECT
    json_extract(value, '$.id'),
    json_extract(value, '$.reference'),
    json_extract(value, '$.meetingDate'),
    json_extract(value, '$.agendaItemTitle'),
    json_extract(value, '$.wardIds')
FROM json_each(?1)
"#;

/// Agenda item as staged: every scalar flattened to text.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StagedAgendaItem<'a> {
    id: String,
    reference: Option<&'a str>,
    meeting_date: Option<String>,
    agenda_item_title: Option<&'a str>,
    ward_ids: Vec<String>,
}

impl<'a> From<&'a AgendaItemRecord> for StagedAgendaItem<'a> {
    fn from(item: &'a AgendaItemRecord) -> Self {
        Self {
            id: item.id.to_string(),
            reference: item.reference.as_deref(),
            meeting_date: item.meeting_date.as_ref().map(ToString::to_string),
            agenda_item_title: item.agenda_item_title.as_deref(),
            ward_ids: item.ward_ids.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Reject vote rows whose mover/seconder slots hold blank values.
fn validate_vote_rows(rows: &[RawVoteRow]) -> Result<()> {
    for row in rows {
        if row.moved_by.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(CivicError::InvalidRowShape {
                row: row.input_row_number,
                message: "movedBy must be a non-empty slug or null".into(),
            });
        }
        if let Some(seconders) = &row.seconded_by {
            if seconders.is_empty() || seconders.iter().any(|s| s.trim().is_empty()) {
                return Err(CivicError::InvalidRowShape {
                    row: row.input_row_number,
                    message: "secondedBy must be a list of non-empty slugs or null".into(),
                });
            }
        }
    }
    Ok(())
}

impl Storage {
    /// Create any missing staging table so derivation works on a fresh database.
    pub(crate) async fn ensure_staging_tables(&self) -> Result<()> {
        for ddl in [RAW_CONTACTS_DDL, RAW_VOTES_DDL, RAW_AGENDA_ITEMS_DDL] {
            self.conn
                .execute_batch(ddl)
                .await
                .map_err(|e| CivicError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    /// Replace `RawContacts` with `rows`. Returns the number of rows staged.
    #[instrument(skip_all, fields(rows = rows.len()))]
    pub async fn load_contacts(&self, rows: &[RawContactRow]) -> Result<u64> {
        self.check_writable()?;
        let payload = to_payload(rows)?;
        let staged = self
            .replace_table("RawContacts", RAW_CONTACTS_DDL, INSERT_RAW_CONTACTS, &payload, rows.len())
            .await?;
        info!(rows = staged, "staged contacts");
        Ok(staged)
    }

    /// Replace `RawVotes` with `rows`, validating every row first.
    #[instrument(skip_all, fields(rows = rows.len()))]
    pub async fn load_votes(&self, rows: &[RawVoteRow]) -> Result<u64> {
        self.check_writable()?;
        validate_vote_rows(rows)?;
        let payload = to_payload(rows)?;
        let staged = self
            .replace_table("RawVotes", RAW_VOTES_DDL, INSERT_RAW_VOTES, &payload, rows.len())
            .await?;
        info!(rows = staged, "staged votes");
        Ok(staged)
    }

    /// Replace `RawAgendaItems` with `items`.
    #[instrument(skip_all, fields(rows = items.len()))]
    pub async fn load_agenda_items(&self, items: &[AgendaItemRecord]) -> Result<u64> {
        self.check_writable()?;
        let staged_items: Vec<StagedAgendaItem<'_>> = items.iter().map(Into::into).collect();
        let payload = to_payload(&staged_items)?;
        let staged = self
            .replace_table(
                "RawAgendaItems",
                RAW_AGENDA_ITEMS_DDL,
                INSERT_RAW_AGENDA_ITEMS,
                &payload,
                items.len(),
            )
            .await?;
        info!(rows = staged, "staged agenda items");
        Ok(staged)
    }

    /// Drop, recreate and fill one staging table inside a transaction.
    async fn replace_table(
        &self,
        table: &str,
        ddl: &str,
        insert: &str,
        payload: &str,
        expected: usize,
    ) -> Result<u64> {
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| CivicError::Storage(e.to_string()))?;

        let outcome = async {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\";\n{ddl}"))
                .await
                .map_err(|e| CivicError::Storage(format!("recreating {table}: {e}")))?;
            let inserted = tx
                .execute(insert, params![payload])
                .await
                .map_err(|e| CivicError::Storage(format!("inserting into {table}: {e}")))?;
            if inserted != expected as u64 {
                return Err(CivicError::RowCountMismatch {
                    expected: expected as u64,
                    actual: inserted,
                });
            }
            Ok(inserted)
        }
        .await;

        match outcome {
            Ok(inserted) => {
                tx.commit()
                    .await
                    .map_err(|e| CivicError::Storage(e.to_string()))?;
                Ok(inserted)
            }
            Err(e) => {
                tx.rollback()
                    .await
                    .map_err(|re| CivicError::Storage(format!("{e}; rollback failed: {re}")))?;
                Err(e)
            }
        }
    }

    /// Number of rows currently in a staging table.
    pub async fn staged_count(&self, table: StagingTable) -> Result<u64> {
        self.count_rows(table.name()).await
    }
}

/// The three raw import tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingTable {
    Contacts,
    Votes,
    AgendaItems,
}

impl StagingTable {
    pub fn name(self) -> &'static str {
        match self {
            Self::Contacts => "RawContacts",
            Self::Votes => "RawVotes",
            Self::AgendaItems => "RawAgendaItems",
        }
    }
}

fn to_payload<T: Serialize>(rows: &[T]) -> Result<String> {
    serde_json::to_string(rows)
        .map_err(|e| CivicError::Storage(format!("failed to encode staging rows: {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tests::test_storage;
    use civicetl_shared::{Term, TextOrNumber};

    pub(crate) fn vote(
        input_row_number: i64,
        agenda_item_number: &str,
        result: &str,
        contact_slug: &str,
    ) -> RawVoteRow {
        RawVoteRow {
            term: Term::try_from("2022-2026").unwrap(),
            committee_name: "City Council".into(),
            committee_slug: "city-council".into(),
            date_time: "2023-02-07 10:15 AM".into(),
            agenda_item_number: agenda_item_number.into(),
            agenda_item_title: format!("Item {agenda_item_number}"),
            motion_id: format!("{agenda_item_number}|{result}"),
            motion_type: "Adopt Item".into(),
            vote_description: "Majority Required".into(),
            result: result.into(),
            vote: "Yes".into(),
            contact_name: contact_slug.replace('-', " "),
            contact_slug: contact_slug.into(),
            moved_by: None,
            seconded_by: None,
            input_row_number,
        }
    }

    pub(crate) fn contact(term: &str, slug: &str, ward: Option<(&str, &str)>, row: i64) -> RawContactRow {
        RawContactRow {
            term: Term::try_from(term).unwrap(),
            contact_name: slug.replace('-', " "),
            contact_slug: slug.into(),
            primary_role: (if ward.is_some() { "Councillor" } else { "Mayor" }).into(),
            ward_id: ward.map(|(id, _)| id.to_string()),
            ward_name: ward.map(|(_, name)| name.to_string()),
            ward_slug: ward.map(|(id, _)| format!("ward-{id}")),
            email: Some(format!("{slug}@toronto.ca")),
            photo_url: None,
            website: None,
            address_line1: None,
            address_line2: None,
            locality: Some("Toronto".into()),
            postal_code: None,
            province: Some("ON".into()),
            phone: None,
            fax: None,
            personal_website: None,
            input_row_number: Some(row),
        }
    }

    #[tokio::test]
    async fn load_votes_replaces_previous_contents() {
        let storage = test_storage().await;

        let first = vec![vote(1, "A", "Carried", "gord-perks"), vote(2, "A", "Carried", "ana-bailao")];
        assert_eq!(storage.load_votes(&first).await.unwrap(), 2);

        let second = vec![vote(1, "B", "Lost", "gord-perks")];
        assert_eq!(storage.load_votes(&second).await.unwrap(), 1);
        assert_eq!(storage.staged_count(StagingTable::Votes).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn load_votes_keeps_seconders_as_json_array() {
        let storage = test_storage().await;
        let mut row = vote(1, "A", "Carried", "gord-perks");
        row.moved_by = Some("paula-fletcher".into());
        row.seconded_by = Some(vec!["olivia-chow".into(), "gord-perks".into()]);
        storage.load_votes(&[row]).await.unwrap();

        let mut rows = storage
            .conn
            .query(
                r#"SELECT movedBy, json_array_length(secondedBy), json_extract(secondedBy, '$[1]') FROM "RawVotes""#,
                params![],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().expect("one row");
        assert_eq!(row.get::<String>(0).unwrap(), "paula-fletcher");
        assert_eq!(row.get::<i64>(1).unwrap(), 2);
        assert_eq!(row.get::<String>(2).unwrap(), "gord-perks");
    }

    #[tokio::test]
    async fn invalid_row_shape_fails_before_any_write() {
        let storage = test_storage().await;
        storage
            .load_votes(&[vote(1, "A", "Carried", "gord-perks")])
            .await
            .unwrap();

        let mut bad = vote(9, "B", "Carried", "ana-bailao");
        bad.seconded_by = Some(vec!["olivia-chow".into(), "  ".into()]);
        let rows = vec![vote(8, "B", "Carried", "gord-perks"), bad];

        match storage.load_votes(&rows).await.unwrap_err() {
            CivicError::InvalidRowShape { row, .. } => assert_eq!(row, 9),
            other => panic!("expected InvalidRowShape, got {other:?}"),
        }
        // previous load untouched
        assert_eq!(storage.staged_count(StagingTable::Votes).await.unwrap(), 1);
    }

    #[test]
    fn blank_mover_is_invalid() {
        let mut bad = vote(3, "A", "Carried", "gord-perks");
        bad.moved_by = Some(String::new());
        assert!(matches!(
            validate_vote_rows(&[bad]),
            Err(CivicError::InvalidRowShape { row: 3, .. })
        ));
    }

    #[tokio::test]
    async fn load_contacts_and_empty_batch() {
        let storage = test_storage().await;
        let rows = vec![
            contact("2022-2026", "gord-perks", Some(("4", "Parkdale-High Park (4)")), 1),
            contact("2022-2026", "olivia-chow", None, 2),
        ];
        assert_eq!(storage.load_contacts(&rows).await.unwrap(), 2);
        assert_eq!(storage.load_contacts(&[]).await.unwrap(), 0);
        assert_eq!(storage.staged_count(StagingTable::Contacts).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn load_agenda_items_flattens_scalars() {
        let storage = test_storage().await;
        let items = vec![AgendaItemRecord {
            id: TextOrNumber::Number(12345),
            reference: Some("2024.PH15.3".into()),
            meeting_date: Some(TextOrNumber::Number(1727755200000)),
            agenda_item_title: Some("Zoning Amendment".into()),
            ward_ids: vec![TextOrNumber::Number(4), TextOrNumber::Text("5".into())],
        }];
        assert_eq!(storage.load_agenda_items(&items).await.unwrap(), 1);

        let mut rows = storage
            .conn
            .query(
                r#"SELECT id, meetingDate, wardIds FROM "RawAgendaItems""#,
                params![],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().expect("one row");
        assert_eq!(row.get::<String>(0).unwrap(), "12345");
        assert_eq!(row.get::<String>(1).unwrap(), "1727755200000");
        assert_eq!(row.get::<String>(2).unwrap(), r#"["4","5"]"#);
    }
}
