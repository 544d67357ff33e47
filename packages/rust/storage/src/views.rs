//! View derivation: rebuild the consumable entity tables from staging.
//!
//! Every derived view is a plain table recreated with `CREATE TABLE .. AS
//! SELECT`. The whole set is rebuilt in one transaction so readers never see
//! a mix of old and new views.

use civicetl_shared::{CivicError, Result};
use tracing::{info, instrument};

use crate::Storage;

/// Newest-term row per contact. Equal terms fall back to source row order.
const CONTACTS_SQL: &str = r#"
CREATE TABLE "Contacts" AS
SELECT contactName, contactSlug, photoUrl, email, phone
FROM (
    SELECT *,
        ROW_NUMBER() OVER (
            PARTITION BY contactSlug
            ORDER BY term DESC, inputRowNumber
        ) AS rowRank
    FROM "RawContacts"
)
WHERE rowRank = 1;
"#;

/// One councillor per ward for the latest term only. Co-representation in a
/// ward collapses to the first row in source order.
const COUNCILLORS_SQL: &str = r#"
CREATE TABLE "Councillors" AS
SELECT contactSlug, wardSlug, term
FROM (
    SELECT contactSlug, wardSlug, term,
        ROW_NUMBER() OVER (
            PARTITION BY term, wardSlug
            ORDER BY inputRowNumber
        ) AS rowRank
    FROM "RawContacts"
    WHERE primaryRole = 'Councillor'
        AND term = (SELECT MAX(term) FROM "RawContacts")
)
WHERE rowRank = 1;
"#;

const WARDS_SQL: &str = r#"
CREATE TABLE "Wards" AS
SELECT DISTINCT wardSlug, wardName, wardId
FROM "RawContacts"
WHERE wardId IS NOT NULL;
"#;

const COMMITTEES_SQL: &str = r#"
CREATE TABLE "Committees" AS
SELECT DISTINCT committeeSlug, committeeName
FROM "RawVotes";
"#;

const AGENDA_ITEMS_SQL: &str = r#"
CREATE TABLE "AgendaItems" AS
SELECT DISTINCT agendaItemNumber, agendaItemTitle
FROM "RawVotes";
"#;

/// Agenda items where one motion was recorded with more than one outcome.
const PROBLEM_AGENDA_ITEMS_SQL: &str = r#"
CREATE TABLE "ProblemAgendaItems" AS
SELECT agendaItemNumber, COUNT(DISTINCT result) AS resultCount
FROM "RawVotes"
GROUP BY agendaItemNumber, motionType, voteDescription, dateTime
HAVING COUNT(DISTINCT result) > 1;
"#;

/// `result` reads like `"Carried, 20-3"`: the kind precedes the first
/// `", "` and the tally after it splits on `-`. A side of the tally that is
/// not a plain number stays NULL, as does a missing tally.
const MOTIONS_SQL: &str = r#"
CREATE TABLE "Motions" AS
SELECT
    agendaItemNumber, motionId, motionType, voteDescription, dateTime,
    committeeSlug, result, resultKind,
    CASE WHEN yesText <> '' AND yesText NOT GLOB '*[^0-9]*'
        THEN CAST(yesText AS INTEGER)
    END AS yesVotes,
    CASE WHEN noText <> '' AND noText NOT GLOB '*[^0-9]*'
        THEN CAST(noText AS INTEGER)
    END AS noVotes
FROM (
    SELECT *,
        CASE WHEN instr(tally, '-') > 0
            THEN trim(substr(tally, 1, instr(tally, '-') - 1))
        END AS yesText,
        CASE WHEN instr(tally, '-') > 0
            THEN trim(substr(tally, instr(tally, '-') + 1))
        END AS noText
    FROM (
        SELECT *,
            CASE WHEN commaAt > 0 THEN substr(result, 1, commaAt - 1) ELSE result END AS resultKind,
            CASE WHEN commaAt > 0 THEN substr(result, commaAt + 2) END AS tally
        FROM (
            SELECT DISTINCT
                agendaItemNumber, motionId, motionType, voteDescription, dateTime,
                committeeSlug, result, instr(result, ', ') AS commaAt
            FROM "RawVotes"
            WHERE agendaItemNumber NOT IN (SELECT agendaItemNumber FROM "ProblemAgendaItems")
        )
    )
);
"#;

const VOTES_SQL: &str = r#"
CREATE TABLE "Votes" AS
SELECT DISTINCT agendaItemNumber, motionId, contactSlug, vote AS "value"
FROM "RawVotes"
WHERE agendaItemNumber NOT IN (SELECT agendaItemNumber FROM "ProblemAgendaItems");
"#;

/// Derived views in build order. Later entries may read earlier ones.
const VIEWS: &[(&str, &str)] = &[
    ("Contacts", CONTACTS_SQL),
    ("Councillors", COUNCILLORS_SQL),
    ("Wards", WARDS_SQL),
    ("Committees", COMMITTEES_SQL),
    ("AgendaItems", AGENDA_ITEMS_SQL),
    ("ProblemAgendaItems", PROBLEM_AGENDA_ITEMS_SQL),
    ("Motions", MOTIONS_SQL),
    ("Votes", VOTES_SQL),
];

/// Names of the derived views, in build order.
pub fn derived_view_names() -> impl Iterator<Item = &'static str> {
    VIEWS.iter().map(|(name, _)| *name)
}

impl Storage {
    /// Drop and rebuild every derived view from the current staging tables.
    #[instrument(skip_all)]
    pub async fn derive_views(&self) -> Result<()> {
        self.check_writable()?;

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| CivicError::Storage(e.to_string()))?;

        let outcome = async {
            for (view, sql) in VIEWS {
                tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{view}\";\n{sql}"))
                    .await
                    .map_err(|e| CivicError::Storage(format!("deriving {view}: {e}")))?;
            }
            Ok::<(), CivicError>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|e| CivicError::Storage(e.to_string()))?;
                info!(views = VIEWS.len(), "derived views rebuilt");
                Ok(())
            }
            Err(e) => {
                tx.rollback()
                    .await
                    .map_err(|re| CivicError::Storage(format!("{e}; rollback failed: {re}")))?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::staging::tests::{contact, vote};
    use crate::tests::test_storage;

    #[tokio::test]
    async fn derive_on_empty_staging() {
        let storage = test_storage().await;
        storage.derive_views().await.expect("derive on empty db");
        for count in storage.view_counts().await.unwrap() {
            assert_eq!(count.rows, 0, "{} should be empty", count.view);
        }
    }

    #[tokio::test]
    async fn conflicting_results_exclude_agenda_item() {
        let storage = test_storage().await;
        storage
            .load_votes(&[
                vote(1, "2023.CC3.1", "Carried, 20-3", "gord-perks"),
                vote(2, "2023.CC3.1", "Lost, 3-20", "ana-bailao"),
                vote(3, "2023.CC3.2", "Carried, 22-1", "gord-perks"),
            ])
            .await
            .unwrap();
        storage.derive_views().await.unwrap();

        assert!(storage.list_motions("2023.CC3.1").await.unwrap().is_empty());
        assert!(
            storage
                .votes_for_contact("ana-bailao")
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(storage.list_motions("2023.CC3.2").await.unwrap().len(), 1);
        assert_eq!(storage.count_rows("ProblemAgendaItems").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn identical_results_yield_one_motion() {
        let storage = test_storage().await;
        storage
            .load_votes(&[
                vote(1, "2023.CC3.1", "Carried, 20-3", "gord-perks"),
                vote(2, "2023.CC3.1", "Carried, 20-3", "ana-bailao"),
            ])
            .await
            .unwrap();
        storage.derive_views().await.unwrap();

        let motions = storage.list_motions("2023.CC3.1").await.unwrap();
        assert_eq!(motions.len(), 1);
        let motion = &motions[0];
        assert_eq!(motion.result_kind, "Carried");
        assert_eq!(motion.yes_votes, Some(20));
        assert_eq!(motion.no_votes, Some(3));
        assert_eq!(storage.count_rows("Votes").await.unwrap(), 2);
        assert_eq!(storage.count_rows("ProblemAgendaItems").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn result_without_tally() {
        let storage = test_storage().await;
        storage
            .load_votes(&[vote(1, "2023.EX1.1", "Carried", "gord-perks")])
            .await
            .unwrap();
        storage.derive_views().await.unwrap();

        let motions = storage.list_motions("2023.EX1.1").await.unwrap();
        assert_eq!(motions[0].result_kind, "Carried");
        assert_eq!(motions[0].yes_votes, None);
        assert_eq!(motions[0].no_votes, None);
    }

    #[tokio::test]
    async fn non_numeric_tally_is_null() {
        let storage = test_storage().await;
        storage
            .load_votes(&[
                vote(1, "2023.EX2.1", "Carried, tie-vote", "gord-perks"),
                vote(2, "2023.EX2.2", "Lost, 12-x", "gord-perks"),
            ])
            .await
            .unwrap();
        storage.derive_views().await.unwrap();

        let tie = &storage.list_motions("2023.EX2.1").await.unwrap()[0];
        assert_eq!(tie.result_kind, "Carried");
        assert_eq!(tie.yes_votes, None);
        assert_eq!(tie.no_votes, None);

        let partial = &storage.list_motions("2023.EX2.2").await.unwrap()[0];
        assert_eq!(partial.yes_votes, Some(12));
        assert_eq!(partial.no_votes, None);
    }

    #[tokio::test]
    async fn contacts_keep_newest_term_and_councillors_latest_term_only() {
        let storage = test_storage().await;
        storage
            .load_contacts(&[
                contact("2018-2022", "gord-perks", Some(("4", "Parkdale-High Park (4)")), 1),
                contact("2018-2022", "ana-bailao", Some(("9", "Davenport (9)")), 2),
                contact("2022-2026", "gord-perks", Some(("4", "Parkdale-High Park (4)")), 1),
                contact("2022-2026", "alejandra-bravo", Some(("9", "Davenport (9)")), 2),
                contact("2022-2026", "olivia-chow", None, 3),
            ])
            .await
            .unwrap();
        storage.derive_views().await.unwrap();

        assert_eq!(storage.count_rows("Contacts").await.unwrap(), 4);
        let councillors = storage.list_councillors().await.unwrap();
        let slugs: Vec<_> = councillors.iter().map(|c| c.contact_slug.as_str()).collect();
        assert_eq!(slugs, ["gord-perks", "alejandra-bravo"]);
        assert!(councillors.iter().all(|c| c.term == "2022-2026"));
        assert_eq!(storage.count_rows("Wards").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn two_councillors_in_one_ward_collapse_to_one() {
        let storage = test_storage().await;
        storage
            .load_contacts(&[
                contact("2022-2026", "first-member", Some(("7", "Humber River-Black Creek (7)")), 1),
                contact("2022-2026", "second-member", Some(("7", "Humber River-Black Creek (7)")), 2),
            ])
            .await
            .unwrap();
        storage.derive_views().await.unwrap();

        let councillors = storage.list_councillors().await.unwrap();
        assert_eq!(councillors.len(), 1);
        assert_eq!(councillors[0].contact_slug, "first-member");
    }

    #[tokio::test]
    async fn rederive_replaces_views() {
        let storage = test_storage().await;
        storage
            .load_votes(&[vote(1, "A", "Carried", "gord-perks")])
            .await
            .unwrap();
        storage.derive_views().await.unwrap();
        storage
            .load_votes(&[vote(1, "B", "Carried", "gord-perks"), vote(2, "C", "Lost", "gord-perks")])
            .await
            .unwrap();
        storage.derive_views().await.unwrap();

        assert_eq!(storage.count_rows("AgendaItems").await.unwrap(), 2);
        assert!(storage.list_motions("A").await.unwrap().is_empty());
    }
}
