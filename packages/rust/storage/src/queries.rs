//! Read queries over the derived views.

use civicetl_shared::{CivicError, Result};
use libsql::params;

use crate::Storage;
use crate::views::derived_view_names;

/// Row count of one derived view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewCount {
    pub view: &'static str,
    pub rows: u64,
}

/// A sitting councillor with contact and ward details.
#[derive(Debug, Clone)]
pub struct CouncillorSummary {
    pub contact_slug: String,
    pub contact_name: String,
    pub ward_slug: Option<String>,
    pub ward_name: Option<String>,
    pub ward_id: Option<String>,
    pub term: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Newest-term contact details for one person.
#[derive(Debug, Clone)]
pub struct ContactProfile {
    pub contact_slug: String,
    pub contact_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
}

/// One vote cast by a contact, joined to its motion.
#[derive(Debug, Clone)]
pub struct ContactVote {
    pub agenda_item_number: String,
    pub agenda_item_title: Option<String>,
    pub motion_type: String,
    pub vote_description: String,
    pub date_time: String,
    pub result_kind: String,
    pub value: String,
}

/// A consistent motion on one agenda item.
#[derive(Debug, Clone)]
pub struct MotionSummary {
    pub motion_id: String,
    pub motion_type: String,
    pub vote_description: String,
    pub date_time: String,
    pub committee_slug: String,
    pub result: String,
    pub result_kind: String,
    pub yes_votes: Option<i64>,
    pub no_votes: Option<i64>,
}

fn text(row: &libsql::Row, idx: i32) -> Result<String> {
    row.get::<String>(idx)
        .map_err(|e| CivicError::Storage(e.to_string()))
}

impl Storage {
    /// `SELECT COUNT(*)` on a table this crate owns.
    pub(crate) async fn count_rows(&self, table: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(&format!("SELECT COUNT(*) FROM \"{table}\""), params![])
            .await
            .map_err(|e| CivicError::Storage(format!("counting {table}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row
                .get::<u64>(0)
                .map_err(|e| CivicError::Storage(e.to_string()))?),
            Ok(None) => Ok(0),
            Err(e) => Err(CivicError::Storage(e.to_string())),
        }
    }

    /// Row counts for every derived view, in build order.
    pub async fn view_counts(&self) -> Result<Vec<ViewCount>> {
        let mut counts = Vec::new();
        for view in derived_view_names() {
            counts.push(ViewCount {
                view,
                rows: self.count_rows(view).await?,
            });
        }
        Ok(counts)
    }

    /// Councillors of the latest term, ordered by ward number.
    pub async fn list_councillors(&self) -> Result<Vec<CouncillorSummary>> {
        let mut rows = self
            .conn
            .query(
                r#"SELECT c.contactSlug, ct.contactName, c.wardSlug, w.wardName, w.wardId,
                          c.term, ct.email, ct.phone
                   FROM "Councillors" c
                   JOIN "Contacts" ct ON ct.contactSlug = c.contactSlug
                   LEFT JOIN "Wards" w ON w.wardSlug = c.wardSlug
                   ORDER BY CAST(w.wardId AS INTEGER), c.wardSlug"#,
                params![],
            )
            .await
            .map_err(|e| CivicError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| CivicError::Storage(e.to_string()))?
        {
            results.push(CouncillorSummary {
                contact_slug: text(&row, 0)?,
                contact_name: text(&row, 1)?,
                ward_slug: row.get::<String>(2).ok(),
                ward_name: row.get::<String>(3).ok(),
                ward_id: row.get::<String>(4).ok(),
                term: text(&row, 5)?,
                email: row.get::<String>(6).ok(),
                phone: row.get::<String>(7).ok(),
            });
        }
        Ok(results)
    }

    /// Contact details for `contact_slug`, if known.
    pub async fn get_contact(&self, contact_slug: &str) -> Result<Option<ContactProfile>> {
        let mut rows = self
            .conn
            .query(
                r#"SELECT contactSlug, contactName, email, phone, photoUrl
                   FROM "Contacts" WHERE contactSlug = ?1"#,
                params![contact_slug],
            )
            .await
            .map_err(|e| CivicError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(ContactProfile {
                contact_slug: text(&row, 0)?,
                contact_name: text(&row, 1)?,
                email: row.get::<String>(2).ok(),
                phone: row.get::<String>(3).ok(),
                photo_url: row.get::<String>(4).ok(),
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(CivicError::Storage(e.to_string())),
        }
    }

    /// Every vote cast by `contact_slug`, newest meeting first.
    pub async fn votes_for_contact(&self, contact_slug: &str) -> Result<Vec<ContactVote>> {
        let mut rows = self
            .conn
            .query(
                r#"SELECT v.agendaItemNumber,
                          (SELECT MIN(a.agendaItemTitle) FROM "AgendaItems" a
                           WHERE a.agendaItemNumber = v.agendaItemNumber),
                          m.motionType, m.voteDescription, m.dateTime, m.resultKind, v."value"
                   FROM "Votes" v
                   JOIN "Motions" m ON m.motionId = v.motionId
                   WHERE v.contactSlug = ?1
                   ORDER BY m.dateTime DESC, v.agendaItemNumber"#,
                params![contact_slug],
            )
            .await
            .map_err(|e| CivicError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| CivicError::Storage(e.to_string()))?
        {
            results.push(ContactVote {
                agenda_item_number: text(&row, 0)?,
                agenda_item_title: row.get::<String>(1).ok(),
                motion_type: text(&row, 2)?,
                vote_description: text(&row, 3)?,
                date_time: text(&row, 4)?,
                result_kind: text(&row, 5)?,
                value: text(&row, 6)?,
            });
        }
        Ok(results)
    }

    /// Motions recorded for one agenda item, in meeting order.
    pub async fn list_motions(&self, agenda_item_number: &str) -> Result<Vec<MotionSummary>> {
        let mut rows = self
            .conn
            .query(
                r#"SELECT motionId, motionType, voteDescription, dateTime, committeeSlug,
                          result, resultKind, yesVotes, noVotes
                   FROM "Motions"
                   WHERE agendaItemNumber = ?1
                   ORDER BY dateTime, motionType"#,
                params![agenda_item_number],
            )
            .await
            .map_err(|e| CivicError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| CivicError::Storage(e.to_string()))?
        {
            results.push(MotionSummary {
                motion_id: text(&row, 0)?,
                motion_type: text(&row, 1)?,
                vote_description: text(&row, 2)?,
                date_time: text(&row, 3)?,
                committee_slug: text(&row, 4)?,
                result: text(&row, 5)?,
                result_kind: text(&row, 6)?,
                yes_votes: row.get::<i64>(7).ok(),
                no_votes: row.get::<i64>(8).ok(),
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use crate::staging::tests::{contact, vote};
    use crate::tests::test_storage;

    #[tokio::test]
    async fn councillor_profile_and_votes() {
        let storage = test_storage().await;
        storage
            .load_contacts(&[contact(
                "2022-2026",
                "gord-perks",
                Some(("4", "Parkdale-High Park (4)")),
                1,
            )])
            .await
            .unwrap();

        let mut earlier = vote(1, "2023.CC1.1", "Carried, 20-3", "gord-perks");
        earlier.date_time = "2023-01-10 09:30 AM".into();
        let mut later = vote(2, "2023.CC3.1", "Lost, 5-18", "gord-perks");
        later.vote = "No".into();
        storage.load_votes(&[earlier, later]).await.unwrap();
        storage.derive_views().await.unwrap();

        let profile = storage
            .get_contact("gord-perks")
            .await
            .unwrap()
            .expect("contact exists");
        assert_eq!(profile.email.as_deref(), Some("gord-perks@toronto.ca"));
        assert!(storage.get_contact("nobody").await.unwrap().is_none());

        let votes = storage.votes_for_contact("gord-perks").await.unwrap();
        assert_eq!(votes.len(), 2);
        assert_eq!(votes[0].agenda_item_number, "2023.CC3.1");
        assert_eq!(votes[0].value, "No");
        assert_eq!(votes[0].result_kind, "Lost");
        assert_eq!(votes[0].agenda_item_title.as_deref(), Some("Item 2023.CC3.1"));

        let councillors = storage.list_councillors().await.unwrap();
        assert_eq!(councillors.len(), 1);
        assert_eq!(councillors[0].ward_name.as_deref(), Some("Parkdale-High Park (4)"));
    }

    #[tokio::test]
    async fn view_counts_cover_every_view() {
        let storage = test_storage().await;
        storage
            .load_votes(&[vote(1, "A", "Carried, 1-0", "gord-perks")])
            .await
            .unwrap();
        storage.derive_views().await.unwrap();

        let counts = storage.view_counts().await.unwrap();
        assert_eq!(counts.len(), 8);
        let motions = counts.iter().find(|c| c.view == "Motions").unwrap();
        assert_eq!(motions.rows, 1);
    }
}
