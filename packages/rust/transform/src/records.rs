//! Mapping of validated CSV rows onto canonical staging rows.

use civicetl_shared::{CivicError, RawContactRow, RawVoteRow, Result, Term};
use civicetl_tabular::TabularRow;
use tracing::debug;

use crate::motion::{extract_mover_seconder, motion_identity};
use crate::text::{contact_name, slugify};

/// Columns accepted in the elected-officials contact export.
pub const CONTACT_COLUMNS: &[&str] = &[
    "districtName",
    "districtId",
    "primaryRole",
    "firstName",
    "lastName",
    "email",
    "photoUrl",
    "id",
    "website",
    "addressLine1",
    "addressLine2",
    "locality",
    "postalCode",
    "province",
    "phone",
    "fax",
    "personalWebsite",
];

/// Columns accepted in the council voting-record export.
pub const VOTE_COLUMNS: &[&str] = &[
    "id",
    "term",
    "firstName",
    "lastName",
    "committee",
    "dateTime",
    "agendaItemNumber",
    "agendaItemTitle",
    "motionType",
    "vote",
    "result",
    "voteDescription",
];

/// Build a contact row for `term`.
///
/// Returns `Ok(None)` for vacant offices, i.e. rows whose first or last name
/// is missing from the export.
pub fn contact_row(row: &TabularRow, term: &Term) -> Result<Option<RawContactRow>> {
    let (Some(first), Some(last)) = (row.get("firstName"), row.get("lastName")) else {
        debug!(line = row.line(), "skipping contact row without a full name");
        return Ok(None);
    };

    let name = contact_name(first, last)?;
    let contact_slug = slugify(&name)?;
    let ward_name = row.get_owned("districtName");
    let ward_slug = ward_name.as_deref().map(slugify).transpose()?;

    Ok(Some(RawContactRow {
        term: term.clone(),
        contact_name: name,
        contact_slug,
        primary_role: row.required("primaryRole")?.to_string(),
        ward_id: row.get_owned("districtId"),
        ward_name,
        ward_slug,
        email: row.get_owned("email"),
        photo_url: row.get_owned("photoUrl"),
        website: row.get_owned("website"),
        address_line1: row.get_owned("addressLine1"),
        address_line2: row.get_owned("addressLine2"),
        locality: row.get_owned("locality"),
        postal_code: row.get_owned("postalCode"),
        province: row.get_owned("province"),
        phone: row.get_owned("phone"),
        fax: row.get_owned("fax"),
        personal_website: row.get_owned("personalWebsite"),
        input_row_number: row.get("id").map(|id| parse_row_number(row, id)).transpose()?,
    }))
}

/// Build a vote row. `term` comes from the resource and overrides the
/// row's own `term` column.
pub fn vote_row(row: &TabularRow, term: &Term) -> Result<RawVoteRow> {
    let name = contact_name(
        row.get("firstName").unwrap_or_default(),
        row.get("lastName").unwrap_or_default(),
    )?;
    let contact_slug = slugify(&name)?;

    let committee_name = row.required("committee")?.to_string();
    let committee_slug = slugify(&committee_name)?;

    let agenda_item_number = row.required("agendaItemNumber")?;
    let motion_type = row.required("motionType")?;
    let vote_description = row.required("voteDescription")?;
    let result = row.required("result")?;
    let date_time = row.required("dateTime")?;
    let motion_id = motion_identity(
        agenda_item_number,
        motion_type,
        vote_description,
        result,
        date_time,
    );

    let parsed = extract_mover_seconder(row.required("agendaItemTitle")?)?;

    Ok(RawVoteRow {
        term: term.clone(),
        committee_name,
        committee_slug,
        date_time: date_time.to_string(),
        agenda_item_number: agenda_item_number.to_string(),
        agenda_item_title: parsed.title,
        motion_id,
        motion_type: motion_type.to_string(),
        vote_description: vote_description.to_string(),
        result: result.to_string(),
        vote: row.required("vote")?.to_string(),
        contact_name: name,
        contact_slug,
        moved_by: parsed.moved_by,
        seconded_by: parsed.seconded_by,
        input_row_number: parse_row_number(row, row.required("id")?)?,
    })
}

fn parse_row_number(row: &TabularRow, id: &str) -> Result<i64> {
    id.parse().map_err(|_| {
        CivicError::validation(format!(
            "CSV line {}: id {id:?} is not an integer",
            row.line()
        ))
    })
}
