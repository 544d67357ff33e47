//! Record transformer: pure functions from parsed CSV rows to canonical
//! staging rows.
//!
//! Nothing here performs I/O. Every failure is terminal for the record being
//! processed and the pipeline aborts the whole batch on the first one.

mod motion;
mod records;
mod text;

pub use motion::{MoverSeconder, extract_mover_seconder, motion_identity};
pub use records::{CONTACT_COLUMNS, VOTE_COLUMNS, contact_row, vote_row};
pub use text::{contact_name, extract_term, slugify};
