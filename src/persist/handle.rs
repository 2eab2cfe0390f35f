use diesel::{RunQueryDsl, SqliteConnection, prelude::*, result::Error as DieselError};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::persist::{
    DocumentListing, DocumentRow,
    schema::document::{self, dsl},
};

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum WriteOutcome {
    Written { version: i64 },
    /// The row holds another version (`0` if it does not exist).
    VersionMismatch { actual: i64 },
}

pub(super) fn fetch(conn: &mut SqliteConnection, id: &str) -> QueryResult<Option<DocumentRow>> {
    dsl::document
        .filter(dsl::id.eq(id))
        .select(DocumentRow::as_select())
        .get_result(conn)
        .optional()
}

pub(super) fn list(conn: &mut SqliteConnection) -> QueryResult<Vec<DocumentListing>> {
    dsl::document
        .select(DocumentListing::as_select())
        .order_by(dsl::updated_at.desc())
        .load(conn)
}

/// Writes `content` if the stored version still equals `expected`.
///
/// `expected == 0` means "this document was never stored" and inserts it.
pub(super) fn save_if_version(
    conn: &mut SqliteConnection,
    id: &str,
    content: &str,
    expected: i64,
) -> QueryResult<WriteOutcome> {
    let updated_at = now_rfc3339();
    conn.transaction(|conn| {
        let written = if expected == 0 {
            diesel::insert_into(document::table)
                .values(&DocumentRow {
                    id: id.to_string(),
                    content: content.to_string(),
                    version: 1,
                    updated_at,
                })
                .on_conflict(dsl::id)
                .do_nothing()
                .execute(conn)?
        } else {
            diesel::update(dsl::document.filter(dsl::id.eq(id)).filter(dsl::version.eq(expected)))
                .set((
                    dsl::content.eq(content),
                    dsl::version.eq(dsl::version + 1),
                    dsl::updated_at.eq(updated_at),
                ))
                .execute(conn)?
        };
        if written == 1 {
            return Ok(WriteOutcome::Written {
                version: expected + 1,
            });
        }
        let actual = dsl::document
            .filter(dsl::id.eq(id))
            .select(dsl::version)
            .get_result::<i64>(conn)
            .optional()?
            .unwrap_or(0);
        Ok::<_, DieselError>(WriteOutcome::VersionMismatch { actual })
    })
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::UNIX_EPOCH.to_string())
}
