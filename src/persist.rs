use std::{cell::RefCell, path::Path};

use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use diesel::{
    Connection, SqliteConnection,
    result::{DatabaseErrorKind, Error as DieselError},
};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::{debug, info, warn};

mod handle;
pub mod model;
mod schema;
pub use model::*;

use crate::{
    autosave::{DocVersion, Document, DocumentId, DocumentStore, StoreError},
    config::StoreConfig,
};
use handle::WriteOutcome;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Documents in a local SQLite file, versioned for optimistic concurrency.
pub struct SqliteStore {
    conn: RefCell<SqliteConnection>,
    max_document_bytes: usize,
}

impl SqliteStore {
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("creating data dir {}", parent.display()))?;
        }
        let db_url = path
            .to_str()
            .ok_or_else(|| eyre!("database path {} is not valid UTF-8", path.display()))?;
        Self::establish(db_url, config)
    }

    fn establish(db_url: &str, config: &StoreConfig) -> Result<Self> {
        let mut conn = SqliteConnection::establish(db_url)
            .wrap_err_with(|| format!("connecting to sqlite {db_url}"))?;

        debug!("Running any pending migrations now.");
        match conn.run_pending_migrations(MIGRATIONS) {
            Ok(migrations_run) => {
                for migration in migrations_run {
                    info!("Schema migration run: {}", migration);
                }
            }
            Err(e) => Err(eyre!(e)).wrap_err_with(|| "running sqlite migrations")?,
        }
        Ok(Self {
            conn: RefCell::new(conn),
            max_document_bytes: config.max_document_bytes,
        })
    }

    pub fn list(&self) -> Result<Vec<DocumentListing>> {
        handle::list(&mut self.conn.borrow_mut()).wrap_err("listing documents")
    }
}

impl DocumentStore for SqliteStore {
    async fn fetch(&self, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        let row = handle::fetch(&mut self.conn.borrow_mut(), &id.to_string())
            .map_err(classify)?;
        row.map(Document::try_from)
            .transpose()
            .map_err(|err| StoreError::Rejected(format!("{err:#}")))
    }

    async fn save(
        &self,
        id: &DocumentId,
        content: &str,
        expected: DocVersion,
    ) -> Result<DocVersion, StoreError> {
        if content.len() > self.max_document_bytes {
            return Err(StoreError::Rejected(format!(
                "document is {} bytes, the limit is {}",
                content.len(),
                self.max_document_bytes
            )));
        }
        let expected_column =
            to_column(expected).map_err(|err| StoreError::Rejected(format!("{err:#}")))?;

        let outcome = handle::save_if_version(
            &mut self.conn.borrow_mut(),
            &id.to_string(),
            content,
            expected_column,
        )
        .map_err(classify)?;

        match outcome {
            WriteOutcome::Written { version } => {
                to_version(version).map_err(|err| StoreError::Rejected(format!("{err:#}")))
            }
            WriteOutcome::VersionMismatch { actual } => {
                let actual =
                    to_version(actual).map_err(|err| StoreError::Rejected(format!("{err:#}")))?;
                warn!(%id, %expected, %actual, "Version mismatch on save");
                Err(StoreError::Conflict { expected, actual })
            }
        }
    }
}

fn classify(err: DieselError) -> StoreError {
    match err {
        DieselError::DatabaseError(
            DatabaseErrorKind::CheckViolation | DatabaseErrorKind::NotNullViolation,
            ref info,
        ) => StoreError::Rejected(info.message().to_string()),
        other => StoreError::Transient(format!("database error: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;

    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::establish(":memory:", &StoreConfig::default()).expect("in-memory store")
    }

    #[test]
    fn first_save_inserts_version_one() {
        let store = store();
        let id = DocumentId::new();

        let version = block_on(store.save(&id, "hello", DocVersion::NEW)).expect("save");
        let loaded = block_on(store.fetch(&id)).expect("fetch").expect("document");

        assert_eq!(version, DocVersion::new(1));
        assert_eq!(loaded.content, "hello");
        assert_eq!(loaded.version, DocVersion::new(1));
    }

    #[test]
    fn matching_version_advances_by_one() {
        let store = store();
        let id = DocumentId::new();
        block_on(store.save(&id, "one", DocVersion::NEW)).expect("insert");

        let version = block_on(store.save(&id, "two", DocVersion::new(1))).expect("update");

        assert_eq!(version, DocVersion::new(2));
        let loaded = block_on(store.fetch(&id)).expect("fetch").expect("document");
        assert_eq!(loaded.content, "two");
    }

    #[test]
    fn stale_version_is_a_conflict() {
        let store = store();
        let id = DocumentId::new();
        block_on(store.save(&id, "one", DocVersion::NEW)).expect("insert");
        block_on(store.save(&id, "two", DocVersion::new(1))).expect("other writer");

        let err = block_on(store.save(&id, "mine", DocVersion::new(1))).expect_err("conflict");

        assert_eq!(
            err,
            StoreError::Conflict {
                expected: DocVersion::new(1),
                actual: DocVersion::new(2),
            }
        );
        let loaded = block_on(store.fetch(&id)).expect("fetch").expect("document");
        assert_eq!(loaded.content, "two");
    }

    #[test]
    fn inserting_an_existing_document_is_a_conflict() {
        let store = store();
        let id = DocumentId::new();
        block_on(store.save(&id, "first tab", DocVersion::NEW)).expect("insert");

        let err = block_on(store.save(&id, "second tab", DocVersion::NEW)).expect_err("conflict");

        assert!(matches!(err, StoreError::Conflict { actual, .. } if actual == DocVersion::new(1)));
    }

    #[test]
    fn oversized_content_is_rejected() {
        let store = SqliteStore::establish(
            ":memory:",
            &StoreConfig {
                max_document_bytes: 4,
                ..StoreConfig::default()
            },
        )
        .expect("in-memory store");

        let err = block_on(store.save(&DocumentId::new(), "too long", DocVersion::NEW))
            .expect_err("rejected");

        assert!(!err.is_retryable());
    }

    #[test]
    fn unknown_documents_fetch_as_none() {
        let store = store();
        assert_eq!(block_on(store.fetch(&DocumentId::new())).expect("fetch"), None);
    }

    #[test]
    fn listing_shows_saved_documents() {
        let store = store();
        let id = DocumentId::new();
        block_on(store.save(&id, "listed", DocVersion::NEW)).expect("insert");

        let listed = store.list().expect("list");

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id.to_string());
        assert_eq!(listed[0].version, 1);
    }

    fn database_error(kind: DatabaseErrorKind, message: &str) -> DieselError {
        DieselError::DatabaseError(kind, Box::new(message.to_string()))
    }

    #[test]
    fn constraint_violations_are_rejected() {
        let check = classify(database_error(
            DatabaseErrorKind::CheckViolation,
            "CHECK constraint failed: version > 0",
        ));
        let not_null = classify(database_error(
            DatabaseErrorKind::NotNullViolation,
            "NOT NULL constraint failed: documents.content",
        ));

        assert!(matches!(check, StoreError::Rejected(msg) if msg.starts_with("CHECK constraint")));
        assert!(matches!(not_null, StoreError::Rejected(msg) if msg.contains("NOT NULL")));
    }

    #[test]
    fn other_database_errors_are_transient() {
        let busy = classify(database_error(DatabaseErrorKind::Unknown, "database is locked"));
        let unknown = classify(database_error(DatabaseErrorKind::Unknown, "disk I/O error"));

        assert!(matches!(busy, StoreError::Transient(msg) if msg.contains("database is locked")));
        assert!(matches!(unknown, StoreError::Transient(_)));
        assert!(matches!(classify(DieselError::NotFound), StoreError::Transient(_)));
    }
}
