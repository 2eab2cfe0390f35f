use std::str::FromStr;

use color_eyre::{Report, Result, eyre::Context};
use diesel::prelude::*;
use educe::Educe;

use super::schema::*;
use crate::autosave::{DocVersion, Document, DocumentId};

#[derive(Queryable, Selectable, Insertable, Educe, Clone)]
#[educe(Debug)]
#[diesel(table_name = document)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentRow {
    pub id: String,
    #[educe(Debug(ignore))]
    pub content: String,
    pub version: i64,
    pub updated_at: String,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = document)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentListing {
    pub id: String,
    pub version: i64,
    pub updated_at: String,
}

pub fn to_version(raw: i64) -> Result<DocVersion> {
    let number = u64::try_from(raw).wrap_err_with(|| format!("negative version {raw}"))?;
    Ok(DocVersion::new(number))
}

pub fn to_column(version: DocVersion) -> Result<i64> {
    i64::try_from(version.number()).wrap_err_with(|| format!("version {version} out of range"))
}

impl TryFrom<DocumentRow> for Document {
    type Error = Report;

    fn try_from(row: DocumentRow) -> Result<Self> {
        Ok(Self {
            id: DocumentId::from_str(&row.id).wrap_err_with(|| format!("document id {}", row.id))?,
            content: row.content,
            version: to_version(row.version)?,
        })
    }
}
