//! Recipient loading and validation.
//!
//! Turns a header row plus data rows into validated [`Recipient`]s. Logical
//! columns are matched against headers case-insensitively with a small set of
//! synonyms; a missing column fails the whole load before any row is read.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::domain::{is_valid_email, Recipient, RowSkip, SkipReason};

/// Accepted header spellings for each logical column, already lowercased.
const EMAIL_HEADERS: &[&str] = &["email", "e-mail"];
const FIRST_NAME_HEADERS: &[&str] = &["first_name", "firstname", "first name"];
const LAST_NAME_HEADERS: &[&str] = &["last_name", "lastname", "last name"];

/// Required logical columns are absent from the header row.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing required column(s): {} (available: {})", .missing.join(", "), .available.join(", "))]
pub struct SchemaError {
    /// Logical column names with no matching header.
    pub missing: Vec<String>,
    /// The headers that were present.
    pub available: Vec<String>,
}

/// Failure reading tabular input.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("failed to read {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Raw tabular input: a header row and ordered data rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Appends a data row. Short rows read as empty cells.
    pub fn push_row<I, S>(&mut self, row: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(row.into_iter().map(Into::into).collect());
    }

    /// Builder-style [`push_row`](Self::push_row).
    pub fn with_row<I, S>(mut self, row: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_row(row);
        self
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Reads comma-separated input whose first record is the header row.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut reader = csv_builder().from_reader(reader);
        Self::collect(&mut reader)
    }

    /// Reads a CSV file from disk.
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();
        let mut reader = csv_builder()
            .from_path(path)
            .map_err(|source| TableError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let table = Self::collect(&mut reader)?;

        tracing::debug!(
            path = %path.display(),
            rows = table.rows.len(),
            "Loaded recipient table"
        );
        Ok(table)
    }

    fn collect<R: Read>(reader: &mut csv::Reader<R>) -> Result<Self, TableError> {
        let mut table = Self::new(reader.headers()?.iter());
        for record in reader.records() {
            table.push_row(record?.iter());
        }
        Ok(table)
    }
}

fn csv_builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All);
    builder
}

/// Result of a successful load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedRecipients {
    /// Valid recipients in input order.
    pub recipients: Vec<Recipient>,
    /// Rows that did not produce a recipient.
    pub skipped: Vec<RowSkip>,
}

/// Header positions of the three logical columns.
#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    email: usize,
    first_name: usize,
    last_name: usize,
}

impl ColumnMap {
    fn resolve(headers: &[String]) -> Result<Self, SchemaError> {
        let normalized: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let find = |names: &[&str]| normalized.iter().position(|h| names.contains(&h.as_str()));

        let email = find(EMAIL_HEADERS);
        let first_name = find(FIRST_NAME_HEADERS);
        let last_name = find(LAST_NAME_HEADERS);

        match (email, first_name, last_name) {
            (Some(email), Some(first_name), Some(last_name)) => Ok(Self {
                email,
                first_name,
                last_name,
            }),
            _ => {
                let missing = [
                    ("email", email),
                    ("first_name", first_name),
                    ("last_name", last_name),
                ]
                .into_iter()
                .filter(|(_, found)| found.is_none())
                .map(|(name, _)| name.to_string())
                .collect();

                Err(SchemaError {
                    missing,
                    available: headers.to_vec(),
                })
            }
        }
    }

    fn is_logical(&self, index: usize) -> bool {
        index == self.email || index == self.first_name || index == self.last_name
    }
}

/// Loads and validates recipients from `table`.
///
/// # Errors
///
/// Returns [`SchemaError`] when a required column is missing. Individual bad
/// rows are never an error; they are reported in [`LoadedRecipients::skipped`].
pub fn load_recipients(table: &RawTable) -> Result<LoadedRecipients, SchemaError> {
    let columns = ColumnMap::resolve(&table.headers)?;
    let mut loaded = LoadedRecipients::default();

    for (index, row) in table.rows.iter().enumerate() {
        let cell = |i: usize| row.get(i).map(|s| s.trim()).unwrap_or("");
        let row_number = index + 1;

        let email = cell(columns.email);
        if email.is_empty() {
            loaded.skipped.push(RowSkip {
                row: row_number,
                reason: SkipReason::MissingEmail,
            });
            continue;
        }
        if !is_valid_email(email) {
            tracing::debug!(row = row_number, email = %email, "Skipping row with invalid email");
            loaded.skipped.push(RowSkip {
                row: row_number,
                reason: SkipReason::InvalidEmail(email.to_string()),
            });
            continue;
        }

        let extra: BTreeMap<String, String> = table
            .headers
            .iter()
            .enumerate()
            .filter(|(i, header)| !columns.is_logical(*i) && !header.trim().is_empty())
            .map(|(i, header)| (header.trim().to_string(), cell(i).to_string()))
            .collect();

        match Recipient::new(email, cell(columns.first_name), cell(columns.last_name)) {
            Ok(recipient) => loaded.recipients.push(recipient.with_extra(extra)),
            Err(e) => loaded.skipped.push(RowSkip {
                row: row_number,
                reason: SkipReason::InvalidEmail(e.0),
            }),
        }
    }

    tracing::info!(
        recipients = loaded.recipients.len(),
        skipped = loaded.skipped.len(),
        "Recipients loaded"
    );

    Ok(loaded)
}
