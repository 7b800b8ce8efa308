/// CSV export of query results.
use crate::error::Result;
use crate::model::Entry;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct CsvRow<'a> {
    path: String,
    name: &'a str,
    size: u64,
    is_directory: bool,
    extension: &'a str,
    modified_time: String,
    size_calculated: bool,
}

impl<'a> From<&'a Entry> for CsvRow<'a> {
    fn from(e: &'a Entry) -> Self {
        Self {
            path: e.key(),
            name: e.name.as_str(),
            size: e.size,
            is_directory: e.is_directory,
            extension: e.extension.as_str(),
            modified_time: e.modified_time.to_rfc3339(),
            size_calculated: e.size_calculated,
        }
    }
}

/// Write one header line and one row per entry. Returns the row count.
pub fn write_csv<'a, W: Write>(
    entries: impl IntoIterator<Item = &'a Entry>,
    writer: W,
) -> Result<usize> {
    let mut csv = csv::Writer::from_writer(writer);
    let mut rows = 0;
    for entry in entries {
        csv.serialize(CsvRow::from(entry))?;
        rows += 1;
    }
    csv.flush().map_err(csv::Error::from)?;
    Ok(rows)
}
