//! Live structure introspection.

use crate::backend::Backend;
use crate::error::{DbError, ErrorClass};
use converge_schema::LiveTable;

pub use converge_schema::group_index_rows;

/// Read the live columns and index rows of `table`.
///
/// A table that does not exist comes back empty rather than as an error.
pub async fn introspect<B: Backend + ?Sized>(backend: &B, table: &str) -> Result<LiveTable, DbError> {
    let columns = match backend.fetch_columns(table).await {
        Ok(columns) => columns,
        Err(e) if e.class == ErrorClass::NoSuchTable => return Ok(LiveTable::default()),
        Err(e) => return Err(e),
    };
    if columns.is_empty() {
        return Ok(LiveTable::default());
    }

    let indexes = backend.fetch_index_rows(table).await?;
    tracing::trace!(
        table,
        columns = columns.len(),
        index_rows = indexes.len(),
        "introspected"
    );
    Ok(LiveTable { columns, indexes })
}
