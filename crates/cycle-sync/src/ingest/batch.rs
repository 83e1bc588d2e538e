//! Multi-row inserts bounded by a bind parameter ceiling
//!
//! A statement carries as many whole rows as fit under the ceiling; rows are
//! never split across statements and keep their input order.

use sqlx::query_builder::Separated;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use thiserror::Error;

/// PostgreSQL accepts at most this many bind parameters per statement.
pub const DEFAULT_MAX_PARAMS_PER_STATEMENT: usize = 65_535;

/// Appended to every insert: existing keys are skipped, not errors.
pub const IGNORE_DUPLICATES: &str = " ON CONFLICT DO NOTHING";

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("a row needs {placeholders} parameters but a statement allows {max_params}")]
    RowTooWide {
        placeholders: usize,
        max_params: usize,
    },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// A value that binds as one row of a multi-row insert.
pub trait InsertRow {
    /// Bind parameters pushed by [`InsertRow::bind`]
    const PLACEHOLDERS: usize;

    fn bind<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>);
}

impl<T: InsertRow> InsertRow for &T {
    const PLACEHOLDERS: usize = T::PLACEHOLDERS;

    fn bind<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>) {
        (**self).bind(row)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPersister {
    max_params: usize,
}

impl Default for BatchPersister {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PARAMS_PER_STATEMENT)
    }
}

impl BatchPersister {
    pub fn new(max_params: usize) -> Self {
        Self { max_params }
    }

    pub fn max_params(&self) -> usize {
        self.max_params
    }

    /// Whole rows of `placeholders` parameters that fit in one statement.
    pub fn rows_per_statement(&self, placeholders: usize) -> Result<usize, BatchError> {
        if placeholders == 0 || placeholders > self.max_params {
            return Err(BatchError::RowTooWide {
                placeholders,
                max_params: self.max_params,
            });
        }
        Ok(self.max_params / placeholders)
    }

    /// Split `rows` into the groups that go into one statement each.
    pub fn chunks<'a, T: InsertRow>(
        &self,
        rows: &'a [T],
    ) -> Result<std::slice::Chunks<'a, T>, BatchError> {
        Ok(rows.chunks(self.rows_per_statement(T::PLACEHOLDERS)?))
    }

    /// Build the insert statements for `rows` without running them.
    ///
    /// `insert_prefix` is everything before `VALUES`, e.g.
    /// `"INSERT INTO package_prop (source, package_id, property, value) "`.
    pub fn statements<'args, T: InsertRow>(
        &self,
        insert_prefix: &str,
        rows: &'args [T],
    ) -> Result<Vec<QueryBuilder<'args, Postgres>>, BatchError> {
        let statements = self
            .chunks(rows)?
            .map(|chunk| {
                let mut builder = QueryBuilder::new(insert_prefix);
                builder.push_values(chunk, |mut row, value| value.bind(&mut row));
                builder.push(IGNORE_DUPLICATES);
                builder
            })
            .collect();
        Ok(statements)
    }

    /// Insert `rows` on `conn`, one statement per chunk. Returns rows inserted.
    pub async fn insert_batch<T: InsertRow + Sync>(
        &self,
        conn: &mut PgConnection,
        insert_prefix: &str,
        rows: &[T],
    ) -> Result<u64, BatchError> {
        let mut inserted = 0;
        for mut statement in self.statements(insert_prefix, rows)? {
            inserted += statement.build().execute(&mut *conn).await?.rows_affected();
        }
        Ok(inserted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    /// Five-column row, matching the netprint insert shape.
    #[derive(Debug, Clone, PartialEq)]
    struct Row(i32, i64, String, i32, i32);

    impl InsertRow for Row {
        const PLACEHOLDERS: usize = 5;

        fn bind<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>) {
            row.push_bind(self.0)
                .push_bind(self.1)
                .push_bind(self.2.as_str())
                .push_bind(self.3)
                .push_bind(self.4);
        }
    }

    const PREFIX: &str = "INSERT INTO t (a, b, c, d, e) ";

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| Row(1, i as i64, format!("np-{}", i), 30, i as i32))
            .collect()
    }

    fn placeholders(sql: &str) -> usize {
        sql.matches('$').count()
    }

    #[test]
    fn test_default_ceiling_single_statement() {
        // 25 arguments
        let data = rows(5);
        let statements = BatchPersister::default().statements(PREFIX, &data).unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(placeholders(statements[0].sql()), 25);
    }

    #[test]
    fn test_default_ceiling_larger_batch() {
        let data = rows(25);
        let statements = BatchPersister::default().statements(PREFIX, &data).unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(placeholders(statements[0].sql()), 125);
    }

    #[test]
    fn test_ceiling_30_gives_two_statements() {
        // 50 arguments, 6 rows per statement
        let data = rows(10);
        let statements = BatchPersister::new(30).statements(PREFIX, &data).unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(placeholders(statements[0].sql()), 30);
        assert_eq!(placeholders(statements[1].sql()), 20);
    }

    #[test]
    fn test_ceiling_10_gives_five_statements() {
        let data = rows(10);
        let statements = BatchPersister::new(10).statements(PREFIX, &data).unwrap();
        assert_eq!(statements.len(), 5);
        assert!(statements.iter().all(|s| placeholders(s.sql()) == 10));
    }

    #[test]
    fn test_ceiling_not_multiple_of_row_never_splits_rows() {
        let persister = BatchPersister::new(12);
        let data = rows(7);
        assert_eq!(persister.rows_per_statement(Row::PLACEHOLDERS).unwrap(), 2);

        let statements = persister.statements(PREFIX, &data).unwrap();
        assert_eq!(statements.len(), 4);
        for statement in &statements {
            let count = placeholders(statement.sql());
            assert!(count <= 12);
            assert_eq!(count % Row::PLACEHOLDERS, 0);
        }
    }

    #[test]
    fn test_chunks_preserve_order() {
        let data = rows(10);
        let persister = BatchPersister::new(30);
        let rejoined: Vec<Row> = persister
            .chunks(&data)
            .unwrap()
            .flat_map(|chunk| chunk.iter().cloned())
            .collect();
        assert_eq!(rejoined, data);
    }

    #[test]
    fn test_statement_shape() {
        let data = rows(2);
        let statements = BatchPersister::default().statements(PREFIX, &data).unwrap();
        let sql = statements[0].sql();
        assert!(sql.starts_with("INSERT INTO t (a, b, c, d, e) VALUES ("));
        assert!(sql.ends_with(" ON CONFLICT DO NOTHING"));
        assert!(sql.contains("$10"));
    }

    #[test]
    fn test_no_rows_no_statements() {
        let data: Vec<Row> = Vec::new();
        let statements = BatchPersister::new(10).statements(PREFIX, &data).unwrap();
        assert!(statements.is_empty());
    }

    #[test]
    fn test_row_wider_than_ceiling() {
        let data = rows(1);
        assert!(matches!(
            BatchPersister::new(4).statements(PREFIX, &data),
            Err(BatchError::RowTooWide {
                placeholders: 5,
                max_params: 4
            })
        ));
    }

    #[test]
    fn test_reference_rows_bind_like_owned() {
        let data = rows(3);
        let refs: Vec<&Row> = data.iter().collect();
        let statements = BatchPersister::new(10).statements(PREFIX, &refs).unwrap();
        assert_eq!(statements.len(), 2);
    }
}
