//! Table definitions that can be created idempotently.
//!
//! A [`Schema`] is an ordered list of tables. [`Schema::create_all`] creates
//! the ones that do not exist yet and leaves the rest alone, so calling it
//! on every startup (or from several threads at once) is safe.

use rusqlite::{Connection, TransactionBehavior};

use crate::DbError;

/// A single table and the DDL that creates it.
///
/// The DDL may be a batch, e.g. a `CREATE TABLE` followed by its indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub ddl: String,
}

/// An ordered set of table definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    tables: Vec<TableDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a table definition.
    pub fn table(mut self, name: impl Into<String>, ddl: impl Into<String>) -> Self {
        self.tables.push(TableDef {
            name: name.into(),
            ddl: ddl.into(),
        });
        self
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    /// Creates every missing table, returning how many were created.
    ///
    /// Runs inside an immediate transaction: a concurrent caller waits for
    /// this one to finish and then finds the tables already present. If any
    /// table fails, nothing is created.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Schema` naming the table whose DDL failed, or
    /// `DbError::Sqlite` if the transaction itself fails.
    pub fn create_all(&self, conn: &mut Connection) -> Result<usize, DbError> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut created = 0;
        for table in &self.tables {
            let exists: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                    [&table.name],
                    |row| row.get(0),
                )
                .map_err(|e| DbError::Schema {
                    table: table.name.clone(),
                    source: e,
                })?;

            if exists {
                continue;
            }

            tx.execute_batch(&table.ddl)
                .map_err(|e| DbError::Schema {
                    table: table.name.clone(),
                    source: e,
                })?;

            tracing::info!(table = %table.name, "created table");
            created += 1;
        }

        tx.commit()?;
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new()
            .table(
                "entity",
                "CREATE TABLE entity (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)",
            )
            .table(
                "tag",
                "CREATE TABLE tag (id INTEGER PRIMARY KEY, label TEXT NOT NULL);
                 CREATE INDEX idx_tag_label ON tag (label);",
            )
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [name],
            |row| row.get(0),
        )
        .expect("should query sqlite_master")
    }

    #[test]
    fn create_all_on_fresh_db() {
        let mut conn = Connection::open_in_memory().expect("should open in-memory db");
        let created = sample().create_all(&mut conn).expect("create_all should succeed");
        assert_eq!(created, 2);
        assert!(table_exists(&conn, "entity"));
        assert!(table_exists(&conn, "tag"));
    }

    #[test]
    fn create_all_idempotent() {
        let mut conn = Connection::open_in_memory().expect("should open in-memory db");
        let schema = sample();

        assert_eq!(schema.create_all(&mut conn).expect("first run"), 2);
        assert_eq!(schema.create_all(&mut conn).expect("second run"), 0);
    }

    #[test]
    fn create_all_skips_existing_tables() {
        let mut conn = Connection::open_in_memory().expect("should open in-memory db");
        conn.execute_batch("CREATE TABLE entity (id INTEGER PRIMARY KEY)")
            .expect("should pre-create entity");

        let created = sample().create_all(&mut conn).expect("create_all should succeed");
        assert_eq!(created, 1, "only the missing table should be created");
    }

    #[test]
    fn failed_table_rolls_back_whole_schema() {
        let mut conn = Connection::open_in_memory().expect("should open in-memory db");
        let schema = Schema::new()
            .table("good", "CREATE TABLE good (id INTEGER PRIMARY KEY)")
            .table("bad", "CREATE TABLE bad (id INTEGER PRIMARY KEY");

        let err = schema
            .create_all(&mut conn)
            .expect_err("malformed DDL should fail");
        match err {
            DbError::Schema { table, .. } => assert_eq!(table, "bad"),
            other => panic!("unexpected error type: {other:?}"),
        }

        assert!(
            !table_exists(&conn, "good"),
            "earlier tables should be rolled back with the failing one"
        );
    }
}
