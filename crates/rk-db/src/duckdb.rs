//! DuckDB database backend implementation

use crate::error::{DbError, DbResult};
use crate::traits::{quote_relation, Database, RelationInfo, RelationKind};
use async_trait::async_trait;
use duckdb::{Connection, InterruptHandle};
use rk_core::Column;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// DuckDB database backend
///
/// Statements run on the blocking thread pool so a slow ingestion never
/// stalls the async runtime. A running statement is cancelled through
/// the interrupt handle, which does not need the connection lock.
pub struct DuckDbBackend {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
}

impl DuckDbBackend {
    /// Create a new in-memory DuckDB connection
    pub fn in_memory() -> DbResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Ok(Self::wrap(conn))
    }

    /// Create a new DuckDB connection from a file path
    pub fn from_path(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| DbError::ConnectionError(format!("{}: {}", path.display(), e)))?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        let interrupt = conn.interrupt_handle();
        Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
        }
    }

    /// Create from path string (handles :memory: special case)
    pub fn new(path: &str) -> DbResult<Self> {
        if path == ":memory:" {
            Self::in_memory()
        } else {
            Self::from_path(Path::new(path))
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Connection) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| DbError::MutexPoisoned(e.to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| DbError::Internal(e.to_string()))?
    }

    async fn execute_owned(&self, sql: String) -> DbResult<usize> {
        log::trace!("duckdb: {}", sql);
        self.with_conn(move |conn| {
            conn.execute(&sql, [])
                .map_err(|e| DbError::classify(format!("{}: {}", e, sql)))
        })
        .await
    }
}

/// Split `schema.table` into parts, defaulting to the `main` schema
fn split_name(name: &str) -> (String, String) {
    match name.rsplit_once('.') {
        Some((schema, table)) => (schema.to_string(), table.to_string()),
        None => ("main".to_string(), name.to_string()),
    }
}

fn parse_table_type(table_type: &str) -> RelationKind {
    if table_type.eq_ignore_ascii_case("VIEW") {
        RelationKind::View
    } else {
        RelationKind::Table
    }
}

#[async_trait]
impl Database for DuckDbBackend {
    async fn execute(&self, sql: &str) -> DbResult<usize> {
        self.execute_owned(sql.to_string()).await
    }

    async fn execute_batch(&self, sql: &str) -> DbResult<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| conn.execute_batch(&sql).map_err(DbError::from))
            .await
    }

    async fn create_table_as(&self, name: &str, select: &str, replace: bool) -> DbResult<()> {
        let sql = if replace {
            format!("CREATE OR REPLACE TABLE {} AS {}", quote_relation(name), select)
        } else {
            format!("CREATE TABLE {} AS {}", quote_relation(name), select)
        };
        self.execute_owned(sql).await?;
        Ok(())
    }

    async fn create_view_as(&self, name: &str, select: &str, replace: bool) -> DbResult<()> {
        let sql = if replace {
            format!("CREATE OR REPLACE VIEW {} AS {}", quote_relation(name), select)
        } else {
            format!("CREATE VIEW {} AS {}", quote_relation(name), select)
        };
        self.execute_owned(sql).await?;
        Ok(())
    }

    async fn relation_kind(&self, name: &str) -> DbResult<Option<RelationKind>> {
        let (schema, table) = split_name(name);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT table_type FROM information_schema.tables \
                 WHERE table_schema = ? AND lower(table_name) = lower(?)",
            )?;
            let mut rows = stmt.query_map(duckdb::params![schema, table], |row| {
                row.get::<_, String>(0)
            })?;
            match rows.next() {
                Some(row) => Ok(Some(parse_table_type(&row?))),
                None => Ok(None),
            }
        })
        .await
    }

    async fn describe(&self, name: &str) -> DbResult<Vec<Column>> {
        let (schema, table) = split_name(name);
        let relation = name.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE table_schema = ? AND lower(table_name) = lower(?) ORDER BY ordinal_position",
            )?;
            let rows = stmt.query_map(duckdb::params![schema, table], |row| {
                Ok(Column::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut columns = Vec::new();
            for row in rows {
                columns.push(row?);
            }
            if columns.is_empty() {
                return Err(DbError::TableNotFound(relation));
            }
            Ok(columns)
        })
        .await
    }

    async fn list_relations(&self) -> DbResult<Vec<RelationInfo>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT table_name, table_type FROM information_schema.tables \
                 WHERE table_schema = 'main' ORDER BY table_name",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut relations = Vec::new();
            for row in rows {
                let (name, table_type) = row?;
                relations.push(RelationInfo {
                    name,
                    kind: parse_table_type(&table_type),
                });
            }
            Ok(relations)
        })
        .await
    }

    async fn rename_relation(&self, from: &str, to: &str) -> DbResult<()> {
        let kind = self
            .relation_kind(from)
            .await?
            .ok_or_else(|| DbError::TableNotFound(from.to_string()))?;
        let (_, target) = split_name(to);
        let sql = format!(
            "ALTER {} {} RENAME TO {}",
            kind.keyword(),
            quote_relation(from),
            quote_relation(&target)
        );
        self.execute_owned(sql).await?;
        Ok(())
    }

    async fn drop_if_exists(&self, name: &str) -> DbResult<()> {
        let Some(kind) = self.relation_kind(name).await? else {
            return Ok(());
        };
        let sql = format!("DROP {} IF EXISTS {}", kind.keyword(), quote_relation(name));
        self.execute_owned(sql).await?;
        Ok(())
    }

    async fn query_count(&self, sql: &str) -> DbResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM ({})", sql);
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }

    async fn query_strings(&self, sql: &str) -> DbResult<Vec<String>> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut values = Vec::new();
            for row in rows {
                values.push(row?);
            }
            Ok(values)
        })
        .await
    }

    fn interrupt(&self) {
        log::debug!("duckdb: interrupting running statement");
        self.interrupt.interrupt();
    }

    fn db_type(&self) -> &'static str {
        "duckdb"
    }
}

#[cfg(test)]
#[path = "duckdb_test.rs"]
mod tests;
