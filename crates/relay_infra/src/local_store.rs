use std::path::PathBuf;

use async_trait::async_trait;
use relay_services::LocalStoreInfra;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Number, Value};

/// Read-only access to the desktop app's SQLite database through rusqlite.
///
/// The database belongs to another program: it is opened read-only per
/// query, never held open, and never written. Rows come back in the shape
/// the `sqlite3 -json` shell would print.
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SqliteStore { path: path.into() }
    }

    fn open(&self) -> rusqlite::Result<Connection> {
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    }
}

#[async_trait]
impl LocalStoreInfra for SqliteStore {
    async fn query(
        &self,
        sql: &str,
        params: Vec<String>,
    ) -> anyhow::Result<Vec<Map<String, Value>>> {
        let path = self.path.clone();
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || {
            let connection = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            let mut statement = connection.prepare(&sql)?;
            let column_names: Vec<String> = statement
                .column_names()
                .into_iter()
                .map(String::from)
                .collect();

            let mut rows = statement.query(rusqlite::params_from_iter(params.iter()))?;
            let mut collected = Vec::new();
            while let Some(row) = rows.next()? {
                let mut object = Map::with_capacity(column_names.len());
                for (index, name) in column_names.iter().enumerate() {
                    object.insert(name.clone(), column_value(row.get_ref(index)?));
                }
                collected.push(object);
            }
            Ok(collected)
        })
        .await?
    }

    fn is_readable(&self) -> bool {
        self.open().is_ok()
    }
}

fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(integer) => Value::Number(integer.into()),
        ValueRef::Real(real) => Number::from_f64(real)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        // The consumed columns never carry blobs; anything else is opaque.
        ValueRef::Blob(_) => Value::Null,
    }
}
