use std::collections::HashMap;
use std::env;
use std::time::Duration;

use diesel::connection::{AnsiTransactionManager, TransactionManager};
use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager, Pool};
use diesel::sql_types::{BigInt, Bool, Jsonb, Text};
use diesel::{sql_query, QueryableByName, RunQueryDsl};

use crate::engine::value::{Record, Scalar, StoredRecord};
use crate::log_info;
use crate::shared::errors::{ImportError, ImportResult};
use crate::shared::logger::LogContext;
use crate::store::{MergeOp, MergeStore, StateQuery};

pub type DbPool = Pool<ConnectionManager<PgConnection>>;
pub type DbConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Rows per staged INSERT statement.
const LOAD_CHUNK_SIZE: usize = 500;

/// Environment-driven store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_pool_size: u32,
    pub connection_timeout: Duration,
    /// Sequence grouping one merge's staging relations.
    pub run_sequence: String,
}

impl StoreConfig {
    pub fn from_env() -> ImportResult<Self> {
        dotenvy::dotenv().ok();
        let database_url = env::var("DATABASE_URL")?;
        let max_pool_size = env::var("IMPORT_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        Ok(Self {
            database_url,
            max_pool_size,
            connection_timeout: Duration::from_secs(10),
            run_sequence: "merge_run_id_seq".to_string(),
        })
    }
}

pub struct Database {
    pool: DbPool,
    run_sequence: String,
}

impl Database {
    pub fn new(config: &StoreConfig) -> ImportResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(&config.database_url);

        let pool = r2d2::Pool::builder()
            .max_size(config.max_pool_size)
            .connection_timeout(config.connection_timeout)
            .idle_timeout(Some(Duration::from_secs(300)))
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| {
                ImportError::Database(format!("Failed to create connection pool: {}", e))
            })?;

        log_info!(
            "Database connection pool initialized with max_size: {}",
            pool.max_size()
        );

        Ok(Self {
            pool,
            run_sequence: config.run_sequence.clone(),
        })
    }

    pub fn get_connection(&self) -> ImportResult<DbConnection> {
        self.pool.get().map_err(|e| {
            LogContext::error_with_context(&e, "Failed to acquire database connection from pool");
            ImportError::from(e)
        })
    }

    /// One store handle per import job: the connection is checked out here
    /// and returned to the pool when the handle drops, on every exit path.
    pub fn merge_store(&self) -> ImportResult<PgMergeStore> {
        Ok(PgMergeStore::new(
            self.get_connection()?,
            self.run_sequence.clone(),
        ))
    }

}

#[derive(QueryableByName)]
struct SeqValue {
    #[diesel(sql_type = BigInt)]
    value: i64,
}

#[derive(QueryableByName)]
struct MergeCount {
    #[diesel(sql_type = Text)]
    operation: String,
    #[diesel(sql_type = BigInt)]
    row_count: i64,
}

#[derive(QueryableByName)]
struct JsonRow {
    #[diesel(sql_type = Jsonb)]
    doc: serde_json::Value,
}

/// Diesel-backed implementation of the store primitives. Owns one pooled
/// connection for the lifetime of one import job, so all staging and merge
/// work shares that connection's transaction.
pub struct PgMergeStore {
    conn: DbConnection,
    run_sequence: String,
}

impl PgMergeStore {
    pub fn new(conn: DbConnection, run_sequence: String) -> Self {
        Self { conn, run_sequence }
    }

    fn conn(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

impl MergeStore for PgMergeStore {
    fn reserve_sequence_values(
        &mut self,
        schema: &str,
        sequence: &str,
        count: usize,
    ) -> ImportResult<Vec<i64>> {
        let regclass = format!("{}.{}", quote_ident(schema), quote_ident(sequence));
        let sql = format!(
            "SELECT nextval({}) AS value FROM generate_series(1, {})",
            quote_literal(&regclass),
            count
        );
        let values: Vec<SeqValue> = sql_query(sql).load(self.conn())?;
        Ok(values.into_iter().map(|v| v.value).collect())
    }

    fn next_merge_run_id(&mut self) -> ImportResult<i64> {
        let sql = format!(
            "SELECT nextval({}) AS value",
            quote_literal(&self.run_sequence)
        );
        let value: SeqValue = sql_query(sql).get_result(self.conn())?;
        Ok(value.value)
    }

    fn create_staging_relations(
        &mut self,
        schema: &str,
        table: &str,
        run_id: i64,
        ops: &[MergeOp],
        update_columns: &[String],
    ) -> ImportResult<HashMap<MergeOp, String>> {
        let mut relations = HashMap::with_capacity(ops.len());
        for op in ops {
            let name = staging_relation_name(table, *op, run_id);
            let sql = match op {
                MergeOp::Insert => format!(
                    "CREATE TEMPORARY TABLE {} (LIKE {} INCLUDING DEFAULTS) ON COMMIT DROP",
                    quote_ident(&name),
                    qualified(schema, table)
                ),
                MergeOp::Update => {
                    if update_columns.is_empty() {
                        return Err(ImportError::Configuration(format!(
                            "No update columns configured for {}",
                            table
                        )));
                    }
                    format!(
                        "CREATE TEMPORARY TABLE {} ON COMMIT DROP AS SELECT {} FROM {} WHERE false",
                        quote_ident(&name),
                        column_list(update_columns),
                        qualified(schema, table)
                    )
                }
            };
            sql_query(sql).execute(self.conn())?;
            relations.insert(*op, name);
        }
        Ok(relations)
    }

    fn bulk_load(
        &mut self,
        relation: &str,
        columns: &[String],
        rows: &[String],
        delimiter: char,
        null_token: &str,
    ) -> ImportResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let values = staged_values(columns, rows, delimiter, null_token)?;
        let mut loaded = 0u64;
        for chunk in values.chunks(LOAD_CHUNK_SIZE) {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                quote_ident(relation),
                column_list(columns),
                chunk.join(", ")
            );
            loaded += sql_query(sql).execute(self.conn())? as u64;
        }
        Ok(loaded)
    }

    fn merge(
        &mut self,
        schema: &str,
        table: &str,
        run_id: i64,
        dry_run: bool,
    ) -> ImportResult<HashMap<MergeOp, u64>> {
        let sql = format!(
            "SELECT operation, row_count FROM {}.import_merge($1, $2, $3, $4)",
            quote_ident(schema)
        );
        let counts: Vec<MergeCount> = sql_query(sql)
            .bind::<Text, _>(schema)
            .bind::<Text, _>(table)
            .bind::<BigInt, _>(run_id)
            .bind::<Bool, _>(dry_run)
            .load(self.conn())?;

        let mut result = HashMap::with_capacity(counts.len());
        for count in counts {
            let op = match count.operation.as_str() {
                "INSERT" => MergeOp::Insert,
                "UPDATE" => MergeOp::Update,
                other => {
                    return Err(ImportError::Query(format!(
                        "import_merge returned unknown operation '{}'",
                        other
                    )))
                }
            };
            result.insert(op, count.row_count.max(0) as u64);
        }
        Ok(result)
    }

    fn fetch_state(
        &mut self,
        schema: &str,
        table: &str,
        query: &StateQuery,
    ) -> ImportResult<Vec<StoredRecord>> {
        let sql = format!(
            "SELECT to_jsonb(t) AS doc FROM {} t WHERE t.{} = $1",
            qualified(schema, table),
            quote_ident(&query.tenant_column)
        );
        let rows: Vec<JsonRow> = sql_query(sql)
            .bind::<BigInt, _>(query.tenant_id)
            .load(self.conn())?;

        let mut state = Vec::with_capacity(rows.len());
        for row in rows {
            let columns = Record::from_json(row.doc)?;
            let id = columns
                .get(&query.id_column)
                .and_then(Scalar::as_int)
                .ok_or_else(|| {
                    ImportError::Query(format!(
                        "{}.{} row is missing an integer {}",
                        schema, table, query.id_column
                    ))
                })?;
            let natural_key = columns.text(&query.natural_key_column).ok_or_else(|| {
                ImportError::Query(format!(
                    "{}.{} row {} is missing its natural key {}",
                    schema, table, id, query.natural_key_column
                ))
            })?;
            let alive = columns
                .get(&query.alive_column)
                .and_then(Scalar::as_bool)
                .ok_or_else(|| {
                    ImportError::Query(format!(
                        "{}.{} row {} is missing a boolean {}",
                        schema, table, id, query.alive_column
                    ))
                })?;
            state.push(StoredRecord {
                id,
                natural_key,
                alive,
                columns,
            });
        }
        Ok(state)
    }

    fn begin(&mut self) -> ImportResult<()> {
        AnsiTransactionManager::begin_transaction(self.conn())?;
        Ok(())
    }

    fn commit(&mut self) -> ImportResult<()> {
        AnsiTransactionManager::commit_transaction(self.conn())?;
        Ok(())
    }

    fn rollback(&mut self) -> ImportResult<()> {
        AnsiTransactionManager::rollback_transaction(self.conn())?;
        Ok(())
    }
}

fn staging_relation_name(table: &str, op: MergeOp, run_id: i64) -> String {
    let suffix = match op {
        MergeOp::Insert => "ins",
        MergeOp::Update => "upd",
    };
    format!("stg_{}_{}_{}", table, suffix, run_id)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Expand serialized rows into `(v, v, ...)` value groups, mapping the null
/// sentinel to SQL NULL. A row whose field count disagrees with the column
/// list is a protocol violation.
fn staged_values(
    columns: &[String],
    rows: &[String],
    delimiter: char,
    null_token: &str,
) -> ImportResult<Vec<String>> {
    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let parts: Vec<&str> = row.split(delimiter).collect();
        if parts.len() != columns.len() {
            return Err(ImportError::Query(format!(
                "Staged row has {} field(s), expected {}",
                parts.len(),
                columns.len()
            )));
        }
        let rendered: Vec<String> = parts
            .iter()
            .map(|part| {
                if *part == null_token {
                    "NULL".to_string()
                } else {
                    quote_literal(part)
                }
            })
            .collect();
        values.push(format!("({})", rendered.join(", ")));
    }
    Ok(values)
}
