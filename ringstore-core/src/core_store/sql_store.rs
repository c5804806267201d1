//! SQLite-backed keyring store
//!
//! Tables:
//! - `keyrings`: one row per `(master_key_id, ring_type)` with the encoded blob
//! - `subkeys`: capability and secret availability metadata per subkey
//! - `updated_keys`: keyserver refresh bookkeeping
//!
//! Key ids are stored as the two's complement `i64` of the `u64` id.
//! Uses a connection pool; every multi-row write runs in one transaction.

use super::{KeyringStore, RingFilter, StoreError, StoreResult};
use crate::core_keyring::{
    KeyCapabilities, KeyringRecord, MasterKeyId, RingType, SecretKeyType, SubKeyInfo, UpdatedKey,
};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY,
        applied_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS keyrings (
        master_key_id INTEGER NOT NULL,
        ring_type INTEGER NOT NULL,
        key_ring_data BLOB NOT NULL,
        has_any_secret INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (master_key_id, ring_type)
    );

    CREATE TABLE IF NOT EXISTS subkeys (
        master_key_id INTEGER NOT NULL,
        ring_type INTEGER NOT NULL,
        key_id INTEGER NOT NULL,
        rank INTEGER NOT NULL,
        can_certify INTEGER NOT NULL,
        can_sign INTEGER NOT NULL,
        can_encrypt INTEGER NOT NULL,
        can_authenticate INTEGER NOT NULL,
        secret_type INTEGER NOT NULL,
        PRIMARY KEY (master_key_id, ring_type, key_id)
    );

    CREATE TABLE IF NOT EXISTS updated_keys (
        master_key_id INTEGER PRIMARY KEY,
        last_updated INTEGER,
        seen_on_keyservers INTEGER
    );
"#;

fn to_sql_id(id: u64) -> i64 {
    id as i64
}

fn from_sql_id(id: i64) -> u64 {
    id as u64
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// SQLite keyring store
pub struct SqliteKeyringStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteKeyringStore {
    /// Open (or create) the database at `db_path`
    pub fn open<P: AsRef<Path>>(db_path: P, pool_size: u32) -> StoreResult<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_init(|conn| conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;"));
        Self::with_manager(manager, pool_size)
    }

    /// Private in-memory database; a single pooled connection keeps it alive
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_manager(SqliteConnectionManager::memory(), 1)
    }

    fn with_manager(manager: SqliteConnectionManager, pool_size: u32) -> StoreResult<Self> {
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;
        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;

        let applied: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .optional()?
            .flatten();
        if applied.is_none() {
            conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![CURRENT_SCHEMA_VERSION, current_timestamp()],
            )?;
            debug!(version = CURRENT_SCHEMA_VERSION, "Initialized keyring schema");
        }
        Ok(())
    }

    pub fn schema_version(&self) -> StoreResult<i64> {
        let conn = self.conn()?;
        let version: Option<i64> =
            conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
        Ok(version.unwrap_or(0))
    }

    fn load_subkeys(
        conn: &Connection,
        ring_type: RingType,
        master_key_id: Option<MasterKeyId>,
    ) -> StoreResult<HashMap<MasterKeyId, Vec<SubKeyInfo>>> {
        let mut stmt = conn.prepare(
            "SELECT master_key_id, key_id, rank, can_certify, can_sign, can_encrypt,
                    can_authenticate, secret_type
             FROM subkeys
             WHERE ring_type = ?1 AND (?2 IS NULL OR master_key_id = ?2)
             ORDER BY master_key_id, rank",
        )?;
        let rows = stmt.query_map(
            params![ring_type.code(), master_key_id.map(to_sql_id)],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    KeyCapabilities {
                        certify: row.get(3)?,
                        sign: row.get(4)?,
                        encrypt: row.get(5)?,
                        authenticate: row.get(6)?,
                    },
                    row.get::<_, i64>(7)?,
                ))
            },
        )?;

        let mut out: HashMap<MasterKeyId, Vec<SubKeyInfo>> = HashMap::new();
        for row in rows {
            let (mkid, key_id, rank, capabilities, secret_code) = row?;
            let secret_type = SecretKeyType::from_code(secret_code).ok_or_else(|| {
                StoreError::CorruptedData(format!("unknown secret type {}", secret_code))
            })?;
            out.entry(from_sql_id(mkid)).or_default().push(SubKeyInfo {
                key_id: from_sql_id(key_id),
                rank: rank as u32,
                capabilities,
                secret_type,
            });
        }
        Ok(out)
    }

    fn write_record(tx: &Transaction<'_>, record: &KeyringRecord) -> StoreResult<()> {
        let mkid = to_sql_id(record.master_key_id);
        let ring_type = record.ring_type.code();

        tx.execute(
            r#"
            INSERT INTO keyrings (master_key_id, ring_type, key_ring_data, has_any_secret)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(master_key_id, ring_type) DO UPDATE SET
                key_ring_data = excluded.key_ring_data,
                has_any_secret = excluded.has_any_secret
            "#,
            params![mkid, ring_type, &record.ring_data, record.has_any_secret],
        )?;

        tx.execute(
            "DELETE FROM subkeys WHERE master_key_id = ?1 AND ring_type = ?2",
            params![mkid, ring_type],
        )?;
        for subkey in &record.subkeys {
            tx.execute(
                r#"
                INSERT INTO subkeys (master_key_id, ring_type, key_id, rank, can_certify,
                                     can_sign, can_encrypt, can_authenticate, secret_type)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    mkid,
                    ring_type,
                    to_sql_id(subkey.key_id),
                    subkey.rank as i64,
                    subkey.capabilities.certify,
                    subkey.capabilities.sign,
                    subkey.capabilities.encrypt,
                    subkey.capabilities.authenticate,
                    subkey.secret_type.code(),
                ],
            )?;
        }
        Ok(())
    }
}

impl KeyringStore for SqliteKeyringStore {
    fn query(&self, ring_type: RingType, filter: RingFilter) -> StoreResult<Vec<KeyringRecord>> {
        let conn = self.conn()?;
        let secret_clause = match filter {
            RingFilter::All => "",
            RingFilter::HasAnySecret => " AND has_any_secret = 1",
            RingFilter::NoSecret => " AND has_any_secret = 0",
        };
        let sql = format!(
            "SELECT master_key_id, key_ring_data, has_any_secret FROM keyrings WHERE ring_type = ?1{}",
            secret_clause
        );

        let mut subkeys = Self::load_subkeys(&conn, ring_type, None)?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![ring_type.code()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (mkid, ring_data, has_any_secret) = row?;
            let master_key_id = from_sql_id(mkid);
            records.push(KeyringRecord {
                master_key_id,
                ring_type,
                ring_data,
                has_any_secret,
                subkeys: subkeys.remove(&master_key_id).unwrap_or_default(),
            });
        }
        records.sort_by_key(|r| r.master_key_id);
        Ok(records)
    }

    fn count(&self, ring_type: RingType, filter: RingFilter) -> StoreResult<usize> {
        let conn = self.conn()?;
        let sql = match filter {
            RingFilter::All => "SELECT COUNT(*) FROM keyrings WHERE ring_type = ?1",
            RingFilter::HasAnySecret => {
                "SELECT COUNT(*) FROM keyrings WHERE ring_type = ?1 AND has_any_secret = 1"
            }
            RingFilter::NoSecret => {
                "SELECT COUNT(*) FROM keyrings WHERE ring_type = ?1 AND has_any_secret = 0"
            }
        };
        let count: i64 = conn.query_row(sql, params![ring_type.code()], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn get(
        &self,
        master_key_id: MasterKeyId,
        ring_type: RingType,
    ) -> StoreResult<Option<KeyringRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT key_ring_data, has_any_secret FROM keyrings
                 WHERE master_key_id = ?1 AND ring_type = ?2",
                params![to_sql_id(master_key_id), ring_type.code()],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()?;

        match row {
            Some((ring_data, has_any_secret)) => {
                let mut subkeys = Self::load_subkeys(&conn, ring_type, Some(master_key_id))?;
                Ok(Some(KeyringRecord {
                    master_key_id,
                    ring_type,
                    ring_data,
                    has_any_secret,
                    subkeys: subkeys.remove(&master_key_id).unwrap_or_default(),
                }))
            }
            None => Ok(None),
        }
    }

    fn upsert(&self, record: &KeyringRecord) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existed: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM keyrings WHERE master_key_id = ?1 AND ring_type = ?2",
                params![to_sql_id(record.master_key_id), record.ring_type.code()],
                |row| row.get(0),
            )
            .optional()?;
        Self::write_record(&tx, record)?;
        tx.commit()?;
        Ok(existed.is_none())
    }

    fn bulk_insert(&self, records: &[KeyringRecord]) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for record in records {
            Self::write_record(&tx, record)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn bulk_delete(&self) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM subkeys", [])?;
        tx.execute("DELETE FROM updated_keys", [])?;
        let removed = tx.execute("DELETE FROM keyrings", [])?;
        tx.commit()?;
        Ok(removed)
    }

    fn update_ring_data(
        &self,
        master_key_id: MasterKeyId,
        ring_type: RingType,
        ring_data: &[u8],
    ) -> StoreResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "UPDATE keyrings SET key_ring_data = ?1 WHERE master_key_id = ?2 AND ring_type = ?3",
            params![ring_data, to_sql_id(master_key_id), ring_type.code()],
        )?)
    }

    fn last_updated(&self) -> StoreResult<Vec<UpdatedKey>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT master_key_id, last_updated, seen_on_keyservers FROM updated_keys",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(UpdatedKey {
                master_key_id: from_sql_id(row.get(0)?),
                last_updated: row.get(1)?,
                seen_on_keyservers: row.get(2)?,
            })
        })?;
        let mut entries = rows.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.master_key_id);
        Ok(entries)
    }

    fn set_last_updated(&self, entry: &UpdatedKey) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO updated_keys (master_key_id, last_updated, seen_on_keyservers)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(master_key_id) DO UPDATE SET
                last_updated = excluded.last_updated,
                seen_on_keyservers = excluded.seen_on_keyservers
            "#,
            params![to_sql_id(entry.master_key_id), entry.last_updated, entry.seen_on_keyservers],
        )?;
        Ok(())
    }

    fn restore_last_updated(&self, entries: &[UpdatedKey]) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for entry in entries {
            tx.execute(
                "INSERT OR REPLACE INTO updated_keys (master_key_id, last_updated, seen_on_keyservers)
                 VALUES (?1, ?2, ?3)",
                params![to_sql_id(entry.master_key_id), entry.last_updated, entry.seen_on_keyservers],
            )?;
        }
        tx.commit()?;
        Ok(entries.len())
    }
}
