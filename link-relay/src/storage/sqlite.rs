//! SQLite storage backend for heartlink-relay.

use super::{now_millis, PairRecord, PairStore, RequestInsert, ResponseOutcome, StoreCounts};
use crate::error::StorageError;
use async_trait::async_trait;
use link_types::{
    LoveEvent, LoveStats, Pair, PairId, PairRequest, RequestId, RequestStatus, UserId,
    UserSummary,
};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Schema, applied in order on every start. Every statement is idempotent.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BLOB PRIMARY KEY,
        username TEXT NOT NULL UNIQUE COLLATE NOCASE,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pairs (
        id BLOB PRIMARY KEY,
        user1_id BLOB NOT NULL REFERENCES users(id),
        user2_id BLOB NOT NULL REFERENCES users(id),
        created_at INTEGER NOT NULL,
        dissolved_at INTEGER,
        CHECK (user1_id != user2_id)
    )
    "#,
    // One row per currently paired user; the primary key is the
    // one-active-pair-per-user invariant.
    r#"
    CREATE TABLE IF NOT EXISTS pair_members (
        user_id BLOB PRIMARY KEY REFERENCES users(id),
        pair_id BLOB NOT NULL REFERENCES pairs(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pair_requests (
        id BLOB PRIMARY KEY,
        requester_id BLOB NOT NULL REFERENCES users(id),
        requested_id BLOB NOT NULL REFERENCES users(id),
        user_lo BLOB NOT NULL,
        user_hi BLOB NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('pending', 'accepted', 'rejected')),
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        CHECK (requester_id != requested_id)
    )
    "#,
    // At most one pending request per unordered pair of users.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_pair_requests_pending
    ON pair_requests(user_lo, user_hi) WHERE status = 'pending'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS love_events (
        id BLOB PRIMARY KEY,
        pair_id BLOB NOT NULL REFERENCES pairs(id),
        sender_id BLOB NOT NULL REFERENCES users(id),
        duration_seconds INTEGER NOT NULL CHECK (duration_seconds > 0),
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_pair_requests_requested ON pair_requests(requested_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_pairs_user1 ON pairs(user1_id)",
    "CREATE INDEX IF NOT EXISTS idx_pairs_user2 ON pairs(user2_id)",
    "CREATE INDEX IF NOT EXISTS idx_love_events_pair ON love_events(pair_id, created_at)",
];

const REQUEST_SELECT: &str = r#"
    SELECT r.id, r.requester_id, r.requested_id, r.status, r.created_at, r.updated_at,
           u1.username AS requester_name, u1.created_at AS requester_created_at,
           u2.username AS requested_name, u2.created_at AS requested_created_at
    FROM pair_requests r
    JOIN users u1 ON u1.id = r.requester_id
    JOIN users u2 ON u2.id = r.requested_id
"#;

const PAIR_SELECT: &str = r#"
    SELECT p.id, p.user1_id, p.user2_id, p.created_at, p.dissolved_at,
           u1.username AS user1_name, u1.created_at AS user1_created_at,
           u2.username AS user2_name, u2.created_at AS user2_created_at
    FROM pairs p
    JOIN users u1 ON u1.id = p.user1_id
    JOIN users u2 ON u2.id = p.user2_id
"#;

const EVENT_SELECT: &str = r#"
    SELECT e.id, e.pair_id, e.sender_id, e.duration_seconds, e.created_at,
           u.username AS sender_name, u.created_at AS sender_created_at
    FROM love_events e
    JOIN users u ON u.id = e.sender_id
"#;

/// SQLite-based pairing storage.
///
/// Uses WAL mode for concurrent reads/writes. Multi-statement operations run
/// in a transaction whose first statement is a write, so the write lock is
/// taken before anything is read.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("connections", &self.pool.size())
            .finish_non_exhaustive()
    }
}

impl SqliteStorage {
    /// Open (or create) the database at `path`.
    pub async fn new(path: &Path, max_connections: u32) -> Result<Self, StorageError> {
        if path.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath {
                path: path.to_path_buf(),
            });
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        tracing::info!(path = %path.display(), "Opened database");
        Ok(storage)
    }

    /// Close every pooled connection. Later operations fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create an in-memory SQLite storage (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")?.foreign_keys(true);

        // Every connection to :memory: is its own database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PairStore for SqliteStorage {
    async fn create_user(&self, username: &str) -> Result<UserSummary, StorageError> {
        let user = UserSummary {
            id: UserId::new(),
            username: username.to_string(),
            created_at: now_millis(),
        };

        sqlx::query("INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)")
            .bind(user.id.as_bytes().as_slice())
            .bind(&user.username)
            .bind(user.created_at)
            .execute(&self.pool)
            .await?;

        Ok(user)
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserSummary>, StorageError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, created_at FROM users WHERE id = ?1",
        )
        .bind(user_id.as_bytes().as_slice())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserSummary>, StorageError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, created_at FROM users WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn insert_request(
        &self,
        requester: &UserId,
        requested: &UserId,
    ) -> Result<RequestInsert, StorageError> {
        let id = RequestId::new();
        let now = now_millis();
        let (lo, hi) = if requester <= requested {
            (requester, requested)
        } else {
            (requested, requester)
        };

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO pair_requests
                (id, requester_id, requested_id, user_lo, user_hi, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
        )
        .bind(id.as_bytes().as_slice())
        .bind(requester.as_bytes().as_slice())
        .bind(requested.as_bytes().as_slice())
        .bind(lo.as_bytes().as_slice())
        .bind(hi.as_bytes().as_slice())
        .bind(RequestStatus::Pending.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                tx.rollback().await?;
                return Ok(RequestInsert::AlreadyPending);
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(paired) = paired_member(&mut tx, requester, requested).await? {
            tx.rollback().await?;
            return Ok(RequestInsert::AlreadyPaired(paired));
        }

        let request = fetch_request(&mut tx, &id)
            .await?
            .ok_or_else(|| StorageError::Corrupt {
                table: "pair_requests",
                reason: format!("inserted request {id} not readable"),
            })?;

        tx.commit().await?;
        Ok(RequestInsert::Created(request))
    }

    async fn respond_request(
        &self,
        request_id: &RequestId,
        responder: &UserId,
        from: RequestStatus,
        to: RequestStatus,
    ) -> Result<ResponseOutcome, StorageError> {
        if from.respond(to == RequestStatus::Accepted) != Some(to) {
            return Err(StorageError::InvalidTransition { from, to });
        }

        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        // The status check and the change are one statement.
        let changed: Option<(Vec<u8>, Vec<u8>)> = sqlx::query_as(
            r#"
            UPDATE pair_requests
            SET status = ?1, updated_at = ?2
            WHERE id = ?3 AND requested_id = ?4 AND status = ?5
            RETURNING requester_id, requested_id
            "#,
        )
        .bind(to.as_str())
        .bind(now)
        .bind(request_id.as_bytes().as_slice())
        .bind(responder.as_bytes().as_slice())
        .bind(from.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((requester, requested)) = changed else {
            tx.rollback().await?;
            return Ok(ResponseOutcome::Stale);
        };
        if to == RequestStatus::Rejected {
            tx.commit().await?;
            return Ok(ResponseOutcome::Rejected);
        }

        let requester = decode("pair_requests", &requester, UserId::from_bytes)?;
        let requested = decode("pair_requests", &requested, UserId::from_bytes)?;

        if let Some(paired) = paired_member(&mut tx, &requester, &requested).await? {
            tx.rollback().await?;
            return Ok(ResponseOutcome::AlreadyPaired(paired));
        }

        let pair_id = PairId::new();
        sqlx::query("INSERT INTO pairs (id, user1_id, user2_id, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(pair_id.as_bytes().as_slice())
            .bind(requester.as_bytes().as_slice())
            .bind(requested.as_bytes().as_slice())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO pair_members (user_id, pair_id) VALUES (?1, ?3), (?2, ?3)")
            .bind(requester.as_bytes().as_slice())
            .bind(requested.as_bytes().as_slice())
            .bind(pair_id.as_bytes().as_slice())
            .execute(&mut *tx)
            .await?;

        let record = fetch_pair(&mut tx, &pair_id)
            .await?
            .ok_or_else(|| StorageError::Corrupt {
                table: "pairs",
                reason: format!("inserted pair {pair_id} not readable"),
            })?;

        tx.commit().await?;
        Ok(ResponseOutcome::Accepted(record.pair))
    }

    async fn get_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<PairRequest>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        fetch_request(&mut conn, request_id).await
    }

    async fn pending_requests_for(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PairRequest>, StorageError> {
        let sql = format!(
            "{REQUEST_SELECT} WHERE r.requested_id = ?1 AND r.status = ?2 \
             ORDER BY r.created_at DESC, r.rowid DESC"
        );
        let rows = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(user_id.as_bytes().as_slice())
            .bind(RequestStatus::Pending.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn active_pair_for(&self, user_id: &UserId) -> Result<Option<Pair>, StorageError> {
        let sql = format!(
            "{PAIR_SELECT} WHERE p.id = (SELECT pair_id FROM pair_members WHERE user_id = ?1)"
        );
        let row = sqlx::query_as::<_, PairRow>(&sql)
            .bind(user_id.as_bytes().as_slice())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row
            .map(PairRecord::try_from)
            .transpose()?
            .map(|record| record.pair))
    }

    async fn get_pair(&self, pair_id: &PairId) -> Result<Option<PairRecord>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        fetch_pair(&mut conn, pair_id).await
    }

    async fn dissolve_pair(&self, pair_id: &PairId) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await?;

        let result =
            sqlx::query("UPDATE pairs SET dissolved_at = ?2 WHERE id = ?1 AND dissolved_at IS NULL")
                .bind(pair_id.as_bytes().as_slice())
                .bind(now_millis())
                .execute(&mut *tx)
                .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM pair_members WHERE pair_id = ?1")
            .bind(pair_id.as_bytes().as_slice())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn insert_event(
        &self,
        pair_id: &PairId,
        sender: &UserId,
        duration_seconds: u32,
    ) -> Result<LoveEvent, StorageError> {
        let id = link_types::EventId::new();

        sqlx::query(
            r#"
            INSERT INTO love_events (id, pair_id, sender_id, duration_seconds, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(id.as_bytes().as_slice())
        .bind(pair_id.as_bytes().as_slice())
        .bind(sender.as_bytes().as_slice())
        .bind(i64::from(duration_seconds))
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        let sql = format!("{EVENT_SELECT} WHERE e.id = ?1");
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(id.as_bytes().as_slice())
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn history_for(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<LoveEvent>, StorageError> {
        let sql = format!(
            "{EVENT_SELECT} \
             WHERE e.pair_id IN (SELECT id FROM pairs WHERE user1_id = ?1 OR user2_id = ?1) \
             ORDER BY e.created_at DESC, e.rowid DESC \
             LIMIT ?2"
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(user_id.as_bytes().as_slice())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn pair_stats(&self, pair_id: &PairId) -> Result<LoveStats, StorageError> {
        let (total, sum, avg): (i64, i64, f64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(duration_seconds), 0),
                   COALESCE(AVG(duration_seconds), 0.0)
            FROM love_events
            WHERE pair_id = ?1
            "#,
        )
        .bind(pair_id.as_bytes().as_slice())
        .fetch_one(&self.pool)
        .await?;

        Ok(LoveStats {
            total_events: total as u64,
            total_duration_seconds: sum as u64,
            average_duration_seconds: avg,
        })
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts, StorageError> {
        let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        let active_pairs: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pairs WHERE dissolved_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        let love_events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM love_events")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreCounts {
            users: users as u64,
            active_pairs: active_pairs as u64,
            love_events: love_events as u64,
        })
    }
}

/// Return whichever of `first`, `second` is already paired, `first` preferred.
async fn paired_member(
    conn: &mut SqliteConnection,
    first: &UserId,
    second: &UserId,
) -> Result<Option<UserId>, StorageError> {
    let row: Option<Vec<u8>> = sqlx::query_scalar(
        r#"
        SELECT user_id FROM pair_members
        WHERE user_id IN (?1, ?2)
        ORDER BY user_id = ?1 DESC
        LIMIT 1
        "#,
    )
    .bind(first.as_bytes().as_slice())
    .bind(second.as_bytes().as_slice())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|bytes| decode("pair_members", &bytes, UserId::from_bytes))
        .transpose()
}

async fn fetch_request(
    conn: &mut SqliteConnection,
    request_id: &RequestId,
) -> Result<Option<PairRequest>, StorageError> {
    let sql = format!("{REQUEST_SELECT} WHERE r.id = ?1");
    let row = sqlx::query_as::<_, RequestRow>(&sql)
        .bind(request_id.as_bytes().as_slice())
        .fetch_optional(&mut *conn)
        .await?;

    row.map(TryInto::try_into).transpose()
}

async fn fetch_pair(
    conn: &mut SqliteConnection,
    pair_id: &PairId,
) -> Result<Option<PairRecord>, StorageError> {
    let sql = format!("{PAIR_SELECT} WHERE p.id = ?1");
    let row = sqlx::query_as::<_, PairRow>(&sql)
        .bind(pair_id.as_bytes().as_slice())
        .fetch_optional(&mut *conn)
        .await?;

    row.map(TryInto::try_into).transpose()
}

fn decode<T>(
    table: &'static str,
    bytes: &[u8],
    parse: impl Fn(&[u8]) -> Option<T>,
) -> Result<T, StorageError> {
    parse(bytes).ok_or_else(|| StorageError::Corrupt {
        table,
        reason: format!("invalid id of {} bytes", bytes.len()),
    })
}

/// Internal row types for SQLite queries.
#[derive(sqlx::FromRow)]
struct UserRow {
    id: Vec<u8>,
    username: String,
    created_at: i64,
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: Vec<u8>,
    requester_id: Vec<u8>,
    requested_id: Vec<u8>,
    status: String,
    created_at: i64,
    updated_at: i64,
    requester_name: String,
    requester_created_at: i64,
    requested_name: String,
    requested_created_at: i64,
}

#[derive(sqlx::FromRow)]
struct PairRow {
    id: Vec<u8>,
    user1_id: Vec<u8>,
    user2_id: Vec<u8>,
    created_at: i64,
    dissolved_at: Option<i64>,
    user1_name: String,
    user1_created_at: i64,
    user2_name: String,
    user2_created_at: i64,
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Vec<u8>,
    pair_id: Vec<u8>,
    sender_id: Vec<u8>,
    duration_seconds: i64,
    created_at: i64,
    sender_name: String,
    sender_created_at: i64,
}

impl TryFrom<UserRow> for UserSummary {
    type Error = StorageError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(UserSummary {
            id: decode("users", &row.id, UserId::from_bytes)?,
            username: row.username,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<RequestRow> for PairRequest {
    type Error = StorageError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let requester_id = decode("pair_requests", &row.requester_id, UserId::from_bytes)?;
        let requested_id = decode("pair_requests", &row.requested_id, UserId::from_bytes)?;
        let status =
            RequestStatus::from_str(&row.status).map_err(|e| StorageError::Corrupt {
                table: "pair_requests",
                reason: e.to_string(),
            })?;

        Ok(PairRequest {
            id: decode("pair_requests", &row.id, RequestId::from_bytes)?,
            requester_id,
            requested_id,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            requester: Some(UserSummary {
                id: requester_id,
                username: row.requester_name,
                created_at: row.requester_created_at,
            }),
            requested: Some(UserSummary {
                id: requested_id,
                username: row.requested_name,
                created_at: row.requested_created_at,
            }),
        })
    }
}

impl TryFrom<PairRow> for PairRecord {
    type Error = StorageError;

    fn try_from(row: PairRow) -> Result<Self, Self::Error> {
        let user1_id = decode("pairs", &row.user1_id, UserId::from_bytes)?;
        let user2_id = decode("pairs", &row.user2_id, UserId::from_bytes)?;

        Ok(PairRecord {
            pair: Pair {
                id: decode("pairs", &row.id, PairId::from_bytes)?,
                user1_id,
                user2_id,
                user1: Some(UserSummary {
                    id: user1_id,
                    username: row.user1_name,
                    created_at: row.user1_created_at,
                }),
                user2: Some(UserSummary {
                    id: user2_id,
                    username: row.user2_name,
                    created_at: row.user2_created_at,
                }),
                created_at: row.created_at,
            },
            dissolved_at: row.dissolved_at,
        })
    }
}

impl TryFrom<EventRow> for LoveEvent {
    type Error = StorageError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let sender_id = decode("love_events", &row.sender_id, UserId::from_bytes)?;
        let duration_seconds =
            u32::try_from(row.duration_seconds).map_err(|_| StorageError::Corrupt {
                table: "love_events",
                reason: format!("duration out of range: {}", row.duration_seconds),
            })?;

        Ok(LoveEvent {
            id: decode("love_events", &row.id, link_types::EventId::from_bytes)?,
            pair_id: decode("love_events", &row.pair_id, PairId::from_bytes)?,
            sender_id,
            sender: Some(UserSummary {
                id: sender_id,
                username: row.sender_name,
                created_at: row.sender_created_at,
            }),
            duration_seconds,
            created_at: row.created_at,
        })
    }
}
