use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod models;
use models::*;

use crate::bolao::dezena::{self, Dezena};
use crate::bolao::matcher::PoolSummary;
use crate::bolao::tokens;
use crate::error::BolaoError;

/// Thread-safe SQLite handle (single connection with mutex, single writer)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    /// Fresh private database, used by tests
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Make every write to `draws` fail until the trigger is dropped
    #[cfg(test)]
    pub fn reject_draw_writes(&self, reject: bool) -> Result<()> {
        let sql = if reject {
            "CREATE TRIGGER reject_draw_insert BEFORE INSERT ON draws
             BEGIN SELECT RAISE(ABORT, 'draws are read-only'); END;
             CREATE TRIGGER reject_draw_update BEFORE UPDATE ON draws
             BEGIN SELECT RAISE(ABORT, 'draws are read-only'); END;"
        } else {
            "DROP TRIGGER IF EXISTS reject_draw_insert;
             DROP TRIGGER IF EXISTS reject_draw_update;"
        };
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    // ── Pools ─────────────────────────────────────────────────────────────────

    /// Create a pool with a fresh id and edit token
    pub fn create_pool(&self, name: Option<&str>, target_draw: i64) -> Result<Pool> {
        if target_draw <= 0 {
            return Err(BolaoError::InvalidDrawNumber.into());
        }
        let pool = Pool {
            id: tokens::new_pool_id(),
            name: name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            target_draw,
            edit_token: tokens::new_edit_token(),
            created_at: Utc::now(),
        };
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pools (id, name, target_draw, edit_token, created_at)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                pool.id,
                pool.name,
                pool.target_draw,
                pool.edit_token,
                pool.created_at,
            ],
        )?;
        Ok(pool)
    }

    pub fn get_pool(&self, id: &str) -> Result<Option<Pool>> {
        let conn = self.conn()?;
        let pool = conn
            .query_row(
                "SELECT id, name, target_draw, edit_token, created_at
                 FROM pools WHERE id=?1",
                params![id],
                map_pool,
            )
            .optional()?;
        Ok(pool)
    }

    /// Change the concurso a pool is playing; requires the edit token
    pub fn set_target_draw(&self, pool_id: &str, edit_token: &str, target_draw: i64) -> Result<()> {
        if target_draw <= 0 {
            return Err(BolaoError::InvalidDrawNumber.into());
        }
        let conn = self.conn()?;
        require_owner(&conn, pool_id, edit_token)?;
        conn.execute(
            "UPDATE pools SET target_draw=?1 WHERE id=?2",
            params![target_draw, pool_id],
        )?;
        Ok(())
    }

    /// Pools whose target concurso has no stored draw yet
    pub fn list_pools_missing_draw(&self) -> Result<Vec<Pool>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT p.id, p.name, p.target_draw, p.edit_token, p.created_at
             FROM pools p LEFT JOIN draws d ON d.number = p.target_draw
             WHERE d.number IS NULL
             ORDER BY p.target_draw, p.created_at",
        )?;
        let pools = stmt
            .query_map([], map_pool)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pools)
    }

    /// Pools whose target concurso already has a stored draw
    pub fn list_resolved_pools(&self) -> Result<Vec<Pool>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT p.id, p.name, p.target_draw, p.edit_token, p.created_at
             FROM pools p JOIN draws d ON d.number = p.target_draw
             ORDER BY p.target_draw, p.created_at",
        )?;
        let pools = stmt
            .query_map([], map_pool)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pools)
    }

    pub fn list_pools_for_draw(&self, draw_number: i64) -> Result<Vec<Pool>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, target_draw, edit_token, created_at
             FROM pools WHERE target_draw=?1 ORDER BY created_at",
        )?;
        let pools = stmt
            .query_map(params![draw_number], map_pool)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pools)
    }

    /// Resolve the explicit pending/resolved state of a pool
    pub fn pool_draw(&self, pool: &Pool) -> Result<PoolDraw> {
        Ok(match self.get_draw(pool.target_draw)? {
            Some(draw) => PoolDraw::Resolved(draw),
            None => PoolDraw::Pending {
                target: pool.target_draw,
            },
        })
    }

    /// Ranked games, best hit count and achievement for a pool
    pub fn pool_summary(&self, pool_id: &str) -> Result<PoolSummary> {
        let pool = self
            .get_pool(pool_id)?
            .ok_or_else(|| BolaoError::PoolNotFound(pool_id.to_string()))?;
        let state = self.pool_draw(&pool)?;
        let games = self.list_games(&pool.id)?;
        Ok(PoolSummary::build(pool, state, games))
    }

    // ── Games ─────────────────────────────────────────────────────────────────

    /// Validate and append a game to a pool; requires the edit token
    pub fn add_game<S: AsRef<str>>(
        &self,
        pool_id: &str,
        edit_token: &str,
        inputs: &[S],
    ) -> Result<Game> {
        let numbers = dezena::parse_game(inputs)?;
        let conn = self.conn()?;
        require_owner(&conn, pool_id, edit_token)?;
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO games (pool_id, numbers, created_at) VALUES (?1,?2,?3)",
            params![pool_id, dezena::join(&numbers), created_at],
        )?;
        Ok(Game {
            id: conn.last_insert_rowid(),
            pool_id: pool_id.to_string(),
            numbers,
            created_at,
        })
    }

    /// Games of a pool in insertion order
    pub fn list_games(&self, pool_id: &str) -> Result<Vec<Game>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, pool_id, numbers, created_at FROM games
             WHERE pool_id=?1 ORDER BY id",
        )?;
        let games = stmt
            .query_map(params![pool_id], map_game)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(games)
    }

    // ── Draws ─────────────────────────────────────────────────────────────────

    pub fn get_draw(&self, number: i64) -> Result<Option<Draw>> {
        let conn = self.conn()?;
        let draw = conn
            .query_row(
                "SELECT number, numbers, draw_date, updated_at FROM draws WHERE number=?1",
                params![number],
                map_draw,
            )
            .optional()?;
        Ok(draw)
    }

    /// Insert or correct a draw keyed by its number.
    ///
    /// Returns `false` when the stored row already held the same numbers and
    /// date, in which case nothing is written.
    pub fn upsert_draw(&self, draw: &Draw) -> Result<bool> {
        if draw.number <= 0 {
            return Err(BolaoError::InvalidDrawNumber.into());
        }
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT INTO draws (number, numbers, draw_date, updated_at)
             VALUES (?1,?2,?3,?4)
             ON CONFLICT(number) DO UPDATE SET
                numbers=excluded.numbers,
                draw_date=excluded.draw_date,
                updated_at=excluded.updated_at
             WHERE draws.numbers != excluded.numbers
                OR draws.draw_date != excluded.draw_date",
            params![
                draw.number,
                dezena::join(&draw.numbers),
                draw.date,
                draw.updated_at,
            ],
        )?;
        Ok(changed > 0)
    }

    // ── Subscribers ───────────────────────────────────────────────────────────

    /// Subscribe an email to a pool, or reset an existing subscription to
    /// pending with a fresh verification token
    pub fn subscribe(&self, pool_id: &str, email: &str) -> Result<Subscriber> {
        let email = normalize_email(email)?;
        let conn = self.conn()?;
        let exists: Option<String> = conn
            .query_row("SELECT id FROM pools WHERE id=?1", params![pool_id], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(BolaoError::PoolNotFound(pool_id.to_string()).into());
        }
        conn.execute(
            "INSERT INTO subscribers (pool_id, email, status, verify_token, subscribed_at)
             VALUES (?1,?2,'pending',?3,?4)
             ON CONFLICT(pool_id, email) DO UPDATE SET
                status='pending',
                verify_token=excluded.verify_token,
                last_notified_draw=NULL,
                verified_at=NULL,
                subscribed_at=excluded.subscribed_at",
            params![pool_id, email, tokens::new_verify_token(), Utc::now()],
        )?;
        let subscriber = conn.query_row(
            &format!("{SUBSCRIBER_COLUMNS} WHERE pool_id=?1 AND email=?2"),
            params![pool_id, email],
            map_subscriber,
        )?;
        Ok(subscriber)
    }

    /// Consume a verification token, moving its subscriber from pending to
    /// verified
    pub fn verify_subscriber(&self, token: &str) -> Result<Subscriber> {
        let conn = self.conn()?;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM subscribers WHERE verify_token=?1 AND status='pending'",
                params![token],
                |r| r.get(0),
            )
            .optional()?;
        let id = id.ok_or(BolaoError::UnknownVerificationToken)?;
        let updated = conn.execute(
            "UPDATE subscribers SET status='verified', verify_token=NULL, verified_at=?1
             WHERE id=?2 AND status='pending'",
            params![Utc::now(), id],
        )?;
        if updated == 0 {
            return Err(BolaoError::UnknownVerificationToken.into());
        }
        let subscriber = conn.query_row(
            &format!("{SUBSCRIBER_COLUMNS} WHERE id=?1"),
            params![id],
            map_subscriber,
        )?;
        Ok(subscriber)
    }

    pub fn list_subscribers(&self, pool_id: &str) -> Result<Vec<Subscriber>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SUBSCRIBER_COLUMNS} WHERE pool_id=?1 ORDER BY id"
        ))?;
        let subscribers = stmt
            .query_map(params![pool_id], map_subscriber)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(subscribers)
    }

    /// Verified subscribers of a pool not yet notified about `draw_number`
    pub fn list_verified_subscribers_pending_notification(
        &self,
        pool_id: &str,
        draw_number: i64,
    ) -> Result<Vec<Subscriber>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SUBSCRIBER_COLUMNS}
             WHERE pool_id=?1 AND status='verified'
               AND (last_notified_draw IS NULL OR last_notified_draw < ?2)
             ORDER BY id"
        ))?;
        let subscribers = stmt
            .query_map(params![pool_id, draw_number], map_subscriber)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(subscribers)
    }

    /// Record a successful notification; never moves `last_notified_draw`
    /// backwards
    pub fn mark_notified(&self, subscriber_id: i64, draw_number: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE subscribers SET last_notified_draw=?2
             WHERE id=?1 AND (last_notified_draw IS NULL OR last_notified_draw < ?2)",
            params![subscriber_id, draw_number],
        )?;
        Ok(())
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

const SUBSCRIBER_COLUMNS: &str = "SELECT id, pool_id, email, status, verify_token,
        last_notified_draw, subscribed_at, verified_at FROM subscribers";

fn require_owner(conn: &Connection, pool_id: &str, edit_token: &str) -> Result<()> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT edit_token FROM pools WHERE id=?1",
            params![pool_id],
            |r| r.get(0),
        )
        .optional()?;
    match stored {
        None => Err(BolaoError::PoolNotFound(pool_id.to_string()).into()),
        Some(token) if token != edit_token => {
            Err(BolaoError::WrongEditToken(pool_id.to_string()).into())
        }
        Some(_) => Ok(()),
    }
}

fn normalize_email(raw: &str) -> Result<String, BolaoError> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(BolaoError::InvalidEmail(raw.to_string()))
    }
}

fn dezenas_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Vec<Dezena>> {
    let stored: String = row.get(idx)?;
    dezena::split(&stored)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_pool(row: &rusqlite::Row) -> rusqlite::Result<Pool> {
    Ok(Pool {
        id: row.get(0)?,
        name: row.get(1)?,
        target_draw: row.get(2)?,
        edit_token: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_game(row: &rusqlite::Row) -> rusqlite::Result<Game> {
    Ok(Game {
        id: row.get(0)?,
        pool_id: row.get(1)?,
        numbers: dezenas_column(row, 2)?,
        created_at: row.get(3)?,
    })
}

fn map_draw(row: &rusqlite::Row) -> rusqlite::Result<Draw> {
    Ok(Draw {
        number: row.get(0)?,
        numbers: dezenas_column(row, 1)?,
        date: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

fn map_subscriber(row: &rusqlite::Row) -> rusqlite::Result<Subscriber> {
    let status: String = row.get(3)?;
    let status = SubscriberStatus::from_db(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown subscriber status '{status}'").into(),
        )
    })?;
    Ok(Subscriber {
        id: row.get(0)?,
        pool_id: row.get(1)?,
        email: row.get(2)?,
        status,
        verify_token: row.get(4)?,
        last_notified_draw: row.get(5)?,
        subscribed_at: row.get(6)?,
        verified_at: row.get(7)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS pools (
    id          TEXT    PRIMARY KEY,
    name        TEXT,
    target_draw INTEGER NOT NULL,
    edit_token  TEXT    NOT NULL,
    created_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS games (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    pool_id     TEXT    NOT NULL,
    numbers     TEXT    NOT NULL,
    created_at  TEXT    NOT NULL,
    FOREIGN KEY (pool_id) REFERENCES pools(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS draws (
    number      INTEGER PRIMARY KEY,
    numbers     TEXT    NOT NULL,
    draw_date   TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS subscribers (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    pool_id            TEXT    NOT NULL,
    email              TEXT    NOT NULL,
    status             TEXT    NOT NULL DEFAULT 'pending',
    verify_token       TEXT,
    last_notified_draw INTEGER,
    subscribed_at      TEXT    NOT NULL,
    verified_at        TEXT,
    UNIQUE (pool_id, email),
    FOREIGN KEY (pool_id) REFERENCES pools(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_pools_target ON pools(target_draw);
CREATE INDEX IF NOT EXISTS idx_games_pool ON games(pool_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_subscribers_token ON subscribers(verify_token);
"#;
