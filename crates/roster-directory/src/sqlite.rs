//! SQLite-backed bot directory.
//!
//! A single connection behind a `parking_lot::Mutex` (rusqlite connections
//! are not `Sync`); every query here is a point lookup or single-row write.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use roster_core::ids::{ApiToken, BotId};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{BotSubject, CredentialResolver, DirectoryError};

const PRAGMAS: &str = "PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;";

const CREATE_TABLES: &str = "CREATE TABLE IF NOT EXISTS bots (
    bot_id INTEGER PRIMARY KEY,
    api_token TEXT NOT NULL UNIQUE,
    servers INTEGER NOT NULL DEFAULT 0,
    shard_count INTEGER NOT NULL DEFAULT 0,
    maint_mode INTEGER NOT NULL DEFAULT 0,
    maint_reason TEXT
);
CREATE TABLE IF NOT EXISTS promotions (
    id TEXT PRIMARY KEY,
    bot_id INTEGER NOT NULL REFERENCES bots(bot_id),
    title TEXT NOT NULL,
    info TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_promotions_bot ON promotions(bot_id);";

/// A promotional entry attached to a bot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    /// Promotion id (UUID).
    pub id: String,
    /// Owning bot.
    pub bot_id: BotId,
    /// Short headline.
    pub title: String,
    /// Body text.
    pub info: String,
}

/// The SQLite bot directory.
pub struct SqliteDirectory {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteDirectory {
    /// Open or create a directory database at `path`.
    pub fn open(path: &Path) -> Result<Self, DirectoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DirectoryError::Io(format!("create dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(PRAGMAS)
            .map_err(|e| DirectoryError::Database(format!("pragmas: {e}")))?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| DirectoryError::Database(format!("schema: {e}")))?;
        info!(path = %path.display(), "bot directory opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_owned(),
        })
    }

    /// Open an in-memory directory (tests).
    pub fn in_memory() -> Result<Self, DirectoryError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(PRAGMAS)
            .map_err(|e| DirectoryError::Database(format!("pragmas: {e}")))?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| DirectoryError::Database(format!("schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    /// The database path (`:memory:` for in-memory directories).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace a bot row.
    pub fn upsert_bot(&self, bot_id: BotId, token: &ApiToken) -> Result<(), DirectoryError> {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO bots (bot_id, api_token) VALUES (?1, ?2)
             ON CONFLICT(bot_id) DO UPDATE SET api_token = excluded.api_token",
            params![bot_id.as_i64(), token.expose()],
        )?;
        Ok(())
    }

    /// Resolve a token to its subject row, if the token is known.
    pub fn lookup_token(&self, token: &ApiToken) -> Result<Option<BotSubject>, DirectoryError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT bot_id, servers FROM bots WHERE api_token = ?1",
                params![token.expose()],
                |row| {
                    Ok(BotSubject {
                        bot_id: BotId(row.get(0)?),
                        server_count: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Update a bot's guild/shard counters.
    pub fn set_stats(
        &self,
        bot_id: BotId,
        guild_count: i64,
        shard_count: i64,
    ) -> Result<(), DirectoryError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE bots SET servers = ?1, shard_count = ?2 WHERE bot_id = ?3",
            params![guild_count, shard_count, bot_id.as_i64()],
        )?;
        if changed == 0 {
            return Err(DirectoryError::NotFound(format!("bot {bot_id}")));
        }
        Ok(())
    }

    /// Set or clear a bot's maintenance state.
    pub fn set_maintenance(
        &self,
        bot_id: BotId,
        mode: i64,
        reason: &str,
    ) -> Result<(), DirectoryError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE bots SET maint_mode = ?1, maint_reason = ?2 WHERE bot_id = ?3",
            params![mode, reason, bot_id.as_i64()],
        )?;
        if changed == 0 {
            return Err(DirectoryError::NotFound(format!("bot {bot_id}")));
        }
        Ok(())
    }

    /// Current maintenance state `(mode, reason)` for a bot.
    pub fn maintenance(&self, bot_id: BotId) -> Result<(i64, Option<String>), DirectoryError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT maint_mode, maint_reason FROM bots WHERE bot_id = ?1",
                params![bot_id.as_i64()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.ok_or_else(|| DirectoryError::NotFound(format!("bot {bot_id}")))
    }

    /// Create a promotion for a bot.
    pub fn create_promotion(
        &self,
        bot_id: BotId,
        title: &str,
        info: &str,
    ) -> Result<Promotion, DirectoryError> {
        let promo = Promotion {
            id: Uuid::now_v7().to_string(),
            bot_id,
            title: title.to_owned(),
            info: info.to_owned(),
        };
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO promotions (id, bot_id, title, info) VALUES (?1, ?2, ?3, ?4)",
            params![promo.id, bot_id.as_i64(), promo.title, promo.info],
        )?;
        Ok(promo)
    }

    /// Rewrite a promotion's title and body.
    pub fn edit_promotion(
        &self,
        bot_id: BotId,
        promo_id: &str,
        title: &str,
        info: &str,
    ) -> Result<(), DirectoryError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE promotions SET title = ?1, info = ?2 WHERE id = ?3 AND bot_id = ?4",
            params![title, info, promo_id, bot_id.as_i64()],
        )?;
        if changed == 0 {
            return Err(DirectoryError::NotFound(format!("promotion {promo_id}")));
        }
        Ok(())
    }

    /// Delete one promotion, or all of a bot's promotions when `promo_id` is
    /// `None`. Deleting a specific missing promotion is an error; deleting
    /// all when none exist is not.
    pub fn delete_promotions(
        &self,
        bot_id: BotId,
        promo_id: Option<&str>,
    ) -> Result<usize, DirectoryError> {
        let conn = self.conn.lock();
        match promo_id {
            Some(id) => {
                let changed = conn.execute(
                    "DELETE FROM promotions WHERE id = ?1 AND bot_id = ?2",
                    params![id, bot_id.as_i64()],
                )?;
                if changed == 0 {
                    return Err(DirectoryError::NotFound(format!("promotion {id}")));
                }
                Ok(changed)
            }
            None => {
                let changed = conn.execute(
                    "DELETE FROM promotions WHERE bot_id = ?1",
                    params![bot_id.as_i64()],
                )?;
                Ok(changed)
            }
        }
    }

    /// All promotions for a bot, oldest first.
    pub fn promotions_for(&self, bot_id: BotId) -> Result<Vec<Promotion>, DirectoryError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, bot_id, title, info FROM promotions WHERE bot_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![bot_id.as_i64()], |row| {
            Ok(Promotion {
                id: row.get(0)?,
                bot_id: BotId(row.get(1)?),
                title: row.get(2)?,
                info: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl CredentialResolver for SqliteDirectory {
    async fn resolve(&self, token: &ApiToken) -> Result<Option<BotSubject>, DirectoryError> {
        self.lookup_token(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir_with_bot(id: i64, token: &str) -> SqliteDirectory {
        let dir = SqliteDirectory::in_memory().unwrap();
        dir.upsert_bot(BotId(id), &ApiToken::new(token)).unwrap();
        dir
    }

    #[test]
    fn open_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("bots.db");
        let dir = SqliteDirectory::open(&path).unwrap();
        assert_eq!(dir.path(), path);
    }

    #[test]
    fn lookup_known_token() {
        let dir = dir_with_bot(42, "tok_42");
        let subject = dir.lookup_token(&ApiToken::new("tok_42")).unwrap().unwrap();
        assert_eq!(subject.bot_id, BotId(42));
        assert_eq!(subject.server_count, 0);
    }

    #[test]
    fn lookup_unknown_token_is_none() {
        let dir = dir_with_bot(42, "tok_42");
        assert!(dir.lookup_token(&ApiToken::new("other")).unwrap().is_none());
    }

    #[test]
    fn upsert_replaces_token() {
        let dir = dir_with_bot(42, "old");
        dir.upsert_bot(BotId(42), &ApiToken::new("new")).unwrap();
        assert!(dir.lookup_token(&ApiToken::new("old")).unwrap().is_none());
        assert!(dir.lookup_token(&ApiToken::new("new")).unwrap().is_some());
    }

    #[test]
    fn set_stats_updates_server_count() {
        let dir = dir_with_bot(42, "tok");
        dir.set_stats(BotId(42), 100, 2).unwrap();
        let subject = dir.lookup_token(&ApiToken::new("tok")).unwrap().unwrap();
        assert_eq!(subject.server_count, 100);
    }

    #[test]
    fn set_stats_unknown_bot_errors() {
        let dir = SqliteDirectory::in_memory().unwrap();
        let err = dir.set_stats(BotId(9), 1, 1).unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));
    }

    #[test]
    fn maintenance_roundtrip() {
        let dir = dir_with_bot(42, "tok");
        dir.set_maintenance(BotId(42), 1, "upgrading").unwrap();
        let (mode, reason) = dir.maintenance(BotId(42)).unwrap();
        assert_eq!(mode, 1);
        assert_eq!(reason.as_deref(), Some("upgrading"));

        dir.set_maintenance(BotId(42), 0, "").unwrap();
        let (mode, _) = dir.maintenance(BotId(42)).unwrap();
        assert_eq!(mode, 0);
    }

    #[test]
    fn maintenance_unknown_bot_errors() {
        let dir = SqliteDirectory::in_memory().unwrap();
        assert!(matches!(
            dir.maintenance(BotId(1)),
            Err(DirectoryError::NotFound(_))
        ));
    }

    #[test]
    fn promotion_create_and_list() {
        let dir = dir_with_bot(42, "tok");
        let p1 = dir.create_promotion(BotId(42), "Launch", "v2 is out").unwrap();
        let p2 = dir.create_promotion(BotId(42), "Sale", "50% off").unwrap();

        let promos = dir.promotions_for(BotId(42)).unwrap();
        assert_eq!(promos, vec![p1, p2]);
    }

    #[test]
    fn promotion_edit() {
        let dir = dir_with_bot(42, "tok");
        let p = dir.create_promotion(BotId(42), "Old", "text").unwrap();
        dir.edit_promotion(BotId(42), &p.id, "New", "body").unwrap();

        let promos = dir.promotions_for(BotId(42)).unwrap();
        assert_eq!(promos[0].title, "New");
        assert_eq!(promos[0].info, "body");
    }

    #[test]
    fn promotion_edit_missing_errors() {
        let dir = dir_with_bot(42, "tok");
        let err = dir
            .edit_promotion(BotId(42), "no-such-id", "t", "i")
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));
    }

    #[test]
    fn promotion_edit_wrong_owner_errors() {
        let dir = dir_with_bot(1, "tok_1");
        dir.upsert_bot(BotId(2), &ApiToken::new("tok_2")).unwrap();
        let p = dir.create_promotion(BotId(1), "Mine", "x").unwrap();

        let err = dir.edit_promotion(BotId(2), &p.id, "Theirs", "y").unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));
    }

    #[test]
    fn promotion_delete_one() {
        let dir = dir_with_bot(42, "tok");
        let p = dir.create_promotion(BotId(42), "Gone", "soon").unwrap();
        let removed = dir.delete_promotions(BotId(42), Some(&p.id)).unwrap();
        assert_eq!(removed, 1);
        assert!(dir.promotions_for(BotId(42)).unwrap().is_empty());
    }

    #[test]
    fn promotion_delete_missing_errors() {
        let dir = dir_with_bot(42, "tok");
        let err = dir.delete_promotions(BotId(42), Some("ghost")).unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));
    }

    #[test]
    fn promotion_delete_all() {
        let dir = dir_with_bot(42, "tok");
        let _ = dir.create_promotion(BotId(42), "One", "x").unwrap();
        let _ = dir.create_promotion(BotId(42), "Two", "y").unwrap();
        let removed = dir.delete_promotions(BotId(42), None).unwrap();
        assert_eq!(removed, 2);
    }

    #[test]
    fn promotion_delete_all_when_empty_is_ok() {
        let dir = dir_with_bot(42, "tok");
        let removed = dir.delete_promotions(BotId(42), None).unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn resolver_trait_uses_token_lookup() {
        let dir = dir_with_bot(42, "tok_42");
        let got = dir.resolve(&ApiToken::new("tok_42")).await.unwrap();
        assert_eq!(got.unwrap().bot_id, BotId(42));
        let miss = dir.resolve(&ApiToken::new("bad")).await.unwrap();
        assert!(miss.is_none());
    }
}
