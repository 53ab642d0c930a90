//! The `local_user`, `session`, `user`, `repo`, and `workspace_repo`
//! tables: account/auth/repo-association bookkeeping that rides along
//! with the index. Per SPEC_FULL.md's grounding note, "the auth/session/
//! workspace *behavior* around them is server-layer and out of scope —
//! the core only owns the tables and simple CRUD." No password hashing,
//! session expiry enforcement, or token issuance lives here — that's the
//! transport layer's job; this module only stores and fetches rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction};

use crate::error::Result;

/// One row of `local_user` — a password-authenticated account, as opposed
/// to `user` (an external/OAuth-backed identity).
#[derive(Debug, Clone, PartialEq)]
pub struct LocalUser {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

pub fn create_local_user(tx: &Transaction, username: &str, password_hash: &str, now: DateTime<Utc>) -> Result<i64> {
    tx.execute(
        "INSERT INTO local_user (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
        params![username, password_hash, now],
    )?;
    Ok(tx.last_insert_rowid())
}

pub fn get_local_user_by_username(tx: &Transaction, username: &str) -> Result<Option<LocalUser>> {
    tx.query_row(
        "SELECT id, username, password_hash, created_at FROM local_user WHERE username = ?1",
        params![username],
        |row| Ok(LocalUser { id: row.get(0)?, username: row.get(1)?, password_hash: row.get(2)?, created_at: row.get(3)? }),
    )
    .optional()
    .map_err(Into::into)
}

/// One row of `session` — an issued login session, keyed by an opaque
/// token id the transport layer generates.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub fn create_session(tx: &Transaction, id: &str, user_id: &str, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Result<()> {
    tx.execute(
        "INSERT INTO session (id, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, user_id, now, expires_at],
    )?;
    Ok(())
}

pub fn get_session(tx: &Transaction, id: &str) -> Result<Option<Session>> {
    tx.query_row(
        "SELECT id, user_id, created_at, expires_at FROM session WHERE id = ?1",
        params![id],
        |row| Ok(Session { id: row.get(0)?, user_id: row.get(1)?, created_at: row.get(2)?, expires_at: row.get(3)? }),
    )
    .optional()
    .map_err(Into::into)
}

pub fn delete_session(tx: &Transaction, id: &str) -> Result<bool> {
    Ok(tx.execute("DELETE FROM session WHERE id = ?1", params![id])? > 0)
}

/// Removes every session whose `expires_at` is at or before `now`. The
/// core never calls this on its own schedule — a transport-layer sweep
/// invokes it, the same way `reconciler::gc_expired_kbs` is invoked
/// externally rather than on a timer.
pub fn delete_expired_sessions(tx: &Transaction, now: DateTime<Utc>) -> Result<usize> {
    Ok(tx.execute("DELETE FROM session WHERE expires_at <= ?1", params![now])?)
}

/// One row of `user` — an external/OAuth-backed identity, as opposed to
/// `local_user`'s password-based accounts.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub fn upsert_user(tx: &Transaction, id: &str, email: Option<&str>, display_name: Option<&str>, now: DateTime<Utc>) -> Result<()> {
    tx.execute(
        "INSERT INTO user (id, email, display_name, created_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET email = excluded.email, display_name = excluded.display_name",
        params![id, email, display_name, now],
    )?;
    Ok(())
}

pub fn get_user(tx: &Transaction, id: &str) -> Result<Option<User>> {
    tx.query_row(
        "SELECT id, email, display_name, created_at FROM user WHERE id = ?1",
        params![id],
        |row| Ok(User { id: row.get(0)?, email: row.get(1)?, display_name: row.get(2)?, created_at: row.get(3)? }),
    )
    .optional()
    .map_err(Into::into)
}

/// One row of `repo` — a Git repository associated with one or more KBs
/// (spec.md §6's `repositories`/KB `repo` reference), independent of any
/// one workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct Repo {
    pub id: i64,
    pub name: String,
    pub url: Option<String>,
    pub local_path: Option<String>,
}

pub fn create_repo(tx: &Transaction, name: &str, url: Option<&str>, local_path: Option<&str>) -> Result<i64> {
    tx.execute("INSERT INTO repo (name, url, local_path) VALUES (?1, ?2, ?3)", params![name, url, local_path])?;
    Ok(tx.last_insert_rowid())
}

pub fn get_repo(tx: &Transaction, id: i64) -> Result<Option<Repo>> {
    tx.query_row(
        "SELECT id, name, url, local_path FROM repo WHERE id = ?1",
        params![id],
        |row| Ok(Repo { id: row.get(0)?, name: row.get(1)?, url: row.get(2)?, local_path: row.get(3)? }),
    )
    .optional()
    .map_err(Into::into)
}

/// Associates a repo with a workspace (`workspace_repo`). Deleting the
/// repo cascades to this association via `ON DELETE CASCADE`.
pub fn link_workspace_repo(tx: &Transaction, workspace_id: &str, repo_id: i64) -> Result<()> {
    tx.execute("INSERT INTO workspace_repo (workspace_id, repo_id) VALUES (?1, ?2)", params![workspace_id, repo_id])?;
    Ok(())
}

pub fn repos_for_workspace(tx: &Transaction, workspace_id: &str) -> Result<Vec<Repo>> {
    let mut stmt = tx.prepare(
        "SELECT repo.id, repo.name, repo.url, repo.local_path
         FROM repo JOIN workspace_repo ON workspace_repo.repo_id = repo.id
         WHERE workspace_repo.workspace_id = ?1",
    )?;
    let rows = stmt
        .query_map(params![workspace_id], |row| {
            Ok(Repo { id: row.get(0)?, name: row.get(1)?, url: row.get(2)?, local_path: row.get(3)? })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::run_migrations;
    use rusqlite::Connection;

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        conn
    }

    #[test]
    fn local_user_round_trips_by_username() {
        let mut conn = conn();
        let tx = conn.transaction().unwrap();
        create_local_user(&tx, "alice", "hash", Utc::now()).unwrap();
        let found = get_local_user_by_username(&tx, "alice").unwrap().unwrap();
        assert_eq!(found.password_hash, "hash");
        assert!(get_local_user_by_username(&tx, "bob").unwrap().is_none());
    }

    #[test]
    fn session_create_fetch_delete() {
        let mut conn = conn();
        let tx = conn.transaction().unwrap();
        let now = Utc::now();
        create_session(&tx, "sess-1", "alice", now, now + chrono::Duration::hours(1)).unwrap();
        assert!(get_session(&tx, "sess-1").unwrap().is_some());
        assert!(delete_session(&tx, "sess-1").unwrap());
        assert!(get_session(&tx, "sess-1").unwrap().is_none());
    }

    #[test]
    fn expired_sessions_are_swept() {
        let mut conn = conn();
        let tx = conn.transaction().unwrap();
        let now = Utc::now();
        create_session(&tx, "old", "alice", now - chrono::Duration::hours(2), now - chrono::Duration::hours(1)).unwrap();
        create_session(&tx, "fresh", "alice", now, now + chrono::Duration::hours(1)).unwrap();

        let removed = delete_expired_sessions(&tx, now).unwrap();
        assert_eq!(removed, 1);
        assert!(get_session(&tx, "old").unwrap().is_none());
        assert!(get_session(&tx, "fresh").unwrap().is_some());
    }

    #[test]
    fn user_upsert_updates_in_place() {
        let mut conn = conn();
        let tx = conn.transaction().unwrap();
        let now = Utc::now();
        upsert_user(&tx, "u1", Some("a@example.com"), Some("Alice"), now).unwrap();
        upsert_user(&tx, "u1", Some("a2@example.com"), Some("Alice B"), now).unwrap();
        let user = get_user(&tx, "u1").unwrap().unwrap();
        assert_eq!(user.email.as_deref(), Some("a2@example.com"));
        assert_eq!(user.display_name.as_deref(), Some("Alice B"));
    }

    #[test]
    fn workspace_repo_association_and_cascade_delete() {
        let mut conn = conn();
        let tx = conn.transaction().unwrap();
        let repo_id = create_repo(&tx, "pyrite-notes", Some("https://example.com/repo.git"), None).unwrap();
        link_workspace_repo(&tx, "ws1", repo_id).unwrap();
        assert_eq!(repos_for_workspace(&tx, "ws1").unwrap().len(), 1);

        tx.execute("DELETE FROM repo WHERE id = ?1", params![repo_id]).unwrap();
        assert_eq!(repos_for_workspace(&tx, "ws1").unwrap().len(), 0);
    }
}
