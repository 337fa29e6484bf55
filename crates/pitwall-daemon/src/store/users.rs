//! User and role persistence.

use pitwall_core::Role;
use rusqlite::{params, OptionalExtension};

use super::{Store, StoreError};

/// A stored user with their subteam roles.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub roles: Vec<Role>,
}

impl Store {
    /// Creates a user with their roles in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the username is taken.
    pub fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        is_admin: bool,
        roles: &[Role],
    ) -> Result<UserRecord, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO users (username, password_hash, is_admin) VALUES (?1, ?2, ?3)",
            params![username, password_hash, is_admin],
        )
        .map_err(|e| match StoreError::from(e) {
            StoreError::Conflict(_) => {
                StoreError::Conflict(format!("Username '{username}' already exists"))
            }
            other => other,
        })?;
        let id = tx.last_insert_rowid();
        for role in roles {
            tx.execute(
                "INSERT INTO user_roles (user_id, role) VALUES (?1, ?2)",
                params![id, role.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(UserRecord {
            id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            is_admin,
            roles: roles.to_vec(),
        })
    }

    /// Looks up a user by username.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on query failure.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, username, password_hash, is_admin FROM users WHERE username = ?1",
                [username],
                user_row,
            )
            .optional()?;
        let Some(mut user) = row else {
            return Ok(None);
        };
        user.roles = roles_of(&conn, user.id)?;
        Ok(Some(user))
    }

    /// Looks up a user by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on query failure.
    pub fn get_user(&self, id: i64) -> Result<Option<UserRecord>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, username, password_hash, is_admin FROM users WHERE id = ?1",
                [id],
                user_row,
            )
            .optional()?;
        let Some(mut user) = row else {
            return Ok(None);
        };
        user.roles = roles_of(&conn, user.id)?;
        Ok(Some(user))
    }

    /// Every user, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on query failure.
    pub fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, username, password_hash, is_admin FROM users ORDER BY id",
        )?;
        let mut users: Vec<UserRecord> = stmt
            .query_map([], user_row)?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        for user in &mut users {
            user.roles = roles_of(&conn, user.id)?;
        }
        Ok(users)
    }

    /// Deletes a user. Role links cascade.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such user exists.
    pub fn delete_user(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.lock();
        let n = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Replaces a user's password hash.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such user exists.
    pub fn set_password(&self, id: i64, password_hash: &str) -> Result<(), StoreError> {
        let conn = self.lock();
        let n = conn.execute(
            "UPDATE users SET password_hash = ?2 WHERE id = ?1",
            params![id, password_hash],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Replaces a user's role set in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such user exists.
    pub fn set_roles(&self, id: i64, roles: &[Role]) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let exists: bool = tx
            .query_row("SELECT 1 FROM users WHERE id = ?1", [id], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        if !exists {
            return Err(StoreError::NotFound);
        }
        tx.execute("DELETE FROM user_roles WHERE user_id = ?1", [id])?;
        for role in roles {
            tx.execute(
                "INSERT INTO user_roles (user_id, role) VALUES (?1, ?2)",
                params![id, role.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Total number of users.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on query failure.
    pub fn count_users(&self) -> Result<u64, StoreError> {
        let conn = self.lock();
        let n: u64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(n)
    }

    /// Number of admin users; guards last-admin deletion.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on query failure.
    pub fn count_admins(&self) -> Result<u64, StoreError> {
        let conn = self.lock();
        let n: u64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE is_admin = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

fn user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        is_admin: row.get(3)?,
        roles: Vec::new(),
    })
}

fn roles_of(conn: &rusqlite::Connection, user_id: i64) -> Result<Vec<Role>, StoreError> {
    let mut stmt = conn.prepare("SELECT role FROM user_roles WHERE user_id = ?1 ORDER BY role")?;
    let names: Vec<String> = stmt
        .query_map([user_id], |row| row.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;
    // A role name outside the closed set can only appear through manual DB
    // edits; drop it rather than poisoning every user listing.
    Ok(names.iter().filter_map(|n| n.parse().ok()).collect())
}
