//! CRUD operations for [`User`] records.

use chrono::{SubsecRound, Utc};
use rusqlite::params;

use parley_shared::UserId;

use crate::database::{ts_from_sql, ts_to_sql, uuid_from_sql, Database};
use crate::error::{Result, StoreError};
use crate::models::{normalize_email, User};

const USER_COLUMNS: &str =
    "id, email, full_name, password_hash, profile_pic, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new account.  Fails with [`StoreError::Conflict`] when the
    /// email is already registered.
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO users (id, email, full_name, password_hash, profile_pic, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user.id.to_string(),
                    user.email,
                    user.full_name,
                    user.password_hash,
                    user.profile_pic,
                    ts_to_sql(&user.created_at),
                    ts_to_sql(&user.updated_at),
                ],
            )
            .map_err(|e| StoreError::on_conflict(e, "Email already exists"))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single account by id.
    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(StoreError::on_missing)
    }

    /// Fetch a single account by email (case-insensitive).
    pub fn get_user_by_email(&self, email: &str) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![normalize_email(email)],
                row_to_user,
            )
            .map_err(StoreError::on_missing)
    }

    pub fn user_exists(&self, id: UserId) -> Result<bool> {
        let found: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    /// Every account except `id`, ordered by display name.
    pub fn list_users_except(&self, id: UserId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE id != ?1
             ORDER BY full_name COLLATE NOCASE ASC"
        ))?;

        let rows = stmt.query_map(params![id.to_string()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Replace the avatar reference and return the updated account.
    pub fn update_profile_pic(&self, id: UserId, profile_pic: &str) -> Result<User> {
        let affected = self.conn().execute(
            "UPDATE users SET profile_pic = ?2, updated_at = ?3 WHERE id = ?1",
            params![
                id.to_string(),
                profile_pic,
                ts_to_sql(&Utc::now().trunc_subsecs(6))
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_user(id)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;

    Ok(User {
        id: UserId(uuid_from_sql(&id_str, 0)?),
        email: row.get(1)?,
        full_name: row.get(2)?,
        password_hash: row.get(3)?,
        profile_pic: row.get(4)?,
        created_at: ts_from_sql(&created_str, 5)?,
        updated_at: ts_from_sql(&updated_str, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: &str, name: &str) -> User {
        User::new(email, name, "$argon2id$stub".to_string())
    }

    #[test]
    fn insert_and_fetch() {
        let db = Database::open_in_memory().unwrap();
        let alice = user("Alice@Example.com", "Alice");
        db.insert_user(&alice).unwrap();

        assert_eq!(db.get_user(alice.id).unwrap(), alice);
        assert_eq!(db.get_user_by_email("alice@example.com").unwrap().id, alice.id);
        assert_eq!(db.get_user_by_email("  ALICE@example.COM ").unwrap().id, alice.id);
        assert!(db.user_exists(alice.id).unwrap());
        assert!(!db.user_exists(UserId::new()).unwrap());
    }

    #[test]
    fn duplicate_email_conflicts() {
        let db = Database::open_in_memory().unwrap();
        db.insert_user(&user("bob@example.com", "Bob")).unwrap();

        let err = db.insert_user(&user("BOB@example.com", "Bobby")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn missing_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_user(UserId::new()), Err(StoreError::NotFound)));
        assert!(matches!(
            db.get_user_by_email("nobody@example.com"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn list_excludes_caller() {
        let db = Database::open_in_memory().unwrap();
        let me = user("me@example.com", "Me");
        let carol = user("carol@example.com", "carol");
        let bob = user("bob@example.com", "Bob");
        for u in [&me, &carol, &bob] {
            db.insert_user(u).unwrap();
        }

        let names: Vec<String> = db
            .list_users_except(me.id)
            .unwrap()
            .into_iter()
            .map(|u| u.full_name)
            .collect();
        assert_eq!(names, vec!["Bob".to_string(), "carol".to_string()]);
    }

    #[test]
    fn update_profile_pic() {
        let db = Database::open_in_memory().unwrap();
        let dave = user("dave@example.com", "Dave");
        db.insert_user(&dave).unwrap();

        let updated = db
            .update_profile_pic(dave.id, "https://cdn.example.com/dave.png")
            .unwrap();
        assert_eq!(updated.profile_pic, "https://cdn.example.com/dave.png");
        assert!(updated.updated_at >= dave.updated_at);

        assert!(matches!(
            db.update_profile_pic(UserId::new(), "x"),
            Err(StoreError::NotFound)
        ));
    }
}
