use rusqlite::params;

use parley_shared::UserId;

use crate::database::{ts_from_sql, ts_to_sql, uuid_from_sql, Database};
use crate::error::{Result, StoreError};
use crate::models::Message;

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, text, image, created_at";

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO messages (id, sender_id, receiver_id, text, image, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id.to_string(),
                    message.sender_id.to_string(),
                    message.receiver_id.to_string(),
                    message.text,
                    message.image,
                    ts_to_sql(&message.created_at),
                ],
            )
            .map_err(|e| StoreError::on_conflict(e, "Message already stored or unknown participant"))?;
        Ok(())
    }

    /// Both directions of the conversation between `a` and `b`, oldest first.
    pub fn get_conversation(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(params![a.to_string(), b.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message(&self, id: uuid::Uuid) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(StoreError::on_missing)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let ts_str: String = row.get(5)?;

    Ok(Message {
        id: uuid_from_sql(&id_str, 0)?,
        sender_id: UserId(uuid_from_sql(&sender_str, 1)?),
        receiver_id: UserId(uuid_from_sql(&receiver_str, 2)?),
        text: row.get(3)?,
        image: row.get(4)?,
        created_at: ts_from_sql(&ts_str, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;

    fn with_users(n: usize) -> (Database, Vec<UserId>) {
        let db = Database::open_in_memory().unwrap();
        let ids = (0..n)
            .map(|i| {
                let user = User::new(&format!("user{i}@example.com"), &format!("User {i}"), "h".into());
                db.insert_user(&user).unwrap();
                user.id
            })
            .collect();
        (db, ids)
    }

    #[test]
    fn conversation_includes_both_directions_in_order() {
        let (db, ids) = with_users(3);
        let (a, b, c) = (ids[0], ids[1], ids[2]);

        let first = Message::new(a, b, Some("hi b".into()), None);
        let second = Message::new(b, a, Some("hi a".into()), None);
        let unrelated = Message::new(a, c, Some("hi c".into()), None);
        let third = Message::new(a, b, None, Some("https://img.example.com/1.png".into()));

        for m in [&first, &second, &unrelated, &third] {
            db.insert_message(m).unwrap();
        }

        let history = db.get_conversation(b, a).unwrap();
        assert_eq!(history, vec![first, second, third]);
    }

    #[test]
    fn message_fields_survive_storage() {
        let (db, ids) = with_users(2);
        let msg = Message::new(ids[0], ids[1], Some("caption".into()), Some("https://img/x.jpg".into()));
        db.insert_message(&msg).unwrap();

        assert_eq!(db.get_message(msg.id).unwrap(), msg);
    }

    #[test]
    fn unknown_participant_is_rejected() {
        let (db, ids) = with_users(1);
        let msg = Message::new(ids[0], UserId::new(), Some("into the void".into()), None);

        assert!(db.insert_message(&msg).is_err());
        assert!(db.get_conversation(ids[0], msg.receiver_id).unwrap().is_empty());
    }

    #[test]
    fn missing_message_is_not_found() {
        let (db, _) = with_users(0);
        assert!(matches!(
            db.get_message(uuid::Uuid::new_v4()),
            Err(StoreError::NotFound)
        ));
    }
}
