use chrono::Utc;
use rusqlite::{params, Connection};

use cohort_shared::content::Reaction;
use cohort_shared::{MessageId, UserId};

use crate::codec::ts;
use crate::database::Database;
use crate::error::Result;

impl Database {
    pub fn reactions_for_message(&self, message_id: MessageId) -> Result<Vec<Reaction>> {
        load_reactions(self.conn(), message_id)
    }

    /// Store the user's reaction on a message, replacing any previous one.
    /// `None` clears it.
    pub fn set_user_reaction(
        &self,
        message_id: MessageId,
        user: &UserId,
        emoji: Option<&str>,
    ) -> Result<()> {
        match emoji {
            Some(emoji) => {
                self.conn().execute(
                    "INSERT INTO reactions (message_id, user_id, emoji, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(message_id, user_id) DO UPDATE SET
                         emoji = excluded.emoji,
                         created_at = excluded.created_at",
                    params![message_id.to_string(), user.as_str(), emoji, ts(&Utc::now())],
                )?;
            }
            None => {
                self.conn().execute(
                    "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                    params![message_id.to_string(), user.as_str()],
                )?;
            }
        }
        Ok(())
    }

    /// Remove the `(user, emoji)` reaction if present.
    pub fn remove_reaction(&self, message_id: MessageId, user: &UserId, emoji: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            params![message_id.to_string(), user.as_str(), emoji],
        )?;
        Ok(affected > 0)
    }
}

pub(crate) fn load_reactions(conn: &Connection, message_id: MessageId) -> Result<Vec<Reaction>> {
    let mut stmt = conn.prepare(
        "SELECT emoji, user_id FROM reactions
         WHERE message_id = ?1 ORDER BY created_at ASC, rowid ASC",
    )?;
    let rows = stmt.query_map(params![message_id.to_string()], |row| {
        Ok(Reaction {
            emoji: row.get(0)?,
            user_id: UserId(row.get(1)?),
        })
    })?;

    let mut reactions = Vec::new();
    for row in rows {
        reactions.push(row?);
    }
    Ok(reactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Group, NewMessage};
    use cohort_shared::content::MessageKind;

    fn setup() -> (Database, MessageId) {
        let mut db = Database::open_in_memory().unwrap();
        let alice = UserId::new("alice");
        let group = Group::new("g", "", &alice);
        db.insert_group(&group).unwrap();

        let id = MessageId::new();
        db.insert_message(&NewMessage {
            id,
            group_id: group.id,
            sender_id: alice,
            kind: MessageKind::Text,
            content: "hi".into(),
            poll: None,
            event: None,
            mentions: Vec::new(),
            parent_id: None,
            created_at: Utc::now(),
        })
        .unwrap();
        (db, id)
    }

    #[test]
    fn one_reaction_row_per_user() {
        let (db, msg) = setup();
        let bob = UserId::new("bob");

        db.set_user_reaction(msg, &bob, Some("👍")).unwrap();
        db.set_user_reaction(msg, &bob, Some("❤️")).unwrap();

        let reactions = db.reactions_for_message(msg).unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "❤️");

        db.set_user_reaction(msg, &bob, None).unwrap();
        assert!(db.reactions_for_message(msg).unwrap().is_empty());
    }

    #[test]
    fn remove_requires_matching_emoji() {
        let (db, msg) = setup();
        let bob = UserId::new("bob");
        db.set_user_reaction(msg, &bob, Some("👍")).unwrap();

        assert!(!db.remove_reaction(msg, &bob, "❤️").unwrap());
        assert!(db.remove_reaction(msg, &bob, "👍").unwrap());
        assert!(!db.remove_reaction(msg, &bob, "👍").unwrap());
    }

    #[test]
    fn reactions_die_with_message() {
        let (mut db, msg) = setup();
        db.set_user_reaction(msg, &UserId::new("bob"), Some("👍")).unwrap();
        db.delete_message(msg).unwrap();
        assert!(db.reactions_for_message(msg).unwrap().is_empty());
    }
}
