use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use cohort_shared::content::{EventData, MessageKind, PollData};
use cohort_shared::{GroupId, MessageId, UserId, UserSummary};

use crate::codec::{parse_enum, parse_id, parse_json, parse_ts, ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Deletion, Message, NewMessage};
use crate::reactions::load_reactions;

const MESSAGE_SELECT: &str = "SELECT m.id, m.group_id, m.sender_id, COALESCE(u.name, m.sender_id),
        m.kind, m.content, m.poll_json, m.event_json, m.mentions_json,
        m.is_pinned, m.parent_id, m.reply_count, m.created_at
     FROM messages m
     LEFT JOIN users u ON u.id = m.sender_id";

impl Database {
    /// Insert a message. For a reply the parent's `reply_count` is bumped in
    /// the same transaction.
    pub fn insert_message(&mut self, message: &NewMessage) -> Result<()> {
        let poll_json = message.poll.as_ref().map(serde_json::to_string).transpose()?;
        let event_json = message.event.as_ref().map(serde_json::to_string).transpose()?;
        let mentions_json = serde_json::to_string(&message.mentions)?;

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO messages
                (id, group_id, sender_id, kind, content, poll_json, event_json,
                 mentions_json, parent_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                message.id.to_string(),
                message.group_id.to_string(),
                message.sender_id.as_str(),
                message.kind.as_str(),
                message.content,
                poll_json,
                event_json,
                mentions_json,
                message.parent_id.map(|p| p.to_string()),
                ts(&message.created_at),
            ],
        )?;

        if let Some(parent) = message.parent_id {
            let affected = tx.execute(
                "UPDATE messages SET reply_count = reply_count + 1 WHERE id = ?1",
                params![parent.to_string()],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound("Parent message"));
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        let mut message = self
            .conn()
            .query_row(
                &format!("{MESSAGE_SELECT} WHERE m.id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| StoreError::or_not_found(e, "Message"))?;
        message.reactions = load_reactions(self.conn(), id)?;
        Ok(message)
    }

    /// One page of top-level messages strictly older than `before`, returned
    /// oldest first.
    pub fn list_top_level(
        &self,
        group_id: GroupId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            "{MESSAGE_SELECT}
             WHERE m.group_id = ?1 AND m.parent_id IS NULL AND (?2 IS NULL OR m.id < ?2)
             ORDER BY m.id DESC
             LIMIT ?3"
        );
        let mut messages = query_messages(
            self.conn(),
            &sql,
            params![group_id.to_string(), before.map(|b| b.to_string()), limit],
        )?;
        messages.reverse();
        Ok(messages)
    }

    /// All replies to `parent`, oldest first.
    pub fn list_replies(&self, parent: MessageId) -> Result<Vec<Message>> {
        let sql = format!("{MESSAGE_SELECT} WHERE m.parent_id = ?1 ORDER BY m.id ASC");
        query_messages(self.conn(), &sql, params![parent.to_string()])
    }

    /// Delete a message. Replies to it go through the cascade; a reply's
    /// parent has its `reply_count` decremented, floored at zero. Returns
    /// `None` when the message did not exist.
    pub fn delete_message(&mut self, id: MessageId) -> Result<Option<Deletion>> {
        let tx = self.conn_mut().transaction()?;

        let row: Option<(Option<String>, bool)> = tx
            .query_row(
                "SELECT parent_id, is_pinned FROM messages WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((parent, pinned)) = row else {
            return Ok(None);
        };

        let mut deletion = Deletion {
            replies: Vec::new(),
            unpinned: pinned,
        };
        {
            let mut stmt = tx.prepare("SELECT id, is_pinned FROM messages WHERE parent_id = ?1 ORDER BY id ASC")?;
            let rows = stmt.query_map(params![id.to_string()], |row| {
                let reply: String = row.get(0)?;
                Ok((parse_id::<MessageId>(0, &reply)?, row.get::<_, bool>(1)?))
            })?;
            for row in rows {
                let (reply, reply_pinned) = row?;
                deletion.replies.push(reply);
                deletion.unpinned |= reply_pinned;
            }
        }

        tx.execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        if let Some(parent) = parent {
            tx.execute(
                "UPDATE messages SET reply_count = MAX(reply_count - 1, 0) WHERE id = ?1",
                params![parent],
            )?;
        }

        tx.commit()?;
        Ok(Some(deletion))
    }

    /// Delete every message in the group. Returns how many were removed.
    pub fn clear_group(&mut self, group_id: GroupId) -> Result<usize> {
        let tx = self.conn_mut().transaction()?;
        let removed = tx.execute(
            "DELETE FROM messages WHERE group_id = ?1",
            params![group_id.to_string()],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    /// Make `message` the group's only pinned message, or unpin everything
    /// when `None`.
    pub fn set_pinned(&mut self, group_id: GroupId, message: Option<MessageId>) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "UPDATE messages SET is_pinned = 0 WHERE group_id = ?1 AND is_pinned = 1",
            params![group_id.to_string()],
        )?;
        if let Some(id) = message {
            let affected = tx.execute(
                "UPDATE messages SET is_pinned = 1 WHERE id = ?1 AND group_id = ?2",
                params![id.to_string(), group_id.to_string()],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound("Message"));
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn pinned_message(&self, group_id: GroupId) -> Result<Option<Message>> {
        let message = self
            .conn()
            .query_row(
                &format!("{MESSAGE_SELECT} WHERE m.group_id = ?1 AND m.is_pinned = 1"),
                params![group_id.to_string()],
                row_to_message,
            )
            .optional()?;

        match message {
            Some(mut message) => {
                message.reactions = load_reactions(self.conn(), message.id)?;
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    pub fn update_poll(&self, id: MessageId, poll: &PollData) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET poll_json = ?2 WHERE id = ?1",
            params![id.to_string(), serde_json::to_string(poll)?],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound("Message"));
        }
        Ok(())
    }

    pub fn update_event(&self, id: MessageId, event: &EventData) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET event_json = ?2 WHERE id = ?1",
            params![id.to_string(), serde_json::to_string(event)?],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound("Message"));
        }
        Ok(())
    }

    /// Messages in the group newer than `since` that `user` did not send.
    pub fn count_unread(&self, group_id: GroupId, user: &UserId, since: &DateTime<Utc>) -> Result<u32> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE group_id = ?1 AND sender_id != ?2 AND created_at > ?3",
            params![group_id.to_string(), user.as_str(), ts(since)],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn query_messages(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, row_to_message)?;

    let mut messages = Vec::new();
    for row in rows {
        let mut message = row?;
        message.reactions = load_reactions(conn, message.id)?;
        messages.push(message);
    }
    Ok(messages)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let group_id: String = row.get(1)?;
    let sender_id: String = row.get(2)?;
    let kind: String = row.get(4)?;
    let poll_json: Option<String> = row.get(6)?;
    let event_json: Option<String> = row.get(7)?;
    let mentions_json: String = row.get(8)?;
    let parent_id: Option<String> = row.get(10)?;
    let created_at: String = row.get(12)?;

    Ok(Message {
        id: parse_id(0, &id)?,
        group_id: parse_id(1, &group_id)?,
        sender: UserSummary {
            id: UserId(sender_id),
            name: row.get(3)?,
        },
        kind: parse_enum(4, &kind, MessageKind::parse)?,
        content: row.get(5)?,
        poll: poll_json.as_deref().map(|raw| parse_json(6, raw)).transpose()?,
        event: event_json.as_deref().map(|raw| parse_json(7, raw)).transpose()?,
        reactions: Vec::new(),
        mentions: parse_json(8, &mentions_json)?,
        is_pinned: row.get(9)?,
        parent_id: parent_id.as_deref().map(|raw| parse_id(10, raw)).transpose()?,
        reply_count: row.get(11)?,
        created_at: parse_ts(12, &created_at)?,
    })
}
