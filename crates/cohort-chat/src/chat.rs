use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use cohort_shared::content::{EventData, PollData, Reaction};
use cohort_shared::report::{ReportAction, ReportReason};
use cohort_shared::{ChatError, ChatResult, GroupId, MessageId, ReportId, UserId};
use cohort_store::{Community, Database, Group, Message, Report, ReportDetails};

use crate::events::{ChannelKey, ClientEvent, Outcome, ServerEvent};
use crate::hub::{ConnectionId, EventReceiver, Hub};
use crate::membership::capabilities_in;
use crate::messages::Draft;
use crate::unread::GroupView;
use crate::{community, membership, messages, moderation, unread};

/// Entry point for every chat operation.
///
/// Each mutation runs against the store under the database lock, then the
/// lock is released and the operation's notifications are published to the
/// hub. Events are therefore only ever sent for committed state.
#[derive(Clone)]
pub struct Chat {
    db: Arc<Mutex<Database>>,
    hub: Hub,
}

impl Chat {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            hub: Hub::new(),
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<T>(&self, op: impl FnOnce(&Database) -> ChatResult<T>) -> ChatResult<T> {
        op(&self.lock())
    }

    async fn run<T>(&self, op: impl FnOnce(&mut Database) -> ChatResult<Outcome<T>>) -> ChatResult<T> {
        // The guard is a temporary of this statement, so it is released
        // before the first await below.
        let Outcome { value, dispatches } = op(&mut self.lock())?;
        for dispatch in dispatches {
            self.hub.publish(dispatch).await;
        }
        Ok(value)
    }

    // -- Identity --------------------------------------------------------

    /// Record an authenticated identity, optionally enrolling it in the
    /// community when one exists.
    pub fn register_user(&self, user: &UserId, name: &str, auto_join: bool) -> ChatResult<()> {
        if user.is_blank() {
            return Err(ChatError::invalid("user id must not be empty"));
        }
        let db = self.lock();
        let name = name.trim();
        db.upsert_user(user, if name.is_empty() { user.as_str() } else { name })?;
        if auto_join && db.get_community()?.is_some() {
            db.add_community_member(user)?;
        }
        Ok(())
    }

    // -- Community -------------------------------------------------------

    pub async fn create_community(&self, user: &UserId, name: &str, description: &str) -> ChatResult<Community> {
        self.run(|db| community::create_community(db, user, name, description)).await
    }

    pub fn get_community(&self, user: &UserId) -> ChatResult<Community> {
        self.read(|db| community::get_community(db, user))
    }

    pub async fn join_community(&self, user: &UserId) -> ChatResult<bool> {
        self.run(|db| community::join_community(db, user)).await
    }

    pub async fn add_community_admin(&self, admin: &UserId, target: &UserId) -> ChatResult<()> {
        self.run(|db| community::add_community_admin(db, admin, target)).await
    }

    // -- Groups and membership -------------------------------------------

    pub fn list_groups(&self, user: &UserId) -> ChatResult<Vec<GroupView>> {
        self.read(|db| unread::list_groups(db, user))
    }

    pub async fn create_group(&self, admin: &UserId, name: &str, description: &str) -> ChatResult<Group> {
        self.run(|db| membership::create_group(db, admin, name, description)).await
    }

    pub async fn delete_group(&self, admin: &UserId, group_id: GroupId) -> ChatResult<()> {
        self.run(|db| membership::delete_group(db, admin, group_id)).await
    }

    pub async fn request_join(&self, user: &UserId, group_id: GroupId) -> ChatResult<()> {
        self.run(|db| membership::request_join(db, user, group_id)).await
    }

    pub async fn approve(&self, admin: &UserId, group_id: GroupId, target: &UserId) -> ChatResult<()> {
        self.run(|db| membership::approve(db, admin, group_id, target)).await
    }

    pub async fn reject(&self, admin: &UserId, group_id: GroupId, target: &UserId) -> ChatResult<()> {
        self.run(|db| membership::reject(db, admin, group_id, target)).await
    }

    pub async fn add_member(&self, admin: &UserId, group_id: GroupId, target: &UserId) -> ChatResult<()> {
        self.run(|db| membership::add_member(db, admin, group_id, target)).await
    }

    pub async fn remove_member(&self, admin: &UserId, group_id: GroupId, target: &UserId) -> ChatResult<()> {
        self.run(|db| membership::remove_member(db, admin, group_id, target)).await
    }

    pub async fn leave_group(&self, user: &UserId, group_id: GroupId) -> ChatResult<()> {
        self.run(|db| membership::leave_group(db, user, group_id)).await
    }

    pub fn mark_read(&self, user: &UserId, group_id: GroupId) -> ChatResult<()> {
        self.read(|db| unread::mark_read(db, user, group_id))
    }

    // -- Messages --------------------------------------------------------

    pub fn authorize_post(&self, user: &UserId, group_id: GroupId, parent_id: Option<MessageId>) -> ChatResult<()> {
        self.read(|db| messages::authorize_post(db, user, group_id, parent_id).map(|_| ()))
    }

    pub async fn send(&self, user: &UserId, group_id: GroupId, draft: Draft) -> ChatResult<Message> {
        self.run(|db| messages::send(db, user, group_id, draft)).await
    }

    pub async fn delete_message(&self, user: &UserId, message_id: MessageId) -> ChatResult<()> {
        self.run(|db| messages::delete(db, user, message_id)).await
    }

    pub async fn toggle_pin(&self, user: &UserId, message_id: MessageId) -> ChatResult<Option<Message>> {
        self.run(|db| messages::toggle_pin(db, user, message_id)).await
    }

    pub fn pinned(&self, user: &UserId, group_id: GroupId) -> ChatResult<Option<Message>> {
        self.read(|db| messages::pinned(db, user, group_id))
    }

    pub fn get_message(&self, user: &UserId, message_id: MessageId) -> ChatResult<Message> {
        self.read(|db| messages::get_message(db, user, message_id))
    }

    pub async fn react(&self, user: &UserId, message_id: MessageId, emoji: &str) -> ChatResult<Vec<Reaction>> {
        self.run(|db| messages::react(db, user, message_id, emoji)).await
    }

    pub async fn remove_reaction(&self, user: &UserId, message_id: MessageId, emoji: &str) -> ChatResult<Vec<Reaction>> {
        self.run(|db| messages::remove_reaction(db, user, message_id, emoji)).await
    }

    pub async fn vote_poll(&self, user: &UserId, message_id: MessageId, option_index: usize) -> ChatResult<PollData> {
        self.run(|db| messages::vote_poll(db, user, message_id, option_index)).await
    }

    pub async fn join_event(&self, user: &UserId, message_id: MessageId) -> ChatResult<EventData> {
        self.run(|db| messages::join_event(db, user, message_id)).await
    }

    pub async fn clear_group_messages(&self, user: &UserId, group_id: GroupId) -> ChatResult<usize> {
        self.run(|db| messages::clear_group_messages(db, user, group_id)).await
    }

    pub fn list_messages(
        &self,
        user: &UserId,
        group_id: GroupId,
        before: Option<MessageId>,
        limit: u32,
    ) -> ChatResult<Vec<Message>> {
        self.read(|db| messages::list_messages(db, user, group_id, before, limit))
    }

    pub fn list_thread(&self, user: &UserId, parent_id: MessageId) -> ChatResult<Vec<Message>> {
        self.read(|db| messages::list_thread(db, user, parent_id))
    }

    // -- Moderation ------------------------------------------------------

    pub async fn submit_report(&self, user: &UserId, message_id: MessageId, reason: ReportReason) -> ChatResult<Report> {
        self.run(|db| moderation::submit_report(db, user, message_id, reason)).await
    }

    pub fn list_reports(&self, admin: &UserId) -> ChatResult<Vec<ReportDetails>> {
        self.read(|db| moderation::list_reports(db, admin))
    }

    pub async fn resolve_report(&self, admin: &UserId, report_id: ReportId, action: ReportAction) -> ChatResult<()> {
        self.run(|db| moderation::resolve_report(db, admin, report_id, action)).await
    }

    // -- Realtime --------------------------------------------------------

    pub async fn connect(&self, user: &UserId) -> (ConnectionId, EventReceiver) {
        self.hub.connect(user).await
    }

    pub async fn disconnect(&self, conn: ConnectionId) {
        self.hub.disconnect(conn).await;
    }

    /// Apply one frame received from a socket.
    pub async fn handle_client_event(&self, conn: ConnectionId, user: &UserId, event: ClientEvent) -> ChatResult<()> {
        match event {
            ClientEvent::JoinGroup { group_id } => {
                let can_read = self.read(|db| {
                    let group = db.get_group(group_id)?;
                    Ok(capabilities_in(db, user, &group)?.can_read)
                })?;
                if !can_read {
                    return Err(ChatError::forbidden("cannot access this group"));
                }
                self.hub.join(conn, ChannelKey::Group(group_id)).await;
            }
            ClientEvent::LeaveGroup { group_id } => {
                self.hub.leave(conn, &ChannelKey::Group(group_id)).await;
                self.mark_read(user, group_id)?;
            }
            ClientEvent::JoinUser => {
                self.hub.join(conn, ChannelKey::User(user.clone())).await;
            }
            ClientEvent::Typing { group_id } => {
                let summary = self.read(|db| Ok(db.user_summary(user)?))?;
                let relayed = self
                    .hub
                    .relay(conn, group_id, ServerEvent::Typing { group_id, user: summary })
                    .await;
                if !relayed {
                    return Err(ChatError::forbidden("join the group before typing in it"));
                }
            }
            ClientEvent::StopTyping { group_id } => {
                let event = ServerEvent::StopTyping {
                    group_id,
                    user_id: user.clone(),
                };
                if !self.hub.relay(conn, group_id, event).await {
                    return Err(ChatError::forbidden("join the group before typing in it"));
                }
            }
        }
        debug!(conn = %conn, user = %user, "client event handled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fixture, Fixture};
    use std::time::Duration;

    fn chat() -> (Chat, UserId, GroupId, GroupId) {
        let Fixture { db, admin, group, announcement } = fixture();
        (Chat::new(db), admin, group, announcement)
    }

    async fn next(rx: &mut EventReceiver) -> ServerEvent {
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("hub closed");
        (*event).clone()
    }

    #[tokio::test]
    async fn scenario_request_and_approve() {
        let (chat, admin, group, _) = chat();
        let bob = UserId::new("bob");
        let (_admin_conn, mut admin_rx) = chat.connect(&admin).await;
        let (_bob_conn, mut bob_rx) = chat.connect(&bob).await;

        chat.request_join(&bob, group).await.unwrap();
        assert!(matches!(next(&mut admin_rx).await, ServerEvent::JoinRequested { .. }));
        assert!(matches!(next(&mut bob_rx).await, ServerEvent::JoinRequested { .. }));

        chat.approve(&admin, group, &bob).await.unwrap();
        match next(&mut bob_rx).await {
            ServerEvent::RequestApproved { group_id, user, group_name } => {
                assert_eq!(group_id, group);
                assert_eq!(user.name, "Bob");
                assert_eq!(group_name, "General");
            }
            other => panic!("unexpected event {other:?}"),
        }

        chat.register_user(&bob, "Bob", true).unwrap();
        let views = chat.list_groups(&bob).unwrap();
        let view = views.iter().find(|v| v.group.id == group).unwrap();
        assert!(view.capabilities.is_member && !view.capabilities.is_pending);
    }

    #[tokio::test]
    async fn scenario_group_deletion_reaches_everyone() {
        let (chat, admin, group, _) = chat();
        let bob = UserId::new("bob");
        chat.add_member(&admin, group, &bob).await.unwrap();
        let msg = chat.send(&bob, group, Draft::text("bye")).await.unwrap();

        let (_c1, mut rx1) = chat.connect(&UserId::new("carol")).await;
        let (_c2, mut rx2) = chat.connect(&bob).await;

        chat.delete_group(&admin, group).await.unwrap();
        assert_eq!(next(&mut rx1).await, ServerEvent::GroupDeleted { group_id: group });
        assert_eq!(next(&mut rx2).await, ServerEvent::GroupDeleted { group_id: group });
        assert!(chat.list_thread(&bob, msg.id).is_err());
    }

    #[tokio::test]
    async fn new_message_goes_to_group_room_once() {
        let (chat, admin, group, _) = chat();
        let (conn, mut rx) = chat.connect(&admin).await;
        chat.handle_client_event(conn, &admin, ClientEvent::JoinGroup { group_id: group })
            .await
            .unwrap();

        let sent = chat.send(&admin, group, Draft::text("hello")).await.unwrap();
        assert_eq!(next(&mut rx).await, ServerEvent::NewMessage(sent));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn member_added_delivered_once_to_subscribed_user() {
        let (chat, admin, group, _) = chat();
        let bob = UserId::new("bob");
        chat.add_member(&admin, group, &bob).await.unwrap();
        let carol = UserId::new("carol");

        // Bob watches the room and his personal channel on one socket.
        let (conn, mut rx) = chat.connect(&bob).await;
        chat.handle_client_event(conn, &bob, ClientEvent::JoinGroup { group_id: group })
            .await
            .unwrap();

        chat.add_member(&admin, group, &carol).await.unwrap();
        assert!(matches!(next(&mut rx).await, ServerEvent::MemberAdded { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn joining_a_room_needs_read_access() {
        let (chat, _admin, group, announcement) = chat();
        let carol = UserId::new("carol");
        let (conn, _rx) = chat.connect(&carol).await;

        let err = chat
            .handle_client_event(conn, &carol, ClientEvent::JoinGroup { group_id: group })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));

        chat.handle_client_event(conn, &carol, ClientEvent::JoinGroup { group_id: announcement })
            .await
            .unwrap();
        assert!(chat.hub().is_subscribed(conn, &ChannelKey::Group(announcement)).await);
    }

    #[tokio::test]
    async fn typing_relays_to_others_only() {
        let (chat, admin, group, _) = chat();
        let bob = UserId::new("bob");
        chat.add_member(&admin, group, &bob).await.unwrap();

        let (a, mut admin_rx) = chat.connect(&admin).await;
        let (b, mut bob_rx) = chat.connect(&bob).await;
        for (conn, user) in [(a, &admin), (b, &bob)] {
            chat.handle_client_event(conn, user, ClientEvent::JoinGroup { group_id: group })
                .await
                .unwrap();
        }

        chat.handle_client_event(a, &admin, ClientEvent::Typing { group_id: group })
            .await
            .unwrap();
        match next(&mut bob_rx).await {
            ServerEvent::Typing { user, .. } => assert_eq!(user.name, "Admin"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(admin_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn leaving_a_room_marks_it_read() {
        let (chat, admin, group, _) = chat();
        let bob = UserId::new("bob");
        chat.add_member(&admin, group, &bob).await.unwrap();
        chat.send(&admin, group, Draft::text("unread")).await.unwrap();

        let (conn, _rx) = chat.connect(&bob).await;
        chat.handle_client_event(conn, &bob, ClientEvent::JoinGroup { group_id: group })
            .await
            .unwrap();
        chat.handle_client_event(conn, &bob, ClientEvent::LeaveGroup { group_id: group })
            .await
            .unwrap();

        chat.register_user(&bob, "Bob", true).unwrap();
        let views = chat.list_groups(&bob).unwrap();
        let view = views.iter().find(|v| v.group.id == group).unwrap();
        assert_eq!(view.unread_count, 0);
    }

    #[tokio::test]
    async fn register_user_auto_joins_existing_community() {
        let (chat, _, _, _) = chat();
        let dave = UserId::new("dave");

        chat.register_user(&dave, "  ", false).unwrap();
        assert!(matches!(chat.get_community(&dave), Err(ChatError::Forbidden(_))));

        chat.register_user(&dave, "Dave", true).unwrap();
        assert!(chat.get_community(&dave).unwrap().is_member(&dave));
        assert!(chat.register_user(&UserId::new(" "), "x", true).is_err());
    }

    #[tokio::test]
    async fn on_disk_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cohort.db");
        let admin = UserId::new("admin");

        {
            let chat = Chat::new(Database::open_at(&path).unwrap());
            chat.register_user(&admin, "Admin", false).unwrap();
            chat.create_community(&admin, "School", "").await.unwrap();
            chat.create_group(&admin, "Persisted", "").await.unwrap();
        }

        let chat = Chat::new(Database::open_at(&path).unwrap());
        let names: Vec<_> = chat
            .list_groups(&admin)
            .unwrap()
            .into_iter()
            .map(|v| v.group.name)
            .collect();
        assert_eq!(names, vec!["Announcements", "Persisted"]);
    }
}
