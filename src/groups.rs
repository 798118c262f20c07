//! Registry of custom group chats: the locally known set of groups, their
//! rosters, and the membership mutations layered on the same REST service
//! the conversation cache talks to. Every mutation is confirmation-first:
//! local state is replaced with the server's view on success and left
//! untouched on failure.

use std::collections::HashMap;

use thiserror::Error;

use crate::api::{ApiError, Group, GroupRole};

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("group {0} is not loaded; run a refresh first")]
    UnknownGroup(i64),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// The acting user's standing in a group. The only transitions are
/// NotMember -> Member (added), Member -> Admin (at creation, as creator)
/// and Member|Admin -> NotMember (self-leave or admin-remove).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    NotMember,
    Member,
    Admin,
}

/// Remote side of the registry, mirroring the group-chat endpoints.
pub trait GroupGateway {
    async fn list_groups(&self) -> Result<Vec<Group>, ApiError>;

    async fn create_group(
        &self,
        name: &str,
        member_ids: &[i64],
        avatar_color: Option<&str>,
    ) -> Result<Group, ApiError>;

    async fn update_group(
        &self,
        group_id: i64,
        name: Option<&str>,
        avatar_color: Option<&str>,
    ) -> Result<Group, ApiError>;

    async fn add_members(&self, group_id: i64, user_ids: &[i64]) -> Result<Group, ApiError>;

    async fn remove_member(&self, group_id: i64, user_id: i64) -> Result<(), ApiError>;
}

pub struct GroupRegistry<G> {
    gateway: G,
    current_user_id: Option<i64>,
    groups: HashMap<i64, Group>,
}

impl<G: GroupGateway> GroupRegistry<G> {
    pub fn new(gateway: G, current_user_id: Option<i64>) -> Self {
        Self {
            gateway,
            current_user_id,
            groups: HashMap::new(),
        }
    }

    /// Replaces the known set of groups with the server's list.
    pub async fn refresh(&mut self) -> Result<(), GroupError> {
        let groups = self.gateway.list_groups().await?;
        self.groups = groups.into_iter().map(|group| (group.id, group)).collect();
        Ok(())
    }

    pub async fn create(
        &mut self,
        name: &str,
        member_ids: &[i64],
        avatar_color: Option<&str>,
    ) -> Result<&Group, GroupError> {
        let group = self
            .gateway
            .create_group(name, member_ids, avatar_color)
            .await?;
        Ok(self.groups.entry(group.id).insert_entry(group).into_mut())
    }

    pub async fn rename(&mut self, group_id: i64, name: &str) -> Result<&Group, GroupError> {
        self.update(group_id, Some(name), None).await
    }

    pub async fn recolor(&mut self, group_id: i64, color: &str) -> Result<&Group, GroupError> {
        self.update(group_id, None, Some(color)).await
    }

    async fn update(
        &mut self,
        group_id: i64,
        name: Option<&str>,
        avatar_color: Option<&str>,
    ) -> Result<&Group, GroupError> {
        if !self.groups.contains_key(&group_id) {
            return Err(GroupError::UnknownGroup(group_id));
        }
        let group = self
            .gateway
            .update_group(group_id, name, avatar_color)
            .await?;
        Ok(self.groups.entry(group_id).insert_entry(group).into_mut())
    }

    pub async fn add_members(
        &mut self,
        group_id: i64,
        user_ids: &[i64],
    ) -> Result<&Group, GroupError> {
        if !self.groups.contains_key(&group_id) {
            return Err(GroupError::UnknownGroup(group_id));
        }
        let group = self.gateway.add_members(group_id, user_ids).await?;
        Ok(self.groups.entry(group_id).insert_entry(group).into_mut())
    }

    /// Removes a member from the roster. When the removed member is the
    /// acting user this is the self-leave transition and the group drops
    /// out of the registry entirely.
    pub async fn remove_member(&mut self, group_id: i64, user_id: i64) -> Result<(), GroupError> {
        if !self.groups.contains_key(&group_id) {
            return Err(GroupError::UnknownGroup(group_id));
        }
        self.gateway.remove_member(group_id, user_id).await?;
        if Some(user_id) == self.current_user_id {
            self.groups.remove(&group_id);
        } else if let Some(group) = self.groups.get_mut(&group_id) {
            group.members.retain(|member| member.user_id != user_id);
        }
        Ok(())
    }

    pub fn get(&self, group_id: i64) -> Option<&Group> {
        self.groups.get(&group_id)
    }

    /// Groups sorted by id for stable listings.
    pub fn groups(&self) -> Vec<&Group> {
        let mut groups: Vec<&Group> = self.groups.values().collect();
        groups.sort_by_key(|group| group.id);
        groups
    }

    pub fn membership(&self, group_id: i64, user_id: i64) -> Membership {
        let Some(group) = self.groups.get(&group_id) else {
            return Membership::NotMember;
        };
        match group
            .members
            .iter()
            .find(|member| member.user_id == user_id)
        {
            Some(member) if member.role == GroupRole::Admin => Membership::Admin,
            Some(_) => Membership::Member,
            None => Membership::NotMember,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::GroupMember;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    fn member(user_id: i64, role: GroupRole) -> GroupMember {
        GroupMember {
            user_id,
            name: format!("user-{user_id}"),
            role,
        }
    }

    fn group(id: i64, name: &str, members: Vec<GroupMember>) -> Group {
        Group {
            id,
            name: name.to_string(),
            avatar_color: Some("#1d4ed8".to_string()),
            members,
        }
    }

    #[derive(Default)]
    struct MockGateway {
        lists: RefCell<VecDeque<Result<Vec<Group>, ApiError>>>,
        mutations: RefCell<VecDeque<Result<Group, ApiError>>>,
        removals: RefCell<VecDeque<Result<(), ApiError>>>,
    }

    impl GroupGateway for &MockGateway {
        async fn list_groups(&self) -> Result<Vec<Group>, ApiError> {
            self.lists.borrow_mut().pop_front().expect("unexpected list")
        }

        async fn create_group(
            &self,
            _name: &str,
            _member_ids: &[i64],
            _avatar_color: Option<&str>,
        ) -> Result<Group, ApiError> {
            self.mutations
                .borrow_mut()
                .pop_front()
                .expect("unexpected create")
        }

        async fn update_group(
            &self,
            _group_id: i64,
            _name: Option<&str>,
            _avatar_color: Option<&str>,
        ) -> Result<Group, ApiError> {
            self.mutations
                .borrow_mut()
                .pop_front()
                .expect("unexpected update")
        }

        async fn add_members(&self, _group_id: i64, _user_ids: &[i64]) -> Result<Group, ApiError> {
            self.mutations
                .borrow_mut()
                .pop_front()
                .expect("unexpected add")
        }

        async fn remove_member(&self, _group_id: i64, _user_id: i64) -> Result<(), ApiError> {
            self.removals
                .borrow_mut()
                .pop_front()
                .expect("unexpected removal")
        }
    }

    #[tokio::test]
    async fn creator_becomes_admin_of_the_new_group() {
        let gateway = MockGateway::default();
        gateway.mutations.borrow_mut().push_back(Ok(group(
            5,
            "officers",
            vec![member(7, GroupRole::Admin), member(8, GroupRole::Member)],
        )));

        let mut registry = GroupRegistry::new(&gateway, Some(7));
        registry
            .create("officers", &[8], Some("#1d4ed8"))
            .await
            .expect("create");
        assert_eq!(registry.membership(5, 7), Membership::Admin);
        assert_eq!(registry.membership(5, 8), Membership::Member);
        assert_eq!(registry.membership(5, 9), Membership::NotMember);
    }

    #[tokio::test]
    async fn failed_rename_leaves_roster_and_name_unchanged() {
        let gateway = MockGateway::default();
        gateway
            .lists
            .borrow_mut()
            .push_back(Ok(vec![group(3, "events", vec![member(1, GroupRole::Admin)])]));
        gateway
            .mutations
            .borrow_mut()
            .push_back(Err(ApiError::Status(500)));

        let mut registry = GroupRegistry::new(&gateway, Some(1));
        registry.refresh().await.expect("refresh");
        let error = registry.rename(3, "renamed").await.expect_err("rename");
        assert!(matches!(error, GroupError::Api(_)));
        assert_eq!(registry.get(3).map(|group| group.name.as_str()), Some("events"));
    }

    #[tokio::test]
    async fn adding_members_replaces_roster_with_server_view() {
        let gateway = MockGateway::default();
        gateway
            .lists
            .borrow_mut()
            .push_back(Ok(vec![group(3, "events", vec![member(1, GroupRole::Admin)])]));
        gateway.mutations.borrow_mut().push_back(Ok(group(
            3,
            "events",
            vec![
                member(1, GroupRole::Admin),
                member(2, GroupRole::Member),
                member(4, GroupRole::Member),
            ],
        )));

        let mut registry = GroupRegistry::new(&gateway, Some(1));
        registry.refresh().await.expect("refresh");
        registry.add_members(3, &[2, 4]).await.expect("add");
        assert_eq!(registry.membership(3, 2), Membership::Member);
        assert_eq!(registry.membership(3, 4), Membership::Member);
    }

    #[tokio::test]
    async fn removing_self_drops_the_group_from_the_registry() {
        let gateway = MockGateway::default();
        gateway.lists.borrow_mut().push_back(Ok(vec![group(
            3,
            "events",
            vec![member(1, GroupRole::Admin), member(2, GroupRole::Member)],
        )]));
        gateway.removals.borrow_mut().push_back(Ok(()));

        let mut registry = GroupRegistry::new(&gateway, Some(2));
        registry.refresh().await.expect("refresh");
        registry.remove_member(3, 2).await.expect("leave");
        assert!(registry.get(3).is_none());
        assert_eq!(registry.membership(3, 2), Membership::NotMember);
    }

    #[tokio::test]
    async fn removing_another_member_prunes_only_that_member() {
        let gateway = MockGateway::default();
        gateway.lists.borrow_mut().push_back(Ok(vec![group(
            3,
            "events",
            vec![member(1, GroupRole::Admin), member(2, GroupRole::Member)],
        )]));
        gateway.removals.borrow_mut().push_back(Ok(()));

        let mut registry = GroupRegistry::new(&gateway, Some(1));
        registry.refresh().await.expect("refresh");
        registry.remove_member(3, 2).await.expect("remove");
        assert_eq!(registry.membership(3, 2), Membership::NotMember);
        assert_eq!(registry.membership(3, 1), Membership::Admin);
    }

    #[tokio::test]
    async fn failed_removal_leaves_roster_unchanged() {
        let gateway = MockGateway::default();
        gateway.lists.borrow_mut().push_back(Ok(vec![group(
            3,
            "events",
            vec![member(1, GroupRole::Admin), member(2, GroupRole::Member)],
        )]));
        gateway
            .removals
            .borrow_mut()
            .push_back(Err(ApiError::Status(403)));

        let mut registry = GroupRegistry::new(&gateway, Some(1));
        registry.refresh().await.expect("refresh");
        let error = registry.remove_member(3, 2).await.expect_err("remove");
        assert!(matches!(error, GroupError::Api(_)));
        assert_eq!(registry.membership(3, 2), Membership::Member);
    }

    #[tokio::test]
    async fn removal_without_a_recorded_user_never_takes_the_self_leave_path() {
        let gateway = MockGateway::default();
        gateway.lists.borrow_mut().push_back(Ok(vec![group(
            3,
            "events",
            vec![member(0, GroupRole::Admin), member(2, GroupRole::Member)],
        )]));
        gateway.removals.borrow_mut().push_back(Ok(()));

        let mut registry = GroupRegistry::new(&gateway, None);
        registry.refresh().await.expect("refresh");
        registry.remove_member(3, 0).await.expect("remove");
        assert!(registry.get(3).is_some());
        assert_eq!(registry.membership(3, 0), Membership::NotMember);
        assert_eq!(registry.membership(3, 2), Membership::Member);
    }

    #[tokio::test]
    async fn mutating_an_unknown_group_is_rejected_locally() {
        let gateway = MockGateway::default();
        let mut registry = GroupRegistry::new(&gateway, Some(1));
        let error = registry.rename(99, "nope").await.expect_err("rename");
        assert!(matches!(error, GroupError::UnknownGroup(99)));
    }
}
