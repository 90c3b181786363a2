//! # User Service
//!
//! Registration, lookups and the admin account actions (block, unblock,
//! promote). Credentials and sessions live outside this crate.

use std::sync::Arc;

use chrono::Utc;
use domains::{
    Actor, AppError, DenyReason, NewUser, Page, PageRequest, ProfileChanges, RepositoryError, Result,
    Role, SortOrder, User, UserFilter, UserId, UserRepository, UserSortField,
};
use tracing::{debug, info, instrument, warn};

use crate::policy;
use crate::{Change, MAX_WRITE_ATTEMPTS};

const DUPLICATE_USER: &str = "user with that username and/or email already exists";
const DUPLICATE_USERNAME: &str = "username already exists";
const DUPLICATE_EMAIL: &str = "an account with this email address is already registered";

fn duplicate(key: &str) -> AppError {
    let message = match key {
        "username" => DUPLICATE_USERNAME,
        "email" => DUPLICATE_EMAIL,
        _ => DUPLICATE_USER,
    };
    AppError::Conflict(message.into())
}

pub struct UserService {
    users: Arc<dyn UserRepository>,
}

impl UserService {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    async fn load(&self, id: UserId) -> Result<User> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("User", "id", id))
    }

    async fn modify<F>(&self, id: UserId, mut apply: F) -> Result<User>
    where
        F: FnMut(&mut User) -> Change + Send,
    {
        let mut attempt = 1;
        loop {
            let mut user = self.load(id).await?;
            if apply(&mut user) == Change::Unchanged {
                debug!(user_id = %id, "account already in requested state");
                return Ok(user);
            }
            user.updated_at = Some(Utc::now());
            match self.users.update(&user).await {
                Ok(stored) => return Ok(stored),
                Err(RepositoryError::StaleVersion { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(user_id = %id, attempt, "account changed concurrently, retrying");
                    attempt += 1;
                }
                Err(RepositoryError::UniqueViolation(key)) => return Err(duplicate(key)),
                Err(err) => return Err(err.into()),
            }
        }
    }

    #[instrument(skip_all, fields(username = %new_user.username))]
    pub async fn register(&self, new_user: NewUser) -> Result<User> {
        let user = User::register(new_user);

        if self.users.exists_by_username(&user.username).await?
            || self.users.exists_by_email(&user.email).await?
        {
            return Err(AppError::Conflict(DUPLICATE_USER.into()));
        }

        match self.users.insert(&user).await {
            Ok(()) => {}
            Err(RepositoryError::UniqueViolation(_)) => {
                return Err(AppError::Conflict(DUPLICATE_USER.into()));
            }
            Err(err) => return Err(err.into()),
        }

        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    pub async fn get_by_id(&self, id: UserId) -> Result<User> {
        self.load(id).await
    }

    pub async fn get_by_username(&self, username: &str) -> Result<User> {
        self.users
            .find_by_username(username)
            .await?
            .ok_or_else(|| AppError::not_found("User", "username", username))
    }

    pub async fn get_by_email(&self, email: &str) -> Result<User> {
        self.users
            .find_by_email(email)
            .await?
            .ok_or_else(|| AppError::not_found("User", "email", email))
    }

    /// Changes names and email of an account, by its owner or an admin.
    /// Renaming is reserved for admins.
    #[instrument(skip(self, actor, changes), fields(actor_id = %actor.id))]
    pub async fn update_profile(&self, actor: &Actor, target: UserId, changes: ProfileChanges) -> Result<User> {
        policy::can_delete_account(actor, target).require()?;
        if changes.username.is_some() && !actor.is_admin() {
            warn!("rename attempted without admin role");
            return Err(AppError::Forbidden(DenyReason::AdminOnly));
        }

        let current = self.load(target).await?;
        let username = changes.username.as_deref().map(str::trim);
        let email = changes.email.as_deref().map(str::trim);
        if let Some(username) = username.filter(|name| *name != current.username) {
            if self.users.exists_by_username(username).await? {
                return Err(AppError::Conflict(DUPLICATE_USERNAME.into()));
            }
        }
        if let Some(email) = email.filter(|email| *email != current.email) {
            if self.users.exists_by_email(email).await? {
                return Err(AppError::Conflict(DUPLICATE_EMAIL.into()));
            }
        }

        let user = self
            .modify(target, |user| {
                let mut change = Change::Unchanged;
                let fields = [
                    (&mut user.first_name, changes.first_name.as_deref()),
                    (&mut user.last_name, changes.last_name.as_deref()),
                    (&mut user.email, email),
                    (&mut user.username, username),
                ];
                for (field, value) in fields {
                    if let Some(value) = value.filter(|value| *value != field.as_str()) {
                        *field = value.to_owned();
                        change = Change::Changed;
                    }
                }
                change
            })
            .await?;
        info!("profile updated");
        Ok(user)
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn block(&self, actor: &Actor, target: UserId) -> Result<User> {
        policy::can_administer_user(actor, target).require()?;
        let user = self
            .modify(target, |user| {
                if user.blocked {
                    return Change::Unchanged;
                }
                user.blocked = true;
                Change::Changed
            })
            .await?;
        info!("user blocked");
        Ok(user)
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn unblock(&self, actor: &Actor, target: UserId) -> Result<User> {
        policy::can_administer_user(actor, target).require()?;
        let user = self
            .modify(target, |user| {
                if !user.blocked {
                    return Change::Unchanged;
                }
                user.blocked = false;
                Change::Changed
            })
            .await?;
        info!("user unblocked");
        Ok(user)
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn promote_to_admin(&self, actor: &Actor, target: UserId) -> Result<User> {
        policy::can_administer_user(actor, target).require()?;
        let user = self
            .modify(target, |user| {
                if user.roles.insert(Role::Admin) {
                    Change::Changed
                } else {
                    Change::Unchanged
                }
            })
            .await?;
        info!("user promoted to admin");
        Ok(user)
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn delete(&self, actor: &Actor, target: UserId) -> Result<()> {
        policy::can_delete_account(actor, target).require()?;
        self.load(target).await?;

        self.users.delete(target).await?;
        info!("user deleted");
        Ok(())
    }

    /// Admin search over accounts.
    pub async fn filter(
        &self,
        actor: &Actor,
        criteria: &UserFilter,
        sort: SortOrder<UserSortField>,
        page: PageRequest,
    ) -> Result<Page<User>> {
        policy::can_administer(actor).require()?;
        let page = PageRequest::new(page.page, page.size);
        Ok(self.users.filter(criteria, sort, page).await?)
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.users.count().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::MockUserRepository;

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: format!("{username}@example.com"),
            first_name: "First".into(),
            last_name: "Last".into(),
        }
    }

    fn admin() -> Actor {
        Actor::new(UserId::generate(), [Role::User, Role::Admin], false)
    }

    fn serving(user: &User) -> MockUserRepository {
        let user = user.clone();
        let mut users = MockUserRepository::new();
        users
            .expect_find_by_id()
            .returning(move |_| Ok(Some(user.clone())));
        users
    }

    fn bump(user: &User) -> std::result::Result<User, RepositoryError> {
        let mut stored = user.clone();
        stored.version += 1;
        Ok(stored)
    }

    #[tokio::test]
    async fn register_creates_plain_member() {
        let mut users = MockUserRepository::new();
        users.expect_exists_by_username().returning(|_| Ok(false));
        users.expect_exists_by_email().returning(|_| Ok(false));
        users.expect_insert().times(1).returning(|_| Ok(()));

        let user = UserService::new(Arc::new(users))
            .register(new_user("alice"))
            .await
            .unwrap();
        assert_eq!(user.username, "alice");
        assert!(!user.is_admin());
        assert!(!user.blocked);
    }

    #[tokio::test]
    async fn register_duplicate_username_conflicts() {
        let mut users = MockUserRepository::new();
        users.expect_exists_by_username().returning(|_| Ok(true));
        users.expect_exists_by_email().returning(|_| Ok(false));
        users.expect_insert().never();

        let err = UserService::new(Arc::new(users))
            .register(new_user("alice"))
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Conflict(DUPLICATE_USER.into()));
    }

    #[tokio::test]
    async fn register_race_maps_unique_violation_to_conflict() {
        let mut users = MockUserRepository::new();
        users.expect_exists_by_username().returning(|_| Ok(false));
        users.expect_exists_by_email().returning(|_| Ok(false));
        users
            .expect_insert()
            .returning(|_| Err(RepositoryError::UniqueViolation("username")));

        let err = UserService::new(Arc::new(users))
            .register(new_user("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn block_sets_flag_once() {
        let target = User::register(new_user("bob"));
        let mut users = serving(&target);
        users.expect_update().times(1).returning(bump);

        let blocked = UserService::new(Arc::new(users))
            .block(&admin(), target.id)
            .await
            .unwrap();
        assert!(blocked.blocked);
    }

    #[tokio::test]
    async fn blocking_blocked_user_writes_nothing() {
        let mut target = User::register(new_user("bob"));
        target.blocked = true;
        let mut users = serving(&target);
        users.expect_update().never();

        let same = UserService::new(Arc::new(users))
            .block(&admin(), target.id)
            .await
            .unwrap();
        assert!(same.blocked);
    }

    #[tokio::test]
    async fn admin_cannot_block_itself() {
        let admin = admin();
        let mut users = MockUserRepository::new();
        users.expect_find_by_id().never();

        let service = UserService::new(Arc::new(users));
        for result in [
            service.block(&admin, admin.id).await,
            service.unblock(&admin, admin.id).await,
            service.promote_to_admin(&admin, admin.id).await,
        ] {
            assert_eq!(result.unwrap_err(), AppError::Forbidden(DenyReason::SelfTarget));
        }
    }

    #[tokio::test]
    async fn member_cannot_promote() {
        let member = User::register(new_user("carol")).actor();
        let users = MockUserRepository::new();

        let err = UserService::new(Arc::new(users))
            .promote_to_admin(&member, UserId::generate())
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Forbidden(DenyReason::AdminOnly));
    }

    #[tokio::test]
    async fn block_missing_user_is_not_found() {
        let mut users = MockUserRepository::new();
        users.expect_find_by_id().returning(|_| Ok(None));
        let target = UserId::generate();

        let err = UserService::new(Arc::new(users))
            .block(&admin(), target)
            .await
            .unwrap_err();
        assert_eq!(err, AppError::not_found("User", "id", target));
    }

    #[tokio::test]
    async fn stranger_cannot_delete_account() {
        let member = User::register(new_user("dave")).actor();
        let mut users = MockUserRepository::new();
        users.expect_delete().never();

        let err = UserService::new(Arc::new(users))
            .delete(&member, UserId::generate())
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Forbidden(DenyReason::NotOwnerOrAdmin));
    }

    #[tokio::test]
    async fn member_updates_own_profile() {
        let target = User::register(new_user("frank"));
        let mut users = serving(&target);
        users.expect_exists_by_email().times(1).returning(|_| Ok(false));
        users.expect_exists_by_username().never();
        users.expect_update().times(1).returning(bump);

        let changes = ProfileChanges {
            first_name: Some("Francis".into()),
            email: Some(" francis@example.com ".into()),
            ..ProfileChanges::default()
        };
        let updated = UserService::new(Arc::new(users))
            .update_profile(&target.actor(), target.id, changes)
            .await
            .unwrap();
        assert_eq!(updated.first_name, "Francis");
        assert_eq!(updated.last_name, "Last");
        assert_eq!(updated.email, "francis@example.com");
        assert!(updated.updated_at.is_some());
    }

    #[tokio::test]
    async fn unchanged_profile_writes_nothing() {
        let target = User::register(new_user("gina"));
        let mut users = serving(&target);
        users.expect_exists_by_email().never();
        users.expect_update().never();

        let changes = ProfileChanges {
            email: Some(target.email.clone()),
            last_name: Some("Last".into()),
            ..ProfileChanges::default()
        };
        let same = UserService::new(Arc::new(users))
            .update_profile(&target.actor(), target.id, changes)
            .await
            .unwrap();
        assert_eq!(same.version, target.version);
    }

    #[tokio::test]
    async fn members_cannot_rename() {
        let target = User::register(new_user("hank"));
        let mut users = MockUserRepository::new();
        users.expect_find_by_id().never();

        let changes = ProfileChanges {
            username: Some("henry".into()),
            ..ProfileChanges::default()
        };
        let err = UserService::new(Arc::new(users))
            .update_profile(&target.actor(), target.id, changes)
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Forbidden(DenyReason::AdminOnly));
    }

    #[tokio::test]
    async fn stranger_cannot_update_profile() {
        let stranger = User::register(new_user("ivan")).actor();
        let users = MockUserRepository::new();

        let err = UserService::new(Arc::new(users))
            .update_profile(&stranger, UserId::generate(), ProfileChanges::default())
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Forbidden(DenyReason::NotOwnerOrAdmin));
    }

    #[tokio::test]
    async fn admin_rename_to_taken_username_conflicts() {
        let target = User::register(new_user("jane"));
        let mut users = serving(&target);
        users.expect_exists_by_username().returning(|_| Ok(true));
        users.expect_update().never();

        let changes = ProfileChanges {
            username: Some("taken".into()),
            ..ProfileChanges::default()
        };
        let err = UserService::new(Arc::new(users))
            .update_profile(&admin(), target.id, changes)
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Conflict(DUPLICATE_USERNAME.into()));
    }

    #[tokio::test]
    async fn email_race_maps_unique_violation_to_conflict() {
        let target = User::register(new_user("kate"));
        let mut users = serving(&target);
        users.expect_exists_by_email().returning(|_| Ok(false));
        users
            .expect_update()
            .times(1)
            .returning(|_| Err(RepositoryError::UniqueViolation("email")));

        let changes = ProfileChanges {
            email: Some("contested@example.com".into()),
            ..ProfileChanges::default()
        };
        let err = UserService::new(Arc::new(users))
            .update_profile(&target.actor(), target.id, changes)
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Conflict(DUPLICATE_EMAIL.into()));
    }

    #[tokio::test]
    async fn get_by_email_reports_missing() {
        let mut users = MockUserRepository::new();
        users.expect_find_by_email().returning(|_| Ok(None));

        let err = UserService::new(Arc::new(users))
            .get_by_email("ghost@example.com")
            .await
            .unwrap_err();
        assert_eq!(err, AppError::not_found("User", "email", "ghost@example.com"));
    }

    #[tokio::test]
    async fn filter_is_admin_only() {
        let member = User::register(new_user("erin")).actor();
        let mut users = MockUserRepository::new();
        users.expect_filter().never();

        let err = UserService::new(Arc::new(users))
            .filter(&member, &UserFilter::default(), SortOrder::default(), PageRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Forbidden(DenyReason::AdminOnly));
    }
}
