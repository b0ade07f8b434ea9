use anyhow::Context;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tracing::{debug, info, warn};

use crate::{
    config::AdminBootstrap,
    db,
    entities::user,
    error::{AppError, AppResult, FieldErrors, NON_FIELD_ERRORS},
    mailer::{OutgoingMail, Outbox},
    models::{
        Field, Page, SignupRequest, SignupResponse, TokenRequest, TokenResponse, UserRead,
        UserWrite,
    },
    policy::Role,
    tokens::TokenSigner,
    validators::{self, RuleViolation, USERNAME_MAX_LENGTH},
};

const PERSON_NAME_MAX_LENGTH: usize = 150;

pub async fn list_users(
    db: &DatabaseConnection,
    search: Option<&str>,
    index: u64,
    page_size: u64,
) -> AppResult<Page<UserRead>> {
    let mut query = user::Entity::find().order_by_asc(user::Column::Username);
    if let Some(search) = search.map(str::trim).filter(|s| !s.is_empty()) {
        query = query.filter(user::Column::Username.like(db::contains_literal(search)));
    }
    let page = db::fetch_page(db, query, index, page_size).await?;
    Ok(page.map(UserRead::from))
}

pub async fn find_by_username(db: &DatabaseConnection, username: &str) -> AppResult<user::Model> {
    user::Entity::find()
        .filter(user::Column::Username.eq(username))
        .one(db)
        .await?
        .ok_or(AppError::NotFound)
}

fn username_rules(username: &str) -> Result<(), RuleViolation> {
    validators::validate_text(username, USERNAME_MAX_LENGTH)?;
    validators::validate_username(username)
}

fn check_username(
    errors: &mut FieldErrors,
    username: Option<Field<String>>,
    required: bool,
) -> Option<String> {
    let username = errors.take("username", username, required)?;
    errors.check("username", username_rules(&username).map(|()| username))
}

fn check_email(
    errors: &mut FieldErrors,
    email: Option<Field<String>>,
    required: bool,
) -> Option<String> {
    let email = errors.take("email", email, required)?;
    errors.check("email", validators::validate_email(&email).map(|()| email))
}

fn check_person_name(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<Field<String>>,
) -> Option<String> {
    let value = errors.take(field, value, false)?;
    if value.chars().count() > PERSON_NAME_MAX_LENGTH {
        errors.add(field, RuleViolation::TooLong(PERSON_NAME_MAX_LENGTH).to_string());
        return None;
    }
    Some(value)
}

/// Adds a field error when another user already holds `value` in `column`.
async fn check_taken(
    db: &DatabaseConnection,
    errors: &mut FieldErrors,
    field: &str,
    column: user::Column,
    value: &str,
    except: Option<i32>,
) -> AppResult<()> {
    let mut query = user::Entity::find().filter(column.eq(value));
    if let Some(id) = except {
        query = query.filter(user::Column::Id.ne(id));
    }
    if query.one(db).await?.is_some() {
        errors.add(field, format!("a user with that {field} already exists"));
    }
    Ok(())
}

struct ValidatedUser {
    username: Option<String>,
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    bio: Option<String>,
    role: Option<Role>,
}

async fn validate_user(
    db: &DatabaseConnection,
    input: UserWrite,
    except: Option<i32>,
    partial: bool,
) -> AppResult<ValidatedUser> {
    let mut errors = FieldErrors::new();
    let username = check_username(&mut errors, input.username, !partial);
    let email = check_email(&mut errors, input.email, !partial);
    let first_name = check_person_name(&mut errors, "first_name", input.first_name);
    let last_name = check_person_name(&mut errors, "last_name", input.last_name);
    let bio = errors.take("bio", input.bio, false);
    let role = errors.take("role", input.role, false);

    if let Some(username) = &username {
        check_taken(db, &mut errors, "username", user::Column::Username, username, except).await?;
    }
    if let Some(email) = &email {
        check_taken(db, &mut errors, "email", user::Column::Email, email, except).await?;
    }
    errors.into_result()?;

    Ok(ValidatedUser { username, email, first_name, last_name, bio, role })
}

pub async fn create_user(db: &DatabaseConnection, input: UserWrite) -> AppResult<UserRead> {
    let valid = validate_user(db, input, None, false).await?;
    let (Some(username), Some(email)) = (valid.username, valid.email) else {
        return Err(AppError::Validation(FieldErrors::new()));
    };

    let created = user::ActiveModel {
        username: Set(username),
        email: Set(email),
        first_name: Set(valid.first_name),
        last_name: Set(valid.last_name),
        bio: Set(valid.bio),
        role: Set(valid.role.unwrap_or_default()),
        is_superuser: Set(false),
        last_login: Set(None),
        date_joined: Set(now_sec()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!(username = %created.username, role = created.role.as_str(), "user created");
    Ok(created.into())
}

/// Partial update. `role` is applied only when `allow_role` is set and is
/// otherwise dropped without complaint.
pub async fn update_user(
    db: &DatabaseConnection,
    existing: user::Model,
    input: UserWrite,
    allow_role: bool,
) -> AppResult<UserRead> {
    let valid = validate_user(db, input, Some(existing.id), true).await?;
    let previous_role = existing.role;

    let mut active: user::ActiveModel = existing.clone().into();
    if let Some(username) = valid.username {
        active.username = Set(username);
    }
    if let Some(email) = valid.email {
        active.email = Set(email);
    }
    if let Some(first_name) = valid.first_name {
        active.first_name = Set(Some(first_name));
    }
    if let Some(last_name) = valid.last_name {
        active.last_name = Set(Some(last_name));
    }
    if let Some(bio) = valid.bio {
        active.bio = Set(Some(bio));
    }
    match valid.role {
        Some(role) if allow_role => active.role = Set(role),
        Some(role) if role != previous_role => {
            debug!(
                username = %existing.username,
                requested = role.as_str(),
                "role change ignored"
            );
        },
        _ => {},
    }

    if !active.is_changed() {
        return Ok(existing.into());
    }
    let updated = active.update(db).await?;
    Ok(updated.into())
}

pub async fn delete_user(db: &DatabaseConnection, username: &str) -> AppResult<()> {
    let result = user::Entity::delete_many()
        .filter(user::Column::Username.eq(username))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }
    info!(username, "user deleted");
    Ok(())
}

/// Finds or creates the user for the exact (email, username) pair and mails a
/// confirmation code. Mail problems never fail the request.
pub async fn signup(
    db: &DatabaseConnection,
    signer: &TokenSigner,
    outbox: &Outbox,
    input: SignupRequest,
) -> AppResult<SignupResponse> {
    let mut errors = FieldErrors::new();
    let email = check_email(&mut errors, input.email, true);
    let username = check_username(&mut errors, input.username, true);
    errors.into_result()?;
    let (Some(email), Some(username)) = (email, username) else {
        return Err(AppError::Validation(FieldErrors::new()));
    };

    let user = match find_pair(db, &username, &email).await? {
        Some(user) => user,
        None => register(db, &username, &email).await?,
    };

    let code = signer.confirmation_code(&user);
    outbox
        .deliver(OutgoingMail {
            to: user.email.clone(),
            subject: "Your confirmation code".to_string(),
            body: format!(
                "Hello {},\n\nyour confirmation code is: {code}\n\n\
                 Exchange it for an access token at /api/v1/auth/token.\n",
                user.username
            ),
        })
        .await;

    Ok(SignupResponse { email: user.email, username: user.username })
}

async fn find_pair(
    db: &DatabaseConnection,
    username: &str,
    email: &str,
) -> AppResult<Option<user::Model>> {
    Ok(user::Entity::find()
        .filter(user::Column::Username.eq(username))
        .filter(user::Column::Email.eq(email))
        .one(db)
        .await?)
}

/// Inserts the pair. A concurrent signup for the same pair may win the
/// insert; its row is returned in that case.
async fn register(db: &DatabaseConnection, username: &str, email: &str) -> AppResult<user::Model> {
    let inserted = user::ActiveModel {
        username: Set(username.to_string()),
        email: Set(email.to_string()),
        role: Set(Role::User),
        is_superuser: Set(false),
        last_login: Set(None),
        date_joined: Set(now_sec()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(AppError::from);

    match inserted {
        Ok(user) => {
            info!(username = %user.username, "user signed up");
            Ok(user)
        },
        Err(AppError::Conflict(detail)) => {
            if let Some(user) = find_pair(db, username, email).await? {
                debug!(username, "signup pair registered concurrently");
                return Ok(user);
            }
            debug!(username, detail = %detail, "signup pair clashes with existing users");
            Err(AppError::Validation(FieldErrors::single(
                NON_FIELD_ERRORS,
                "username or email is already registered with a different account",
            )))
        },
        Err(err) => Err(err),
    }
}

pub async fn exchange_token(
    db: &DatabaseConnection,
    signer: &TokenSigner,
    input: TokenRequest,
) -> AppResult<TokenResponse> {
    let mut errors = FieldErrors::new();
    let username = check_username(&mut errors, input.username, true);
    let code = errors.take("confirmation_code", input.confirmation_code, true);
    let code = code.and_then(|code| {
        let blank = validators::validate_text(&code, usize::MAX);
        errors.check("confirmation_code", blank.map(|()| code))
    });
    errors.into_result()?;
    let (Some(username), Some(code)) = (username, code) else {
        return Err(AppError::Validation(FieldErrors::new()));
    };

    let user = find_by_username(db, &username).await?;
    if let Err(err) = signer.check_confirmation_code(&user, code.trim()) {
        debug!(username = %user.username, error = %err, "confirmation code rejected");
        return Err(AppError::Validation(FieldErrors::single(
            "confirmation_code",
            "invalid or expired confirmation code",
        )));
    }

    // Any later value works; it must differ from the one the code was bound to.
    let now = now_sec().max(user.last_login.map_or(0, |t| t + 1));
    let user_id = user.id;
    let mut active: user::ActiveModel = user.into();
    active.last_login = Set(Some(now));
    let user = active.update(db).await?;

    info!(username = %user.username, "access token issued");
    Ok(TokenResponse { token: format!("Bearer {}", signer.access_token(user_id)) })
}

/// Makes sure the configured administrator exists and carries superuser rights.
pub async fn ensure_admin(db: &DatabaseConnection, admin: &AdminBootstrap) -> anyhow::Result<()> {
    username_rules(&admin.username)
        .with_context(|| format!("ADMIN_USERNAME {:?}", admin.username))?;
    validators::validate_email(&admin.email)
        .with_context(|| format!("ADMIN_EMAIL {:?}", admin.email))?;

    let existing = user::Entity::find()
        .filter(user::Column::Username.eq(&admin.username))
        .one(db)
        .await?;
    match existing {
        Some(user) if user.is_superuser => Ok(()),
        Some(user) => {
            if user.email != admin.email {
                warn!(
                    username = %user.username,
                    "bootstrap admin email differs from the stored one"
                );
            }
            let mut active: user::ActiveModel = user.into();
            active.is_superuser = Set(true);
            active.role = Set(Role::Admin);
            active.update(db).await?;
            info!(username = %admin.username, "promoted bootstrap admin");
            Ok(())
        },
        None => {
            user::ActiveModel {
                username: Set(admin.username.clone()),
                email: Set(admin.email.clone()),
                role: Set(Role::Admin),
                is_superuser: Set(true),
                last_login: Set(None),
                date_joined: Set(now_sec()),
                ..Default::default()
            }
            .insert(db)
            .await?;
            info!(username = %admin.username, "created bootstrap admin");
            Ok(())
        },
    }
}

fn now_sec() -> i64 {
    jiff::Timestamp::now().as_second()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        mailer::testing::RecordingMailer,
        tests::{insert_user, memory_db},
    };

    fn signer() -> TokenSigner {
        TokenSigner::new("test-secret", 1, 1)
    }

    fn signup_request(email: &str, username: &str) -> SignupRequest {
        SignupRequest {
            email: Some(Field::Valid(email.into())),
            username: Some(Field::Valid(username.into())),
        }
    }

    fn valid(value: &str) -> Option<Field<String>> {
        Some(Field::Valid(value.into()))
    }

    fn last_code(mailer: &RecordingMailer) -> String {
        let sent = mailer.sent.lock().unwrap();
        let body = &sent.last().expect("a mail was sent").body;
        let line = body.lines().find(|l| l.contains("confirmation code is")).unwrap();
        line.rsplit(' ').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn signup_is_idempotent_for_the_same_pair() {
        let db = memory_db().await;
        let mailer = Arc::new(RecordingMailer::default());
        let outbox = Outbox::new(mailer.clone(), 100);

        let request = || signup_request("a@x.com", "alice");
        let first = signup(&db, &signer(), &outbox, request()).await.unwrap();
        let again = signup(&db, &signer(), &outbox, request()).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(user::Entity::find().all(&db).await.unwrap().len(), 1);
        assert_eq!(mailer.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn signup_with_clashing_pair_is_validation_error() {
        let db = memory_db().await;
        let outbox = Outbox::new(Arc::new(RecordingMailer::default()), 100);
        signup(&db, &signer(), &outbox, signup_request("a@x.com", "alice")).await.unwrap();

        let err = signup(&db, &signer(), &outbox, signup_request("other@x.com", "alice"))
            .await
            .unwrap_err();
        let AppError::Validation(errors) = err else { panic!("expected validation error") };
        assert!(errors.get(NON_FIELD_ERRORS).is_some());
    }

    #[tokio::test]
    async fn signup_succeeds_when_mail_fails() {
        let db = memory_db().await;
        let mailer = RecordingMailer { fail: true, ..Default::default() };
        let outbox = Outbox::new(Arc::new(mailer), 100);
        let response = signup(&db, &signer(), &outbox, signup_request("a@x.com", "alice")).await;
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn signup_rejects_reserved_and_malformed_input() {
        let db = memory_db().await;
        let outbox = Outbox::new(Arc::new(RecordingMailer::default()), 100);
        let request = signup_request("not-an-email", "Me");
        let err = signup(&db, &signer(), &outbox, request).await.unwrap_err();
        let AppError::Validation(errors) = err else { panic!("expected validation error") };
        assert!(errors.get("email").is_some());
        assert!(errors.get("username").is_some());
    }

    #[tokio::test]
    async fn concurrent_signup_for_the_same_pair_reuses_the_row() {
        let db = memory_db().await;
        // The row another request inserted between our lookup and our insert.
        let winner = register(&db, "alice", "a@x.com").await.unwrap();

        let loser = register(&db, "alice", "a@x.com").await.unwrap();
        assert_eq!(loser.id, winner.id);
        assert_eq!(user::Entity::find().all(&db).await.unwrap().len(), 1);

        let err = register(&db, "alice", "other@x.com").await.unwrap_err();
        let AppError::Validation(errors) = err else { panic!("expected validation error") };
        assert!(errors.get(NON_FIELD_ERRORS).is_some());
    }

    #[tokio::test]
    async fn mistyped_user_fields_are_reported_by_name() {
        let db = memory_db().await;
        let input = UserWrite {
            username: valid("carol"),
            email: valid("carol@example.com"),
            role: Some(Field::Invalid("unknown variant `owner`".into())),
            bio: Some(Field::Invalid("invalid type: integer `7`".into())),
            ..Default::default()
        };
        let err = create_user(&db, input).await.unwrap_err();
        let AppError::Validation(errors) = err else { panic!("expected validation error") };
        assert!(errors.get("role").is_some());
        assert!(errors.get("bio").is_some());
        assert!(errors.get("username").is_none());
    }

    #[tokio::test]
    async fn blank_confirmation_code_is_a_field_error() {
        let db = memory_db().await;
        let request = TokenRequest { username: valid("alice"), confirmation_code: valid("  ") };
        let err = exchange_token(&db, &signer(), request).await.unwrap_err();
        let AppError::Validation(errors) = err else { panic!("expected validation error") };
        assert!(errors.get("confirmation_code").is_some());
    }

    #[tokio::test]
    async fn confirmation_code_is_single_use() {
        let db = memory_db().await;
        let mailer = Arc::new(RecordingMailer::default());
        let outbox = Outbox::new(mailer.clone(), 100);
        signup(&db, &signer(), &outbox, signup_request("a@x.com", "alice")).await.unwrap();
        let code = last_code(&mailer);

        let request = || TokenRequest {
            username: valid("alice"),
            confirmation_code: Some(Field::Valid(code.clone())),
        };
        let token = exchange_token(&db, &signer(), request()).await.unwrap();
        assert!(token.token.starts_with("Bearer "));
        let access = token.token.trim_start_matches("Bearer ");
        let alice = find_by_username(&db, "alice").await.unwrap();
        assert_eq!(signer().verify_access_token(access), Ok(alice.id));

        let err = exchange_token(&db, &signer(), request()).await.unwrap_err();
        let AppError::Validation(errors) = err else { panic!("expected validation error") };
        assert!(errors.get("confirmation_code").is_some());
    }

    #[tokio::test]
    async fn token_exchange_for_unknown_user_is_not_found() {
        let db = memory_db().await;
        let request = TokenRequest { username: valid("ghost"), confirmation_code: valid("0-abc") };
        assert!(matches!(exchange_token(&db, &signer(), request).await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn role_is_kept_unless_allowed() {
        let db = memory_db().await;
        let alice = insert_user(&db, "alice", Role::User).await;
        let input = UserWrite {
            role: Some(Field::Valid(Role::Admin)),
            bio: valid("hi"),
            ..Default::default()
        };
        let updated = update_user(&db, alice.clone(), input, false).await.unwrap();
        assert_eq!(updated.role, Role::User);
        assert_eq!(updated.bio.as_deref(), Some("hi"));

        let alice = find_by_username(&db, "alice").await.unwrap();
        let input = UserWrite { role: Some(Field::Valid(Role::Moderator)), ..Default::default() };
        assert_eq!(update_user(&db, alice, input, true).await.unwrap().role, Role::Moderator);
    }

    #[tokio::test]
    async fn taken_username_and_email_are_field_errors() {
        let db = memory_db().await;
        insert_user(&db, "alice", Role::User).await;
        let bob = insert_user(&db, "bob", Role::User).await;
        let input = UserWrite {
            username: valid("alice"),
            email: valid("alice@example.com"),
            ..Default::default()
        };
        let err = update_user(&db, bob, input, true).await.unwrap_err();
        let AppError::Validation(errors) = err else { panic!("expected validation error") };
        assert!(errors.get("username").is_some());
        assert!(errors.get("email").is_some());
    }

    #[tokio::test]
    async fn admin_created_users_require_username_and_email() {
        let db = memory_db().await;
        let err = create_user(&db, UserWrite::default()).await.unwrap_err();
        let AppError::Validation(errors) = err else { panic!("expected validation error") };
        assert!(errors.get("username").is_some());
        assert!(errors.get("email").is_some());

        let input = UserWrite {
            username: valid("carol"),
            email: valid("carol@example.com"),
            role: Some(Field::Valid(Role::Moderator)),
            ..Default::default()
        };
        assert_eq!(create_user(&db, input).await.unwrap().role, Role::Moderator);
        delete_user(&db, "carol").await.unwrap();
        assert!(matches!(delete_user(&db, "carol").await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn bootstrap_admin_is_idempotent() {
        let db = memory_db().await;
        let admin = AdminBootstrap { username: "root".into(), email: "root@example.com".into() };
        ensure_admin(&db, &admin).await.unwrap();
        ensure_admin(&db, &admin).await.unwrap();
        let root = find_by_username(&db, "root").await.unwrap();
        assert!(root.is_superuser);
        assert_eq!(user::Entity::find().all(&db).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bootstrap_admin_with_invalid_identity_fails() {
        let db = memory_db().await;
        let bad_name = AdminBootstrap { username: "me".into(), email: "root@example.com".into() };
        assert!(ensure_admin(&db, &bad_name).await.is_err());
        let bad_email = AdminBootstrap { username: "root".into(), email: "root".into() };
        assert!(ensure_admin(&db, &bad_email).await.is_err());
        assert!(user::Entity::find().all(&db).await.unwrap().is_empty());
    }
}
