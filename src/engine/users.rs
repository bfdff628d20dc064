use std::sync::LazyLock;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use regex::Regex;
use tracing::info;

use crate::limits::*;
use crate::model::*;

use super::ids::next_id;
use super::{Engine, EngineError};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").unwrap_or_else(|_| unreachable!("static pattern"))
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub email: String,
    pub password: String,
}

/// Fields left `None` keep their current value. The id never changes, even with the role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<Role>,
    pub email: Option<String>,
    pub password: Option<String>,
}

fn validate_name(field: &str, value: &str) -> Result<String, EngineError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::validation(format!("{field} must not be empty")));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(value.to_string())
}

fn validate_email(email: &str) -> Result<String, EngineError> {
    let email = email.trim();
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    if !EMAIL.is_match(email) {
        return Err(EngineError::validation(format!("invalid email address: {email}")));
    }
    Ok(email.to_string())
}

fn validate_password(password: &str) -> Result<(), EngineError> {
    if password.is_empty() {
        return Err(EngineError::validation("password must not be empty"));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(EngineError::LimitExceeded("password too long"));
    }
    Ok(())
}

/// Argon2 is deliberately slow; keep it off the async workers.
async fn hash_password(password: String) -> Result<Credential, EngineError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| Credential::Argon2(hash.to_string()))
            .map_err(|e| EngineError::Internal(format!("password hashing failed: {e}")))
    })
    .await
    .map_err(|e| EngineError::Internal(e.to_string()))?
}

async fn verify_password(credential: Credential, password: String) -> Result<bool, EngineError> {
    match credential {
        Credential::Argon2(phc) => tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&phc)
                .map_err(|e| EngineError::Internal(format!("stored hash unreadable: {e}")))?;
            Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        })
        .await
        .map_err(|e| EngineError::Internal(e.to_string()))?,
        Credential::Legacy(plain) => Ok(plain == password),
    }
}

fn email_taken(users: &std::collections::BTreeMap<String, User>, email: &str, except: Option<&str>) -> bool {
    users
        .values()
        .any(|u| Some(u.id.as_str()) != except && u.email.eq_ignore_ascii_case(email))
}

impl Engine {
    /// Allocates the next id for the role under the users write lock, so concurrent
    /// creates never share an id.
    pub async fn create_user(&self, actor: &Actor, new: NewUser) -> Result<UserInfo, EngineError> {
        let first_name = validate_name("first name", &new.first_name)?;
        let last_name = validate_name("last name", &new.last_name)?;
        let email = validate_email(&new.email)?;
        validate_password(&new.password)?;
        let credential = hash_password(new.password).await?;

        let mut users = self.users.write().await;
        if email_taken(&users, &email, None) {
            return Err(EngineError::AlreadyExists(email));
        }
        let user = User {
            id: next_id(new.role.id_prefix(), users.keys().map(String::as_str)),
            first_name,
            last_name,
            role: new.role,
            email,
            credential,
            created_at: now_ms(),
        };
        let event = Event::UserCreated(user.clone());
        self.wal_append(&event).await?;
        users.insert(user.id.clone(), user.clone());
        self.notify.publish(&event);
        drop(users);

        self.record_activity(actor, format!("created user {}", user.id)).await;
        Ok(user.info())
    }

    /// Bring in an account whose password is still plaintext. The credential is
    /// tagged `Legacy` and replaced by an argon2 hash on first successful login.
    pub async fn import_user(&self, actor: &Actor, id: &str, new: NewUser) -> Result<UserInfo, EngineError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(EngineError::validation("imported user needs an id"));
        }
        let first_name = validate_name("first name", &new.first_name)?;
        let last_name = validate_name("last name", &new.last_name)?;
        let email = validate_email(&new.email)?;
        validate_password(&new.password)?;

        let mut users = self.users.write().await;
        if users.contains_key(id) {
            return Err(EngineError::AlreadyExists(id.to_string()));
        }
        if email_taken(&users, &email, None) {
            return Err(EngineError::AlreadyExists(email));
        }
        let user = User {
            id: id.to_string(),
            first_name,
            last_name,
            role: new.role,
            email,
            credential: Credential::Legacy(new.password),
            created_at: now_ms(),
        };
        let event = Event::UserCreated(user.clone());
        self.wal_append(&event).await?;
        users.insert(user.id.clone(), user.clone());
        self.notify.publish(&event);
        drop(users);

        self.record_activity(actor, format!("imported user {}", user.id)).await;
        Ok(user.info())
    }

    pub async fn update_user(&self, actor: &Actor, id: &str, update: UserUpdate) -> Result<UserInfo, EngineError> {
        let first_name = update.first_name.map(|v| validate_name("first name", &v)).transpose()?;
        let last_name = update.last_name.map(|v| validate_name("last name", &v)).transpose()?;
        let email = update.email.map(|v| validate_email(&v)).transpose()?;
        let credential = match update.password {
            Some(password) => {
                validate_password(&password)?;
                Some(hash_password(password).await?)
            }
            None => None,
        };

        let mut users = self.users.write().await;
        let current = users.get(id).cloned().ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if let Some(email) = &email
            && email_taken(&users, email, Some(id)) {
                return Err(EngineError::AlreadyExists(email.clone()));
            }
        let updated = User {
            first_name: first_name.unwrap_or(current.first_name),
            last_name: last_name.unwrap_or(current.last_name),
            role: update.role.unwrap_or(current.role),
            email: email.unwrap_or(current.email),
            credential: credential.unwrap_or(current.credential),
            ..current
        };
        let event = Event::UserUpdated(updated.clone());
        self.wal_append(&event).await?;
        users.insert(updated.id.clone(), updated.clone());
        self.notify.publish(&event);
        drop(users);

        self.record_activity(actor, format!("updated user {id}")).await;
        Ok(updated.info())
    }

    /// Refused for the acting user and while the user has open reservations.
    pub async fn delete_user(&self, actor: &Actor, id: &str) -> Result<(), EngineError> {
        if actor.user_id == id {
            return Err(EngineError::Forbidden("cannot delete the signed-in user"));
        }
        let mut users = self.users.write().await;
        if !users.contains_key(id) {
            return Err(EngineError::NotFound(id.to_string()));
        }

        let states: Vec<_> = self.facilities.iter().map(|e| e.value().clone()).collect();
        for fs in states {
            let guard = fs.read().await;
            if guard.reservations.iter().any(|r| r.requester == id && r.status.is_open()) {
                return Err(EngineError::HasBookings(id.to_string()));
            }
        }

        let event = Event::UserDeleted { id: id.to_string() };
        self.wal_append(&event).await?;
        users.remove(id);
        self.notify.publish(&event);
        drop(users);

        self.record_activity(actor, format!("deleted user {id}")).await;
        Ok(())
    }

    /// Checks an email/password pair. Unknown emails and wrong passwords fail the same way.
    pub async fn authenticate(&self, email: &str, password: &str, ip_address: &str) -> Result<Session, EngineError> {
        let user = {
            let users = self.users.read().await;
            users
                .values()
                .find(|u| u.email.eq_ignore_ascii_case(email.trim()))
                .cloned()
                .ok_or(EngineError::Authentication)?
        };
        if !verify_password(user.credential.clone(), password.to_string()).await? {
            return Err(EngineError::Authentication);
        }

        if matches!(user.credential, Credential::Legacy(_)) {
            let credential = hash_password(password.to_string()).await?;
            let mut users = self.users.write().await;
            if let Some(current) = users.get(&user.id).cloned() {
                let upgraded = User { credential, ..current };
                let event = Event::UserUpdated(upgraded.clone());
                self.wal_append(&event).await?;
                users.insert(upgraded.id.clone(), upgraded);
                info!("upgraded legacy credential for {}", user.id);
            }
        }

        let actor = Actor::new(user.id.clone(), ip_address);
        self.record_activity(&actor, "signed in".to_string()).await;
        Ok(Session {
            user_name: user.full_name(),
            user_id: user.id,
            role: user.role,
        })
    }
}
