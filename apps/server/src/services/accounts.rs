//! Clinic registration, staff logins and invitations

use chrono::Utc;
use clinicq_core::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{Principal, TokenService},
    db::DynStore,
    models::{clinic::slugify, Clinic, User},
    password::{hash_password, verify_password},
    Error, Result,
};

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 120))]
    pub clinic_name: String,
    /// Defaults to a slug derived from the clinic name.
    #[validate(length(min = 3, max = 60))]
    pub slug: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub owner_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InviteStaffRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user: User,
    pub clinic: Option<Clinic>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user: User,
    pub clinic: Option<Clinic>,
}

#[derive(Clone)]
pub struct AccountService {
    store: DynStore,
    tokens: TokenService,
}

impl AccountService {
    pub fn new(store: DynStore, tokens: TokenService) -> Self {
        Self { store, tokens }
    }

    /// Create a clinic on the free trial together with its owner, atomically.
    #[tracing::instrument(skip(self, request), fields(email = %request.email))]
    pub async fn register(&self, request: RegisterRequest) -> Result<Session> {
        let slug = match request.slug.as_deref() {
            Some(slug) => validate_slug(slug)?,
            None => validate_slug(&slugify(&request.clinic_name))?,
        };
        let password_hash = hash_password(&request.password)?;
        let now = Utc::now();

        let clinic = Clinic::new(request.clinic_name.trim(), slug, now);
        let owner = User {
            id: Uuid::new_v4(),
            clinic_id: Some(clinic.id),
            email: normalize_email(&request.email),
            name: request.owner_name.trim().to_string(),
            password_hash,
            role: Role::Owner,
            created_at: now,
        };

        let mut tx = self.store.begin().await?;
        tx.insert_clinic(&clinic).await?;
        tx.insert_user(&owner).await?;
        tx.commit().await?;

        tracing::info!(clinic_id = %clinic.id, slug = %clinic.slug, "Clinic registered");
        let token = self.tokens.issue(&owner)?;
        Ok(Session {
            token,
            user: owner,
            clinic: Some(clinic),
        })
    }

    #[tracing::instrument(skip(self, request), fields(email = %request.email))]
    pub async fn login(&self, request: LoginRequest) -> Result<Session> {
        let invalid = || Error::Unauthorized("Invalid email or password".to_string());

        let user = self
            .store
            .find_user_by_email(&normalize_email(&request.email))
            .await?
            .ok_or_else(invalid)?;
        if !verify_password(&request.password, &user.password_hash) {
            tracing::info!(user_id = %user.id, "Login rejected");
            return Err(invalid());
        }

        let clinic = match user.clinic_id {
            Some(clinic_id) => Some(
                self.store
                    .get_clinic(clinic_id)
                    .await?
                    .ok_or_else(|| Error::not_found("clinic", clinic_id))?,
            ),
            None => None,
        };

        let token = self.tokens.issue(&user)?;
        Ok(Session {
            token,
            user,
            clinic,
        })
    }

    pub async fn me(&self, principal: &Principal) -> Result<Profile> {
        let user = self
            .store
            .get_user(principal.user_id)
            .await?
            .ok_or_else(|| Error::Unauthorized("Account no longer exists".to_string()))?;
        let clinic = match user.clinic_id {
            Some(clinic_id) => self.store.get_clinic(clinic_id).await?,
            None => None,
        };
        Ok(Profile { user, clinic })
    }

    #[tracing::instrument(skip(self, request))]
    pub async fn invite_staff(&self, clinic_id: Uuid, request: InviteStaffRequest) -> Result<User> {
        self.create_user(Some(clinic_id), Role::Staff, &request.email, &request.name, &request.password)
            .await
    }

    pub async fn list_staff(&self, clinic_id: Uuid) -> Result<Vec<User>> {
        self.store.list_clinic_users(clinic_id).await
    }

    /// Bootstrap a platform admin; used by the operator CLI.
    pub async fn create_platform_admin(&self, email: &str, name: &str, password: &str) -> Result<User> {
        self.create_user(None, Role::PlatformAdmin, email, name, password)
            .await
    }

    async fn create_user(
        &self,
        clinic_id: Option<Uuid>,
        role: Role,
        email: &str,
        name: &str,
        password: &str,
    ) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            clinic_id,
            email: normalize_email(email),
            name: name.trim().to_string(),
            password_hash: hash_password(password)?,
            role,
            created_at: Utc::now(),
        };

        let mut tx = self.store.begin().await?;
        if let Some(clinic_id) = clinic_id {
            tx.lock_clinic(clinic_id)
                .await?
                .ok_or_else(|| Error::not_found("clinic", clinic_id))?;
        }
        tx.insert_user(&user).await?;
        tx.commit().await?;

        tracing::info!(user_id = %user.id, role = %role, "User created");
        Ok(user)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn validate_slug(slug: &str) -> Result<String> {
    let slug = slug.trim().to_ascii_lowercase();
    let well_formed = slug.len() >= 3
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !slug.starts_with('-')
        && !slug.ends_with('-');
    if !well_formed {
        return Err(Error::Validation(format!(
            "slug '{slug}' must be at least 3 characters of a-z, 0-9 and inner dashes"
        )));
    }
    Ok(slug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AuthConfig, db::MemoryStore};
    use std::sync::Arc;

    fn service() -> AccountService {
        let tokens = TokenService::new(&AuthConfig {
            jwt_secret: "test-secret".to_string(),
            ..AuthConfig::default()
        });
        AccountService::new(Arc::new(MemoryStore::new()), tokens)
    }

    fn registration(email: &str) -> RegisterRequest {
        RegisterRequest {
            clinic_name: "Sunny Dental Care".to_string(),
            slug: None,
            owner_name: "Olive".to_string(),
            email: email.to_string(),
            password: "correct horse".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let accounts = service();
        let session = accounts.register(registration("Olive@Example.com")).await.unwrap();
        let clinic = session.clinic.unwrap();
        assert_eq!(clinic.slug, "sunny-dental-care");
        assert_eq!(session.user.role, Role::Owner);
        assert_eq!(session.user.email, "olive@example.com");

        let login = accounts
            .login(LoginRequest {
                email: "olive@example.com".to_string(),
                password: "correct horse".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(login.user.id, session.user.id);
        assert_eq!(login.clinic.map(|c| c.id), Some(clinic.id));

        let wrong = accounts
            .login(LoginRequest {
                email: "olive@example.com".to_string(),
                password: "wrong horse".to_string(),
            })
            .await;
        assert!(matches!(wrong, Err(Error::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let accounts = service();
        accounts.register(registration("a@example.com")).await.unwrap();

        let same_slug = accounts.register(registration("b@example.com")).await;
        assert!(matches!(same_slug, Err(Error::Conflict(_))));

        let mut other = registration("a@example.com");
        other.slug = Some("another-clinic".to_string());
        assert!(matches!(
            accounts.register(other).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_invited_staff_can_log_in() {
        let accounts = service();
        let owner = accounts.register(registration("owner@example.com")).await.unwrap();
        let clinic_id = owner.clinic.unwrap().id;

        let staff = accounts
            .invite_staff(
                clinic_id,
                InviteStaffRequest {
                    email: "desk@example.com".to_string(),
                    name: "Desk".to_string(),
                    password: "front-desk-1".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(staff.role, Role::Staff);
        assert_eq!(accounts.list_staff(clinic_id).await.unwrap().len(), 2);

        let session = accounts
            .login(LoginRequest {
                email: "desk@example.com".to_string(),
                password: "front-desk-1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(session.user.clinic_id, Some(clinic_id));
    }

    #[test]
    fn test_slug_rules() {
        assert_eq!(validate_slug(" Sunny-1 ").unwrap(), "sunny-1");
        assert!(validate_slug("ab").is_err());
        assert!(validate_slug("-sunny").is_err());
        assert!(validate_slug("sunny dental").is_err());
    }
}
