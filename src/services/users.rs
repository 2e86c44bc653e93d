use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::Serialize;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::GoogleProfile;
use crate::entities::user::{self, Entity as UserEntity, Model as UserModel};
use crate::errors::ServiceError;

const MIN_PHONE_DIGITS: usize = 10;
const MAX_PHONE_DIGITS: usize = 15;

/// How an admin target is identified by the maintenance CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    Email(String),
    GoogleId(String),
}

/// Public view of a user
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub picture: Option<String>,
    pub is_admin: bool,
}

impl From<UserModel> for UserProfile {
    fn from(user: UserModel) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            phone: user.phone,
            picture: user.picture,
            is_admin: user.is_admin,
        }
    }
}

/// Normalizes a phone number to digits with an optional leading `+`.
///
/// Spaces, dashes and parentheses are dropped; 10 to 15 digits are required.
pub fn normalize_phone(raw: &str) -> Result<String, ServiceError> {
    let trimmed = raw.trim();
    let (plus, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", trimmed),
    };
    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '(' | ')' => {}
            _ => {
                return Err(ServiceError::ValidationError(
                    "Phone number may only contain digits".to_string(),
                ))
            }
        }
    }
    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len()) {
        return Err(ServiceError::ValidationError(format!(
            "Phone number must have {} to {} digits",
            MIN_PHONE_DIGITS, MAX_PHONE_DIGITS
        )));
    }
    Ok(format!("{}{}", plus, digits))
}

#[derive(Clone)]
pub struct UserService {
    db: Arc<DatabaseConnection>,
}

impl UserService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<UserModel>, ServiceError> {
        Ok(UserEntity::find_by_id(id).one(&*self.db).await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<UserModel, ServiceError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", id)))
    }

    /// Creates or refreshes the user behind a Google profile.
    ///
    /// Matches on `google_id` first, then links an existing account with the
    /// same email.
    #[instrument(skip(self, profile), fields(google_id = %profile.id))]
    pub async fn upsert_google(&self, profile: &GoogleProfile) -> Result<UserModel, ServiceError> {
        let email = profile.email.trim().to_lowercase();
        if email.is_empty() {
            return Err(ServiceError::ValidationError(
                "Google profile has no email".to_string(),
            ));
        }
        let name = profile
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| email.clone());

        let existing = match UserEntity::find()
            .filter(user::Column::GoogleId.eq(profile.id.as_str()))
            .one(&*self.db)
            .await?
        {
            Some(user) => Some(user),
            None => {
                UserEntity::find()
                    .filter(user::Column::Email.eq(email.as_str()))
                    .one(&*self.db)
                    .await?
            }
        };

        let now = Utc::now();
        let user = match existing {
            Some(user) => {
                let mut active: user::ActiveModel = user.into();
                active.google_id = Set(Some(profile.id.clone()));
                active.name = Set(name);
                active.picture = Set(profile.picture.clone());
                active.updated_at = Set(now);
                active.update(&*self.db).await?
            }
            None => {
                let created = user::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    google_id: Set(Some(profile.id.clone())),
                    email: Set(email),
                    name: Set(name),
                    phone: Set(None),
                    picture: Set(profile.picture.clone()),
                    is_admin: Set(false),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&*self.db)
                .await?;
                info!(user_id = %created.id, "user registered");
                created
            }
        };
        Ok(user)
    }

    #[instrument(skip(self, phone))]
    pub async fn update_phone(&self, user_id: Uuid, phone: &str) -> Result<UserModel, ServiceError> {
        let phone = normalize_phone(phone)?;
        let user = self.get(user_id).await?;
        let mut active: user::ActiveModel = user.into();
        active.phone = Set(Some(phone));
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    /// Grants or revokes admin rights
    #[instrument(skip(self))]
    pub async fn set_admin(&self, lookup: UserLookup, is_admin: bool) -> Result<UserModel, ServiceError> {
        let query = match &lookup {
            UserLookup::Email(email) => {
                UserEntity::find().filter(user::Column::Email.eq(email.trim().to_lowercase()))
            }
            UserLookup::GoogleId(id) => UserEntity::find().filter(user::Column::GoogleId.eq(id.trim())),
        };
        let user = query
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No user matches {:?}", lookup)))?;

        let mut active: user::ActiveModel = user.into();
        active.is_admin = Set(is_admin);
        active.updated_at = Set(Utc::now());
        let user = active.update(&*self.db).await?;
        info!(user_id = %user.id, is_admin, "admin flag updated");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("9999999999", "9999999999")]
    #[case(" +91 98765-43210 ", "+919876543210")]
    #[case("(080) 1234 5678", "08012345678")]
    fn accepts_common_phone_formats(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_phone(raw).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("12345")]
    #[case("99999x9999")]
    #[case("1234567890123456")]
    fn rejects_bad_phone_numbers(#[case] raw: &str) {
        assert!(matches!(
            normalize_phone(raw),
            Err(ServiceError::ValidationError(_))
        ));
    }
}
