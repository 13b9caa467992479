use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;

use crate::storage::database::Database;
use crate::storage::vector_index::{collection_name_for_session, SessionVectorIndex};
use crate::types::{UserRecord, UserRole};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Phone number must be exactly 11 digits")]
    InvalidPhone,
    #[error("Password must be at least 6 characters")]
    WeakPassword,
    #[error("Display name must not be empty")]
    EmptyName,
    #[error("This phone number is already registered")]
    DuplicatePhone,
}

/// Account management. Passwords are stored as-is; hardening the scheme is
/// a deployment concern outside this crate.
pub struct UserManager {
    db: Arc<Database>,
    index: Arc<SessionVectorIndex>,
}

impl UserManager {
    pub fn new(db: Arc<Database>, index: Arc<SessionVectorIndex>) -> Self {
        Self { db, index }
    }

    fn validate(phone: &str, password: &str, name: &str) -> Result<(), RegistrationError> {
        if phone.len() != 11 || !phone.chars().all(|c| c.is_ascii_digit()) {
            return Err(RegistrationError::InvalidPhone);
        }
        if password.chars().count() < 6 {
            return Err(RegistrationError::WeakPassword);
        }
        if name.trim().is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        Ok(())
    }

    pub fn register(
        &self,
        phone: &str,
        password: &str,
        name: &str,
    ) -> Result<(), RegistrationError> {
        Self::validate(phone, password, name)?;
        if matches!(self.db.get_user(phone), Ok(Some(_))) {
            return Err(RegistrationError::DuplicatePhone);
        }
        self.db
            .create_user(phone, password, name.trim(), UserRole::Normal)
            .map_err(|e| {
                tracing::error!(error = %e, "User insert failed");
                RegistrationError::DuplicatePhone
            })?;
        tracing::info!(phone = %phone, "Registered user");
        Ok(())
    }

    /// Returns the account on matching credentials, `None` otherwise. A
    /// wrong password and an unknown phone are indistinguishable.
    pub fn login(&self, phone: &str, password: &str) -> Option<UserRecord> {
        match self.db.verify_credentials(phone, password) {
            Ok(true) => self.db.get_user(phone).ok().flatten(),
            Ok(false) => None,
            Err(e) => {
                tracing::error!(error = %e, "Credential check failed");
                None
            }
        }
    }

    pub fn user_info(&self, phone: &str) -> Option<UserRecord> {
        self.db.get_user(phone).ok().flatten()
    }

    pub fn set_role(&self, phone: &str, role: UserRole) -> Result<bool> {
        self.db.set_user_role(phone, role)
    }

    pub fn list_users(&self) -> Result<Vec<UserRecord>> {
        self.db.list_users()
    }

    /// Delete the account, its rows, and each session's vector collection.
    pub async fn delete_user(&self, phone: &str) -> Result<bool> {
        let sessions = self.db.sessions_for_user(phone)?;
        let deleted = self.db.delete_user(phone)?;
        for session in sessions {
            if let Err(e) = self
                .index
                .delete_collection(&collection_name_for_session(session.sid))
                .await
            {
                tracing::warn!(session_id = %session.sid, error = %e, "Collection cleanup failed");
            }
        }
        Ok(deleted)
    }
}
