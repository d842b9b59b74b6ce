//! Form input for the mutating operations.
//!
//! Forms hold raw user input. `can_submit` mirrors whether the submit action is enabled; turning
//! a form into a request applies the same rule and fails with [`Error::Validation`] instead of
//! sending anything. Blank optional fields are sent as absent.

use secrecy::{ExposeSecret, SecretString};

use crate::api::models::{
    api_keys::{KeyCreate, KeyUpdate},
    device_check::{DeviceCheckUpload, TeamId},
    projects::{Project, ProjectCreate, ProjectUpdate},
};
use crate::errors::{Error, Result};

fn non_blank(input: &str) -> Option<String> {
    let trimmed = input.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectForm {
    pub name: String,
    pub description: String,
}

impl ProjectForm {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Prefill the edit form with the current values
    pub fn from_project(project: &Project) -> Self {
        Self {
            name: project.name.clone().unwrap_or_default(),
            description: project.description.clone().unwrap_or_default(),
        }
    }

    pub fn to_create(&self) -> ProjectCreate {
        ProjectCreate {
            name: non_blank(&self.name),
            description: self.description.trim().to_string(),
        }
    }

    pub fn to_update(&self) -> ProjectUpdate {
        ProjectUpdate {
            name: non_blank(&self.name),
            description: self.description.trim().to_string(),
        }
    }
}

/// Key creation form. The full upstream API key is required; the backend splits it.
#[derive(Debug)]
pub struct KeyForm {
    pub name: String,
    pub description: String,
    pub api_key: SecretString,
}

impl KeyForm {
    pub fn new(name: impl Into<String>, description: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            api_key,
        }
    }

    pub fn can_submit(&self) -> bool {
        !self.api_key.expose_secret().trim().is_empty()
    }

    pub fn into_create(self) -> Result<KeyCreate> {
        if !self.can_submit() {
            return Err(Error::Validation {
                message: "An API key is required".to_string(),
            });
        }
        Ok(KeyCreate {
            name: non_blank(&self.name),
            description: non_blank(&self.description),
            api_key: self.api_key,
        })
    }
}

/// Key edit form: only the metadata can change after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyEditForm {
    pub name: String,
    pub description: String,
}

impl KeyEditForm {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    pub fn to_update(&self) -> KeyUpdate {
        KeyUpdate {
            name: non_blank(&self.name),
            description: non_blank(&self.description),
        }
    }
}

/// DeviceCheck credential upload form.
#[derive(Debug)]
pub struct DeviceCheckForm {
    pub team_id: String,
    pub key_id: String,
    pub private_key: SecretString,
}

impl DeviceCheckForm {
    pub fn new(team_id: impl Into<String>, key_id: impl Into<String>, private_key: SecretString) -> Self {
        Self {
            team_id: team_id.into(),
            key_id: key_id.into(),
            private_key,
        }
    }

    pub fn can_submit(&self) -> bool {
        TeamId::parse(&self.team_id).is_ok()
            && !self.key_id.trim().is_empty()
            && !self.private_key.expose_secret().trim().is_empty()
    }

    pub fn into_upload(self) -> Result<DeviceCheckUpload> {
        let team_id = TeamId::parse(&self.team_id)?;
        let key_id = non_blank(&self.key_id).ok_or_else(|| Error::Validation {
            message: "A key ID is required".to_string(),
        })?;
        if self.private_key.expose_secret().trim().is_empty() {
            return Err(Error::Validation {
                message: "A private key is required".to_string(),
            });
        }
        Ok(DeviceCheckUpload {
            team_id,
            key_id,
            private_key: self.private_key,
        })
    }
}
