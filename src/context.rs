//! Business context injected into every scoring prompt, plus the
//! precondition checks that run before any provider call.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ScorerError, ScorerResult};

/// Recognized API credential prefix
pub const CREDENTIAL_PREFIX: &str = "sk-";

/// Free-text description of the business being scored for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessContext {
    pub industry: String,
    pub description: String,
    pub conversion_goal: String,
    pub services: String,
    pub audience: String,
}

impl BusinessContext {
    pub fn new(
        industry: impl Into<String>,
        description: impl Into<String>,
        conversion_goal: impl Into<String>,
        services: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            industry: industry.into(),
            description: description.into(),
            conversion_goal: conversion_goal.into(),
            services: services.into(),
            audience: audience.into(),
        }
    }

    /// Load a context from a TOML file with the same field names
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ScorerResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        toml::from_str(&content).map_err(|e| {
            ScorerError::config(format!("invalid business context file {}: {}", path.display(), e))
        })
    }

    /// Fill any field given in `overrides` that is non-empty
    pub fn merge(mut self, overrides: BusinessContext) -> Self {
        let fields = [
            (&mut self.industry, overrides.industry),
            (&mut self.description, overrides.description),
            (&mut self.conversion_goal, overrides.conversion_goal),
            (&mut self.services, overrides.services),
            (&mut self.audience, overrides.audience),
        ];
        for (slot, value) in fields {
            if !value.trim().is_empty() {
                *slot = value;
            }
        }
        self
    }

    /// Every field must be non-empty after trimming
    pub fn validate(&self) -> ScorerResult<()> {
        for (field, value) in self.fields() {
            if value.trim().is_empty() {
                return Err(ScorerError::MissingContextField { field });
            }
        }
        Ok(())
    }

    /// Field names paired with their values, in prompt order
    pub fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("industry", self.industry.as_str()),
            ("description", self.description.as_str()),
            ("conversion_goal", self.conversion_goal.as_str()),
            ("services", self.services.as_str()),
            ("audience", self.audience.as_str()),
        ]
    }
}

/// Check an API key's shape before any request is made
pub fn validate_credential(key: &str) -> ScorerResult<()> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ScorerError::InvalidCredential {
            reason: "API key is empty".to_string(),
        });
    }
    if !key.starts_with(CREDENTIAL_PREFIX) || key.len() <= CREDENTIAL_PREFIX.len() {
        return Err(ScorerError::InvalidCredential {
            reason: format!("API key must start with '{}'", CREDENTIAL_PREFIX),
        });
    }
    Ok(())
}
