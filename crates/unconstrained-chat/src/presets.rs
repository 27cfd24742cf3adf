//! Named assistant presets and how their ids are resolved.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A named assistant choice offered to the user.
///
/// The remote assistant id is either written in the config (`id`) or read
/// from an environment variable (`id_env`) so it can stay out of the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantPreset {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_env: Option<String>,
}

impl AssistantPreset {
    /// Preset whose id comes from an environment variable
    pub fn from_env(name: impl Into<String>, env_var: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            id_env: Some(env_var.into()),
        }
    }

    /// Resolve the remote assistant id. An explicit id wins over the environment.
    pub fn resolve_id(&self) -> Result<String> {
        if let Some(id) = self.id.as_deref().filter(|id| !id.trim().is_empty()) {
            return Ok(id.trim().to_string());
        }

        let Some(ref var) = self.id_env else {
            return Err(Error::UnresolvedPreset {
                name: self.name.clone(),
                detail: "set `id` or `id_env`".to_string(),
            });
        };

        match std::env::var(var) {
            Ok(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
            _ => Err(Error::UnresolvedPreset {
                name: self.name.clone(),
                detail: format!("environment variable {} is not set", var),
            }),
        }
    }
}

/// The presets offered when the config names none
pub fn default_presets() -> Vec<AssistantPreset> {
    vec![
        AssistantPreset::from_env("InterVU", "INTERVU_ASSISTANT_ID"),
        AssistantPreset::from_env("3Ps Prompt Builder", "PROMPT_BUILDER_ASSISTANT_ID"),
        AssistantPreset::from_env("Educational Media Analyst", "MEDIA_ANALYST_ASSISTANT_ID"),
    ]
}

/// Find a preset by name, ignoring case
pub fn find_preset<'a>(presets: &'a [AssistantPreset], name: &str) -> Result<&'a AssistantPreset> {
    let wanted = name.trim();
    presets
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(wanted))
        .ok_or_else(|| Error::UnknownPreset(wanted.to_string()))
}
