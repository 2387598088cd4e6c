//! Environment-driven configuration. No project-level TOML: every external
//! collaborator is addressed purely through environment variables, per the
//! external-interfaces table.

use std::collections::HashMap;

pub const PERSONAS_DIR_ENV: &str = "ACADEMY_PERSONAS_DIR";
pub const AGENT_MODEL_ENV_SUFFIX: &str = "_AGENT_MODEL";

/// Valid values for a `<AGENT>_AGENT_MODEL` override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentModel {
    Haiku,
    Sonnet,
    Opus,
    Inherit,
}

impl AgentModel {
    pub fn as_env_value(self) -> &'static str {
        match self {
            Self::Haiku => "haiku",
            Self::Sonnet => "sonnet",
            Self::Opus => "opus",
            Self::Inherit => "inherit",
        }
    }
}

impl std::str::FromStr for AgentModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "haiku" => Ok(Self::Haiku),
            "sonnet" => Ok(Self::Sonnet),
            "opus" => Ok(Self::Opus),
            "inherit" => Ok(Self::Inherit),
            other => Err(format!(
                "invalid agent model override {other:?}; expected haiku, sonnet, opus, or inherit"
            )),
        }
    }
}

/// Reads every `<AGENT>_AGENT_MODEL` environment variable present, keyed by the
/// agent name portion. Malformed values are logged and skipped rather than failing
/// the whole read, since a single bad override shouldn't block startup.
pub fn agent_model_overrides() -> HashMap<String, AgentModel> {
    let mut overrides = HashMap::new();
    for (key, value) in std::env::vars() {
        let Some(agent) = key.strip_suffix(AGENT_MODEL_ENV_SUFFIX) else {
            continue;
        };
        if agent.is_empty() {
            continue;
        }
        match value.parse::<AgentModel>() {
            Ok(model) => {
                overrides.insert(agent.to_string(), model);
            }
            Err(e) => log::warn!("ignoring {key}: {e}"),
        }
    }
    overrides
}

pub fn personas_dir() -> Option<String> {
    std::env::var(PERSONAS_DIR_ENV).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_model_parses_known_values() {
        assert_eq!("haiku".parse::<AgentModel>().unwrap(), AgentModel::Haiku);
        assert_eq!("inherit".parse::<AgentModel>().unwrap(), AgentModel::Inherit);
    }

    #[test]
    fn agent_model_rejects_unknown_values() {
        assert!("gpt5".parse::<AgentModel>().is_err());
    }

    #[test]
    fn agent_model_env_value_round_trips_through_parse() {
        for model in [AgentModel::Haiku, AgentModel::Sonnet, AgentModel::Opus, AgentModel::Inherit] {
            assert_eq!(model.as_env_value().parse::<AgentModel>().unwrap(), model);
        }
    }
}
