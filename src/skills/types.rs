//! The `Skill` trait and the manifest-backed capability this build loads
//! (spec §9's "duck-typed skill objects become an explicit capability set").

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ToolDefinition;
use crate::tools::Tool;

/// Declarative metadata describing a loaded skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub trigger_words: Vec<String>,
}

#[derive(Debug, Error, Clone)]
pub enum SkillError {
    #[error("skill has no executable behavior")]
    NotExecutable,
    #[error("skill init failed: {0}")]
    Init(String),
}

/// A capability the assistant can activate for a session. Most skills are
/// purely declarative — a manifest contributing one prompt layer entry — so
/// every method past `metadata` and `system_prompt` carries a default.
#[async_trait]
pub trait Skill: Send + Sync {
    fn metadata(&self) -> &SkillMetadata;

    /// Tools this skill contributes to the executor, alongside the built-ins.
    fn tools(&self) -> Vec<(ToolDefinition, Arc<dyn Tool>)> {
        Vec::new()
    }

    /// Text folded into the "Active skills' prompts" layer (priority 40).
    fn system_prompt(&self) -> String;

    /// Runs once after loading, before the skill is eligible for activation.
    async fn init(&self) -> Result<(), SkillError> {
        Ok(())
    }

    /// Invoked for skills with behavior beyond a static prompt contribution.
    /// None of the manifest-loaded skills in this build override it.
    async fn execute(&self, _input: &str) -> Result<String, SkillError> {
        Err(SkillError::NotExecutable)
    }

    async fn shutdown(&self) -> Result<(), SkillError> {
        Ok(())
    }
}

/// A skill loaded from a `SKILL.yaml` manifest: id/name/description/trigger
/// words plus a prompt body. Prompt-only — contributes no tools of its own.
#[derive(Debug, Clone)]
pub struct ManifestSkill {
    pub metadata: SkillMetadata,
    pub prompt: String,
    pub path: PathBuf,
}

#[async_trait]
impl Skill for ManifestSkill {
    fn metadata(&self) -> &SkillMetadata {
        &self.metadata
    }

    fn system_prompt(&self) -> String {
        self.prompt.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(id: &str) -> ManifestSkill {
        ManifestSkill {
            metadata: SkillMetadata {
                id: id.to_string(),
                name: id.to_string(),
                description: "test skill".to_string(),
                trigger_words: vec![],
            },
            prompt: "do the thing".to_string(),
            path: PathBuf::from("/tmp/skill"),
        }
    }

    #[tokio::test]
    async fn manifest_skill_has_no_tools_and_is_not_executable() {
        let s = skill("demo");
        assert!(s.tools().is_empty());
        assert_eq!(s.system_prompt(), "do the thing");
        assert!(matches!(s.execute("hi").await, Err(SkillError::NotExecutable)));
        assert!(s.init().await.is_ok());
        assert!(s.shutdown().await.is_ok());
    }
}
