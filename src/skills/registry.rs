//! `SkillRegistry` — id-indexed table of loaded skills.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::ToolDefinition;
use crate::tools::Tool;

use super::types::Skill;

#[derive(Default)]
pub struct SkillRegistry {
    by_id: HashMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill. A duplicate id overwrites the previous entry and
    /// logs a warning, matching `ToolExecutor::register`.
    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        let id = skill.metadata().id.clone();
        if self.by_id.contains_key(&id) {
            tracing::warn!(skill = %id, "overwriting already-registered skill");
        }
        self.by_id.insert(id, skill);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Skill>> {
        self.by_id.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.by_id.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Every tool contributed by every registered skill, ready to hand to
    /// `ToolExecutor::register_skill_tools`.
    pub fn all_tools(&self) -> Vec<(ToolDefinition, Arc<dyn Tool>)> {
        self.by_id.values().flat_map(|s| s.tools()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::types::{ManifestSkill, SkillMetadata};
    use std::path::PathBuf;

    fn skill(id: &str) -> Arc<dyn Skill> {
        Arc::new(ManifestSkill {
            metadata: SkillMetadata {
                id: id.to_string(),
                name: id.to_string(),
                description: "d".to_string(),
                trigger_words: vec![],
            },
            prompt: format!("prompt for {id}"),
            path: PathBuf::from("/tmp"),
        })
    }

    #[test]
    fn register_and_get_round_trips() {
        let mut registry = SkillRegistry::new();
        registry.register(skill("weather"));
        assert_eq!(registry.get("weather").unwrap().metadata().id, "weather");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn ids_are_sorted() {
        let mut registry = SkillRegistry::new();
        registry.register(skill("zeta"));
        registry.register(skill("alpha"));
        assert_eq!(registry.ids(), vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn duplicate_id_overwrites() {
        let mut registry = SkillRegistry::new();
        registry.register(skill("weather"));
        registry.register(skill("weather"));
        assert_eq!(registry.len(), 1);
    }
}
