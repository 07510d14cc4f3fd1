//! `SkillComposer` — adapts a [`SkillRegistry`] to [`SkillPromptSource`] so
//! `PromptComposer` doesn't need to know how skills are loaded or stored.

use std::sync::Arc;

use crate::prompt::SkillPromptSource;

use super::registry::SkillRegistry;

pub struct SkillComposer {
    registry: Arc<SkillRegistry>,
}

impl SkillComposer {
    pub fn new(registry: Arc<SkillRegistry>) -> Self {
        Self { registry }
    }
}

impl SkillPromptSource for SkillComposer {
    fn prompt_for(&self, skill_id: &str) -> Option<String> {
        self.registry.get(skill_id).map(|s| s.system_prompt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::types::{ManifestSkill, SkillMetadata};
    use std::path::PathBuf;

    #[test]
    fn resolves_registered_skill_prompt() {
        let mut registry = SkillRegistry::new();
        registry.register(Arc::new(ManifestSkill {
            metadata: SkillMetadata {
                id: "weather".to_string(),
                name: "Weather".to_string(),
                description: "d".to_string(),
                trigger_words: vec![],
            },
            prompt: "Use the weather tool for forecasts.".to_string(),
            path: PathBuf::from("/tmp"),
        }));

        let composer = SkillComposer::new(Arc::new(registry));
        assert_eq!(
            composer.prompt_for("weather"),
            Some("Use the weather tool for forecasts.".to_string())
        );
        assert_eq!(composer.prompt_for("unknown"), None);
    }
}
