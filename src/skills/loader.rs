//! Loads `SKILL.yaml` manifests off disk into a [`SkillRegistry`].
//!
//! Manifest shape, one directory per skill:
//! ```yaml
//! id: weather
//! name: Weather lookups
//! description: Fetch and summarize forecasts.
//! trigger_words: [weather, forecast]
//! prompt: |
//!   Use the web_fetch tool against a weather API when asked about forecasts.
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use super::registry::SkillRegistry;
use super::types::{ManifestSkill, SkillMetadata};

const MANIFEST_FILENAME: &str = "SKILL.yaml";

#[derive(Debug, Deserialize)]
struct Manifest {
    id: String,
    name: String,
    description: String,
    #[serde(default)]
    trigger_words: Vec<String>,
    prompt: String,
}

/// Load every `<dir>/*/SKILL.yaml` into `registry`. A missing or unreadable
/// directory is not an error — a fresh install simply has no skills yet.
/// Returns the number of skills loaded.
pub fn load_skills_dir(dir: &Path, registry: &mut SkillRegistry) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let mut loaded = 0;
    for entry in entries.flatten() {
        let manifest_path = entry.path().join(MANIFEST_FILENAME);
        if !manifest_path.is_file() {
            continue;
        }
        match load_manifest(&manifest_path) {
            Ok(skill) => {
                registry.register(Arc::new(skill));
                loaded += 1;
            }
            Err(e) => {
                tracing::warn!(path = %manifest_path.display(), error = %e, "failed to load skill manifest");
            }
        }
    }
    loaded
}

fn load_manifest(path: &Path) -> Result<ManifestSkill, String> {
    let raw = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let manifest: Manifest = serde_yaml::from_str(&raw).map_err(|e| e.to_string())?;
    Ok(ManifestSkill {
        metadata: SkillMetadata {
            id: manifest.id,
            name: manifest.name,
            description: manifest.description,
            trigger_words: manifest.trigger_words,
        },
        prompt: manifest.prompt,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_valid_manifest_from_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let skill_dir = dir.path().join("weather");
        fs::create_dir(&skill_dir).unwrap();
        let mut f = fs::File::create(skill_dir.join("SKILL.yaml")).unwrap();
        writeln!(
            f,
            "id: weather\nname: Weather\ndescription: Forecasts\ntrigger_words: [weather]\nprompt: |\n  Use web_fetch for forecasts.\n"
        )
        .unwrap();

        let mut registry = SkillRegistry::new();
        let loaded = load_skills_dir(dir.path(), &mut registry);
        assert_eq!(loaded, 1);
        let skill = registry.get("weather").unwrap();
        assert_eq!(skill.metadata().name, "Weather");
        assert!(skill.system_prompt().contains("web_fetch"));
    }

    #[test]
    fn missing_directory_loads_nothing() {
        let mut registry = SkillRegistry::new();
        let loaded = load_skills_dir(Path::new("/nonexistent/path/for/skills"), &mut registry);
        assert_eq!(loaded, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn malformed_manifest_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let skill_dir = dir.path().join("broken");
        fs::create_dir(&skill_dir).unwrap();
        fs::write(skill_dir.join("SKILL.yaml"), "not: [valid, yaml, for: this shape").unwrap();

        let mut registry = SkillRegistry::new();
        let loaded = load_skills_dir(dir.path(), &mut registry);
        assert_eq!(loaded, 0);
    }
}
