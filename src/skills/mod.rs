//! Skills — the "duck-typed skill objects become an explicit capability
//! set" supplement: a declarative capability a workspace can activate,
//! contributing a prompt layer and optionally its own tools.
//!
//! # Key types
//! - [`types::Skill`] — trait a loaded capability implements
//! - [`registry::SkillRegistry`] — id-indexed table, feeds both the prompt
//!   layer and the tool executor
//! - [`composer::SkillComposer`] — adapts a registry to `prompt::SkillPromptSource`
//! - [`loader::load_skills_dir`] — reads `SKILL.yaml` manifests off disk

pub mod composer;
pub mod loader;
pub mod registry;
pub mod types;

pub use composer::SkillComposer;
pub use loader::load_skills_dir;
pub use registry::SkillRegistry;
pub use types::{ManifestSkill, Skill, SkillError, SkillMetadata};
