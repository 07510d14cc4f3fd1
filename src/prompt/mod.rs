pub mod composer;

pub use composer::{ComposeInput, PromptComposer, SkillPromptSource};
