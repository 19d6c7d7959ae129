pub mod builder;
pub mod legacy;
pub mod templates;
pub mod tokens;

pub use builder::{BuiltPrompt, PromptBuilder, PromptDetails, PromptSection, SectionInfo};
pub use legacy::build_legacy_prompt;
pub use tokens::estimate_tokens;
