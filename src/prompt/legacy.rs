//! Schema-dump prompt used by the legacy processor.
//!
//! Every table and column is listed in declaration order with no ranking;
//! tables that would overflow the budget are left out.

use super::builder::{BuiltPrompt, PromptDetails, PromptSection, SectionInfo};
use super::templates::{LEGACY_SYSTEM_TEMPLATE, LEGACY_TEMPLATE_NAME};
use super::tokens::{estimate_tokens, truncate_to_tokens};
use crate::metadata::{Metadata, Table};

fn render_table(table: &Table) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{} {}", c.name, c.data_type))
        .collect();
    format!("{}({})\n", table.qualified_name(), columns.join(", "))
}

pub fn build_legacy_prompt(
    metadata: &Metadata,
    question: &str,
    dialect: &str,
    max_tokens: usize,
) -> BuiltPrompt {
    let system = LEGACY_SYSTEM_TEMPLATE.replace("{dialect}", dialect);
    let question = format!("Question: {}", question.trim());
    let fixed = estimate_tokens(&system) + estimate_tokens(&question) + 2;

    let mut schema = String::from("Tables:\n");
    let mut dropped_tables = Vec::new();
    let mut included = 0;
    for table in &metadata.tables {
        let rendered = render_table(table);
        if fixed + estimate_tokens(&schema) + estimate_tokens(&rendered) <= max_tokens {
            schema.push_str(&rendered);
            included += 1;
        } else {
            dropped_tables.push(table.name.clone());
        }
    }

    let mut text = [system.as_str(), schema.trim_end(), question.as_str()].join("\n\n");
    let truncated = estimate_tokens(&text) > max_tokens;
    if truncated {
        text = truncate_to_tokens(&text, max_tokens).to_string();
    }

    BuiltPrompt {
        details: PromptDetails {
            template: LEGACY_TEMPLATE_NAME.to_string(),
            sections: vec![
                SectionInfo {
                    section: PromptSection::SystemInstructions,
                    tokens: estimate_tokens(&system),
                },
                SectionInfo {
                    section: PromptSection::Schema,
                    tokens: estimate_tokens(&schema),
                },
                SectionInfo {
                    section: PromptSection::Question,
                    tokens: estimate_tokens(&question),
                },
            ],
            token_count: estimate_tokens(&text),
            max_tokens,
            schema_table_count: included,
            dropped_sections: Vec::new(),
            dropped_tables,
            truncated,
        },
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn metadata() -> Metadata {
        Metadata::load(Path::new(env!("CARGO_MANIFEST_DIR")).join("metadata")).unwrap()
    }

    #[test]
    fn test_lists_every_table_with_room() {
        let metadata = metadata();
        let prompt = build_legacy_prompt(&metadata, "total deposits", "PostgreSQL", 8000);
        assert_eq!(prompt.details.schema_table_count, metadata.tables.len());
        assert_eq!(prompt.details.template, LEGACY_TEMPLATE_NAME);
        assert!(prompt.text.contains("public.daily_actions("));
        assert!(prompt.text.ends_with("Question: total deposits"));
    }

    #[test]
    fn test_stays_within_budget() {
        let metadata = metadata();
        for budget in [10, 60, 150, 400] {
            let prompt = build_legacy_prompt(&metadata, "total deposits by country", "PostgreSQL", budget);
            assert!(prompt.details.token_count <= budget, "budget {budget}");
        }
    }
}
