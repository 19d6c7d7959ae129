//! Token-budgeted prompt assembly.
//!
//! Sections are emitted in a fixed order. When the prompt is over budget the
//! builder drops examples, then the business context section, then schema
//! tables from the least relevant up, and finally shortens the sections ahead
//! of the question. The question is cut only when it alone exceeds the budget.

use super::templates;
use super::tokens::{estimate_tokens, truncate_to_tokens, CHARS_PER_TOKEN};
use crate::config::PromptConfig;
use crate::context::BusinessContextProfile;
use crate::schema_rag::{ContextualBusinessSchema, RankedTable};
use serde::{Deserialize, Serialize};
use tracing::debug;

const SECTION_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromptSection {
    SystemInstructions,
    Schema,
    BusinessContext,
    Examples,
    Question,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionInfo {
    pub section: PromptSection,
    pub tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptDetails {
    pub template: String,
    pub sections: Vec<SectionInfo>,
    pub token_count: usize,
    pub max_tokens: usize,
    pub schema_table_count: usize,
    pub dropped_sections: Vec<PromptSection>,
    pub dropped_tables: Vec<String>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltPrompt {
    pub text: String,
    pub details: PromptDetails,
}

pub struct PromptBuilder {
    config: PromptConfig,
}

impl PromptBuilder {
    pub fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    pub fn max_tokens(&self) -> usize {
        self.config.max_tokens
    }

    pub fn build(
        &self,
        profile: &BusinessContextProfile,
        schema: &ContextualBusinessSchema,
    ) -> BuiltPrompt {
        self.build_with_budget(profile, schema, self.config.max_tokens)
    }

    pub fn build_with_budget(
        &self,
        profile: &BusinessContextProfile,
        schema: &ContextualBusinessSchema,
        max_tokens: usize,
    ) -> BuiltPrompt {
        let system = templates::system_instructions(&self.config.sql_dialect, profile.intent.intent_type);
        let business = render_business_context(schema);
        let examples = if self.config.include_examples {
            render_examples(schema, self.config.max_examples)
        } else {
            None
        };
        let question = render_question(profile);

        // Tables arrive sorted by relevance; the tail is dropped first.
        let mut tables: Vec<&RankedTable> = schema.tables.iter().collect();
        let mut include_examples = examples.is_some();
        let mut include_business = business.is_some();
        let mut dropped_sections = Vec::new();
        let mut dropped_tables = Vec::new();

        let assemble = |tables: &[&RankedTable], with_business: bool, with_examples: bool| {
            let mut sections: Vec<(PromptSection, String)> =
                vec![(PromptSection::SystemInstructions, system.clone())];
            if let Some(text) = render_schema(tables, schema) {
                sections.push((PromptSection::Schema, text));
            }
            if with_business {
                if let Some(text) = &business {
                    sections.push((PromptSection::BusinessContext, text.clone()));
                }
            }
            if with_examples {
                if let Some(text) = &examples {
                    sections.push((PromptSection::Examples, text.clone()));
                }
            }
            sections.push((PromptSection::Question, question.clone()));
            sections
        };

        let mut sections = assemble(&tables, include_business, include_examples);
        while estimate_tokens(&join(&sections)) > max_tokens {
            if include_examples {
                include_examples = false;
                dropped_sections.push(PromptSection::Examples);
            } else if include_business {
                include_business = false;
                dropped_sections.push(PromptSection::BusinessContext);
            } else if let Some(table) = tables.pop() {
                dropped_tables.push(table.name.clone());
            } else {
                break;
            }
            sections = assemble(&tables, include_business, include_examples);
        }
        if tables.is_empty() && !schema.tables.is_empty() {
            dropped_sections.push(PromptSection::Schema);
        }

        let mut truncated = false;
        if estimate_tokens(&join(&sections)) > max_tokens {
            truncated = true;
            for section in fit_sections(&mut sections, max_tokens) {
                if !dropped_sections.contains(&section) {
                    dropped_sections.push(section);
                }
            }
        }
        let text = join(&sections);

        let token_count = estimate_tokens(&text);
        if !dropped_sections.is_empty() || !dropped_tables.is_empty() || truncated {
            debug!(
                dropped_sections = ?dropped_sections,
                dropped_tables = ?dropped_tables,
                truncated = truncated,
                token_count = token_count,
                "Prompt trimmed to fit budget"
            );
        }

        BuiltPrompt {
            text,
            details: PromptDetails {
                template: templates::template_name(profile.intent.intent_type),
                sections: sections
                    .iter()
                    .map(|(section, text)| SectionInfo {
                        section: *section,
                        tokens: estimate_tokens(text),
                    })
                    .collect(),
                token_count,
                max_tokens,
                schema_table_count: tables.len(),
                dropped_sections,
                dropped_tables,
                truncated,
            },
        }
    }
}

/// Shorten sections ahead of the question until the prompt fits. Returns the
/// sections that had to go entirely.
fn fit_sections(sections: &mut Vec<(PromptSection, String)>, max_tokens: usize) -> Vec<PromptSection> {
    let budget = max_tokens * CHARS_PER_TOKEN;
    let separator = SECTION_SEPARATOR.chars().count();
    let question_chars: usize = sections
        .iter()
        .filter(|(section, _)| *section == PromptSection::Question)
        .map(|(_, text)| text.chars().count())
        .sum();

    let mut remaining = budget.saturating_sub(question_chars);
    let mut dropped = Vec::new();
    let mut kept = Vec::with_capacity(sections.len());
    for (section, text) in sections.drain(..) {
        if section == PromptSection::Question {
            kept.push((section, truncate_to_tokens(&text, max_tokens).to_string()));
            continue;
        }
        // Each section ahead of the question pays for one separator.
        if remaining <= separator {
            dropped.push(section);
            continue;
        }
        let cut: String = text.chars().take(remaining - separator).collect();
        remaining -= separator + cut.chars().count();
        kept.push((section, cut));
    }
    *sections = kept;
    dropped
}

fn join(sections: &[(PromptSection, String)]) -> String {
    sections
        .iter()
        .map(|(_, text)| text.as_str())
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR)
}

fn render_schema(tables: &[&RankedTable], schema: &ContextualBusinessSchema) -> Option<String> {
    if tables.is_empty() {
        return None;
    }
    let mut out = String::from("### Schema\n");
    for table in tables {
        out.push_str(&table.render());
    }

    let joins: Vec<String> = schema
        .join_paths
        .iter()
        .filter(|p| {
            [&p.from_table, &p.to_table]
                .iter()
                .all(|t| tables.iter().any(|x| x.name.eq_ignore_ascii_case(t)))
        })
        .map(|p| format!("- {}", p.describe()))
        .collect();
    if !joins.is_empty() {
        out.push_str("\n### Join conditions\n");
        out.push_str(&joins.join("\n"));
        out.push('\n');
    }
    Some(out.trim_end().to_string())
}

fn render_business_context(schema: &ContextualBusinessSchema) -> Option<String> {
    if schema.glossary.is_empty() && schema.business_rules.is_empty() {
        return None;
    }
    let mut out = String::from("### Business context\n");
    for term in &schema.glossary {
        out.push_str(&format!("- {}: {}", term.term, term.definition));
        if let Some(formula) = &term.formula {
            out.push_str(&format!(" [{}]", formula));
        }
        out.push('\n');
    }
    for rule in &schema.business_rules {
        out.push_str(&format!("- Rule: {}", rule.description));
        if let Some(hint) = &rule.sql_hint {
            out.push_str(&format!(" ({})", hint));
        }
        out.push('\n');
    }
    Some(out.trim_end().to_string())
}

fn render_examples(schema: &ContextualBusinessSchema, max_examples: usize) -> Option<String> {
    if schema.examples.is_empty() || max_examples == 0 {
        return None;
    }
    let mut out = String::from("### Examples\n");
    for example in schema.examples.iter().take(max_examples) {
        out.push_str(&format!("Q: {}\n```sql\n{}\n```\n", example.question, example.sql));
    }
    Some(out.trim_end().to_string())
}

fn render_question(profile: &BusinessContextProfile) -> String {
    let mut out = format!("### Question\n{}", profile.original_question.trim());
    if let Some(range) = &profile.time_range {
        out.push_str(&format!(
            "\nTime period: {} = [{}, {})",
            range.label, range.start, range.end
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::context::BusinessContextAnalyzer;
    use crate::metadata::Metadata;
    use crate::schema_rag::BusinessMetadataRetriever;
    use std::path::Path;
    use std::sync::Arc;

    fn fixture(question: &str) -> (BusinessContextProfile, ContextualBusinessSchema) {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("metadata");
        let metadata = Arc::new(Metadata::load(dir).unwrap());
        let analyzer = BusinessContextAnalyzer::new(metadata.clone());
        let retriever = BusinessMetadataRetriever::new(metadata, RetrievalConfig::default());
        let profile = analyzer.analyze(question, "u1", None);
        let schema = retriever.retrieve(&profile);
        (profile, schema)
    }

    fn order(details: &PromptDetails) -> Vec<PromptSection> {
        details.sections.iter().map(|s| s.section).collect()
    }

    #[test]
    fn test_sections_in_fixed_order() {
        let (profile, schema) = fixture("Show me total deposits by country last week");
        let prompt = PromptBuilder::new(PromptConfig::default()).build(&profile, &schema);

        assert_eq!(
            order(&prompt.details),
            vec![
                PromptSection::SystemInstructions,
                PromptSection::Schema,
                PromptSection::BusinessContext,
                PromptSection::Examples,
                PromptSection::Question,
            ]
        );
        assert_eq!(prompt.details.schema_table_count, schema.tables.len());
        assert!(prompt.text.contains("daily_actions.player_id = players.player_id"));
        assert!(prompt.text.ends_with(")"));
        assert!(!prompt.details.truncated);
    }

    #[test]
    fn test_never_exceeds_budget() {
        let (profile, schema) = fixture("Show me total deposits by country last week");
        let builder = PromptBuilder::new(PromptConfig::default());
        for budget in [1, 10, 50, 100, 150, 250, 400, 800, 6000] {
            let prompt = builder.build_with_budget(&profile, &schema, budget);
            assert!(
                prompt.details.token_count <= budget,
                "budget {} produced {}",
                budget,
                prompt.details.token_count
            );
            assert_eq!(prompt.details.token_count, estimate_tokens(&prompt.text));
        }
    }

    #[test]
    fn test_examples_dropped_before_business_context() {
        let (profile, schema) = fixture("Show me total deposits by country last week");
        let builder = PromptBuilder::new(PromptConfig::default());
        let full = builder.build_with_budget(&profile, &schema, 6000);
        let examples_tokens = full
            .details
            .sections
            .iter()
            .find(|s| s.section == PromptSection::Examples)
            .map(|s| s.tokens)
            .unwrap();

        // Just too small for the examples section.
        let budget = full.details.token_count - examples_tokens / 2;
        let trimmed = builder.build_with_budget(&profile, &schema, budget);
        assert_eq!(trimmed.details.dropped_sections, vec![PromptSection::Examples]);
        assert!(order(&trimmed.details).contains(&PromptSection::BusinessContext));

        let tight = builder.build_with_budget(&profile, &schema, 120);
        let dropped = &tight.details.dropped_sections;
        let ex = dropped.iter().position(|s| *s == PromptSection::Examples);
        let ctx = dropped.iter().position(|s| *s == PromptSection::BusinessContext);
        assert!(ex.is_some() && ctx.is_some() && ex < ctx);
    }

    #[test]
    fn test_examples_can_be_disabled() {
        let (profile, schema) = fixture("total deposits by country");
        let config = PromptConfig {
            include_examples: false,
            ..PromptConfig::default()
        };
        let prompt = PromptBuilder::new(config).build(&profile, &schema);
        assert!(!order(&prompt.details).contains(&PromptSection::Examples));
    }

    #[test]
    fn test_truncation_keeps_the_question() {
        let (profile, schema) = fixture("Show me total deposits by country last week");
        let builder = PromptBuilder::new(PromptConfig::default());
        let question = render_question(&profile);

        let budget = estimate_tokens(&question) + 20;
        let prompt = builder.build_with_budget(&profile, &schema, budget);
        assert!(prompt.details.truncated);
        assert!(prompt.text.ends_with(&question));
        assert!(prompt.details.token_count <= budget);
        assert_eq!(order(&prompt.details).last(), Some(&PromptSection::Question));

        // Section sizes describe the shortened text, not the original.
        let full = builder.build_with_budget(&profile, &schema, 6000);
        let system_tokens = |p: &BuiltPrompt| {
            p.details
                .sections
                .iter()
                .find(|s| s.section == PromptSection::SystemInstructions)
                .map(|s| s.tokens)
                .unwrap_or(0)
        };
        assert!(system_tokens(&prompt) < system_tokens(&full));
        let reported: usize = prompt.details.sections.iter().map(|s| s.tokens).sum();
        assert!(reported <= budget + prompt.details.sections.len());
    }

    #[test]
    fn test_question_alone_over_budget_is_cut() {
        let (profile, schema) = fixture("Show me total deposits by country last week");
        let prompt = PromptBuilder::new(PromptConfig::default()).build_with_budget(&profile, &schema, 3);
        assert_eq!(order(&prompt.details), vec![PromptSection::Question]);
        assert!(prompt.text.starts_with("### Question"));
        assert!(prompt.details.token_count <= 3);
    }
}
