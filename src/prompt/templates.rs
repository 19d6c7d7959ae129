use crate::context::IntentType;

pub const SYSTEM_TEMPLATE: &str = "You are a senior business intelligence analyst who writes {dialect} SQL.
Answer the user's question with exactly one read-only SELECT statement.
Use only the tables and columns listed in the schema section. Qualify columns with table names.
Follow the join conditions given; do not invent relationships.
Return the SQL inside a ```sql fenced block and nothing else.";

pub fn system_instructions(dialect: &str, intent: IntentType) -> String {
    let mut text = SYSTEM_TEMPLATE.replace("{dialect}", dialect);
    if let Some(hint) = intent_hint(intent) {
        text.push('\n');
        text.push_str(hint);
    }
    text
}

fn intent_hint(intent: IntentType) -> Option<&'static str> {
    match intent {
        IntentType::Aggregation => {
            Some("Aggregate measures with SUM/COUNT/AVG and GROUP BY every non-aggregated column.")
        }
        IntentType::Trend => Some("Group by a time bucket (date_trunc) and order chronologically."),
        IntentType::Comparison => {
            Some("Return the compared groups side by side so they can be contrasted.")
        }
        IntentType::Analytical => Some("Order results so the most significant rows come first."),
        IntentType::Detail => Some("Return row-level detail and LIMIT the result to 100 rows."),
        IntentType::Operational => Some("Focus on the current state; prefer the most recent data."),
        IntentType::Exploratory => Some("Prefer a small, representative result with a LIMIT."),
        IntentType::Unknown => None,
    }
}

/// Template id reported in prompt diagnostics.
pub fn template_name(intent: IntentType) -> String {
    format!("business_context.{}", intent.to_string().to_lowercase())
}

pub const LEGACY_TEMPLATE_NAME: &str = "legacy.schema_dump";

pub const LEGACY_SYSTEM_TEMPLATE: &str = "Translate the question into a single {dialect} SELECT statement.
Return only SQL inside a ```sql fenced block.";
