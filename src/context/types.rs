use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentType {
    Analytical,
    Operational,
    Exploratory,
    Comparison,
    Aggregation,
    Trend,
    Detail,
    Unknown,
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntentType::Analytical => "Analytical",
            IntentType::Operational => "Operational",
            IntentType::Exploratory => "Exploratory",
            IntentType::Comparison => "Comparison",
            IntentType::Aggregation => "Aggregation",
            IntentType::Trend => "Trend",
            IntentType::Detail => "Detail",
            IntentType::Unknown => "Unknown",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryIntent {
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    pub confidence: f64,
    pub matched_keywords: Vec<String>,
}

impl QueryIntent {
    pub fn unknown() -> Self {
        Self {
            intent_type: IntentType::Unknown,
            confidence: 0.1,
            matched_keywords: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessDomain {
    pub name: String,
    pub relevance: f64,
}

impl BusinessDomain {
    pub const UNKNOWN: &'static str = "Unknown";

    pub fn unknown() -> Self {
        Self {
            name: Self::UNKNOWN.to_string(),
            relevance: 0.0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.name == Self::UNKNOWN
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Table,
    Column,
    Metric,
    Dimension,
    GlossaryTerm,
    TimeReference,
    ComparisonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessEntity {
    pub name: String,
    pub entity_type: EntityType,
    pub mapped_table: Option<String>,
    pub mapped_column: Option<String>,
    pub confidence: f64,
}

impl BusinessEntity {
    pub fn new(name: impl Into<String>, entity_type: EntityType, confidence: f64) -> Self {
        Self {
            name: name.into(),
            entity_type,
            mapped_table: None,
            mapped_column: None,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn mapped(mut self, table: &str, column: Option<&str>) -> Self {
        self.mapped_table = Some(table.to_string());
        self.mapped_column = column.map(str::to_string);
        self
    }
}

/// Half-open date range `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub label: String,
}

/// Analyzed meaning of one question. Intent and domain are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessContextProfile {
    pub original_question: String,
    pub user_id: String,
    pub intent: QueryIntent,
    pub domain: BusinessDomain,
    pub entities: Vec<BusinessEntity>,
    pub business_terms: Vec<String>,
    pub time_range: Option<TimeRange>,
    pub confidence_score: f64,
    pub is_follow_up: bool,
    pub analyzed_at: DateTime<Utc>,
}

impl BusinessContextProfile {
    pub fn entities_of(&self, entity_type: EntityType) -> impl Iterator<Item = &BusinessEntity> {
        self.entities
            .iter()
            .filter(move |e| e.entity_type == entity_type)
    }

    /// Distinct tables referenced by entities, in first-seen order.
    pub fn mapped_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = Vec::new();
        for entity in &self.entities {
            if let Some(table) = &entity.mapped_table {
                if !tables.iter().any(|t| t.eq_ignore_ascii_case(table)) {
                    tables.push(table.clone());
                }
            }
        }
        tables
    }
}
