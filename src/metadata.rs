use crate::error::{BiError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Role a column plays in analytical queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Identifier,
    Measure,
    Dimension,
    Time,
    Attribute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub business_meaning: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub role: Option<ColumnRole>,
}

impl ColumnMetadata {
    pub fn is_numeric(&self) -> bool {
        let t = self.data_type.to_lowercase();
        [
            "int", "numeric", "decimal", "float", "double", "real", "money", "bigint", "smallint",
        ]
        .iter()
        .any(|n| t.contains(n))
    }

    pub fn is_temporal(&self) -> bool {
        let t = self.data_type.to_lowercase();
        t.contains("date") || t.contains("time")
    }

    /// Role declared in metadata, otherwise inferred from the data type.
    pub fn effective_role(&self) -> ColumnRole {
        if let Some(role) = self.role {
            return role;
        }
        if self.is_primary_key {
            ColumnRole::Identifier
        } else if self.is_temporal() {
            ColumnRole::Time
        } else if self.is_numeric() {
            ColumnRole::Measure
        } else {
            ColumnRole::Dimension
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub business_purpose: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Curated importance in [0,1].
    #[serde(default)]
    pub importance_score: f64,
    /// How often the table appeared in successful queries.
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub time_column: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnMetadata>,
}

fn default_schema() -> String {
    "public".to_string()
}

impl Table {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Declared foreign-key relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    #[serde(default)]
    pub usage_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlossaryTerm {
    pub term: String,
    pub definition: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub related_tables: Vec<String>,
    /// `table.column` references.
    #[serde(default)]
    pub related_columns: Vec<String>,
    #[serde(default)]
    pub formula: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessRule {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub applies_to: Vec<String>,
    #[serde(default)]
    pub sql_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryExample {
    pub question: String,
    pub sql: String,
    #[serde(default)]
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainDefinition {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Business metadata: schema, glossary, rules and curated examples.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub tables: Vec<Table>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub glossary: Vec<GlossaryTerm>,
    #[serde(default)]
    pub business_rules: Vec<BusinessRule>,
    #[serde(default)]
    pub examples: Vec<QueryExample>,
    #[serde(default)]
    pub domains: Vec<DomainDefinition>,
    #[serde(skip)]
    tables_by_name: HashMap<String, usize>,
}

impl Metadata {
    pub fn new(
        tables: Vec<Table>,
        relationships: Vec<Relationship>,
        glossary: Vec<GlossaryTerm>,
        business_rules: Vec<BusinessRule>,
        examples: Vec<QueryExample>,
        domains: Vec<DomainDefinition>,
    ) -> Self {
        let mut metadata = Self {
            tables,
            relationships,
            glossary,
            business_rules,
            examples,
            domains,
            tables_by_name: HashMap::new(),
        };
        metadata.build_indexes();
        metadata
    }

    /// Load from a directory of JSON files. Only `tables.json` is required.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();

        let tables_obj: serde_json::Value = Self::load_json(dir.join("tables.json"))?;
        let tables: Vec<Table> = if tables_obj.get("tables").is_some() {
            serde_json::from_value(tables_obj["tables"].clone())?
        } else {
            serde_json::from_value(tables_obj)?
        };

        let relationships = Self::load_optional(dir.join("relationships.json"))?;
        let glossary = Self::load_optional(dir.join("glossary.json"))?;
        let business_rules = Self::load_optional(dir.join("business_rules.json"))?;
        let examples = Self::load_optional(dir.join("examples.json"))?;
        let domains = Self::load_optional(dir.join("domains.json"))?;

        let metadata = Self::new(tables, relationships, glossary, business_rules, examples, domains);
        metadata.validate()?;
        Ok(metadata)
    }

    fn load_json<T: for<'de> Deserialize<'de>>(path: PathBuf) -> Result<T> {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| BiError::Metadata(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| BiError::Metadata(format!("Failed to parse {}: {}", path.display(), e)))
    }

    fn load_optional<T: for<'de> Deserialize<'de>>(path: PathBuf) -> Result<Vec<T>> {
        if path.exists() {
            Self::load_json(path)
        } else {
            Ok(Vec::new())
        }
    }

    fn build_indexes(&mut self) {
        self.tables_by_name = self
            .tables
            .iter()
            .enumerate()
            .map(|(idx, t)| (t.name.to_lowercase(), idx))
            .collect();
    }

    /// Relationships must reference known tables and columns.
    pub fn validate(&self) -> Result<()> {
        for rel in &self.relationships {
            for (table, column) in [
                (&rel.from_table, &rel.from_column),
                (&rel.to_table, &rel.to_column),
            ] {
                let t = self.table(table).ok_or_else(|| {
                    BiError::Metadata(format!("Relationship references unknown table '{}'", table))
                })?;
                if t.column(column).is_none() {
                    return Err(BiError::Metadata(format!(
                        "Relationship references unknown column '{}.{}'",
                        table, column
                    )));
                }
            }
        }
        Ok(())
    }

    /// Case-insensitive table lookup.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables_by_name
            .get(&name.to_lowercase())
            .and_then(|idx| self.tables.get(*idx))
    }

    pub fn relationships_for(&self, table: &str) -> impl Iterator<Item = &Relationship> {
        let table = table.to_lowercase();
        self.relationships.iter().filter(move |r| {
            r.from_table.to_lowercase() == table || r.to_table.to_lowercase() == table
        })
    }
}
