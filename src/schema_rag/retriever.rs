//! Business metadata retrieval.
//!
//! Scores every table against a [`BusinessContextProfile`], keeps the best
//! within the table and token budgets, adds bridge tables needed for joins,
//! and returns the columns, join paths, glossary terms, rules and examples
//! that belong with them.

use crate::config::RetrievalConfig;
use crate::context::{BusinessContextProfile, EntityType, IntentType};
use crate::metadata::{BusinessRule, ColumnRole, GlossaryTerm, Metadata, QueryExample, Table};
use crate::prompt::tokens::estimate_tokens;
use crate::schema_rag::embedder::HashingEmbedder;
use crate::schema_rag::join_paths::{JoinGraph, JoinPath};
use crate::schema_rag::vector_store::{Document, Embedding, InMemoryVectorStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

const SCHEMA_EMBEDDING_DIMENSION: usize = 512;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedColumn {
    pub name: String,
    pub data_type: String,
    pub description: Option<String>,
    pub business_meaning: Option<String>,
    pub role: ColumnRole,
    pub is_primary_key: bool,
    pub relevance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedTable {
    pub name: String,
    pub qualified_name: String,
    pub description: Option<String>,
    pub business_purpose: Option<String>,
    pub domain: Option<String>,
    pub relevance: f64,
    pub importance: f64,
    /// Added only to connect other tables.
    pub is_bridge: bool,
    pub columns: Vec<RankedColumn>,
    pub estimated_tokens: usize,
}

impl RankedTable {
    /// Compact schema rendering used in prompts and token estimates.
    pub fn render(&self) -> String {
        let mut out = format!("TABLE {}", self.qualified_name);
        if let Some(desc) = self.description.as_ref().or(self.business_purpose.as_ref()) {
            out.push_str(&format!(" -- {}", desc));
        }
        out.push('\n');
        for column in &self.columns {
            out.push_str(&format!("  {} {}", column.name, column.data_type));
            if column.is_primary_key {
                out.push_str(" PRIMARY KEY");
            }
            let note = column
                .business_meaning
                .as_ref()
                .or(column.description.as_ref());
            if let Some(note) = note {
                out.push_str(&format!(" -- {}", note));
            }
            out.push('\n');
        }
        out
    }
}

/// Schema subset judged relevant to one question.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextualBusinessSchema {
    /// Sorted by descending relevance, ties by name.
    pub tables: Vec<RankedTable>,
    pub join_paths: Vec<JoinPath>,
    pub glossary: Vec<GlossaryTerm>,
    pub business_rules: Vec<BusinessRule>,
    pub examples: Vec<QueryExample>,
    pub estimated_tokens: usize,
    pub candidate_count: usize,
    /// No table matched the question; tables were chosen by importance.
    pub used_fallback: bool,
}

impl ContextualBusinessSchema {
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t.name.eq_ignore_ascii_case(name))
    }
}

pub struct BusinessMetadataRetriever {
    metadata: Arc<Metadata>,
    config: RetrievalConfig,
    graph: JoinGraph,
    embedder: HashingEmbedder,
    index: InMemoryVectorStore,
}

impl BusinessMetadataRetriever {
    pub fn new(metadata: Arc<Metadata>, config: RetrievalConfig) -> Self {
        let graph = JoinGraph::new(&metadata.relationships);
        let embedder = HashingEmbedder::new(SCHEMA_EMBEDDING_DIMENSION);
        let mut index = InMemoryVectorStore::new(SCHEMA_EMBEDDING_DIMENSION);

        for table in &metadata.tables {
            let text = table_text(table);
            let document = Document {
                id: table.name.to_lowercase(),
                embedding: embedder.embed_sync(&text),
                metadata: HashMap::from([("table".to_string(), table.name.clone())]),
                text,
            };
            if let Err(e) = index.add_document(document) {
                warn!(table = %table.name, error = %e, "Skipping table in schema index");
            }
        }

        Self {
            metadata,
            config,
            graph,
            embedder,
            index,
        }
    }

    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve with the configured budgets.
    pub fn retrieve(&self, profile: &BusinessContextProfile) -> ContextualBusinessSchema {
        self.retrieve_with_budget(profile, self.config.max_tables, self.config.max_tokens)
    }

    pub fn retrieve_with_budget(
        &self,
        profile: &BusinessContextProfile,
        max_tables: usize,
        max_tokens: usize,
    ) -> ContextualBusinessSchema {
        let query_embedding = self.embedder.embed_sync(&profile.original_question);
        let semantic_scores = self.semantic_scores(&query_embedding);
        let glossary_tables = self.glossary_linked_tables(profile);

        let mut scored: Vec<(&Table, f64)> = self
            .metadata
            .tables
            .iter()
            .filter_map(|table| {
                let direct = profile
                    .entities
                    .iter()
                    .filter(|e| {
                        e.mapped_table
                            .as_deref()
                            .is_some_and(|t| t.eq_ignore_ascii_case(&table.name))
                    })
                    .map(|e| e.confidence)
                    .fold(0.0f64, f64::max);
                let semantic = semantic_scores
                    .get(&table.name.to_lowercase())
                    .copied()
                    .unwrap_or(0.0)
                    .max(0.0) as f64;
                let linked = glossary_tables.contains(&table.name.to_lowercase());
                let domain = table
                    .domain
                    .as_deref()
                    .is_some_and(|d| d.eq_ignore_ascii_case(&profile.domain.name));

                if direct == 0.0 && !linked && semantic < 0.25 {
                    return None;
                }

                let relevance = 0.45 * direct
                    + 0.2 * semantic
                    + if domain { 0.1 } else { 0.0 }
                    + 0.1 * table.importance_score.clamp(0.0, 1.0)
                    + if linked { 0.1 } else { 0.0 };
                let relevance = relevance.clamp(0.0, 1.0);
                (relevance >= self.config.min_relevance).then_some((table, relevance))
            })
            .collect();

        let candidate_count = scored.len();
        let used_fallback = scored.is_empty();
        if used_fallback {
            debug!(question = %profile.original_question, "No table matched; falling back to importance");
            scored = self
                .metadata
                .tables
                .iter()
                .map(|t| (t, 0.1 * t.importance_score.clamp(0.0, 1.0)))
                .collect();
            sort_ranked(&mut scored);
            scored.truncate(max_tables.min(3));
        }

        sort_ranked(&mut scored);
        scored.truncate(max_tables);

        // Tables needed to join the selection together.
        let selected: Vec<String> = scored.iter().map(|(t, _)| t.name.clone()).collect();
        let (_, bridges) = self.graph.connect(&selected, self.config.max_join_depth);
        let mut bridge_set = HashSet::new();
        if !bridges.is_empty() {
            let floor = scored.iter().map(|(_, r)| *r).fold(f64::MAX, f64::min);
            for bridge in bridges {
                if let Some(table) = self.metadata.table(&bridge) {
                    bridge_set.insert(table.name.to_lowercase());
                    scored.push((table, (floor * 0.5).max(0.0)));
                }
            }
            sort_ranked(&mut scored);
            scored.truncate(max_tables);
        }

        // Token budget, in ranked order.
        let mut tables = Vec::new();
        let mut used_tokens = 0usize;
        for (table, relevance) in &scored {
            let ranked = self.rank_table(
                table,
                *relevance,
                bridge_set.contains(&table.name.to_lowercase()),
                profile,
            );
            if used_tokens + ranked.estimated_tokens > max_tokens {
                debug!(table = %table.name, "Table skipped by token budget");
                continue;
            }
            used_tokens += ranked.estimated_tokens;
            tables.push(ranked);
        }

        let names: Vec<String> = tables.iter().map(|t| t.name.clone()).collect();
        let (join_paths, _) = self.graph.connect(&names, self.config.max_join_depth);
        let name_set: HashSet<String> = names.iter().map(|n| n.to_lowercase()).collect();

        let glossary = self
            .metadata
            .glossary
            .iter()
            .filter(|g| {
                profile
                    .business_terms
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(&g.term))
                    || g.related_tables
                        .iter()
                        .any(|t| name_set.contains(&t.to_lowercase()))
            })
            .cloned()
            .collect();

        let business_rules = self
            .metadata
            .business_rules
            .iter()
            .filter(|r| r.applies_to.iter().any(|t| name_set.contains(&t.to_lowercase())))
            .cloned()
            .collect();

        let examples = self.rank_examples(&name_set, &query_embedding);

        debug!(
            tables = ?names,
            joins = join_paths.len(),
            tokens = used_tokens,
            "Retrieved business schema"
        );

        ContextualBusinessSchema {
            tables,
            join_paths,
            glossary,
            business_rules,
            examples,
            estimated_tokens: used_tokens,
            candidate_count,
            used_fallback,
        }
    }

    /// Cosine score of every indexed table against the question, keyed by lowercase name.
    fn semantic_scores(&self, query_embedding: &Embedding) -> HashMap<String, f32> {
        if self.index.is_empty() {
            return HashMap::new();
        }
        match self.index.search(query_embedding, self.index.len()) {
            Ok(results) => results
                .into_iter()
                .map(|r| (r.document.id, r.score))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Semantic table search failed");
                HashMap::new()
            }
        }
    }

    fn glossary_linked_tables(&self, profile: &BusinessContextProfile) -> HashSet<String> {
        profile
            .entities_of(EntityType::GlossaryTerm)
            .filter_map(|e| {
                self.metadata
                    .glossary
                    .iter()
                    .find(|g| g.term.eq_ignore_ascii_case(&e.name))
            })
            .flat_map(|g| g.related_tables.iter().map(|t| t.to_lowercase()))
            .collect()
    }

    fn rank_table(
        &self,
        table: &Table,
        relevance: f64,
        is_bridge: bool,
        profile: &BusinessContextProfile,
    ) -> RankedTable {
        let mentioned: HashSet<String> = profile
            .entities
            .iter()
            .filter(|e| {
                e.mapped_table
                    .as_deref()
                    .is_some_and(|t| t.eq_ignore_ascii_case(&table.name))
            })
            .filter_map(|e| e.mapped_column.as_ref().map(|c| c.to_lowercase()))
            .collect();
        let join_keys: HashSet<String> = self
            .metadata
            .relationships_for(&table.name)
            .map(|r| {
                if r.from_table.eq_ignore_ascii_case(&table.name) {
                    r.from_column.to_lowercase()
                } else {
                    r.to_column.to_lowercase()
                }
            })
            .collect();
        let aggregating = matches!(
            profile.intent.intent_type,
            IntentType::Aggregation | IntentType::Trend | IntentType::Comparison | IntentType::Analytical
        );

        let mut columns: Vec<(usize, RankedColumn)> = table
            .columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let key = column.name.to_lowercase();
                let role = column.effective_role();
                let is_time = table
                    .time_column
                    .as_deref()
                    .is_some_and(|t| t.eq_ignore_ascii_case(&column.name));
                let relevance = if mentioned.contains(&key) {
                    1.0
                } else if join_keys.contains(&key) || column.is_primary_key {
                    0.6
                } else if is_time {
                    if profile.time_range.is_some() { 0.7 } else { 0.4 }
                } else if role == ColumnRole::Measure && aggregating {
                    0.4
                } else {
                    0.2
                };
                (
                    idx,
                    RankedColumn {
                        name: column.name.clone(),
                        data_type: column.data_type.clone(),
                        description: column.description.clone(),
                        business_meaning: column.business_meaning.clone(),
                        role,
                        is_primary_key: column.is_primary_key,
                        relevance,
                    },
                )
            })
            .collect();

        columns.sort_by(|a, b| {
            b.1.relevance
                .partial_cmp(&a.1.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        columns.truncate(self.config.max_columns_per_table);
        // Present kept columns in declaration order.
        columns.sort_by_key(|(idx, _)| *idx);

        let mut ranked = RankedTable {
            name: table.name.clone(),
            qualified_name: table.qualified_name(),
            description: table.description.clone(),
            business_purpose: table.business_purpose.clone(),
            domain: table.domain.clone(),
            relevance,
            importance: table.importance_score,
            is_bridge,
            columns: columns.into_iter().map(|(_, c)| c).collect(),
            estimated_tokens: 0,
        };
        ranked.estimated_tokens = estimate_tokens(&ranked.render());
        ranked
    }

    /// Examples touching the selected tables, most overlapping first.
    fn rank_examples(
        &self,
        tables: &HashSet<String>,
        query_embedding: &[f32],
    ) -> Vec<QueryExample> {
        let mut scored: Vec<(usize, f32, &QueryExample)> = self
            .metadata
            .examples
            .iter()
            .filter_map(|ex| {
                let overlap = ex
                    .tables
                    .iter()
                    .filter(|t| tables.contains(&t.to_lowercase()))
                    .count();
                if overlap == 0 {
                    return None;
                }
                let similarity = crate::schema_rag::vector_store::cosine_similarity(
                    query_embedding,
                    &self.embedder.embed_sync(&ex.question),
                );
                Some((overlap, similarity, ex))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.cmp(&a.0).then_with(|| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });
        scored.into_iter().map(|(_, _, ex)| ex.clone()).collect()
    }
}

fn sort_ranked(scored: &mut [(&Table, f64)]) {
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.name.cmp(&b.0.name))
    });
}

fn table_text(table: &Table) -> String {
    let mut parts = vec![table.name.clone()];
    parts.extend(table.aliases.iter().cloned());
    parts.extend(table.description.iter().cloned());
    parts.extend(table.business_purpose.iter().cloned());
    for column in &table.columns {
        parts.push(column.name.clone());
        parts.extend(column.aliases.iter().cloned());
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BusinessContextAnalyzer;
    use std::path::Path;

    fn setup() -> (BusinessContextAnalyzer, BusinessMetadataRetriever) {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("metadata");
        let metadata = Arc::new(Metadata::load(dir).unwrap());
        (
            BusinessContextAnalyzer::new(metadata.clone()),
            BusinessMetadataRetriever::new(metadata, RetrievalConfig::default()),
        )
    }

    #[test]
    fn test_deposits_by_country_includes_join_through_players() {
        let (analyzer, retriever) = setup();
        let profile = analyzer.analyze("Show me total deposits by country last week", "u1", None);
        let schema = retriever.retrieve(&profile);

        assert!(schema.has_table("daily_actions"));
        assert!(schema.has_table("countries"));
        assert!(schema.has_table("players"));
        assert_eq!(schema.tables[0].name, "daily_actions");
        assert!(schema.tables.iter().any(|t| t.name == "players" && t.is_bridge));

        let path = schema
            .join_paths
            .iter()
            .find(|p| p.to_table == "countries" || p.from_table == "countries")
            .unwrap();
        assert_eq!(path.steps.len(), 2);
        assert!(schema.glossary.iter().any(|g| g.term == "Deposits"));
        assert!(!schema.used_fallback);
    }

    #[test]
    fn test_never_exceeds_max_tables_and_sorted() {
        let (analyzer, retriever) = setup();
        let profile = analyzer.analyze(
            "compare deposits, bets, wins and bonuses by country and game provider for players",
            "u1",
            None,
        );
        for max_tables in 1..=4 {
            let schema = retriever.retrieve_with_budget(&profile, max_tables, 4000);
            assert!(schema.tables.len() <= max_tables);
            for pair in schema.tables.windows(2) {
                assert!(pair[0].relevance >= pair[1].relevance);
                if pair[0].relevance == pair[1].relevance {
                    assert!(pair[0].name <= pair[1].name);
                }
            }
        }
    }

    #[test]
    fn test_token_budget_is_respected() {
        let (analyzer, retriever) = setup();
        let profile = analyzer.analyze("total deposits by country", "u1", None);
        let schema = retriever.retrieve_with_budget(&profile, 5, 60);
        assert!(schema.estimated_tokens <= 60);
        let rendered: usize = schema.tables.iter().map(|t| t.estimated_tokens).sum();
        assert_eq!(rendered, schema.estimated_tokens);
    }

    #[test]
    fn test_unmatched_question_falls_back_to_important_tables() {
        let (analyzer, retriever) = setup();
        let profile = analyzer.analyze("qwzx plorf", "u1", None);
        let schema = retriever.retrieve(&profile);
        assert!(schema.used_fallback);
        assert!(!schema.tables.is_empty());
        assert!(schema.tables.len() <= RetrievalConfig::default().max_tables);
        assert_eq!(schema.tables[0].name, "daily_actions");
        assert!(schema.tables.iter().all(|t| t.relevance <= 0.1));
    }

    #[test]
    fn test_mentioned_columns_are_kept() {
        let (analyzer, retriever) = setup();
        let profile = analyzer.analyze("total deposits by country", "u1", None);
        let schema = retriever.retrieve(&profile);
        let daily = schema.tables.iter().find(|t| t.name == "daily_actions").unwrap();
        assert!(daily.columns.iter().any(|c| c.name == "deposits" && c.relevance == 1.0));
        assert!(daily.columns.iter().any(|c| c.name == "player_id"));
    }

    #[test]
    fn test_semantic_scores_cover_every_indexed_table() {
        let (_, retriever) = setup();
        let metadata = retriever.metadata().clone();
        let players = metadata.table("players").unwrap();
        let query = retriever.embedder.embed_sync(&table_text(players));

        let scores = retriever.semantic_scores(&query);
        assert_eq!(scores.len(), metadata.tables.len());
        let best = scores
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        assert_eq!(best.0, "players");
        assert!((best.1 - 1.0).abs() < 0.001);
    }
}
