//! Business context analysis.
//!
//! Keyword and phrase matching against curated term lists decides intent and
//! domain. Entities are found by matching the question against table, column
//! and glossary names from the business metadata, with fuzzy matching for
//! longer single words. Nothing here fails: an unresolvable question yields an
//! `Unknown` intent and domain with low confidence.

use super::session::ConversationTurn;
use super::types::{
    BusinessContextProfile, BusinessDomain, BusinessEntity, EntityType, IntentType, QueryIntent,
    TimeRange,
};
use crate::fuzzy_matcher::FuzzyMatcher;
use crate::metadata::{ColumnMetadata, ColumnRole, Metadata, Table};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Intent keyword lists, in tie-break priority order.
const INTENT_KEYWORDS: &[(IntentType, &[&str])] = &[
    (
        IntentType::Comparison,
        &["compare", "comparison", "versus", "vs", "difference between", "compared to", "against"],
    ),
    (
        IntentType::Trend,
        &[
            "trend", "over time", "growth", "monthly", "weekly", "daily", "per day", "per month",
            "per week", "evolution", "historical", "change over",
        ],
    ),
    (
        IntentType::Aggregation,
        &[
            "total", "sum", "count", "average", "avg", "how many", "how much", "number of", "mean",
            "maximum", "minimum",
        ],
    ),
    (
        IntentType::Analytical,
        &[
            "why", "analyze", "analyse", "analysis", "correlation", "impact", "breakdown",
            "distribution", "top", "rank", "ranking", "best", "worst",
        ],
    ),
    (
        IntentType::Detail,
        &["list", "show all", "details", "detail", "records", "which", "who"],
    ),
    (
        IntentType::Operational,
        &["status", "current", "currently", "pending", "active", "right now", "today"],
    ),
    (
        IntentType::Exploratory,
        &["explore", "what data", "what tables", "insights", "overview", "tell me about"],
    ),
];

/// Openers that mark a question as continuing the previous one.
const FOLLOW_UP_OPENERS: &[&str] = &["and", "what about", "how about", "also", "now"];
const FOLLOW_UP_REFERENCES: &[&str] = &["those", "them", "same", "instead"];

const TIME_GRAINS: &[&str] = &["day", "week", "month", "year", "quarter", "date", "hour"];

lazy_static! {
    static ref METRIC_RE: Regex = Regex::new(
        r"\b(?:total|sum of|average|avg|mean|count of|number of|maximum|max|minimum|min|how many|how much)\s+([a-z][a-z_]*)"
    )
    .expect("static regex");
    static ref DIMENSION_RE: Regex =
        Regex::new(r"\b(?:by|per|for each|across|grouped by)\s+([a-z][a-z_]*)").expect("static regex");
    static ref LAST_N_RE: Regex =
        Regex::new(r"\b(?:last|past|previous)\s+(\d+)\s+(day|week|month)s?\b").expect("static regex");
    static ref IN_YEAR_RE: Regex = Regex::new(r"\bin\s+((?:19|20)\d{2})\b").expect("static regex");
    static ref COMPARATOR_RE: Regex = Regex::new(
        r"\b(more than|greater than|over|above|less than|below|under|at least|at most)\s+(\d+(?:\.\d+)?)"
    )
    .expect("static regex");
    static ref QUOTED_RE: Regex = Regex::new(r#"['"]([^'"]+)['"]"#).expect("static regex");
    static ref TOP_N_RE: Regex = Regex::new(r"\b(top|bottom)\s+(\d+)\b").expect("static regex");
    static ref VERSUS_RE: Regex =
        Regex::new(r"\b([a-z0-9]+)\s+(?:vs|versus)\.?\s+([a-z0-9]+)\b").expect("static regex");
}

/// Pre-tokenized question.
struct Question {
    lowered: String,
    /// Normalized text padded with spaces for whole-phrase lookups.
    padded: String,
    /// Singularized tokens.
    tokens: Vec<String>,
}

impl Question {
    fn parse(text: &str) -> Self {
        let normalized = FuzzyMatcher::normalize_term(text);
        let tokens = normalized
            .split(' ')
            .filter(|t| !t.is_empty())
            .map(FuzzyMatcher::singularize)
            .collect();
        Self {
            lowered: text.to_lowercase(),
            padded: format!(" {} ", normalized),
            tokens,
        }
    }

    fn has_keyword(&self, keyword: &str) -> bool {
        self.padded
            .contains(&format!(" {} ", FuzzyMatcher::normalize_term(keyword)))
    }

    /// Whole-phrase match on singularized tokens.
    fn has_phrase(&self, phrase: &str) -> bool {
        let wanted: Vec<String> = FuzzyMatcher::normalize_term(phrase)
            .split(' ')
            .filter(|t| !t.is_empty())
            .map(FuzzyMatcher::singularize)
            .collect();
        if wanted.is_empty() || wanted.len() > self.tokens.len() {
            return false;
        }
        self.tokens.windows(wanted.len()).any(|w| w == wanted.as_slice())
    }

    /// Best fuzzy score of a single-word phrase against any token of 5+ chars.
    fn fuzzy_word(&self, matcher: &FuzzyMatcher, word: &str) -> Option<f64> {
        let word = FuzzyMatcher::normalize_term(word);
        if word.contains(' ') || word.len() < 5 {
            return None;
        }
        self.tokens
            .iter()
            .filter(|t| t.len() >= 5)
            .map(|t| matcher.similarity(t, &word))
            .filter(|s| *s >= matcher.similarity_threshold)
            .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))))
    }

    fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

pub struct BusinessContextAnalyzer {
    metadata: Arc<Metadata>,
    matcher: FuzzyMatcher,
}

impl BusinessContextAnalyzer {
    pub fn new(metadata: Arc<Metadata>) -> Self {
        Self {
            metadata,
            matcher: FuzzyMatcher::default(),
        }
    }

    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    pub fn analyze(
        &self,
        question: &str,
        user_id: &str,
        prior: Option<&ConversationTurn>,
    ) -> BusinessContextProfile {
        self.analyze_at(question, user_id, prior, Utc::now())
    }

    /// Analyze relative to `now`, which anchors time references.
    pub fn analyze_at(
        &self,
        question: &str,
        user_id: &str,
        prior: Option<&ConversationTurn>,
        now: DateTime<Utc>,
    ) -> BusinessContextProfile {
        let parsed = Question::parse(question);

        if parsed.is_empty() {
            return BusinessContextProfile {
                original_question: question.to_string(),
                user_id: user_id.to_string(),
                intent: QueryIntent::unknown(),
                domain: BusinessDomain::unknown(),
                entities: Vec::new(),
                business_terms: Vec::new(),
                time_range: None,
                confidence_score: 0.0,
                is_follow_up: false,
                analyzed_at: now,
            };
        }

        let intent = self.classify_intent(&parsed);
        let mut business_terms = Vec::new();
        let mut entities = Vec::new();

        self.match_tables(&parsed, &mut entities);
        self.match_columns(&parsed, &mut entities);
        self.match_glossary(&parsed, &mut entities, &mut business_terms);
        self.extract_metrics(&parsed, &mut entities, &mut business_terms);
        self.extract_dimensions(&parsed, &mut entities, &mut business_terms);

        let time_range = detect_time_range(&parsed, now.date_naive());
        if let Some(range) = &time_range {
            entities.push(BusinessEntity::new(range.label.clone(), EntityType::TimeReference, 0.9));
        }
        extract_comparison_values(&parsed, &mut entities);

        let has_mapping = entities.iter().any(|e| e.mapped_table.is_some());
        let has_marker = FOLLOW_UP_OPENERS
            .iter()
            .any(|m| parsed.padded.starts_with(&format!(" {} ", m)))
            || FOLLOW_UP_REFERENCES.iter().any(|m| parsed.has_keyword(m));
        let mut is_follow_up = false;
        if let Some(turn) = prior {
            if !has_mapping {
                let inherited: Vec<BusinessEntity> = turn
                    .entities
                    .iter()
                    .filter(|e| e.mapped_table.is_some())
                    .filter(|e| {
                        !matches!(
                            e.entity_type,
                            EntityType::TimeReference | EntityType::ComparisonValue
                        )
                    })
                    .map(|e| {
                        let mut e = e.clone();
                        e.confidence = (e.confidence * 0.7).clamp(0.0, 1.0);
                        e
                    })
                    .collect();
                if !inherited.is_empty() {
                    debug!(
                        user_id = user_id,
                        inherited = inherited.len(),
                        "Follow-up question inherits previous entities"
                    );
                    entities.extend(inherited);
                    is_follow_up = true;
                }
            }
        }
        // Phrased as a continuation even when no earlier turn is known.
        is_follow_up |= has_marker;

        let entities = dedupe_entities(entities);
        business_terms = dedupe_terms(business_terms);
        let domain = self.classify_domain(&parsed, &entities);

        let entity_score = (entities
            .iter()
            .filter(|e| e.mapped_table.is_some())
            .map(|e| e.confidence)
            .sum::<f64>()
            / 3.0)
            .min(1.0);
        let confidence_score =
            (0.4 * intent.confidence + 0.3 * domain.relevance + 0.3 * entity_score).clamp(0.0, 1.0);

        debug!(
            intent = %intent.intent_type,
            domain = %domain.name,
            entities = entities.len(),
            confidence = confidence_score,
            "Analyzed question"
        );

        BusinessContextProfile {
            original_question: question.to_string(),
            user_id: user_id.to_string(),
            intent,
            domain,
            entities,
            business_terms,
            time_range,
            confidence_score,
            is_follow_up,
            analyzed_at: now,
        }
    }

    fn classify_intent(&self, question: &Question) -> QueryIntent {
        let mut scored: Vec<(IntentType, Vec<String>)> = INTENT_KEYWORDS
            .iter()
            .map(|(intent, keywords)| {
                let matched = keywords
                    .iter()
                    .filter(|k| question.has_keyword(k))
                    .map(|k| k.to_string())
                    .collect::<Vec<_>>();
                (*intent, matched)
            })
            .collect();

        // Stable sort keeps the priority order for equal counts.
        scored.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

        let best = match scored.first() {
            Some((_, matched)) if !matched.is_empty() => scored[0].clone(),
            _ => return QueryIntent::unknown(),
        };
        let runner_up = scored.get(1).map(|(_, m)| m.len()).unwrap_or(0);
        let confidence =
            (0.5 + 0.15 * best.1.len() as f64 - 0.1 * runner_up as f64).clamp(0.3, 0.95);

        QueryIntent {
            intent_type: best.0,
            confidence,
            matched_keywords: best.1,
        }
    }

    fn classify_domain(&self, question: &Question, entities: &[BusinessEntity]) -> BusinessDomain {
        let mut scores: HashMap<String, f64> = HashMap::new();

        for domain in &self.metadata.domains {
            let hits: HashSet<String> = domain
                .keywords
                .iter()
                .filter(|k| question.has_phrase(k))
                .map(|k| FuzzyMatcher::singularize(&FuzzyMatcher::normalize_term(k)))
                .collect();
            if !hits.is_empty() {
                *scores.entry(domain.name.clone()).or_default() += hits.len() as f64;
            }
        }

        // Tables that carry a measure weigh more than lookup tables.
        let mut table_weights: HashMap<String, f64> = HashMap::new();
        for entity in entities {
            let Some(table) = &entity.mapped_table else { continue };
            let weight = match entity.entity_type {
                EntityType::Metric | EntityType::GlossaryTerm => 1.0,
                _ => 0.5,
            };
            let slot = table_weights.entry(table.to_lowercase()).or_default();
            *slot = slot.max(weight);
        }
        for (table, weight) in table_weights {
            if let Some(domain) = self.metadata.table(&table).and_then(|t| t.domain.clone()) {
                *scores.entry(domain).or_default() += weight;
            }
        }

        let best = scores.into_iter().max_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.cmp(&a.0))
        });

        match best {
            Some((name, score)) if score > 0.0 => BusinessDomain {
                name,
                relevance: score / (score + 1.0),
            },
            _ => BusinessDomain::unknown(),
        }
    }

    fn match_tables(&self, question: &Question, entities: &mut Vec<BusinessEntity>) {
        for table in &self.metadata.tables {
            let mut confidence = if question.has_phrase(&table.name) {
                Some(0.9)
            } else if table.aliases.iter().any(|a| question.has_phrase(a)) {
                Some(0.8)
            } else {
                None
            };
            if confidence.is_none() {
                confidence = question
                    .fuzzy_word(&self.matcher, &table.name)
                    .map(|s| s * 0.8);
            }
            if let Some(confidence) = confidence {
                entities.push(
                    BusinessEntity::new(table.name.clone(), EntityType::Table, confidence)
                        .mapped(&table.name, None),
                );
            }
        }
    }

    fn match_columns(&self, question: &Question, entities: &mut Vec<BusinessEntity>) {
        for table in &self.metadata.tables {
            for column in &table.columns {
                let confidence = if question.has_phrase(&column.name) {
                    Some(0.85)
                } else if column.aliases.iter().any(|a| question.has_phrase(a)) {
                    Some(0.75)
                } else {
                    None
                };
                if let Some(confidence) = confidence {
                    entities.push(
                        BusinessEntity::new(column.name.clone(), EntityType::Column, confidence)
                            .mapped(&table.name, Some(&column.name)),
                    );
                }
            }
        }
    }

    fn match_glossary(
        &self,
        question: &Question,
        entities: &mut Vec<BusinessEntity>,
        terms: &mut Vec<String>,
    ) {
        for term in &self.metadata.glossary {
            let exact = std::iter::once(&term.term)
                .chain(term.synonyms.iter())
                .any(|t| question.has_phrase(t));
            let confidence = if exact {
                Some(0.9)
            } else {
                question.fuzzy_word(&self.matcher, &term.term).map(|s| s * 0.85)
            };
            let Some(confidence) = confidence else { continue };

            let mut entity = BusinessEntity::new(term.term.clone(), EntityType::GlossaryTerm, confidence);
            if let Some(table) = term.related_tables.first() {
                let column = term
                    .related_columns
                    .first()
                    .and_then(|c| c.split_once('.'))
                    .filter(|(t, _)| t.eq_ignore_ascii_case(table))
                    .map(|(_, c)| c);
                entity = entity.mapped(table, column);
            }
            entities.push(entity);
            terms.push(term.term.clone());
        }
    }

    fn extract_metrics(
        &self,
        question: &Question,
        entities: &mut Vec<BusinessEntity>,
        terms: &mut Vec<String>,
    ) {
        let normalized = question.padded.trim().to_string();
        for caps in METRIC_RE.captures_iter(&normalized) {
            let word = &caps[1];
            terms.push(word.to_string());
            let entity = match self.find_column(word, ColumnRole::Measure) {
                Some((table, column, score)) => {
                    BusinessEntity::new(word, EntityType::Metric, (0.7 + 0.2 * score).min(0.95))
                        .mapped(&table.name, Some(&column.name))
                }
                None => match self.find_glossary_mapping(word) {
                    Some((table, column)) => BusinessEntity::new(word, EntityType::Metric, 0.75)
                        .mapped(&table, column.as_deref()),
                    None => BusinessEntity::new(word, EntityType::Metric, 0.4),
                },
            };
            entities.push(entity);
        }
    }

    fn extract_dimensions(
        &self,
        question: &Question,
        entities: &mut Vec<BusinessEntity>,
        terms: &mut Vec<String>,
    ) {
        let normalized = question.padded.trim().to_string();
        for caps in DIMENSION_RE.captures_iter(&normalized) {
            let word = &caps[1];
            if TIME_GRAINS.contains(&FuzzyMatcher::singularize(word).as_str()) {
                continue;
            }
            terms.push(word.to_string());
            let entity = match self.find_column(word, ColumnRole::Dimension) {
                Some((table, column, score)) => {
                    BusinessEntity::new(word, EntityType::Dimension, (0.6 + 0.25 * score).min(0.9))
                        .mapped(&table.name, Some(&column.name))
                }
                None => BusinessEntity::new(word, EntityType::Dimension, 0.4),
            };
            entities.push(entity);
        }
    }

    /// Column whose name or alias best matches `word`, favouring `role`.
    fn find_column(&self, word: &str, role: ColumnRole) -> Option<(&Table, &ColumnMetadata, f64)> {
        let word = FuzzyMatcher::singularize(&FuzzyMatcher::normalize_term(word));
        let mut best: Option<(&Table, &ColumnMetadata, f64)> = None;

        for table in &self.metadata.tables {
            for column in &table.columns {
                let names = std::iter::once(&column.name).chain(column.aliases.iter());
                let mut score: f64 = 0.0;
                for name in names {
                    let tokens: Vec<String> = FuzzyMatcher::normalize_term(name)
                        .split(' ')
                        .map(FuzzyMatcher::singularize)
                        .collect();
                    let candidate = if tokens.len() == 1 && tokens[0] == word {
                        1.0
                    } else if tokens.iter().any(|t| *t == word) {
                        0.7
                    } else if word.len() >= 5 {
                        let s = self.matcher.similarity(&tokens.join(" "), &word);
                        if s >= self.matcher.similarity_threshold {
                            s * 0.8
                        } else {
                            0.0
                        }
                    } else {
                        0.0
                    };
                    score = score.max(candidate);
                }
                if score == 0.0 {
                    continue;
                }
                let effective = column.effective_role();
                if effective == role {
                    score += 0.1;
                } else if effective == ColumnRole::Identifier {
                    score -= 0.2;
                }
                if best.map_or(true, |(_, _, b)| score > b) {
                    best = Some((table, column, score));
                }
            }
        }

        best.filter(|(_, _, s)| *s >= 0.6)
            .map(|(t, c, s)| (t, c, s.min(1.0)))
    }

    fn find_glossary_mapping(&self, word: &str) -> Option<(String, Option<String>)> {
        self.metadata
            .glossary
            .iter()
            .find(|g| {
                std::iter::once(&g.term)
                    .chain(g.synonyms.iter())
                    .any(|t| self.matcher.similarity(t, word) >= 1.0)
            })
            .and_then(|g| {
                let table = g.related_tables.first()?.clone();
                let column = g
                    .related_columns
                    .first()
                    .and_then(|c| c.split_once('.'))
                    .map(|(_, c)| c.to_string());
                Some((table, column))
            })
    }
}

fn extract_comparison_values(question: &Question, entities: &mut Vec<BusinessEntity>) {
    for caps in QUOTED_RE.captures_iter(&question.lowered) {
        entities.push(BusinessEntity::new(caps[1].trim(), EntityType::ComparisonValue, 0.9));
    }
    for caps in COMPARATOR_RE.captures_iter(&question.lowered) {
        entities.push(BusinessEntity::new(
            format!("{} {}", &caps[1], &caps[2]),
            EntityType::ComparisonValue,
            0.8,
        ));
    }
    for caps in TOP_N_RE.captures_iter(&question.lowered) {
        entities.push(BusinessEntity::new(
            format!("{} {}", &caps[1], &caps[2]),
            EntityType::ComparisonValue,
            0.8,
        ));
    }
    for caps in VERSUS_RE.captures_iter(&question.lowered) {
        for value in [&caps[1], &caps[2]] {
            entities.push(BusinessEntity::new(value, EntityType::ComparisonValue, 0.7));
        }
    }
}

/// Resolve a relative time reference to a half-open date range.
///
/// Weeks start on Monday; "last week" is the previous full Monday-Sunday week.
fn detect_time_range(question: &Question, today: NaiveDate) -> Option<TimeRange> {
    let range = |start: NaiveDate, end: NaiveDate, label: &str| TimeRange {
        start,
        end,
        label: label.to_string(),
    };
    let tomorrow = today + Duration::days(1);
    let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
    let month_start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)?;
    let prev_month_start = if today.month() == 1 {
        NaiveDate::from_ymd_opt(today.year() - 1, 12, 1)?
    } else {
        NaiveDate::from_ymd_opt(today.year(), today.month() - 1, 1)?
    };
    let year_start = NaiveDate::from_ymd_opt(today.year(), 1, 1)?;
    let quarter_month = ((today.month() - 1) / 3) * 3 + 1;
    let quarter_start = NaiveDate::from_ymd_opt(today.year(), quarter_month, 1)?;
    let prev_quarter_start = if quarter_month == 1 {
        NaiveDate::from_ymd_opt(today.year() - 1, 10, 1)?
    } else {
        NaiveDate::from_ymd_opt(today.year(), quarter_month - 3, 1)?
    };

    // Spans that fall outside the calendar yield no range.
    if let Some(caps) = LAST_N_RE.captures(&question.lowered) {
        let start = caps[1]
            .parse::<i64>()
            .ok()
            .and_then(|n| match &caps[2] {
                "week" => n.checked_mul(7),
                "month" => n.checked_mul(30),
                _ => Some(n),
            })
            .and_then(Duration::try_days)
            .and_then(|span| today.checked_sub_signed(span));
        return start.map(|start| range(start, today, &caps[0]));
    }

    let fixed = [
        ("yesterday", today - Duration::days(1), today),
        ("today", today, tomorrow),
        ("last week", monday - Duration::days(7), monday),
        ("previous week", monday - Duration::days(7), monday),
        ("this week", monday, tomorrow),
        ("last month", prev_month_start, month_start),
        ("previous month", prev_month_start, month_start),
        ("this month", month_start, tomorrow),
        ("last quarter", prev_quarter_start, quarter_start),
        ("this quarter", quarter_start, tomorrow),
        ("last year", NaiveDate::from_ymd_opt(today.year() - 1, 1, 1)?, year_start),
        ("this year", year_start, tomorrow),
        ("year to date", year_start, tomorrow),
        ("ytd", year_start, tomorrow),
    ];
    for (label, start, end) in fixed {
        if question.has_keyword(label) {
            return Some(range(start, end, label));
        }
    }

    if let Some(caps) = IN_YEAR_RE.captures(&question.lowered) {
        let year: i32 = caps[1].parse().ok()?;
        return Some(range(
            NaiveDate::from_ymd_opt(year, 1, 1)?,
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?,
            &caps[1],
        ));
    }

    None
}

/// Keep the most confident entity per (type, name, mapping).
fn dedupe_entities(entities: Vec<BusinessEntity>) -> Vec<BusinessEntity> {
    let mut out: Vec<BusinessEntity> = Vec::new();
    for entity in entities {
        let existing = out.iter_mut().find(|e| {
            e.entity_type == entity.entity_type
                && e.name.eq_ignore_ascii_case(&entity.name)
                && e.mapped_table == entity.mapped_table
                && e.mapped_column == entity.mapped_column
        });
        match existing {
            Some(e) if e.confidence < entity.confidence => *e = entity,
            Some(_) => {}
            None => out.push(entity),
        }
    }
    out
}

fn dedupe_terms(terms: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    terms
        .into_iter()
        .filter(|t| seen.insert(FuzzyMatcher::singularize(&t.to_lowercase())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::Path;

    fn analyzer() -> BusinessContextAnalyzer {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("metadata");
        BusinessContextAnalyzer::new(Arc::new(Metadata::load(dir).unwrap()))
    }

    fn wednesday() -> DateTime<Utc> {
        // 2024-05-15 is a Wednesday.
        Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_deposits_by_country_last_week() {
        let profile = analyzer().analyze_at(
            "Show me total deposits by country last week",
            "u1",
            None,
            wednesday(),
        );

        assert_eq!(profile.intent.intent_type, IntentType::Aggregation);
        assert_eq!(profile.domain.name, "Finance");

        let metric = profile.entities_of(EntityType::Metric).next().unwrap();
        assert_eq!(metric.mapped_table.as_deref(), Some("daily_actions"));
        assert_eq!(metric.mapped_column.as_deref(), Some("deposits"));

        let dimension = profile.entities_of(EntityType::Dimension).next().unwrap();
        assert_eq!(dimension.mapped_table.as_deref(), Some("countries"));
        assert_eq!(dimension.mapped_column.as_deref(), Some("country_name"));

        let range = profile.time_range.clone().unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 5, 6).unwrap());
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2024, 5, 13).unwrap());

        assert!(profile.business_terms.iter().any(|t| t == "Deposits"));
        assert!(profile.confidence_score > 0.5 && profile.confidence_score <= 1.0);
    }

    #[test]
    fn test_gibberish_defaults_to_unknown() {
        let profile = analyzer().analyze("qwzx plorf", "u1", None);
        assert_eq!(profile.intent.intent_type, IntentType::Unknown);
        assert!(profile.domain.is_unknown());
        assert!((0.0..=1.0).contains(&profile.confidence_score));
        assert!(profile.confidence_score < 0.2);
    }

    #[test]
    fn test_empty_question_is_not_an_error() {
        let profile = analyzer().analyze("   ", "u1", None);
        assert_eq!(profile.intent.intent_type, IntentType::Unknown);
        assert_eq!(profile.confidence_score, 0.0);
    }

    #[test]
    fn test_trend_and_comparison_intents() {
        let a = analyzer();
        let trend = a.analyze("monthly trend of bets over time", "u1", None);
        assert_eq!(trend.intent.intent_type, IntentType::Trend);

        let cmp = a.analyze("compare slots vs live casino", "u1", None);
        assert_eq!(cmp.intent.intent_type, IntentType::Comparison);
        assert!(cmp
            .entities_of(EntityType::ComparisonValue)
            .any(|e| e.name == "slots"));
    }

    #[test]
    fn test_comparison_values_and_top_n() {
        let profile = analyzer().analyze(
            "top 10 players with deposits more than 500 in 'Germany'",
            "u1",
            None,
        );
        let values: Vec<&str> = profile
            .entities_of(EntityType::ComparisonValue)
            .map(|e| e.name.as_str())
            .collect();
        assert!(values.contains(&"germany"));
        assert!(values.contains(&"more than 500"));
        assert!(values.contains(&"top 10"));
    }

    #[test]
    fn test_follow_up_inherits_tables() {
        let a = analyzer();
        let first = a.analyze("total deposits by country", "u1", None);
        let turn = ConversationTurn::from(&first);
        let follow = a.analyze("and what about yesterday?", "u1", Some(&turn));

        assert!(follow.is_follow_up);
        assert!(follow.mapped_tables().iter().any(|t| t == "daily_actions"));
        let inherited = follow
            .entities_of(EntityType::Metric)
            .next()
            .unwrap();
        let original = first.entities_of(EntityType::Metric).next().unwrap();
        assert!(inherited.confidence < original.confidence);
    }

    #[test]
    fn test_continuation_phrasing_is_follow_up_without_history() {
        let profile = analyzer().analyze("and by month?", "fresh-user", None);
        assert!(profile.is_follow_up);
        assert!(!analyzer().analyze("total deposits by month", "fresh-user", None).is_follow_up);
    }

    #[test]
    fn test_time_ranges() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let last_month = detect_time_range(&Question::parse("revenue last month"), today).unwrap();
        assert_eq!(last_month.start, NaiveDate::from_ymd_opt(2023, 12, 1).unwrap());
        assert_eq!(last_month.end, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());

        let last_days = detect_time_range(&Question::parse("bets in the last 7 days"), today).unwrap();
        assert_eq!(last_days.start, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());

        let year = detect_time_range(&Question::parse("deposits in 2022"), today).unwrap();
        assert_eq!(year.end, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert!(detect_time_range(&Question::parse("deposits by country"), today).is_none());
    }

    #[test]
    fn test_out_of_calendar_spans_have_no_range() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        for question in [
            "total deposits in the last 100000000 days",
            "bets over the last 2000000000000000000 weeks",
            "revenue for the past 9223372036854775807 months",
            "deposits in the last 99999999999999999999999 days",
        ] {
            assert!(detect_time_range(&Question::parse(question), today).is_none(), "{question}");
        }

        let profile = analyzer().analyze("total deposits in the last 100000000 days", "u1", None);
        assert!(profile.time_range.is_none());
        assert_eq!(profile.domain.name, "Finance");
    }
}
