//! Chart recommendation from intent and result shape.

use crate::context::IntentType;
use crate::execution::QueryResult;
use serde::{Deserialize, Serialize};

/// Pie charts stop being readable past this many slices.
const MAX_PIE_SLICES: usize = 6;
const MAX_BAR_CATEGORIES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Kpi,
    Line,
    Bar,
    Pie,
    Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationConfig {
    pub chart_type: ChartType,
    pub x_axis: Option<String>,
    pub y_axis: Vec<String>,
}

impl VisualizationConfig {
    fn table() -> Self {
        Self {
            chart_type: ChartType::Table,
            x_axis: None,
            y_axis: Vec::new(),
        }
    }
}

pub fn recommend(intent: IntentType, result: &QueryResult) -> VisualizationConfig {
    if result.is_empty() || intent == IntentType::Detail {
        return VisualizationConfig::table();
    }

    let numeric: Vec<usize> = (0..result.columns.len())
        .filter(|&i| result.column_is_numeric(i))
        .collect();
    let temporal = (0..result.columns.len()).find(|&i| result.column_is_temporal(i));
    let category = (0..result.columns.len())
        .find(|i| !numeric.contains(i) && Some(*i) != temporal);
    let measures: Vec<String> = numeric.iter().map(|&i| result.columns[i].clone()).collect();

    if measures.is_empty() {
        return VisualizationConfig::table();
    }

    if result.row_count == 1 && numeric.len() == result.columns.len() {
        return VisualizationConfig {
            chart_type: ChartType::Kpi,
            x_axis: None,
            y_axis: measures,
        };
    }

    if let Some(t) = temporal {
        return VisualizationConfig {
            chart_type: ChartType::Line,
            x_axis: Some(result.columns[t].clone()),
            y_axis: measures,
        };
    }

    match category {
        Some(c)
            if intent == IntentType::Aggregation
                && measures.len() == 1
                && result.row_count <= MAX_PIE_SLICES =>
        {
            VisualizationConfig {
                chart_type: ChartType::Pie,
                x_axis: Some(result.columns[c].clone()),
                y_axis: measures,
            }
        }
        Some(c) if result.row_count <= MAX_BAR_CATEGORIES => VisualizationConfig {
            chart_type: ChartType::Bar,
            x_axis: Some(result.columns[c].clone()),
            y_axis: measures,
        },
        _ => VisualizationConfig::table(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(columns: &[&str], rows: Vec<Vec<serde_json::Value>>) -> QueryResult {
        QueryResult::new(columns.iter().map(|c| c.to_string()).collect(), rows, "test")
    }

    #[test]
    fn test_single_number_is_kpi() {
        let r = result(&["total"], vec![vec![json!(1234.5)]]);
        assert_eq!(recommend(IntentType::Aggregation, &r).chart_type, ChartType::Kpi);
    }

    #[test]
    fn test_time_series_is_line() {
        let r = result(
            &["day", "deposits"],
            vec![vec![json!("2024-05-06"), json!(10)], vec![json!("2024-05-07"), json!(12)]],
        );
        let viz = recommend(IntentType::Trend, &r);
        assert_eq!(viz.chart_type, ChartType::Line);
        assert_eq!(viz.x_axis.as_deref(), Some("day"));
    }

    #[test]
    fn test_category_breakdowns() {
        let few = result(
            &["country", "deposits"],
            vec![vec![json!("DE"), json!(10)], vec![json!("FR"), json!(7)]],
        );
        assert_eq!(recommend(IntentType::Aggregation, &few).chart_type, ChartType::Pie);
        assert_eq!(recommend(IntentType::Comparison, &few).chart_type, ChartType::Bar);
    }

    #[test]
    fn test_detail_and_empty_are_tables() {
        let r = result(&["username"], vec![vec![json!("alice")]]);
        assert_eq!(recommend(IntentType::Detail, &r).chart_type, ChartType::Table);
        assert_eq!(recommend(IntentType::Aggregation, &r).chart_type, ChartType::Table);
        let empty = result(&["n"], Vec::new());
        assert_eq!(recommend(IntentType::Aggregation, &empty).chart_type, ChartType::Table);
    }
}
