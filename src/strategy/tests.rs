//! Tests for strategy module

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::IndicatorConfig;
    use crate::error::{PipelineError, SchemaError};
    use crate::rowset::{RowSet, Value};
    use crate::schema::LogicalTable;
    use crate::telemetry::RunContext;
    use crate::warehouse::{MemoryWarehouse, Warehouse};
    use chrono::{Duration, TimeZone, Utc};

    fn windows(fast: usize, slow: usize, scope: WindowScope) -> IndicatorConfig {
        IndicatorConfig {
            fast_window: fast,
            slow_window: slow,
            window_scope: scope,
        }
    }

    /// Raw market rows, one minute apart, in the given order
    fn raw(prices: &[(&str, f64)]) -> RowSet {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut set = RowSet::new(["symbol", "priceChangePercent", "lastPrice", "closeTime"]);
        for (i, (symbol, price)) in prices.iter().enumerate() {
            set.push_row(vec![
                (*symbol).into(),
                0.0.into(),
                (*price).into(),
                (t0 + Duration::minutes(i as i64)).into(),
            ]);
        }
        set
    }

    fn floats(set: &RowSet, column: &str) -> Vec<f64> {
        set.column(column).unwrap().filter_map(Value::as_f64).collect()
    }

    #[test]
    fn test_rolling_mean_lengths() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(rolling_mean(&values, 2), vec![1.5, 2.5, 3.5, 4.5]);
        assert_eq!(rolling_mean(&values, 5), vec![3.0]);
        assert!(rolling_mean(&values, 6).is_empty());
        assert!(rolling_mean(&values, 0).is_empty());
        assert!(rolling_mean(&[], 1).is_empty());
    }

    #[test]
    fn test_rolling_mean_increasing_input_increasing_output() {
        let values: Vec<f64> = (0..30).map(|i| (i * i) as f64 + 0.5).collect();
        for window in [1, 3, 5, 20] {
            let out = rolling_mean(&values, window);
            assert_eq!(out.len(), values.len() - (window - 1));
            assert!(out.windows(2).all(|p| p[1] > p[0]), "window {}", window);
        }
    }

    #[test]
    fn test_default_windows_drop_short_history() {
        let prices: Vec<(&str, f64)> = (0..25).map(|i| ("BTC", i as f64)).collect();
        let out = compute_moving_averages(&raw(&prices), &IndicatorConfig::default()).unwrap();

        assert_eq!(out.len(), 25 - 19);
        assert_eq!(out.columns(), &["symbol", "ma5", "ma20"]);
        // last row: mean(20..=24) and mean(5..=24)
        assert_eq!(out.get(5, "ma5"), Some(&Value::Float(22.0)));
        assert_eq!(out.get(5, "ma20"), Some(&Value::Float(14.5)));
    }

    #[test]
    fn test_single_row_yields_nothing() {
        let out = compute_moving_averages(&raw(&[("BTC", 1.0)]), &IndicatorConfig::default()).unwrap();
        assert!(out.is_empty());
        assert!(out.has_column("ma5"));
    }

    #[test]
    fn test_rows_sorted_by_close_time() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let set = RowSet::new(["symbol", "lastPrice", "closeTime"])
            .with_row(vec!["C".into(), 30.0.into(), (t0 + Duration::minutes(2)).into()])
            .with_row(vec!["A".into(), 10.0.into(), t0.into()])
            .with_row(vec!["B".into(), 20.0.into(), (t0 + Duration::minutes(1)).into()]);

        let out = compute_moving_averages(&set, &windows(1, 2, WindowScope::Global)).unwrap();
        let symbols: Vec<&str> = out.column("symbol").unwrap().filter_map(Value::as_str).collect();
        assert_eq!(symbols, vec!["B", "C"]);
        assert_eq!(floats(&out, "ma20"), vec![15.0, 25.0]);
    }

    #[test]
    fn test_global_window_mixes_symbols() {
        let prices = [("BTC", 100.0), ("ETH", 10.0), ("BTC", 102.0), ("ETH", 12.0)];
        let out = compute_moving_averages(&raw(&prices), &windows(1, 2, WindowScope::Global)).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(floats(&out, "ma20"), vec![55.0, 56.0, 57.0]);
    }

    #[test]
    fn test_per_symbol_window() {
        let prices = [("BTC", 100.0), ("ETH", 10.0), ("BTC", 102.0), ("ETH", 12.0)];
        let out = compute_moving_averages(&raw(&prices), &windows(1, 2, WindowScope::PerSymbol)).unwrap();

        assert_eq!(out.len(), 2);
        let symbols: Vec<&str> = out.column("symbol").unwrap().filter_map(Value::as_str).collect();
        assert_eq!(symbols, vec!["BTC", "ETH"]);
        assert_eq!(floats(&out, "ma5"), vec![102.0, 12.0]);
        assert_eq!(floats(&out, "ma20"), vec![101.0, 11.0]);
    }

    #[test]
    fn test_missing_price_column() {
        let set = RowSet::new(["symbol", "closeTime"]);
        let err = compute_moving_averages(&set, &IndicatorConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Schema(SchemaError::MissingColumns(ref cols)) if cols == &["lastPrice".to_string()]
        ));
    }

    #[test]
    fn test_decide_rule() {
        assert_eq!(decide(2.0, 1.0), Decision::Long);
        assert_eq!(decide(1.0, 2.0), Decision::Short);
        assert_eq!(decide(1.0, 1.0), Decision::Short);
        assert_eq!(decide(-0.0, 0.0), Decision::Short);
    }

    #[test]
    fn test_decide_matches_comparison_over_grid() {
        let samples = [-3.5, -1.0, 0.0, 0.25, 1.0, 1e9];
        for &a in &samples {
            for &b in &samples {
                assert_eq!(decide(a, b) == Decision::Long, a > b, "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_decision_serialization() {
        assert_eq!(serde_json::to_string(&Decision::Long).unwrap(), "\"LONG\"");
        assert_eq!(Decision::Short.to_string(), "SHORT");
    }

    #[test]
    fn test_generate_decisions_one_per_row() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let signals = RowSet::new(["symbol", "ma5", "ma20"])
            .with_row(vec!["BTC".into(), 2.0.into(), 1.0.into()])
            .with_row(vec!["ETH".into(), 1.0.into(), 1.0.into()]);

        let out = generate_decisions(&signals, now).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.get(0, "decision"), Some(&Value::from("LONG")));
        assert_eq!(out.get(1, "decision"), Some(&Value::from("SHORT")));
        assert!(out.column("timestamp").unwrap().all(|v| *v == Value::Timestamp(now)));
    }

    #[tokio::test]
    async fn test_indicator_and_decision_stages() {
        let ctx = RunContext::new("proj", "scanner");
        let wh = MemoryWarehouse::new();
        let raw_table = ctx.table(LogicalTable::MarketRawMetrics);
        let prices: Vec<(&str, f64)> = (0..21).map(|i| ("BTC", 100.0 + i as f64)).collect();
        wh.seed(&raw_table, &LogicalTable::MarketRawMetrics.schema(), &raw(&prices));

        let written = run_indicators(&ctx, &wh, &IndicatorConfig::default()).await.unwrap();
        assert_eq!(written, 2);

        let decided = run_decisions(&ctx, &wh).await.unwrap();
        assert_eq!(decided, 2);

        let decisions = wh.read(&ctx.table(LogicalTable::MarketDecisionOutputs)).await.unwrap();
        assert!(decisions.column("decision").unwrap().all(|v| *v == Value::from("LONG")));
    }

    #[tokio::test]
    async fn test_indicator_stage_fails_without_raw_table() {
        let ctx = RunContext::new("proj", "scanner");
        let wh = MemoryWarehouse::new();
        let err = run_indicators(&ctx, &wh, &IndicatorConfig::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::TableNotFound(_)));
    }
}
