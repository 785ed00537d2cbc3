//! Tests for the pipeline driver

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::{IndicatorConfig, TelegramConfig};
    use crate::error::Result;
    use crate::ingester::{binance, Source};
    use crate::notify::MockMessenger;
    use crate::schema::LogicalTable;
    use crate::strategy::WindowScope;
    use crate::warehouse::MemoryWarehouse;
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedTickers {
        records: Vec<serde_json::Value>,
    }

    #[async_trait]
    impl Source for FixedTickers {
        type Raw = Vec<serde_json::Value>;

        fn name(&self) -> &str {
            "market_ingest"
        }

        fn table(&self) -> LogicalTable {
            LogicalTable::MarketRawMetrics
        }

        async fn fetch(&self) -> Result<Self::Raw> {
            if self.records.is_empty() {
                return Err(PipelineError::Fetch("Binance returned 500".to_string()));
            }
            Ok(self.records.clone())
        }

        fn normalize(&self, raw: Self::Raw) -> Result<RowSet> {
            binance::normalize_tickers(&raw)
        }
    }

    struct Unreachable {
        name: &'static str,
        table: LogicalTable,
    }

    #[async_trait]
    impl Source for Unreachable {
        type Raw = ();

        fn name(&self) -> &str {
            self.name
        }

        fn table(&self) -> LogicalTable {
            self.table
        }

        async fn fetch(&self) -> Result<Self::Raw> {
            Err(PipelineError::Fetch("connection refused".to_string()))
        }

        fn normalize(&self, _raw: Self::Raw) -> Result<RowSet> {
            Ok(RowSet::empty())
        }
    }

    fn tickers() -> FixedTickers {
        FixedTickers {
            records: vec![
                json!({"symbol": "BTCUSDT", "priceChangePercent": "1.0", "lastPrice": "100", "closeTime": 1_704_067_200_000i64}),
                json!({"symbol": "ETHUSDT", "priceChangePercent": "2.0", "lastPrice": "110", "closeTime": 1_704_067_260_000i64}),
                json!({"symbol": "SOLUSDT", "priceChangePercent": "3.0", "lastPrice": "90", "closeTime": 1_704_067_320_000i64}),
            ],
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.indicator = IndicatorConfig {
            fast_window: 1,
            slow_window: 2,
            window_scope: WindowScope::Global,
        };
        config.telegram = TelegramConfig {
            bot_token: Some("bot-token".to_string()),
            chat_id: Some("chat".to_string()),
            ..Default::default()
        };
        config
    }

    fn ctx() -> RunContext {
        RunContext::new("proj", "scan")
    }

    fn messenger_expecting(times: usize) -> MockMessenger {
        let mut messenger = MockMessenger::new();
        messenger.expect_send().times(times).returning(|_, _, _| Ok(()));
        messenger
    }

    #[tokio::test]
    async fn test_full_run_writes_decisions_and_notifies() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let pipeline = Pipeline::new(
            warehouse.clone(),
            Box::new(tickers()),
            Box::new(messenger_expecting(1)),
            config(),
        );

        let report = pipeline.run(&ctx()).await.unwrap();

        assert_eq!(report.outcome("market_ingest"), Some(&StageOutcome::Written(3)));
        assert_eq!(report.outcome("indicators"), Some(&StageOutcome::Written(2)));
        assert_eq!(report.outcome("decisions"), Some(&StageOutcome::Written(2)));
        assert_eq!(report.outcome("onchain_query_ingest"), Some(&StageOutcome::Skipped));

        let decisions = warehouse
            .rows(&ctx().table(LogicalTable::MarketDecisionOutputs))
            .unwrap();
        // prices 100, 110, 90: 110 > mean(100, 110), 90 < mean(110, 90)
        let verdicts: Vec<_> = decisions
            .column("decision")
            .unwrap()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert_eq!(verdicts, vec!["LONG", "SHORT"]);

        let notification = report.notification.unwrap();
        assert!(notification.delivered);
        assert!(notification.summary.contains("2 signaux"));
    }

    #[tokio::test]
    async fn test_onchain_failure_still_notifies() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let pipeline = Pipeline::new(
            warehouse.clone(),
            Box::new(tickers()),
            Box::new(messenger_expecting(1)),
            config(),
        )
        .with_public_dataset(Box::new(Unreachable {
            name: "onchain_ingest",
            table: LogicalTable::OnchainRawMetrics,
        }));

        let report = pipeline.run(&ctx()).await.unwrap();

        assert!(report.degraded());
        assert!(matches!(
            report.outcome("onchain_ingest"),
            Some(StageOutcome::Failed(msg)) if msg.contains("connection refused")
        ));
        // anomalies never ran
        assert_eq!(report.outcome("anomalies"), None);
        let notification = report.notification.unwrap();
        assert!(notification.summary.contains("0 anomalies"));
    }

    #[tokio::test]
    async fn test_market_failure_aborts_run() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let pipeline = Pipeline::new(
            warehouse.clone(),
            Box::new(FixedTickers { records: vec![] }),
            Box::new(messenger_expecting(0)),
            config(),
        );

        let err = pipeline.run(&ctx()).await.unwrap_err();
        match &err {
            PipelineError::Stage { stage, .. } => assert_eq!(stage, "market_ingest"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(err.root(), PipelineError::Fetch(_)));
        assert!(warehouse
            .rows(&ctx().table(LogicalTable::MarketStrategySignals))
            .is_none());
    }

    #[tokio::test]
    async fn test_decision_write_failure_aborts_before_notify() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        warehouse.fail_writes_to(&ctx().table(LogicalTable::MarketDecisionOutputs));
        let pipeline = Pipeline::new(
            warehouse.clone(),
            Box::new(tickers()),
            Box::new(messenger_expecting(0)),
            config(),
        );

        let err = pipeline.run(&ctx()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Stage { ref stage, .. } if stage == "decisions"));
    }

    #[tokio::test]
    async fn test_single_stage_runs() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let pipeline = Pipeline::new(
            warehouse.clone(),
            Box::new(tickers()),
            Box::new(messenger_expecting(0)),
            config(),
        );

        let output = pipeline.run_stage(&ctx(), Stage::MarketIngest).await.unwrap();
        assert!(matches!(output, StageOutput::Written(3)));

        let output = pipeline.run_stage(&ctx(), Stage::OnchainQueryIngest).await.unwrap();
        assert!(matches!(output, StageOutput::Skipped));

        let summary = pipeline.summary(&ctx()).await;
        assert!(summary.contains("0 signaux"));
    }

    #[tokio::test]
    async fn test_single_stage_failure_names_stage() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let pipeline = Pipeline::new(
            warehouse.clone(),
            Box::new(tickers()),
            Box::new(messenger_expecting(0)),
            config(),
        );

        // no market_raw_metrics yet
        let err = pipeline.run_stage(&ctx(), Stage::Indicators).await.unwrap_err();
        match &err {
            PipelineError::Stage { stage, .. } => assert_eq!(stage, "indicators"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(err.root(), PipelineError::TableNotFound(_)));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::OnchainQueryIngest.as_str(), "onchain_query_ingest");
        assert_eq!(Stage::Notify.to_string(), "notify");
        assert_eq!(
            Stage::from_str("onchain-indicators", true).unwrap(),
            Stage::OnchainIndicators
        );
    }
}
