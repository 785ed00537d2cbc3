//! Tests for warehouse module

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::rowset::{RowSet, Value};
    use crate::schema::LogicalTable;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn raw_table() -> TableId {
        TableId::logical("proj", "scanner", LogicalTable::MarketRawMetrics)
    }

    fn raw_rows() -> RowSet {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        RowSet::new(["symbol", "priceChangePercent", "lastPrice", "closeTime"])
            .with_row(vec!["BTCUSDT".into(), 1.5.into(), 42000.0.into(), t0.into()])
            .with_row(vec!["ETHUSDT".into(), (-0.5).into(), 2500.0.into(), t1.into()])
    }

    #[test]
    fn test_table_id_roundtrip() {
        let id: TableId = "proj.scanner.market_raw_metrics".parse().unwrap();
        assert_eq!(id, raw_table());
        assert_eq!(id.to_string(), "proj.scanner.market_raw_metrics");
        assert_eq!(id.dataset_id(), "proj.scanner");
    }

    #[test]
    fn test_table_id_rejects_malformed() {
        assert!("scanner.market_raw_metrics".parse::<TableId>().is_err());
        assert!("a..b".parse::<TableId>().is_err());
        assert!("a.b.c.d".parse::<TableId>().is_err());
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let wh = MemoryWarehouse::new();
        let schema = LogicalTable::MarketRawMetrics.schema();

        provision(&wh, &raw_table(), &schema).await.unwrap();
        provision(&wh, &raw_table(), &schema).await.unwrap();

        assert_eq!(wh.create_table_calls(), 1);
        assert!(wh.table_exists(&raw_table()).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_table_tolerates_existing() {
        // Two runs racing past the existence check both reach create_table
        let wh = MemoryWarehouse::new();
        let schema = LogicalTable::MarketRawMetrics.schema();
        wh.create_dataset("proj.scanner").await.unwrap();

        wh.create_table(&raw_table(), &schema).await.unwrap();
        wh.write(&raw_rows(), &raw_table(), WriteMode::Append).await.unwrap();
        wh.create_table(&raw_table(), &schema).await.unwrap();

        assert_eq!(wh.rows(&raw_table()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_table_requires_dataset() {
        let wh = MemoryWarehouse::new();
        let result = wh
            .create_table(&raw_table(), &LogicalTable::MarketRawMetrics.schema())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_memory_append_and_replace() {
        let wh = MemoryWarehouse::new();
        provision(&wh, &raw_table(), &LogicalTable::MarketRawMetrics.schema())
            .await
            .unwrap();

        wh.write(&raw_rows(), &raw_table(), WriteMode::Append).await.unwrap();
        wh.write(&raw_rows(), &raw_table(), WriteMode::Append).await.unwrap();
        assert_eq!(wh.read(&raw_table()).await.unwrap().len(), 4);

        wh.write(&raw_rows(), &raw_table(), WriteMode::Replace).await.unwrap();
        assert_eq!(wh.read(&raw_table()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_memory_read_missing_table() {
        let wh = MemoryWarehouse::new();
        let err = wh.read(&raw_table()).await.unwrap_err();
        assert!(matches!(err, crate::error::PipelineError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn test_memory_injected_read_failure() {
        let wh = MemoryWarehouse::new();
        wh.seed(&raw_table(), &LogicalTable::MarketRawMetrics.schema(), &raw_rows());
        wh.fail_reads_of(&raw_table());
        assert!(wh.read(&raw_table()).await.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_roundtrip_preserves_types() {
        let wh = SqliteWarehouse::in_memory().await.unwrap();
        let table = raw_table();
        provision(&wh, &table, &LogicalTable::MarketRawMetrics.schema())
            .await
            .unwrap();

        wh.write(&raw_rows(), &table, WriteMode::Append).await.unwrap();
        let back = wh.read(&table).await.unwrap();

        assert_eq!(back, raw_rows());
    }

    #[tokio::test]
    async fn test_sqlite_dates_bools_and_nulls() {
        let wh = SqliteWarehouse::in_memory().await.unwrap();
        let table = TableId::logical("proj", "scanner", LogicalTable::AnomalyAlertsOnchain);
        let schema = LogicalTable::AnomalyAlertsOnchain.schema();
        provision(&wh, &table, &schema).await.unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let rows = RowSet::new(["date", "eth_transferred", "anomaly_eth_transferred"])
            .with_row(vec![day.into(), 12.5.into(), true.into()]);
        wh.write(&rows, &table, WriteMode::Append).await.unwrap();

        let back = wh.read(&table).await.unwrap();
        assert_eq!(back.columns().len(), schema.len());
        assert_eq!(back.get(0, "date"), Some(&Value::Date(day)));
        assert_eq!(back.get(0, "anomaly_eth_transferred"), Some(&Value::Bool(true)));
        assert_eq!(back.get(0, "gas_price_gwei"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_sqlite_replace_and_idempotent_provision() {
        let wh = SqliteWarehouse::in_memory().await.unwrap();
        let table = raw_table();
        let schema = LogicalTable::MarketRawMetrics.schema();

        provision(&wh, &table, &schema).await.unwrap();
        wh.write(&raw_rows(), &table, WriteMode::Append).await.unwrap();
        provision(&wh, &table, &schema).await.unwrap();
        wh.create_table(&table, &schema).await.unwrap();
        assert_eq!(wh.read(&table).await.unwrap().len(), 2);

        wh.write(&raw_rows().project(&["symbol", "lastPrice"]), &table, WriteMode::Replace)
            .await
            .unwrap();
        let back = wh.read(&table).await.unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.get(0, "closeTime"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_sqlite_rejects_unknown_column() {
        let wh = SqliteWarehouse::in_memory().await.unwrap();
        let table = raw_table();
        provision(&wh, &table, &LogicalTable::MarketRawMetrics.schema())
            .await
            .unwrap();

        let rows = RowSet::new(["symbol", "bogus"]).with_row(vec!["BTC".into(), 1.0.into()]);
        assert!(wh.write(&rows, &table, WriteMode::Append).await.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_missing_table() {
        let wh = SqliteWarehouse::in_memory().await.unwrap();
        let err = wh.read(&raw_table()).await.unwrap_err();
        assert!(matches!(err, crate::error::PipelineError::TableNotFound(_)));
    }
}
