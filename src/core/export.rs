use crate::adapters::database::Database;
use crate::domain::market_hours::to_nepal;
use crate::domain::ports::Storage;
use crate::utils::error::{Result, ScraperError};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use zip::write::{FileOptions, ZipWriter};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupReport {
    pub generated_at: DateTime<Utc>,
    pub since: NaiveDate,
    pub until: NaiveDate,
    pub companies: usize,
    pub records: usize,
    pub records_per_day: BTreeMap<NaiveDate, usize>,
    pub file: String,
}

fn to_csv<T: Serialize>(rows: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| ScraperError::IoError(e.into_error()))
}

/// 匯出最近 `days` 天的資料為 zip (companies.csv, stock_data.csv, report.json)
pub async fn export_backup<S: Storage>(
    db: &Database,
    storage: &S,
    now: DateTime<Utc>,
    days: i64,
) -> Result<BackupReport> {
    let local = to_nepal(now);
    let until = local.date();
    let since = until - Duration::days(days.max(1) - 1);

    let companies = db.list_companies().await?;
    let records = db.records_since(since).await?;

    let mut records_per_day = BTreeMap::new();
    for record in &records {
        *records_per_day.entry(record.scrape_date).or_insert(0) += 1;
    }

    let file = format!("nepse_backup_{}.zip", local.format("%Y%m%d_%H%M%S"));
    let report = BackupReport {
        generated_at: now,
        since,
        until,
        companies: companies.len(),
        records: records.len(),
        records_per_day,
        file: storage.location(&file),
    };

    tracing::debug!(
        "Creating backup with {} companies and {} records",
        report.companies,
        report.records
    );

    let zip_data = {
        let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));

        zip.start_file::<_, ()>("companies.csv", FileOptions::default())?;
        zip.write_all(&to_csv(&companies)?)?;

        zip.start_file::<_, ()>("stock_data.csv", FileOptions::default())?;
        zip.write_all(&to_csv(&records)?)?;

        zip.start_file::<_, ()>("report.json", FileOptions::default())?;
        zip.write_all(serde_json::to_string_pretty(&report)?.as_bytes())?;

        let cursor = zip.finish()?;
        cursor.into_inner()
    };

    tracing::debug!("Writing backup ({} bytes) to storage", zip_data.len());
    storage.write_file(&file, &zip_data).await?;

    tracing::info!("📦 Backup saved to {}", report.file);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::database::NewStockRecord;
    use crate::adapters::storage::LocalStorage;
    use crate::domain::model::DataSource;
    use chrono::{NaiveTime, TimeZone};
    use std::io::Read;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_export_backup_writes_zip() {
        let db = Database::in_memory().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 9, 3, 15, 0).unwrap();
        let (company, _) = db.get_or_create_company("NABIL", "Nabil Bank", now).await.unwrap();

        for (day, time) in [(9, (15, 30)), (8, (16, 0)), (1, (16, 0))] {
            db.insert_stock_record(
                &NewStockRecord {
                    company_id: company.id,
                    symbol: "NABIL".to_string(),
                    close_price: Some(500.0),
                    last_traded_price: Some(500.0),
                    previous_close: Some(490.0),
                    difference: Some(10.0),
                    percentage_change: Some(2.04),
                    scrape_date: NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
                    scrape_time: NaiveTime::from_hms_opt(time.0, time.1, 0).unwrap(),
                    data_source: DataSource::Closing,
                },
                now,
            )
            .await
            .unwrap();
        }

        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().to_string_lossy().to_string());
        let report = export_backup(&db, &storage, now, 7).await.unwrap();

        assert_eq!(report.companies, 1);
        assert_eq!(report.records, 2);
        assert_eq!(report.since, NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
        assert!(report.file.ends_with("nepse_backup_20240609_090000.zip"));

        let bytes = storage
            .read_file("nepse_backup_20240609_090000.zip")
            .await
            .unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 3);

        let mut csv_text = String::new();
        archive
            .by_name("stock_data.csv")
            .unwrap()
            .read_to_string(&mut csv_text)
            .unwrap();
        assert!(csv_text.starts_with("id,symbol,company_name,close_price"));
        assert_eq!(csv_text.lines().count(), 3);
    }
}
