use crate::domain::model::{CompanyProfile, PriceData, PriceItem};
use crate::domain::numbers::round2;
use crate::domain::ports::MarketDataSource;
use crate::utils::error::Result;
use async_trait::async_trait;

// (symbol, name, sector, ltp, previous close)
const SAMPLE_STOCKS: &[(&str, &str, &str, f64, f64)] = &[
    ("NICA", "NIC ASIA Bank", "Commercial Banks", 425.50, 415.75),
    ("NBL", "Nepal Bank", "Commercial Banks", 228.00, 224.50),
    ("NTC", "Nepal Telecom", "Others", 685.25, 679.25),
    ("SHL", "Soaltee Hotel", "Hotels And Tourism", 315.75, 319.75),
    ("CBBL", "Chhimek Laghubitta Bittiya Sanstha", "Microfinance", 298.50, 301.00),
];

/// 固定的範例資料，只在 sources.allow_sample_data 開啟時使用
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleDataSource;

impl SampleDataSource {
    pub fn items() -> Vec<PriceItem> {
        SAMPLE_STOCKS
            .iter()
            .map(|(symbol, name, _, ltp, prev)| {
                let diff = round2(ltp - prev);
                PriceItem {
                    symbol: symbol.to_string(),
                    security_name: Some(name.to_string()),
                    ltp: Some(*ltp),
                    close_price: Some(*ltp),
                    previous_close: Some(*prev),
                    point_change: Some(diff),
                    percentage_change: Some(round2(diff / prev * 100.0)),
                }
            })
            .collect()
    }
}

#[async_trait]
impl MarketDataSource for SampleDataSource {
    fn name(&self) -> &str {
        "sample"
    }

    async fn todays_prices(&self) -> Result<PriceData> {
        tracing::warn!("⚠️ Using sample market data (for testing only)");
        Ok(PriceData::from_items(Self::items()))
    }

    async fn company_profiles(&self) -> Result<Vec<CompanyProfile>> {
        Ok(SAMPLE_STOCKS
            .iter()
            .map(|(symbol, name, sector, _, _)| CompanyProfile {
                symbol: symbol.to_string(),
                company_name: Some(name.to_string()),
                security_name: None,
                sector_name: Some(sector.to_string()),
                total_listed_shares: None,
                status: Some("ACTIVE".to_string()),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sample_prices_are_split() {
        let data = SampleDataSource.todays_prices().await.unwrap();
        assert_eq!(data.gainers.len(), 3);
        assert_eq!(data.losers.len(), 2);
        assert_eq!(data.gainers[0].symbol, "NICA");
        assert_eq!(data.gainers[0].percentage_change, Some(2.35));
        assert_eq!(data.losers[0].symbol, "SHL");
    }
}
