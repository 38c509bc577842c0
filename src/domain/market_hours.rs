use crate::config::toml_config::MarketConfig;
use crate::domain::model::{DataSource, MarketSession};
use crate::utils::error::Result;
use crate::utils::validation::parse_clock_time;
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc,
    Weekday,
};

/// Nepal Standard Time, UTC+05:45
pub const NEPAL_UTC_OFFSET_SECS: i32 = 5 * 3600 + 45 * 60;

pub fn nepal_offset() -> FixedOffset {
    FixedOffset::east_opt(NEPAL_UTC_OFFSET_SECS).expect("UTC+05:45 is a valid offset")
}

pub fn to_nepal(now: DateTime<Utc>) -> NaiveDateTime {
    now.with_timezone(&nepal_offset()).naive_local()
}

/// NEPSE 交易日為週日到週四
pub fn is_trading_day(date: NaiveDate) -> bool {
    matches!(
        date.weekday(),
        Weekday::Sun | Weekday::Mon | Weekday::Tue | Weekday::Wed | Weekday::Thu
    )
}

/// 去掉秒以下的部分，讓快照時間在資料庫裡保持一致
pub fn truncate_to_second(time: NaiveTime) -> NaiveTime {
    time.with_nanosecond(0).unwrap_or(time)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub closing_window_start: NaiveTime,
    pub closing_window_end: NaiveTime,
    pub closing_snapshot_time: NaiveTime,
    pub historical_snapshot_time: NaiveTime,
    pub post_close_grace: Duration,
}

impl MarketHours {
    pub fn from_config(config: &MarketConfig) -> Result<Self> {
        Ok(Self {
            open: parse_clock_time("market.open", &config.open)?,
            close: parse_clock_time("market.close", &config.close)?,
            closing_window_start: parse_clock_time(
                "market.closing_window_start",
                &config.closing_window_start,
            )?,
            closing_window_end: parse_clock_time(
                "market.closing_window_end",
                &config.closing_window_end,
            )?,
            closing_snapshot_time: parse_clock_time(
                "market.closing_snapshot_time",
                &config.closing_snapshot_time,
            )?,
            historical_snapshot_time: parse_clock_time(
                "market.historical_snapshot_time",
                &config.historical_snapshot_time,
            )?,
            post_close_grace: Duration::hours(config.post_close_grace_hours),
        })
    }

    pub fn session(&self, local: NaiveDateTime) -> MarketSession {
        if !is_trading_day(local.date()) {
            return MarketSession::AfterHours;
        }

        let time = local.time();
        if time < self.open {
            MarketSession::PreOpen
        } else if time <= self.close {
            MarketSession::Regular
        } else {
            MarketSession::PostClose
        }
    }

    pub fn is_market_open(&self, local: NaiveDateTime) -> bool {
        self.session(local) == MarketSession::Regular
    }

    /// 決定這次抓取要存成哪一種資料
    pub fn data_source(&self, local: NaiveDateTime) -> DataSource {
        match self.session(local) {
            MarketSession::Regular => DataSource::Live,
            MarketSession::PostClose => {
                let close = local.date().and_time(self.close);
                if local < close + self.post_close_grace {
                    DataSource::Closing
                } else {
                    DataSource::Historical
                }
            }
            MarketSession::PreOpen | MarketSession::AfterHours => DataSource::Historical,
        }
    }

    pub fn in_closing_window(&self, time: NaiveTime) -> bool {
        self.closing_window_start <= time && time <= self.closing_window_end
    }

    /// 即時資料用實際時間，收盤/歷史資料用固定時間
    pub fn snapshot_time(&self, data_source: DataSource, local: NaiveDateTime) -> NaiveTime {
        match data_source {
            DataSource::Live => truncate_to_second(local.time()),
            DataSource::Closing => self.closing_snapshot_time,
            DataSource::Historical => self.historical_snapshot_time,
        }
    }
}

impl Default for MarketHours {
    fn default() -> Self {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN);
        Self {
            open: t(11, 0),
            close: t(15, 0),
            closing_window_start: t(14, 45),
            closing_window_end: t(15, 15),
            closing_snapshot_time: t(15, 30),
            historical_snapshot_time: t(16, 0),
            post_close_grace: Duration::hours(2),
        }
    }
}
