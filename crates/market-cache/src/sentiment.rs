use chrono::{DateTime, NaiveDate, Utc};
use market_core::{SentimentSeries, Source};
use serde::Serialize;

use crate::refresh::RefreshState;

/// Samples averaged into the weekly score
pub const WEEKLY_WINDOW: usize = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentimentWindow {
    pub score: f64,
    pub mentions: u64,
    pub label: &'static str,
}

impl SentimentWindow {
    fn new(score: f64, mentions: u64) -> Self {
        Self {
            score,
            mentions,
            label: sentiment_label(score),
        }
    }
}

/// Daily and weekly social sentiment for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentimentSummary {
    pub symbol: String,
    /// Latest daily sample
    pub daily: SentimentWindow,
    /// Mean of up to the last seven daily samples
    pub weekly: SentimentWindow,
    pub weekly_change_pct: f64,
    pub overall_label: &'static str,
    /// Day of the latest sample
    pub as_of: Option<NaiveDate>,
    pub source: Source,
    pub fetched_at: Option<DateTime<Utc>>,
    pub state: RefreshState,
    pub error: Option<String>,
}

impl SentimentSummary {
    pub fn from_series(
        series: &SentimentSeries,
        source: Source,
        fetched_at: DateTime<Utc>,
        state: RefreshState,
    ) -> Self {
        let (daily, weekly) = summarize(series);
        let overall = (daily.score + weekly.score) / 2.0;

        Self {
            symbol: series.symbol.clone(),
            weekly_change_pct: weekly_change_pct(daily.score, weekly.score),
            overall_label: sentiment_label(overall),
            as_of: series.latest().map(|s| s.date),
            daily,
            weekly,
            source,
            fetched_at: Some(fetched_at),
            state,
            error: None,
        }
    }

    /// Neutral placeholder when no provider could answer.
    pub fn unavailable(symbol: &str, state: RefreshState, error: Option<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            daily: SentimentWindow::new(0.0, 0),
            weekly: SentimentWindow::new(0.0, 0),
            weekly_change_pct: 0.0,
            overall_label: sentiment_label(0.0),
            as_of: None,
            source: Source::Fallback,
            fetched_at: None,
            state,
            error,
        }
    }
}

/// Daily window from the latest sample, weekly window from the last [`WEEKLY_WINDOW`] samples.
pub fn summarize(series: &SentimentSeries) -> (SentimentWindow, SentimentWindow) {
    let daily = series
        .latest()
        .map(|s| SentimentWindow::new(s.score, s.mentions))
        .unwrap_or_else(|| SentimentWindow::new(0.0, 0));

    let recent = &series.samples[series.samples.len().saturating_sub(WEEKLY_WINDOW)..];
    let weekly = if recent.is_empty() {
        SentimentWindow::new(0.0, 0)
    } else {
        let score = recent.iter().map(|s| s.score).sum::<f64>() / recent.len() as f64;
        let mentions = recent.iter().map(|s| s.mentions).sum();
        SentimentWindow::new(score, mentions)
    };

    (daily, weekly)
}

/// Percentage change of the daily score against the weekly baseline; 0 when the baseline is 0.
pub fn weekly_change_pct(daily: f64, weekly: f64) -> f64 {
    if weekly == 0.0 || !weekly.is_finite() {
        return 0.0;
    }
    (daily - weekly) / weekly.abs() * 100.0
}

pub fn sentiment_label(score: f64) -> &'static str {
    if score >= 0.6 {
        "Very Bullish"
    } else if score >= 0.2 {
        "Bullish"
    } else if score > -0.2 {
        "Neutral"
    } else if score > -0.6 {
        "Bearish"
    } else {
        "Very Bearish"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::series;
    use chrono::TimeZone;

    #[test]
    fn test_weekly_change_doubles() {
        assert!((weekly_change_pct(0.6, 0.3) - 100.0).abs() < 1e-9);
        assert_eq!(weekly_change_pct(0.4, 0.0), 0.0);
        // Negative baseline keeps the sign of the move
        assert!((weekly_change_pct(-0.1, -0.2) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_from_week_of_samples() {
        let s = series("AAPL", &[0.25, 0.25, 0.25, 0.25, 0.25, 0.25, 0.6]);
        let fetched = Utc.with_ymd_and_hms(2024, 5, 8, 12, 0, 0).unwrap();

        let summary = SentimentSummary::from_series(&s, Source::Finnhub, fetched, RefreshState::Fresh);

        assert!((summary.daily.score - 0.6).abs() < 1e-9);
        assert_eq!(summary.daily.label, "Very Bullish");
        assert!((summary.weekly.score - 0.3).abs() < 1e-9);
        assert_eq!(summary.weekly.mentions, 70);
        assert_eq!(summary.weekly.label, "Bullish");
        assert!((summary.weekly_change_pct - 100.0).abs() < 1e-6);
        assert_eq!(summary.overall_label, "Bullish");
        assert_eq!(summary.as_of, NaiveDate::from_ymd_opt(2024, 5, 7));
    }

    #[test]
    fn test_weekly_uses_only_last_seven() {
        let s = series("TSLA", &[-1.0, -1.0, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1]);
        let (daily, weekly) = summarize(&s);

        assert!((daily.score - 0.1).abs() < 1e-9);
        assert!((weekly.score - 0.1).abs() < 1e-9);
        assert!(weekly_change_pct(daily.score, weekly.score).abs() < 1e-6);
    }

    #[test]
    fn test_empty_series_is_neutral() {
        let (daily, weekly) = summarize(&SentimentSeries::default());
        assert_eq!(daily.score, 0.0);
        assert_eq!(weekly.mentions, 0);
        assert_eq!(weekly.label, "Neutral");
    }

    #[test]
    fn test_labels() {
        assert_eq!(sentiment_label(-0.2), "Bearish");
        assert_eq!(sentiment_label(-0.19), "Neutral");
        assert_eq!(sentiment_label(-0.6), "Very Bearish");
    }
}
