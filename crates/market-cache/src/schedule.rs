use chrono::{DateTime, Days, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;

/// When a cached value stops being fresh.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshSchedule {
    /// Fresh for a fixed duration after the fetch started
    Ttl(Duration),
    /// Fresh until the next wall-clock hour in `hours` (0-23, local to `tz`)
    /// that falls strictly after the fetch
    FixedHours { hours: BTreeSet<u32>, tz: Tz },
}

impl RefreshSchedule {
    pub fn ttl_secs(secs: i64) -> Self {
        RefreshSchedule::Ttl(Duration::seconds(secs))
    }

    /// Hours outside 0-23 are dropped.
    pub fn fixed_hours(hours: impl IntoIterator<Item = u32>, tz: Tz) -> Self {
        RefreshSchedule::FixedHours {
            hours: hours.into_iter().filter(|h| *h < 24).collect(),
            tz,
        }
    }

    pub fn is_fresh(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            RefreshSchedule::Ttl(ttl) => now - fetched_at < *ttl,
            RefreshSchedule::FixedHours { .. } => match self.next_boundary_after(fetched_at) {
                Some(boundary) => now < boundary,
                // An empty hour set never schedules a refresh
                None => true,
            },
        }
    }

    /// Earliest instant at which a value fetched at `fetched_at` becomes due.
    pub fn next_refresh(&self, fetched_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RefreshSchedule::Ttl(ttl) => Some(fetched_at + *ttl),
            RefreshSchedule::FixedHours { .. } => self.next_boundary_after(fetched_at),
        }
    }

    /// When the next refresh is expected, given the last fetch (if any).
    ///
    /// A value already past due reports the next boundary after `now`.
    pub fn next_update(
        &self,
        fetched_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match fetched_at.and_then(|f| self.next_refresh(f)) {
            Some(next) if next > now => Some(next),
            _ => self.next_boundary_after(now),
        }
    }

    /// Next scheduled hour strictly after `after`. `None` for TTL schedules and empty hour sets.
    pub fn next_boundary_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let RefreshSchedule::FixedHours { hours, tz } = self else {
            return None;
        };

        let today = after.with_timezone(tz).date_naive();

        // A DST gap can swallow a day's only hour, so look two days ahead
        for offset in 0..=2u64 {
            let Some(date) = today.checked_add_days(Days::new(offset)) else {
                continue;
            };
            for &hour in hours {
                let Some(naive) = date.and_hms_opt(hour, 0, 0) else {
                    continue;
                };
                let Some(local) = tz.from_local_datetime(&naive).earliest() else {
                    continue;
                };
                let candidate = local.with_timezone(&Utc);
                if candidate > after {
                    return Some(candidate);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    #[test]
    fn test_ttl_stale_exactly_at_expiry() {
        let schedule = RefreshSchedule::ttl_secs(300);
        let fetched = utc(10, 0);

        assert!(schedule.is_fresh(fetched, fetched + Duration::seconds(299)));
        assert!(!schedule.is_fresh(fetched, fetched + Duration::seconds(300)));
        assert_eq!(schedule.next_refresh(fetched), Some(utc(10, 5)));
    }

    #[test]
    fn test_fixed_hours_due_after_crossing_boundary() {
        let schedule = RefreshSchedule::fixed_hours([9, 12, 16, 19], chrono_tz::UTC);
        let fetched = utc(8, 59);

        assert!(!schedule.is_fresh(fetched, utc(9, 1)));
        assert!(schedule.is_fresh(fetched, utc(8, 30)));
        assert!(schedule.is_fresh(fetched, utc(8, 59) + Duration::seconds(30)));
        assert_eq!(schedule.next_refresh(fetched), Some(utc(9, 0)));
    }

    #[test]
    fn test_fixed_hours_fresh_before_next_boundary() {
        let schedule = RefreshSchedule::fixed_hours([12, 16, 19], chrono_tz::UTC);
        assert!(schedule.is_fresh(utc(8, 59), utc(11, 0)));

        // Refreshed at 09:30 after the 09:00 boundary: nothing due until noon
        let schedule = RefreshSchedule::fixed_hours([9, 12, 16, 19], chrono_tz::UTC);
        assert!(schedule.is_fresh(utc(9, 30), utc(11, 59)));
        assert!(!schedule.is_fresh(utc(9, 30), utc(12, 0)));
    }

    #[test]
    fn test_fixed_hours_wrap_to_next_day() {
        let schedule = RefreshSchedule::fixed_hours([9, 12, 16, 19], chrono_tz::UTC);
        let next = schedule.next_refresh(utc(19, 30)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_fixed_hours_in_eastern_time() {
        let schedule = RefreshSchedule::fixed_hours([9], chrono_tz::US::Eastern);
        // 2024-03-04 is EST (UTC-5)
        let next = schedule.next_refresh(utc(13, 0)).unwrap();
        assert_eq!(next, utc(14, 0));
    }

    #[test]
    fn test_dst_gap_hour_skipped() {
        // 2024-03-10 02:00 does not exist in US/Eastern
        let schedule = RefreshSchedule::fixed_hours([2], chrono_tz::US::Eastern);
        let before_gap = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        let next = schedule.next_refresh(before_gap).unwrap();
        // 2024-03-11 02:00 EDT
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 11, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_next_update_skips_missed_boundaries() {
        let schedule = RefreshSchedule::fixed_hours([9, 12, 16, 19], chrono_tz::UTC);

        assert_eq!(schedule.next_update(Some(utc(8, 59)), utc(8, 59)), Some(utc(9, 0)));
        // Last fetch at 08:59, now 13:00: the next run is 16:00, not 09:00
        assert_eq!(schedule.next_update(Some(utc(8, 59)), utc(13, 0)), Some(utc(16, 0)));
        assert_eq!(schedule.next_update(None, utc(10, 0)), Some(utc(12, 0)));
    }

    #[test]
    fn test_empty_hours_never_due() {
        let schedule = RefreshSchedule::fixed_hours([25, 30], chrono_tz::UTC);
        assert_eq!(schedule.next_refresh(utc(9, 0)), None);
        assert!(schedule.is_fresh(utc(9, 0), utc(9, 0) + Duration::days(30)));
    }
}
