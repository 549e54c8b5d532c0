//! Delivery-time computation for dated futures contracts.
//!
//! Every exchange expresses a futures contract's expiry as one of four
//! relative tags - this-week, next-week, current-quarter, next-quarter -
//! resolved against a per-exchange delivery hour (UTC). `chrono` has no
//! native quarter arithmetic, so the quarter helpers below are hand-rolled.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};

/// The four standard derivative expiration tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractExpiration {
    /// This week (current Friday).
    CW,
    /// Next week.
    NW,
    /// Current quarter.
    CQ,
    /// Next quarter.
    NQ,
}

impl ContractExpiration {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CW" => Some(ContractExpiration::CW),
            "NW" => Some(ContractExpiration::NW),
            "CQ" => Some(ContractExpiration::CQ),
            "NQ" => Some(ContractExpiration::NQ),
            _ => None,
        }
    }
}

/// Resolve `expiration` relative to `since`, using `delivery_hour` (0-23
/// UTC) as the exchange's settlement hour.
pub fn contract_delivery_time(
    expiration: ContractExpiration,
    delivery_hour: u32,
    since: DateTime<Utc>,
) -> DateTime<Utc> {
    match expiration {
        ContractExpiration::CW => this_week_friday(since, delivery_hour),
        ContractExpiration::NW => this_week_friday(since, delivery_hour) + Duration::days(7),
        ContractExpiration::CQ => current_quarter_friday(since, delivery_hour),
        ContractExpiration::NQ => {
            let cq = current_quarter_friday(since, delivery_hour);
            current_quarter_friday(start_of_next_quarter(cq), delivery_hour)
        }
    }
}

fn start_of_day(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc()
}

fn start_of_week(dt: DateTime<Utc>) -> DateTime<Utc> {
    let day0 = start_of_day(dt);
    let offset = day0.weekday().num_days_from_monday() as i64;
    day0 - Duration::days(offset)
}

fn this_week_friday(since: DateTime<Utc>, delivery_hour: u32) -> DateTime<Utc> {
    let mut friday = start_of_week(since) + Duration::days(4) + Duration::hours(delivery_hour as i64);
    if since > friday {
        friday += Duration::days(7);
    }
    friday
}

fn quarter_start_month(month: u32) -> u32 {
    match month {
        1..=3 => 1,
        4..=6 => 4,
        7..=9 => 7,
        _ => 10,
    }
}

fn start_of_quarter(dt: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(dt.year(), quarter_start_month(dt.month()), 1, 0, 0, 0)
        .unwrap()
}

fn start_of_next_quarter(dt: DateTime<Utc>) -> DateTime<Utc> {
    let start = start_of_quarter(dt);
    if start.month() == 10 {
        Utc.with_ymd_and_hms(start.year() + 1, 1, 1, 0, 0, 0).unwrap()
    } else {
        Utc.with_ymd_and_hms(start.year(), start.month() + 3, 1, 0, 0, 0)
            .unwrap()
    }
}

/// Last calendar day of the quarter containing `dt`, at midnight.
fn end_of_quarter(dt: DateTime<Utc>) -> DateTime<Utc> {
    start_of_next_quarter(dt) - Duration::days(1)
}

fn last_friday_on_or_before(dt: DateTime<Utc>) -> DateTime<Utc> {
    let day0 = start_of_day(dt);
    let weekday = day0.weekday().num_days_from_monday() as i64;
    let friday = Weekday::Fri.num_days_from_monday() as i64;
    let back = (weekday - friday).rem_euclid(7);
    day0 - Duration::days(back)
}

fn current_quarter_friday(since: DateTime<Utc>, delivery_hour: u32) -> DateTime<Utc> {
    let last_friday =
        last_friday_on_or_before(end_of_quarter(since)) + Duration::hours(delivery_hour as i64);
    if since >= last_friday - Duration::weeks(2) {
        current_quarter_friday(start_of_next_quarter(since), delivery_hour)
    } else {
        last_friday
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_cw_is_friday_this_week_at_delivery_hour() {
        // 2026-07-29 is a Wednesday.
        let since = dt(2026, 7, 29, 3);
        let result = contract_delivery_time(ContractExpiration::CW, 8, since);
        assert_eq!(result.weekday(), Weekday::Fri);
        assert_eq!(result, dt(2026, 7, 31, 8));
    }

    #[test]
    fn test_cw_advances_a_week_if_already_past_delivery_hour() {
        // Friday, after the delivery hour has already passed this week.
        let since = dt(2026, 7, 31, 9);
        let result = contract_delivery_time(ContractExpiration::CW, 8, since);
        assert_eq!(result, dt(2026, 8, 7, 8));
    }

    #[test]
    fn test_nw_is_one_week_after_cw() {
        let since = dt(2026, 7, 29, 3);
        let cw = contract_delivery_time(ContractExpiration::CW, 8, since);
        let nw = contract_delivery_time(ContractExpiration::NW, 8, since);
        assert_eq!(nw - cw, Duration::days(7));
    }

    #[test]
    fn test_cq_is_friday_at_least_two_weeks_out() {
        let since = dt(2026, 7, 31, 0);
        let cq = contract_delivery_time(ContractExpiration::CQ, 8, since);
        assert_eq!(cq.weekday(), Weekday::Fri);
        assert!(cq >= since + Duration::days(14));
    }

    #[test]
    fn test_cq_rolls_to_next_quarter_when_inside_two_week_window() {
        // Last Friday of Q3 2026 is 2026-09-25; within 2 weeks of it.
        let since = dt(2026, 9, 20, 0);
        let cq = contract_delivery_time(ContractExpiration::CQ, 8, since);
        assert!(cq > dt(2026, 9, 30, 0), "expected roll into Q4, got {cq}");
        assert_eq!(cq.weekday(), Weekday::Fri);
    }

    #[test]
    fn test_nq_strictly_after_cq() {
        let since = dt(2026, 7, 31, 0);
        let cq = contract_delivery_time(ContractExpiration::CQ, 8, since);
        let nq = contract_delivery_time(ContractExpiration::NQ, 8, since);
        assert!(nq > cq);
    }

    #[test]
    fn test_parse_rejects_unknown_tag() {
        assert_eq!(ContractExpiration::parse("WEEKLY"), None);
        assert_eq!(ContractExpiration::parse("CQ"), Some(ContractExpiration::CQ));
    }
}
