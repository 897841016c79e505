use chrono::{Datelike, NaiveDate, Utc};

use crate::error::SummaryError;
use crate::models::DateWindow;

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn year_window(date: NaiveDate) -> Result<DateWindow, SummaryError> {
    let year = date.year();
    Ok(DateWindow::new(ymd(year, 1, 1)?, ymd(year, 12, 31)?))
}

/// Spring runs January to July, autumn August to December.
pub fn semester_window(date: NaiveDate) -> Result<DateWindow, SummaryError> {
    let year = date.year();
    if date.month() <= 7 {
        Ok(DateWindow::new(ymd(year, 1, 1)?, ymd(year, 7, 31)?))
    } else {
        Ok(DateWindow::new(ymd(year, 8, 1)?, ymd(year, 12, 31)?))
    }
}

pub fn all_time_window(since: NaiveDate, date: NaiveDate) -> Result<DateWindow, SummaryError> {
    Ok(DateWindow::new(since, year_window(date)?.end_date))
}

/// Windows kept warm by the cache job, in the order they are computed.
pub fn cached_windows(
    date: NaiveDate,
    all_time_since: Option<NaiveDate>,
) -> Result<Vec<DateWindow>, SummaryError> {
    let mut windows = vec![year_window(date)?, semester_window(date)?];
    if let Some(since) = all_time_since {
        windows.push(all_time_window(since, date)?);
    }
    Ok(windows)
}

/// Invalid or missing dates fall back to the current year bounds.
pub fn window_or_default(
    start: Option<&str>,
    end: Option<&str>,
    date: NaiveDate,
) -> Result<DateWindow, SummaryError> {
    let default = year_window(date)?;
    Ok(DateWindow::new(
        parse_or(start, default.start_date),
        parse_or(end, default.end_date),
    ))
}

fn parse_or(value: Option<&str>, fallback: NaiveDate) -> NaiveDate {
    value
        .and_then(|raw| {
            let raw = raw.trim();
            // full ISO timestamps are accepted, only the date part is kept
            let date_part = raw.get(..10).unwrap_or(raw);
            NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
        })
        .unwrap_or(fallback)
}

fn ymd(year: i32, month: u32, day: u32) -> Result<NaiveDate, SummaryError> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| SummaryError::InvalidDate(format!("{year:04}-{month:02}-{day:02}")))
}
