use crate::error::DateParseError;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

static RE_FOUR_DIGIT_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}").expect("year regex must compile"));
static RE_ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("iso date regex must compile")
});
static RE_SLASH_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\D)(\d{1,2})/(\d{1,2})/(\d{4})(?:\D|$)").expect("slash date regex must compile")
});
static RE_STRICT_SLASH_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("strict slash date regex must compile")
});
static RE_CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,2}):(\d{2})(?:\s*([ap])\.?m\b\.?)?").expect("clock regex must compile")
});
static RE_KICKOFF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2}:\d{2})").expect("kickoff regex must compile"));
static RE_URL_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(\d{4})-([A-Za-z]+)-(\d{1,2})/").expect("url date regex must compile")
});
static RE_AMPM_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[aApP][mM]\s*$").expect("am/pm suffix regex must compile"));
static RE_HOUR_MINUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})(?::(\d{2}))?").expect("hour regex must compile"));
static RE_PM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[pP][mM]").expect("pm regex must compile"));

/// Where a fixture's kickoff came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    Text,
    Url,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDate {
    pub at: DateTime<Utc>,
    pub source: DateSource,
}

impl ResolvedDate {
    pub fn is_approximate(&self) -> bool {
        self.source != DateSource::Text
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaleDateTime {
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
}

/// Resolves the kickoff of a listed fixture.
///
/// Listing cards usually omit the year, so it is inferred from the current
/// month: a month earlier than today's belongs to next year. When the text
/// cannot be read at all the `/YYYY-MonthName-DD/` fragment of the ticket url
/// is tried, and as a last resort `now` is returned with a warning.
pub fn parse_fixture_datetime(
    date_text: &str,
    time_text: Option<&str>,
    url_hint: Option<&str>,
    now: DateTime<Utc>,
    tz: Tz,
) -> ResolvedDate {
    let time_text = time_text.map(str::trim).unwrap_or_default();
    let full = format!("{} {}", date_text.trim(), time_text).trim().to_string();
    let today = now.with_timezone(&tz).date_naive();

    match parse_loose_date(&full, today) {
        Ok(date) => {
            let time = parse_clock(&full).unwrap_or(NaiveTime::MIN);
            return ResolvedDate {
                at: localize(date.and_time(time), tz),
                source: DateSource::Text,
            };
        }
        Err(err) => warn!(text = %full, error = %err, "could not parse fixture date"),
    }

    if let Some(url) = url_hint {
        match date_from_url(url) {
            Ok(date) => {
                let time = parse_clock(time_text).unwrap_or(NaiveTime::MIN);
                return ResolvedDate {
                    at: localize(date.and_time(time), tz),
                    source: DateSource::Url,
                };
            }
            Err(err) => warn!(%url, error = %err, "could not recover fixture date from url"),
        }
    }

    warn!(text = %full, "falling back to current time for fixture date");
    ResolvedDate {
        at: now,
        source: DateSource::Fallback,
    }
}

/// Parses a sale date cell and a sale time cell. Each field fails on its own.
pub fn parse_sale_datetime(
    date_text: Option<&str>,
    time_text: Option<&str>,
    today: NaiveDate,
) -> SaleDateTime {
    let date = date_text
        .filter(|text| !text.trim().is_empty())
        .and_then(|text| match parse_sale_date(text, today) {
            Ok(date) => Some(date),
            Err(err) => {
                warn!(text, error = %err, "could not parse sale date");
                None
            }
        });

    let time = time_text
        .filter(|text| !text.trim().is_empty())
        .and_then(|text| match normalize_sale_time(text) {
            Ok(time) => Some(time),
            Err(err) => {
                warn!(text, error = %err, "could not parse sale time");
                None
            }
        });

    SaleDateTime { date, time }
}

pub fn parse_sale_date(text: &str, today: NaiveDate) -> Result<NaiveDate, DateParseError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();

    // Day-first is the site's convention; generic parsing would read 05/04 as May 4th.
    if let Some(caps) = RE_STRICT_SLASH_DATE.captures(&compact) {
        return ymd(&caps[3], &caps[2], &caps[1], &compact);
    }

    parse_loose_date(&compact, today)
}

/// Reduces a sale time to `H:MM`, converting PM hours to the 24-hour clock.
pub fn normalize_sale_time(text: &str) -> Result<String, DateParseError> {
    let stripped = RE_AMPM_SUFFIX.replace(text.trim(), "");
    let caps = RE_HOUR_MINUTE
        .captures(&stripped)
        .ok_or_else(|| DateParseError::Time(text.to_string()))?;

    let mut hours: u32 = caps[1]
        .parse()
        .map_err(|_| DateParseError::Time(text.to_string()))?;
    let minutes = caps.get(2).map(|m| m.as_str()).unwrap_or("00");

    if RE_PM.is_match(text) && hours < 12 {
        hours += 12;
    }
    if hours > 23 {
        return Err(DateParseError::Time(text.to_string()));
    }

    Ok(format!("{hours}:{minutes}"))
}

pub fn extract_kickoff_time(text: &str) -> Option<String> {
    RE_KICKOFF
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Football seasons start in August: `2025-03-01` is in `2024-25`.
pub fn derive_season<D: Datelike>(date: &D) -> String {
    let year = date.year();
    if date.month() < 8 {
        format!("{}-{:02}", year - 1, year.rem_euclid(100))
    } else {
        format!("{}-{:02}", year, (year + 1).rem_euclid(100))
    }
}

/// Reads a calendar date out of free text such as `Sat 12 Apr`,
/// `Mon Apr 28`, `Sunday 10th August 2025 16:30` or `Monday28April2025`.
pub fn parse_loose_date(text: &str, today: NaiveDate) -> Result<NaiveDate, DateParseError> {
    if let Some(caps) = RE_ISO_DATE.captures(text) {
        return ymd(&caps[1], &caps[2], &caps[3], text);
    }
    if let Some(caps) = RE_SLASH_DATE.captures(text) {
        return ymd(&caps[3], &caps[2], &caps[1], text);
    }

    let tokens = tokenize(text);
    let (month_index, month) = tokens
        .iter()
        .enumerate()
        .find_map(|(i, token)| match token {
            Token::Word(word) => month_from_name(word).map(|m| (i, m)),
            _ => None,
        })
        .ok_or_else(|| DateParseError::Date(text.to_string()))?;

    let day = day_near_month(&tokens, month_index)
        .ok_or_else(|| DateParseError::Date(text.to_string()))?;

    let year = if RE_FOUR_DIGIT_YEAR.is_match(text) {
        tokens
            .iter()
            .find_map(|token| match token {
                Token::Num(n) if n.len() == 4 => n.parse::<i32>().ok(),
                _ => None,
            })
            .ok_or_else(|| DateParseError::Date(text.to_string()))?
    } else {
        infer_year(month, today)
    };

    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| DateParseError::OutOfRange(text.to_string()))
}

/// A month earlier than the current one is assumed to be next year.
pub fn infer_year(month: u32, today: NaiveDate) -> i32 {
    if month < today.month() {
        today.year() + 1
    } else {
        today.year()
    }
}

pub fn month_from_name(word: &str) -> Option<u32> {
    let lower = word.to_ascii_lowercase();
    let month = match lower.as_str() {
        "jan" | "january" => 1,
        "feb" | "february" => 2,
        "mar" | "march" => 3,
        "apr" | "april" => 4,
        "may" => 5,
        "jun" | "june" => 6,
        "jul" | "july" => 7,
        "aug" | "august" => 8,
        "sep" | "sept" | "september" => 9,
        "oct" | "october" => 10,
        "nov" | "november" => 11,
        "dec" | "december" => 12,
        _ => return None,
    };
    Some(month)
}

fn parse_clock(text: &str) -> Option<NaiveTime> {
    let caps = RE_CLOCK.captures(text)?;
    let mut hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps[2].parse().ok()?;
    match caps.get(3).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(marker) if marker == "p" && hour < 12 => hour += 12,
        Some(marker) if marker == "a" && hour == 12 => hour = 0,
        _ => {}
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn date_from_url(url: &str) -> Result<NaiveDate, DateParseError> {
    let caps = RE_URL_DATE
        .captures(url)
        .ok_or_else(|| DateParseError::Date(url.to_string()))?;
    let month = month_from_name(&caps[2]).ok_or_else(|| DateParseError::Date(url.to_string()))?;
    let year: i32 = caps[1]
        .parse()
        .map_err(|_| DateParseError::Date(url.to_string()))?;
    let day: u32 = caps[3]
        .parse()
        .map_err(|_| DateParseError::Date(url.to_string()))?;
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| DateParseError::OutOfRange(url.to_string()))
}

fn localize(value: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    tz.from_local_datetime(&value)
        .earliest()
        .or_else(|| tz.from_local_datetime(&value).latest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&value))
}

fn ymd(year: &str, month: &str, day: &str, text: &str) -> Result<NaiveDate, DateParseError> {
    let parse = |v: &str| v.parse::<u32>().map_err(|_| DateParseError::Date(text.to_string()));
    let year = year
        .parse::<i32>()
        .map_err(|_| DateParseError::Date(text.to_string()))?;
    NaiveDate::from_ymd_opt(year, parse(month)?, parse(day)?)
        .ok_or_else(|| DateParseError::OutOfRange(text.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Num(String),
    Sep(char),
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphabetic() {
            let mut word = String::new();
            while let Some(&c) = chars.peek().filter(|c| c.is_ascii_alphabetic()) {
                word.push(c);
                chars.next();
            }
            tokens.push(Token::Word(word));
        } else if c.is_ascii_digit() {
            let mut num = String::new();
            while let Some(&c) = chars.peek().filter(|c| c.is_ascii_digit()) {
                num.push(c);
                chars.next();
            }
            tokens.push(Token::Num(num));
        } else {
            if !c.is_whitespace() {
                tokens.push(Token::Sep(c));
            }
            chars.next();
        }
    }
    tokens
}

/// Picks the 1–2 digit number closest to the month word, ignoring clock parts.
fn day_near_month(tokens: &[Token], month_index: usize) -> Option<u32> {
    let is_clock_part = |i: usize| {
        let before = i.checked_sub(1).and_then(|j| tokens.get(j));
        let after = tokens.get(i + 1);
        matches!(before, Some(Token::Sep(':'))) || matches!(after, Some(Token::Sep(':')))
    };

    tokens
        .iter()
        .enumerate()
        .filter_map(|(i, token)| match token {
            Token::Num(n) if n.len() <= 2 && !is_clock_part(i) => {
                n.parse::<u32>().ok().map(|day| (i.abs_diff(month_index), day))
            }
            _ => None,
        })
        .filter(|(_, day)| (1..=31).contains(day))
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, day)| day)
}
