use anyhow::{bail, Context, Result};
use chrono::{Datelike, Days, Months, NaiveDate, NaiveTime, Weekday};

/// Resolves a day argument relative to `today`.
///
/// Accepted forms: `today`, `tomorrow`, a weekday name (next occurrence,
/// never today), a bare day of month (`7`, `07`; rolls into next month when
/// already past) and `mmdd` (`0312`).
pub fn parse_day(input: &str, today: NaiveDate) -> Result<NaiveDate> {
    let input = input.trim().to_lowercase();
    match input.as_str() {
        "today" => return Ok(today),
        "tomorrow" => {
            return today
                .checked_add_days(Days::new(1))
                .context("date out of range")
        }
        _ => {}
    }

    if let Ok(weekday) = input.parse::<Weekday>() {
        let ahead = (weekday.num_days_from_monday() + 7 - today.weekday().num_days_from_monday()) % 7;
        let ahead = if ahead == 0 { 7 } else { ahead };
        return today
            .checked_add_days(Days::new(ahead as u64))
            .context("date out of range");
    }

    if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
        return match input.len() {
            1 | 2 => {
                let day: u32 = input.parse()?;
                let this_month = NaiveDate::from_ymd_opt(today.year(), today.month(), day)
                    .with_context(|| format!("no day {day} in the current month"))?;
                if this_month >= today {
                    Ok(this_month)
                } else {
                    this_month
                        .checked_add_months(Months::new(1))
                        .context("date out of range")
                }
            }
            4 => {
                let month: u32 = input[..2].parse()?;
                let day: u32 = input[2..].parse()?;
                let date = NaiveDate::from_ymd_opt(today.year(), month, day)
                    .with_context(|| format!("not a valid date: {input}"))?;
                if date >= today {
                    Ok(date)
                } else {
                    NaiveDate::from_ymd_opt(today.year() + 1, month, day)
                        .with_context(|| format!("not a valid date next year: {input}"))
                }
            }
            _ => bail!("unrecognized day: {input}"),
        };
    }

    bail!("unrecognized day: {input}")
}

/// Parses a time span argument into start and end of day times.
///
/// Accepted forms: `12-14`, `1230-1400`, `8:30-10` and the shorthand `lunch`
/// for the 12 to 13 slot. The span must run forward.
pub fn parse_time_span(input: &str) -> Result<(NaiveTime, NaiveTime)> {
    let input = input.trim().to_lowercase();
    if input == "lunch" {
        return Ok((
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
        ));
    }

    let Some((start, end)) = input.split_once('-') else {
        bail!("time span must look like start-end, got: {input}");
    };
    let start = parse_clock(start)?;
    let end = parse_clock(end)?;
    if end <= start {
        bail!("time span must run forward: {input}");
    }
    Ok((start, end))
}

fn parse_clock(input: &str) -> Result<NaiveTime> {
    let input = input.trim();
    if let Some((hours, minutes)) = input.split_once(':') {
        let hours: u32 = hours.parse().with_context(|| format!("bad hour: {input}"))?;
        let minutes: u32 = minutes
            .parse()
            .with_context(|| format!("bad minutes: {input}"))?;
        return NaiveTime::from_hms_opt(hours, minutes, 0)
            .with_context(|| format!("not a valid time: {input}"));
    }

    if input.is_empty() || !input.chars().all(|c| c.is_ascii_digit()) {
        bail!("not a valid time: {input}");
    }
    let (hours, minutes) = match input.len() {
        1 | 2 => (input.parse()?, 0),
        3 => (input[..1].parse()?, input[1..].parse()?),
        4 => (input[..2].parse()?, input[2..].parse()?),
        _ => bail!("not a valid time: {input}"),
    };
    NaiveTime::from_hms_opt(hours, minutes, 0).with_context(|| format!("not a valid time: {input}"))
}
