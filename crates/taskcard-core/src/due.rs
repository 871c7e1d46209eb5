use chrono::{
  DateTime,
  Datelike,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  Timelike
};
use chrono_tz::Tz;

use crate::snapshot::Due;

/// Locale-independent month labels;
/// host date formatting is never
/// consulted.
pub const MONTHS: [&str; 12] = [
  "Jan", "Feb", "Mar", "Apr", "May",
  "Jun", "Jul", "Aug", "Sep", "Oct",
  "Nov", "Dec"
];

const NAIVE_DATETIME_FORMATS: [&str;
  3] = [
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%dT%H:%M:%S",
  "%Y-%m-%dT%H:%M"
];

/// Resolve the wall-clock timezone
/// for offset-carrying datetimes.
/// Falls back to UTC when the name is
/// absent or unknown.
pub fn resolve_timezone(
  raw: Option<&str>
) -> Tz {
  let Some(raw) = raw else {
    return chrono_tz::UTC;
  };

  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      "timezone setting was empty; \
       using UTC"
    );
    return chrono_tz::UTC;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        timezone = %trimmed,
        "resolved due-label timezone"
      );
      tz
    }
    | Err(err) => {
      tracing::warn!(
        timezone = %trimmed,
        error = %err,
        "invalid timezone; using UTC"
      );
      chrono_tz::UTC
    }
  }
}

/// Build the short due label for a
/// task.
///
/// `date` renders as `<day> <Mon>`;
/// `datetime` appends
/// ` <hour>:<minute>` with only the
/// minute zero-padded. A datetime
/// without a date still gets its
/// leading space (`" 9:05"`), which
/// existing layouts rely on.
/// Returns `None` when nothing would
/// be shown.
pub fn format_due_label(
  due: Option<&Due>,
  tz: &Tz
) -> Option<String> {
  let due = due?;
  let mut label = String::new();

  if let Some(raw) = due.date.as_deref()
  {
    match parse_due_date(raw, tz) {
      | Some(date) => {
        label.push_str(&format!(
          "{} {}",
          date.day(),
          MONTHS[date.month0() as usize]
        ));
      }
      | None => {
        tracing::warn!(
          date = %raw,
          "unparseable due date; \
           omitting date component"
        );
      }
    }
  }

  if let Some(raw) =
    due.datetime.as_deref()
  {
    match parse_due_time(raw, tz) {
      | Some(time) => {
        label.push_str(&format!(
          " {}:{:02}",
          time.hour(),
          time.minute()
        ));
      }
      | None => {
        tracing::warn!(
          datetime = %raw,
          "unparseable due datetime; \
           omitting time component"
        );
      }
    }
  }

  if label.is_empty() {
    None
  } else {
    Some(label)
  }
}

/// Calendar date of a due field. A
/// plain `YYYY-MM-DD` is taken
/// literally; a full timestamp yields
/// its date in `tz`.
pub fn parse_due_date(
  raw: &str,
  tz: &Tz
) -> Option<NaiveDate> {
  let trimmed = raw.trim();
  if let Ok(date) =
    NaiveDate::parse_from_str(
      trimmed, "%Y-%m-%d"
    )
  {
    return Some(date);
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(
      trimmed
    )
  {
    return Some(
      dt.with_timezone(tz).date_naive()
    );
  }

  parse_naive_datetime(trimmed)
    .map(|ndt| ndt.date())
}

/// Wall-clock time of a due datetime.
/// Offsets are converted into `tz`;
/// naive values are already local.
pub fn parse_due_time(
  raw: &str,
  tz: &Tz
) -> Option<NaiveTime> {
  let trimmed = raw.trim();
  if let Ok(dt) =
    DateTime::parse_from_rfc3339(
      trimmed
    )
  {
    return Some(
      dt.with_timezone(tz).time()
    );
  }

  parse_naive_datetime(trimmed)
    .map(|ndt| ndt.time())
}

fn parse_naive_datetime(
  raw: &str
) -> Option<NaiveDateTime> {
  NAIVE_DATETIME_FORMATS.iter().find_map(
    |format| {
      NaiveDateTime::parse_from_str(
        raw, format
      )
      .ok()
    }
  )
}
