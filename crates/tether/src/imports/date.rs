//! `teavmDate`: epoch-millisecond date primitives.
//!
//! Dates cross as `f64` milliseconds since the Unix epoch. Field arithmetic
//! follows the host `Date` rules: months are zero-based, out-of-range fields
//! roll over into the next larger unit, and anything non-finite or outside
//! ±8.64e15 ms yields `NaN`.

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, Offset, TimeZone, Timelike, Utc};

use super::{DATE_MODULE, ImportObject, number_arg};
use crate::guest::GuestValue;

const MS_PER_DAY: f64 = 86_400_000.0;
const MAX_TIME: f64 = 8.64e15;
/// Days from 0001-01-01 (day 1) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Zone {
    Local,
    Utc,
}

/// Broken-down date in one time zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Fields {
    pub year: f64,
    pub month: f64,
    pub day: f64,
    pub hours: f64,
    pub minutes: f64,
    pub seconds: f64,
    pub millis: f64,
}

impl Fields {
    fn of(naive: NaiveDateTime) -> Self {
        Self {
            year: f64::from(naive.year()),
            month: f64::from(naive.month0()),
            day: f64::from(naive.day()),
            hours: f64::from(naive.hour()),
            minutes: f64::from(naive.minute()),
            seconds: f64::from(naive.second()),
            millis: f64::from(naive.nanosecond() / 1_000_000),
        }
    }
}

pub(super) fn now() -> f64 {
    Utc::now().timestamp_millis() as f64
}

fn time_clip(time: f64) -> f64 {
    if !time.is_finite() || time.abs() > MAX_TIME {
        return f64::NAN;
    }
    time.trunc() + 0.0
}

#[expect(clippy::cast_possible_truncation, reason = "callers pass clipped, finite values")]
fn to_i64(value: f64) -> i64 {
    value as i64
}

fn utc_datetime(time: f64) -> Option<DateTime<Utc>> {
    let time = time_clip(time);
    if time.is_nan() {
        return None;
    }
    DateTime::from_timestamp_millis(to_i64(time))
}

fn naive(time: f64, zone: Zone) -> Option<NaiveDateTime> {
    let utc = utc_datetime(time)?;
    Some(match zone {
        Zone::Utc => utc.naive_utc(),
        Zone::Local => utc.with_timezone(&Local).naive_local(),
    })
}

/// Day number (days since the epoch) of `year`-`month`-`date`, with months
/// and dates rolling over.
fn make_day(year: f64, month: f64, date: f64) -> f64 {
    if !(year.is_finite() && month.is_finite() && date.is_finite()) {
        return f64::NAN;
    }
    let (year, month, date) = (year.trunc(), month.trunc(), date.trunc());
    let year = year + (month / 12.0).floor();
    let month = month.rem_euclid(12.0);
    if year.abs() > 400_000.0 {
        return f64::NAN;
    }
    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "range checked above")]
    let first = NaiveDate::from_ymd_opt(year as i32, month as u32 + 1, 1);
    let Some(first) = first else {
        return f64::NAN;
    };
    let days = i64::from(first.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE;
    days as f64 + date - 1.0
}

fn make_time(hours: f64, minutes: f64, seconds: f64, millis: f64) -> f64 {
    if !(hours.is_finite() && minutes.is_finite() && seconds.is_finite() && millis.is_finite()) {
        return f64::NAN;
    }
    hours.trunc() * 3_600_000.0 + minutes.trunc() * 60_000.0 + seconds.trunc() * 1000.0 + millis.trunc()
}

/// Converts a wall-clock time in the local zone to UTC milliseconds.
fn local_to_utc(local: f64) -> f64 {
    let Some(wall) = utc_datetime(local).map(|dt| dt.naive_utc()) else {
        return f64::NAN;
    };
    let resolved = Local.from_local_datetime(&wall);
    if let Some(dt) = resolved.earliest() {
        return dt.timestamp_millis() as f64;
    }
    // inside a DST gap: shift by the offset in force at that instant
    let offset = Local.offset_from_utc_datetime(&wall).fix().local_minus_utc();
    local - f64::from(offset) * 1000.0
}

pub(super) fn compose(fields: Fields, zone: Zone) -> f64 {
    let day = make_day(fields.year, fields.month, fields.day);
    let time = make_time(fields.hours, fields.minutes, fields.seconds, fields.millis);
    let wall = day * MS_PER_DAY + time;
    if !wall.is_finite() {
        return f64::NAN;
    }
    match zone {
        Zone::Utc => time_clip(wall),
        Zone::Local => time_clip(local_to_utc(wall)),
    }
}

pub(super) fn fields(time: f64, zone: Zone) -> Option<Fields> {
    naive(time, zone).map(Fields::of)
}

fn weekday(time: f64, zone: Zone) -> f64 {
    naive(time, zone).map_or(f64::NAN, |n| f64::from(n.weekday().num_days_from_sunday()))
}

/// Minutes to add to local time to get UTC.
fn timezone_offset(time: f64) -> f64 {
    utc_datetime(time).map_or(f64::NAN, |utc| {
        let offset = Local.offset_from_utc_datetime(&utc.naive_utc()).fix().local_minus_utc();
        -f64::from(offset) / 60.0
    })
}

type Getter = fn(&Fields) -> f64;
type Setter = fn(&mut Fields, f64);

const GETTERS: &[(&str, Getter)] = &[
    ("FullYear", |f| f.year),
    ("Month", |f| f.month),
    ("Date", |f| f.day),
    ("Hours", |f| f.hours),
    ("Minutes", |f| f.minutes),
    ("Seconds", |f| f.seconds),
];

const SETTERS: &[(&str, Setter)] = &[
    ("FullYear", |f, v| f.year = v),
    ("Month", |f, v| f.month = v),
    ("Date", |f, v| f.day = v),
    ("Hours", |f, v| f.hours = v),
    ("Minutes", |f, v| f.minutes = v),
    ("Seconds", |f, v| f.seconds = v),
];

fn f64_result(value: f64) -> Option<GuestValue> {
    Some(GuestValue::F64(value))
}

pub(super) fn install(imports: &mut ImportObject) {
    imports.define(DATE_MODULE, "now", |_| Ok(f64_result(now())));
    for (name, zone) in [("create", Zone::Local), ("createFromUTC", Zone::Utc)] {
        imports.define(DATE_MODULE, name, move |args| {
            let field = |i| number_arg(args, i);
            let fields = Fields {
                year: field(0)?,
                month: field(1)?,
                day: field(2)?,
                hours: field(3)?,
                minutes: field(4)?,
                seconds: field(5)?,
                millis: 0.0,
            };
            Ok(f64_result(compose(fields, zone)))
        });
    }
    for (zone, infix) in [(Zone::Local, ""), (Zone::Utc, "UTC")] {
        for &(field, getter) in GETTERS {
            imports.define(DATE_MODULE, &format!("get{infix}{field}"), move |args| {
                let time = number_arg(args, 0)?;
                Ok(f64_result(fields(time, zone).map_or(f64::NAN, |f| getter(&f))))
            });
        }
        for &(field, setter) in SETTERS {
            imports.define(DATE_MODULE, &format!("set{infix}{field}"), move |args| {
                let time = number_arg(args, 0)?;
                let value = number_arg(args, 1)?;
                let Some(mut f) = fields(time, zone) else {
                    return Ok(f64_result(f64::NAN));
                };
                setter(&mut f, value);
                Ok(f64_result(compose(f, zone)))
            });
        }
        imports.define(DATE_MODULE, &format!("get{infix}Day"), move |args| {
            Ok(f64_result(weekday(number_arg(args, 0)?, zone)))
        });
    }
    imports.define(DATE_MODULE, "getTimezoneOffset", |args| {
        Ok(f64_result(timezone_offset(number_arg(args, 0)?)))
    });
}
