// Weekday + time-of-day + timezone, and the math to find the next matching
// instant.

use super::ScheduleError;
use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::fmt;

/// Longest distance we walk forward looking for the end of a DST gap.
const MAX_GAP_MINUTES: i64 = 180;

const ALL_WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

// ============================================================================
// WEEKDAY SET
// ============================================================================

/// Set of weekdays stored as a bitmask, bit 0 = Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const EMPTY: WeekdaySet = WeekdaySet(0);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0x7f)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Build from day indices where 0 = Monday and 6 = Sunday.
    pub fn from_indices(indices: &[u8]) -> Result<Self, ScheduleError> {
        let mut set = Self::EMPTY;
        for &index in indices {
            if index > 6 {
                return Err(ScheduleError::InvalidWeekday(index.to_string()));
            }
            set.0 |= 1 << index;
        }
        Ok(set)
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        ALL_WEEKDAYS.into_iter().filter(move |day| self.contains(*day))
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for day in iter {
            set.insert(day);
        }
        set
    }
}

impl fmt::Display for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|d| d.to_string()).collect();
        write!(f, "{}", names.join(", "))
    }
}

/// Parse user input like `mon,wed,fri`, `Tuesday Thursday`, `weekdays` or
/// `daily` into a non-empty set.
pub fn parse_weekdays(input: &str) -> Result<WeekdaySet, ScheduleError> {
    let mut set = WeekdaySet::EMPTY;

    for token in input
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        match token.to_ascii_lowercase().as_str() {
            "daily" | "everyday" | "all" => {
                set = ALL_WEEKDAYS.into_iter().collect();
            }
            "weekdays" => {
                for day in &ALL_WEEKDAYS[..5] {
                    set.insert(*day);
                }
            }
            "weekends" => {
                set.insert(Weekday::Sat);
                set.insert(Weekday::Sun);
            }
            other => {
                let day = match other {
                    "tues" => Weekday::Tue,
                    "wednes" | "weds" => Weekday::Wed,
                    "thur" | "thurs" => Weekday::Thu,
                    _ => other
                        .parse::<Weekday>()
                        .map_err(|_| ScheduleError::InvalidWeekday(token.to_string()))?,
                };
                set.insert(day);
            }
        }
    }

    if set.is_empty() {
        return Err(ScheduleError::EmptyWeekdays);
    }
    Ok(set)
}

/// Parse `HH:MM` (24-hour clock).
pub fn parse_time_of_day(input: &str) -> Result<(u32, u32), ScheduleError> {
    let invalid = || ScheduleError::InvalidTimeFormat(input.to_string());

    let (hour, minute) = input.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
    let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;

    if hour > 23 || minute > 59 {
        return Err(ScheduleError::InvalidTime { hour, minute });
    }
    Ok((hour, minute))
}

// ============================================================================
// RECURRING SLOT
// ============================================================================

/// A validated "these weekdays at HH:MM in this timezone" rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurringSlot {
    weekdays: WeekdaySet,
    time: NaiveTime,
    timezone: Tz,
}

impl RecurringSlot {
    pub fn new(
        weekdays: WeekdaySet,
        hour: u32,
        minute: u32,
        timezone: &str,
    ) -> Result<Self, ScheduleError> {
        if weekdays.is_empty() {
            return Err(ScheduleError::EmptyWeekdays);
        }
        let time = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or(ScheduleError::InvalidTime { hour, minute })?;
        let timezone: Tz = timezone
            .trim()
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.to_string()))?;

        Ok(Self {
            weekdays,
            time,
            timezone,
        })
    }

    /// Every day at `hour:minute` in `timezone`.
    pub fn daily(hour: u32, minute: u32, timezone: &str) -> Result<Self, ScheduleError> {
        Self::new(ALL_WEEKDAYS.into_iter().collect(), hour, minute, timezone)
    }

    pub fn weekdays(&self) -> WeekdaySet {
        self.weekdays
    }

    pub fn time(&self) -> NaiveTime {
        self.time
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// The first matching instant at or after `reference`.
    ///
    /// Local dates are walked starting from the reference's own local date.
    /// A time that happens twice (clocks falling back) resolves to the earlier
    /// instant only. A time that never happens (clocks springing forward)
    /// resolves to the first valid local minute after the gap on that date.
    ///
    /// Only `None` at the very end of chrono's date range.
    pub fn next_fire(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = reference.with_timezone(&self.timezone).date_naive();

        for date in start.iter_days() {
            if !self.weekdays.contains(date.weekday()) {
                continue;
            }
            if let Some(instant) = self.resolve_on(date) {
                if instant >= reference {
                    return Some(instant);
                }
            }
        }
        None
    }

    /// The UTC instant this slot lands on for a local `date`.
    fn resolve_on(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let local = date.and_time(self.time);

        if let Some(instant) = earliest(self.timezone.from_local_datetime(&local)) {
            return Some(instant);
        }

        for minutes in 1..=MAX_GAP_MINUTES {
            let shifted = local + Duration::minutes(minutes);
            if shifted.date() != date {
                break;
            }
            if let Some(instant) = earliest(self.timezone.from_local_datetime(&shifted)) {
                return Some(instant);
            }
        }
        None
    }
}

fn earliest(result: LocalResult<DateTime<Tz>>) -> Option<DateTime<Utc>> {
    match result {
        LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
        LocalResult::Ambiguous(a, b) => Some(a.min(b).with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

impl fmt::Display for RecurringSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {} ({})",
            self.weekdays,
            self.time.format("%H:%M"),
            self.timezone.name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn monday_nine_utc() -> RecurringSlot {
        RecurringSlot::new([Weekday::Mon].into_iter().collect(), 9, 0, "UTC").unwrap()
    }

    #[test]
    fn past_slot_rolls_to_following_week() {
        // 2024-01-01 is a Monday.
        let next = monday_nine_utc().next_fire(utc(2024, 1, 1, 10, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 8, 9, 0));
    }

    #[test]
    fn exact_match_fires_at_reference() {
        let reference = utc(2024, 1, 1, 9, 0);
        assert_eq!(monday_nine_utc().next_fire(reference), Some(reference));
    }

    #[test]
    fn next_fire_is_never_before_reference() {
        let slot = RecurringSlot::new(parse_weekdays("mon,wed,fri").unwrap(), 14, 0, "America/New_York")
            .unwrap();
        let mut reference = utc(2024, 3, 1, 0, 0);
        for _ in 0..500 {
            let next = slot.next_fire(reference).unwrap();
            assert!(next >= reference);
            reference += Duration::minutes(97);
        }
    }

    #[test]
    fn advancing_past_a_fire_moves_to_next_slot() {
        let slot = RecurringSlot::new(parse_weekdays("mon,wed,fri").unwrap(), 14, 0, "UTC").unwrap();
        let first = slot.next_fire(utc(2024, 1, 1, 0, 0)).unwrap();
        assert_eq!(first, utc(2024, 1, 1, 14, 0));

        let second = slot.next_fire(first + Duration::seconds(1)).unwrap();
        assert_eq!(second, utc(2024, 1, 3, 14, 0));
    }

    #[test]
    fn local_weekday_is_used_not_utc_weekday() {
        // Monday 21:00 in New York is already Tuesday in UTC.
        let slot = RecurringSlot::new([Weekday::Mon].into_iter().collect(), 21, 0, "America/New_York")
            .unwrap();
        let next = slot.next_fire(utc(2024, 1, 1, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 2, 2, 0));
    }

    #[test]
    fn ambiguous_time_fires_once_at_earlier_instant() {
        // 2024-11-03 01:30 happens twice in New York (EDT then EST).
        let slot = RecurringSlot::daily(1, 30, "America/New_York").unwrap();

        let first = slot.next_fire(utc(2024, 11, 3, 0, 0)).unwrap();
        assert_eq!(first, utc(2024, 11, 3, 5, 30));

        let after = slot.next_fire(first + Duration::seconds(1)).unwrap();
        assert_eq!(after, utc(2024, 11, 4, 6, 30));
    }

    #[test]
    fn nonexistent_time_fires_after_the_gap() {
        // 2024-03-10 02:30 does not exist in New York; 03:00 EDT is 07:00 UTC.
        let slot = RecurringSlot::daily(2, 30, "America/New_York").unwrap();

        let fire = slot.next_fire(utc(2024, 3, 10, 0, 0)).unwrap();
        assert_eq!(fire, utc(2024, 3, 10, 7, 0));

        let next = slot.next_fire(fire + Duration::seconds(1)).unwrap();
        assert_eq!(next, utc(2024, 3, 11, 6, 30));
    }

    #[test]
    fn invalid_rules_are_rejected() {
        assert!(matches!(
            RecurringSlot::new(WeekdaySet::EMPTY, 9, 0, "UTC"),
            Err(ScheduleError::EmptyWeekdays)
        ));
        assert!(matches!(
            RecurringSlot::daily(24, 0, "UTC"),
            Err(ScheduleError::InvalidTime { hour: 24, minute: 0 })
        ));
        assert!(matches!(
            RecurringSlot::daily(9, 60, "UTC"),
            Err(ScheduleError::InvalidTime { hour: 9, minute: 60 })
        ));
        assert!(matches!(
            RecurringSlot::daily(9, 0, "Mars/Olympus_Mons"),
            Err(ScheduleError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn weekday_parsing_accepts_common_forms() {
        let set = parse_weekdays("Mon, wednesday  FRI").unwrap();
        let days: Vec<Weekday> = set.iter().collect();
        assert_eq!(days, vec![Weekday::Mon, Weekday::Wed, Weekday::Fri]);

        assert_eq!(parse_weekdays("weekends").unwrap().iter().count(), 2);
        assert_eq!(parse_weekdays("daily").unwrap().iter().count(), 7);
        assert_eq!(parse_weekdays("tues,thurs").unwrap().to_string(), "Tue, Thu");

        assert!(matches!(parse_weekdays(" , "), Err(ScheduleError::EmptyWeekdays)));
        assert!(matches!(
            parse_weekdays("mon,funday"),
            Err(ScheduleError::InvalidWeekday(t)) if t == "funday"
        ));
    }

    #[test]
    fn weekday_indices_start_on_monday() {
        let set = WeekdaySet::from_indices(&[0, 6]).unwrap();
        assert!(set.contains(Weekday::Mon));
        assert!(set.contains(Weekday::Sun));
        assert!(!set.contains(Weekday::Tue));
        assert!(WeekdaySet::from_indices(&[7]).is_err());
    }

    #[test]
    fn time_of_day_parsing() {
        assert_eq!(parse_time_of_day("14:05").unwrap(), (14, 5));
        assert_eq!(parse_time_of_day(" 7:30 ").unwrap(), (7, 30));
        assert!(matches!(
            parse_time_of_day("25:00"),
            Err(ScheduleError::InvalidTime { hour: 25, minute: 0 })
        ));
        assert!(matches!(
            parse_time_of_day("noon"),
            Err(ScheduleError::InvalidTimeFormat(_))
        ));
    }
}
