/// Property-based tests using proptest
/// Invariants of slot computation and money handling that must hold for all inputs
use agenda_api::core::availability::{
    compute_slots, is_aligned, is_slot_free, weekday_index, BlockRule, DaySchedule, Interval,
    WorkingDay,
};
use agenda_api::core::money::{format_cents, parse_amount, MAX_CENTS};
use agenda_api::core::validation::{is_valid_slug, normalize_phone};
use chrono::{NaiveDate, NaiveTime, Timelike};
use proptest::prelude::*;

fn at(minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(minute / 60, minute % 60, 0).unwrap()
}

fn minute_of(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 6, 3).unwrap()
}

fn long_ago() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn iv(start: u32, end: u32) -> Interval {
    Interval {
        start: at(start),
        end: at(end),
    }
}

/// A block rule of one of four shapes: pinned to the schedule's date, repeating
/// on its weekday, or the same two aimed at some other day.
fn block_rule(kind: u8, interval: Interval) -> BlockRule {
    let (date, weekday) = match kind {
        0 => (Some(day()), None),
        1 => (None, Some(weekday_index(day()))),
        2 => (Some(day().succ_opt().unwrap()), None),
        _ => (None, Some((weekday_index(day()) + 3) % 7)),
    };
    BlockRule {
        date,
        weekday,
        interval,
    }
}

/// Working hours between 06:00 and 22:00 with an optional break, block rules
/// and a few busy intervals inside them. The rules are returned as well so
/// tests can tell which of them apply.
fn schedule_with_rules() -> impl Strategy<Value = (DaySchedule, Vec<BlockRule>)> {
    (360u32..720, 60u32..600)
        .prop_flat_map(|(start, len)| {
            let end = (start + len).min(22 * 60);
            let busy = prop::collection::vec((start..end, 5u32..120), 0..5);
            let break_time = prop::option::of((start..end, 15u32..90));
            let blocks = prop::collection::vec((0u8..4, start..end, 5u32..120), 0..4);
            (Just(start), Just(end), break_time, blocks, busy)
        })
        .prop_map(|(start, end, break_time, blocks, busy)| {
            let busy = busy
                .into_iter()
                .map(|(s, len)| iv(s, (s + len).min(23 * 60)))
                .filter(|i| i.start < i.end)
                .collect::<Vec<_>>();
            let rules = blocks
                .into_iter()
                .map(|(kind, s, len)| block_rule(kind, iv(s, (s + len).min(23 * 60))))
                .collect::<Vec<_>>();
            let schedule = DaySchedule::new(
                day(),
                Some(WorkingDay {
                    hours: iv(start, end),
                    break_time: break_time.map(|(s, len)| iv(s, (s + len).min(end))),
                }),
            )
            .with_blocks(&rules)
            .with_busy(busy);
            (schedule, rules)
        })
}

fn schedule_strategy() -> impl Strategy<Value = DaySchedule> {
    schedule_with_rules().prop_map(|(schedule, _)| schedule)
}

// Property: every offered slot is bookable
proptest! {
    #[test]
    fn slots_stay_within_working_hours(
        schedule in schedule_strategy(),
        duration in 5i32..180,
        step in 5i32..60
    ) {
        let slots = compute_slots(&schedule, duration, step, long_ago()).unwrap();
        let hours = schedule.working.unwrap().hours;
        for slot in &slots {
            prop_assert!(slot.start >= hours.start);
            prop_assert!(slot.end <= hours.end);
            prop_assert_eq!(minute_of(slot.end) - minute_of(slot.start), duration as u32);
        }
    }

    #[test]
    fn slots_never_overlap_busy_intervals(
        schedule in schedule_strategy(),
        duration in 5i32..180,
        step in 5i32..60
    ) {
        let slots = compute_slots(&schedule, duration, step, long_ago()).unwrap();
        for slot in &slots {
            let candidate = Interval { start: slot.start, end: slot.end };
            prop_assert!(schedule.busy.iter().all(|b| !b.overlaps(&candidate)));
            prop_assert!(is_slot_free(&schedule, slot.start, duration));
        }
    }

    #[test]
    fn slots_never_overlap_breaks_or_blocks(
        (schedule, rules) in schedule_with_rules(),
        duration in 5i32..180,
        step in 5i32..60
    ) {
        let slots = compute_slots(&schedule, duration, step, long_ago()).unwrap();
        let break_time = schedule.working.unwrap().break_time;
        let applicable = rules
            .iter()
            .filter(|r| r.applies_on(day()))
            .map(|r| r.interval)
            .collect::<Vec<_>>();
        prop_assert_eq!(&schedule.blocked, &applicable);

        for slot in &slots {
            let candidate = Interval { start: slot.start, end: slot.end };
            prop_assert!(break_time.map_or(true, |b| !b.overlaps(&candidate)));
            prop_assert!(applicable.iter().all(|b| !b.overlaps(&candidate)));
        }
    }

    #[test]
    fn slots_are_aligned_and_ascending(
        schedule in schedule_strategy(),
        duration in 5i32..180,
        step in 5i32..60
    ) {
        let slots = compute_slots(&schedule, duration, step, long_ago()).unwrap();
        for slot in &slots {
            prop_assert!(is_aligned(&schedule, slot.start, step));
        }
        for pair in slots.windows(2) {
            prop_assert!(pair[0].start < pair[1].start);
        }
    }

    #[test]
    fn nothing_is_offered_after_now(
        schedule in schedule_strategy(),
        now_minute in 0u32..1439
    ) {
        let now = day().and_time(at(now_minute));
        let slots = compute_slots(&schedule, 30, 15, now).unwrap();
        prop_assert!(slots.iter().all(|s| day().and_time(s.start) > now));
    }
}

// Property: money parsing never panics and round-trips through formatting
proptest! {
    #[test]
    fn amount_parsing_never_panics(raw in "\\PC*") {
        let _ = parse_amount(&raw);
    }

    #[test]
    fn formatted_cents_parse_back(cents in 0i64..=MAX_CENTS) {
        prop_assert_eq!(parse_amount(&format_cents(cents)).unwrap(), cents);
    }

    #[test]
    fn three_decimal_places_are_rejected(units in 1u32..100_000, frac in 0u32..1000) {
        let raw = format!("{}.{:03}", units, frac);
        // Trailing zeros still count as declared precision
        prop_assert!(parse_amount(&raw).is_err());
    }

    #[test]
    fn negative_amounts_are_rejected(cents in 1i64..1_000_000) {
        let raw = format!("-{}", format_cents(cents));
        prop_assert!(parse_amount(&raw).is_err());
    }
}

// Property: input validators never panic
proptest! {
    #[test]
    fn phone_normalization_never_panics(phone in "\\PC*") {
        let _ = normalize_phone(&phone);
    }

    #[test]
    fn normalized_phones_are_e164(ddd in 11u8..=99u8, rest in 10000000u32..=99999999u32) {
        let raw = format!("({}) 9{}", ddd, rest);
        if let Ok(normalized) = normalize_phone(&raw) {
            prop_assert!(normalized.starts_with('+'));
            prop_assert!(normalized[1..].chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn slugs_with_uppercase_or_spaces_are_rejected(word in "[a-z]{3,10}") {
        let upper = word.to_uppercase();
        let spaced = format!("{} x", word);
        prop_assert!(!is_valid_slug(&upper));
        prop_assert!(!is_valid_slug(&spaced));
        prop_assert!(is_valid_slug(&word));
    }
}
