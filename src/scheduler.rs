//! Scheduler: expands persisted `ScheduledEntry` rows into a single ordered
//! timeline of `TimedAction`s and dispatches them at the right wall-clock
//! time (spec §4.H).
//!
//! Grounded on `examples/stuayu-recisdb-proxy-rs/recisdb-proxy/src/scheduler/scan_scheduler.rs`
//! for the tick/dispatch shape (a periodic check plus an armed short-horizon
//! task), re-expressed over `std::thread`/wall-clock `Instant`s instead of a
//! `tokio::time::interval` since this crate's reader pipeline is not async
//! (see `SPEC_FULL.md` §5). `ScheduledEntry`/`TimedAction` field names and
//! the `TuneIn@start-60s / RecordStart@start / RecordStop@end` expansion are
//! grounded on `examples/original_source/{scheduled,timed-events}.h`.
//! `RecurringSchedule`/`WeekdayMask` supplement spec.md, also grounded on
//! `scheduled.h`'s `ScheduledEventRecurring`/`ScheduleWeekday`.

use std::cmp::Ordering as CmpOrdering;

use chrono::TimeZone;
use log::warn;

use crate::error::DbError;

bitflags::bitflags! {
    /// Days of the week a `RecurringSchedule` fires on.
    #[derive(Default)]
    pub struct WeekdayMask: u8 {
        const MONDAY    = 1 << 0;
        const TUESDAY   = 1 << 1;
        const WEDNESDAY = 1 << 2;
        const THURSDAY  = 1 << 3;
        const FRIDAY    = 1 << 4;
        const SATURDAY  = 1 << 5;
        const SUNDAY    = 1 << 6;
        const WEEKDAYS = Self::MONDAY.bits | Self::TUESDAY.bits | Self::WEDNESDAY.bits
            | Self::THURSDAY.bits | Self::FRIDAY.bits;
        const WEEKEND = Self::SATURDAY.bits | Self::SUNDAY.bits;
        const EVERYDAY = Self::WEEKDAYS.bits | Self::WEEKEND.bits;
    }
}

impl WeekdayMask {
    /// Maps `chrono::Weekday` to the corresponding single-bit mask.
    pub fn from_weekday(day: chrono::Weekday) -> WeekdayMask {
        match day {
            chrono::Weekday::Mon => WeekdayMask::MONDAY,
            chrono::Weekday::Tue => WeekdayMask::TUESDAY,
            chrono::Weekday::Wed => WeekdayMask::WEDNESDAY,
            chrono::Weekday::Thu => WeekdayMask::THURSDAY,
            chrono::Weekday::Fri => WeekdayMask::FRIDAY,
            chrono::Weekday::Sat => WeekdayMask::SATURDAY,
            chrono::Weekday::Sun => WeekdayMask::SUNDAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledEventStatus {
    Unknown,
    InPreparation,
    Recording,
    Cancelled,
    Done,
}

/// A persisted scheduled recording (spec §3 `ScheduledEntry`). Invariant:
/// `time_start < time_end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEntry {
    pub id: u32,
    pub channel_id: u32,
    /// Unix epoch seconds.
    pub time_start: i64,
    /// Unix epoch seconds.
    pub time_end: i64,
    pub status: ScheduledEventStatus,
    pub recurring_parent: Option<u32>,
}

/// A recurring template that materializes one `ScheduledEntry` at
/// a time, one event ahead of the current one (mirrors
/// `dvb_recorder_add_timed_event`'s recurring path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringSchedule {
    pub id: u32,
    pub channel_id: u32,
    pub weekday_mask: WeekdayMask,
    /// Seconds since local midnight.
    pub start_time_of_day: u32,
    pub duration_secs: u32,
    /// The `ScheduledEntry::id` already materialized for the next
    /// occurrence, if any.
    pub next_event_id: Option<u32>,
}

impl RecurringSchedule {
    /// The next occurrence at or after `now` whose weekday is set in the
    /// mask, as a `(time_start, time_end)` pair of epoch seconds.
    pub fn next_occurrence(&self, now: chrono::DateTime<chrono::Local>) -> (i64, i64) {
        for offset in 0..8 {
            let day = now.date_naive() + chrono::Duration::days(offset);
            if !self.weekday_mask.contains(WeekdayMask::from_weekday(day.weekday())) {
                continue;
            }
            let Some(midnight) = day.and_hms_opt(0, 0, 0) else { continue };
            let start = midnight + chrono::Duration::seconds(self.start_time_of_day as i64);
            let start_local = match now.timezone().from_local_datetime(&start).single() {
                Some(dt) => dt,
                None => continue,
            };
            if start_local <= now {
                continue;
            }
            let start_epoch = start_local.timestamp();
            return (start_epoch, start_epoch + self.duration_secs as i64);
        }
        // No matching weekday within a week: treat as "never" by returning
        // an already-elapsed interval so the caller's materialization is a
        // no-op.
        (0, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedActionKind {
    TuneIn,
    RecordStart,
    RecordStop,
}

/// One entry of the scheduler's ordered timeline (spec §3 `TimedAction`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedAction {
    pub kind: TimedActionKind,
    pub group_id: u32,
    pub fire_time: i64,
    pub channel_id: Option<u32>,
}

impl TimedAction {
    fn expand(entry: &ScheduledEntry) -> [TimedAction; 3] {
        [
            TimedAction {
                kind: TimedActionKind::TuneIn,
                group_id: entry.id,
                fire_time: entry.time_start - 60,
                channel_id: Some(entry.channel_id),
            },
            TimedAction {
                kind: TimedActionKind::RecordStart,
                group_id: entry.id,
                fire_time: entry.time_start,
                channel_id: None,
            },
            TimedAction {
                kind: TimedActionKind::RecordStop,
                group_id: entry.id,
                fire_time: entry.time_end,
                channel_id: None,
            },
        ]
    }
}

/// How close to `fire_time` the tick loop arms a short-horizon precise
/// dispatch (spec §4.H).
pub const DISPATCH_HORIZON_SECS: i64 = 30;

/// Result of one `tick` or `dispatch_due` call: the actions that should be
/// performed now, in `fire_time` order.
pub struct Due {
    pub actions: Vec<TimedAction>,
}

/// Source of scheduled entries the scheduler rebuilds its timeline from.
/// Implemented by the channel/schedule database collaborator
/// (`crate::db`), kept as a trait so the scheduler can be tested without
/// one.
pub trait ScheduleSource {
    /// Every entry with `time_start > now` (epoch seconds).
    fn upcoming(&self, now: i64) -> Vec<ScheduledEntry>;
}

/// Backing store for `RecurringSchedule` templates, implemented by
/// `crate::db::Database`. Kept separate from `ScheduleSource` since
/// materializing a recurring template also needs to persist the freshly
/// created `ScheduledEntry` and the template's updated `next_event_id`,
/// neither of which `ScheduleSource` (a read-only view) can do.
pub trait RecurringStore {
    fn recurring_entries(&self) -> Vec<RecurringSchedule>;
    /// Persists a new materialized occurrence, tagged with its parent
    /// template's id.
    fn schedule_add(
        &self,
        channel_id: u32,
        time_start: i64,
        time_end: i64,
        recurring_parent: Option<u32>,
    ) -> Result<u32, DbError>;
    fn recurring_set_next_event_id(&self, recurring_id: u32, event_id: Option<u32>) -> Result<(), DbError>;
    /// Looks up a previously materialized `ScheduledEntry` by id, used to
    /// check whether its `time_end` has passed.
    fn scheduled_entry(&self, id: u32) -> Option<ScheduledEntry>;
}

/// The in-memory sorted timeline plus tick/dispatch bookkeeping.
pub struct Scheduler {
    timeline: Vec<TimedAction>,
    enabled: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            timeline: Vec::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// `enable_scheduled_events(true)`: rebuild the timeline from `source`'s
    /// upcoming entries (spec §4.H).
    pub fn enable(&mut self, source: &dyn ScheduleSource, now: i64) {
        self.enabled = true;
        self.rebuild(source, now);
    }

    /// `enable_scheduled_events(false)`: clears the timeline.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.timeline.clear();
    }

    pub fn rebuild(&mut self, source: &dyn ScheduleSource, now: i64) {
        self.timeline.clear();
        for entry in source.upcoming(now) {
            self.add_entry(&entry);
        }
    }

    /// Expands one `ScheduledEntry` into its three `TimedAction`s and
    /// inserts them into the sorted timeline.
    pub fn add_entry(&mut self, entry: &ScheduledEntry) {
        for action in TimedAction::expand(entry) {
            let pos = self
                .timeline
                .binary_search_by(|a| a.fire_time.cmp(&action.fire_time))
                .unwrap_or_else(|e| e);
            self.timeline.insert(pos, action);
        }
    }

    /// Removes every `TimedAction` belonging to `group_id` (used when a
    /// `ScheduledEntry` is cancelled).
    pub fn remove_group(&mut self, group_id: u32) {
        self.timeline.retain(|a| a.group_id != group_id);
    }

    pub fn next_fire_time(&self) -> Option<i64> {
        self.timeline.first().map(|a| a.fire_time)
    }

    /// The 30-second polling tick (spec §4.H): if the head of the timeline
    /// is within `DISPATCH_HORIZON_SECS` of `now`, returns it (and every
    /// other action due by then) for precise short-horizon dispatch.
    pub fn tick(&mut self, now: i64) -> Due {
        if !self.enabled {
            return Due { actions: Vec::new() };
        }
        self.pop_due(now + DISPATCH_HORIZON_SECS)
    }

    /// Pops and returns every action whose `fire_time <= deadline`, in
    /// order. Re-arming for "another head within horizon" is implicit:
    /// callers simply call `tick`/`dispatch_due` again.
    pub fn dispatch_due(&mut self, now: i64) -> Due {
        if !self.enabled {
            return Due { actions: Vec::new() };
        }
        self.pop_due(now)
    }

    fn pop_due(&mut self, deadline: i64) -> Due {
        let split = self.timeline.partition_point(|a| a.fire_time <= deadline);
        let due: Vec<TimedAction> = self.timeline.drain(..split).collect();
        Due { actions: due }
    }

    /// Materializes one `ScheduledEntry` for every recurring template that
    /// doesn't already have a still-pending occurrence: either
    /// `next_event_id.is_none()`, or the referenced entry's `time_end` has
    /// already passed (the prior occurrence fired and nothing ever cleared
    /// the pointer). Inserts the fresh entry into `store` and this
    /// timeline. Templates whose `next_occurrence` finds no matching
    /// weekday within the next week are left untouched. Mirrors
    /// `dvb_recorder_add_timed_event`'s one-event-ahead recurring
    /// expansion.
    pub fn materialize_recurring(&mut self, store: &dyn RecurringStore, now: chrono::DateTime<chrono::Local>) {
        for recurring in store.recurring_entries() {
            let has_pending = match recurring.next_event_id {
                None => false,
                Some(event_id) => match store.scheduled_entry(event_id) {
                    Some(entry) => entry.time_end > now.timestamp(),
                    None => false,
                },
            };
            if has_pending {
                continue;
            }
            let (time_start, time_end) = recurring.next_occurrence(now);
            if time_start == 0 && time_end == 0 {
                continue;
            }
            match store.schedule_add(recurring.channel_id, time_start, time_end, Some(recurring.id)) {
                Ok(event_id) => {
                    if let Err(e) = store.recurring_set_next_event_id(recurring.id, Some(event_id)) {
                        warn!("failed to record materialized occurrence for recurring schedule {}: {e}", recurring.id);
                        continue;
                    }
                    self.add_entry(&ScheduledEntry {
                        id: event_id,
                        channel_id: recurring.channel_id,
                        time_start,
                        time_end,
                        status: ScheduledEventStatus::Unknown,
                        recurring_parent: Some(recurring.id),
                    });
                }
                Err(e) => warn!("failed to materialize recurring schedule {}: {e}", recurring.id),
            }
        }
    }

    /// Conflict count: the number of already-scheduled entries whose
    /// `[time_start, time_end)` interval intersects `[time_start, time_end)`.
    pub fn conflict_count(existing: &[ScheduledEntry], time_start: i64, time_end: i64) -> usize {
        existing
            .iter()
            .filter(|e| intervals_intersect(e.time_start, e.time_end, time_start, time_end))
            .count()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn intervals_intersect(a_start: i64, a_end: i64, b_start: i64, b_end: i64) -> bool {
    a_start < b_end && b_start < a_end
}

impl PartialOrd for TimedAction {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.fire_time.cmp(&other.fire_time))
    }
}

impl Ord for TimedAction {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.fire_time.cmp(&other.fire_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u32, start: i64, end: i64) -> ScheduledEntry {
        ScheduledEntry {
            id,
            channel_id: 1,
            time_start: start,
            time_end: end,
            status: ScheduledEventStatus::Unknown,
            recurring_parent: None,
        }
    }

    #[test]
    fn add_entry_expands_to_three_actions_in_fire_time_order() {
        let mut scheduler = Scheduler::new();
        scheduler.enabled = true;
        scheduler.add_entry(&entry(1, 1_000, 2_000));
        assert_eq!(scheduler.timeline.len(), 3);
        assert_eq!(scheduler.timeline[0].kind, TimedActionKind::TuneIn);
        assert_eq!(scheduler.timeline[0].fire_time, 940);
        assert_eq!(scheduler.timeline[1].kind, TimedActionKind::RecordStart);
        assert_eq!(scheduler.timeline[2].kind, TimedActionKind::RecordStop);
    }

    #[test]
    fn tick_only_dispatches_within_horizon() {
        let mut scheduler = Scheduler::new();
        scheduler.enabled = true;
        scheduler.add_entry(&entry(1, 1_000, 2_000));
        let due = scheduler.tick(900); // 940 is within 30s of 900+30=930? no: 940>930
        assert!(due.actions.is_empty());
        let due = scheduler.tick(915); // 915+30=945 >= 940
        assert_eq!(due.actions.len(), 1);
        assert_eq!(scheduler.timeline.len(), 2);
    }

    #[test]
    fn disable_clears_timeline_and_stops_dispatch() {
        let mut scheduler = Scheduler::new();
        scheduler.enabled = true;
        scheduler.add_entry(&entry(1, 1_000, 2_000));
        scheduler.disable();
        assert!(scheduler.timeline.is_empty());
        assert!(scheduler.tick(10_000).actions.is_empty());
    }

    #[test]
    fn remove_group_drops_all_three_actions() {
        let mut scheduler = Scheduler::new();
        scheduler.enabled = true;
        scheduler.add_entry(&entry(1, 1_000, 2_000));
        scheduler.add_entry(&entry(2, 3_000, 4_000));
        scheduler.remove_group(1);
        assert_eq!(scheduler.timeline.len(), 3);
        assert!(scheduler.timeline.iter().all(|a| a.group_id == 2));
    }

    #[test]
    fn conflict_count_detects_overlap() {
        let existing = vec![entry(1, 1_000, 2_000)];
        assert_eq!(Scheduler::conflict_count(&existing, 1_500, 2_500), 1);
        assert_eq!(Scheduler::conflict_count(&existing, 2_000, 3_000), 0);
        assert_eq!(Scheduler::conflict_count(&existing, 500, 1_000), 0);
    }

    struct FakeRecurringStore {
        templates: std::sync::Mutex<Vec<RecurringSchedule>>,
        entries: std::sync::Mutex<Vec<ScheduledEntry>>,
        next_id: std::sync::atomic::AtomicU32,
    }

    impl FakeRecurringStore {
        fn new(templates: Vec<RecurringSchedule>) -> Self {
            FakeRecurringStore {
                templates: std::sync::Mutex::new(templates),
                entries: std::sync::Mutex::new(Vec::new()),
                next_id: std::sync::atomic::AtomicU32::new(1),
            }
        }
    }

    impl RecurringStore for FakeRecurringStore {
        fn recurring_entries(&self) -> Vec<RecurringSchedule> {
            self.templates.lock().unwrap().clone()
        }

        fn schedule_add(&self, channel_id: u32, time_start: i64, time_end: i64, recurring_parent: Option<u32>) -> Result<u32, crate::error::DbError> {
            let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.entries.lock().unwrap().push(ScheduledEntry {
                id,
                channel_id,
                time_start,
                time_end,
                status: ScheduledEventStatus::Unknown,
                recurring_parent,
            });
            Ok(id)
        }

        fn recurring_set_next_event_id(&self, recurring_id: u32, event_id: Option<u32>) -> Result<(), crate::error::DbError> {
            let mut templates = self.templates.lock().unwrap();
            if let Some(t) = templates.iter_mut().find(|t| t.id == recurring_id) {
                t.next_event_id = event_id;
            }
            Ok(())
        }

        fn scheduled_entry(&self, id: u32) -> Option<ScheduledEntry> {
            self.entries.lock().unwrap().iter().find(|e| e.id == id).cloned()
        }
    }

    #[test]
    fn materialize_recurring_skips_templates_with_a_pending_occurrence() {
        let store = FakeRecurringStore::new(vec![RecurringSchedule {
            id: 1,
            channel_id: 7,
            weekday_mask: WeekdayMask::EVERYDAY,
            start_time_of_day: 0,
            duration_secs: 3_600,
            next_event_id: Some(99),
        }]);
        let now = chrono::Local.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        store.entries.lock().unwrap().push(ScheduledEntry {
            id: 99,
            channel_id: 7,
            time_start: now.timestamp() + 3_600,
            time_end: now.timestamp() + 7_200,
            status: ScheduledEventStatus::Unknown,
            recurring_parent: Some(1),
        });

        let mut scheduler = Scheduler::new();
        scheduler.enabled = true;
        scheduler.materialize_recurring(&store, now);

        assert!(scheduler.timeline.is_empty());
        assert_eq!(store.templates.lock().unwrap()[0].next_event_id, Some(99));
    }

    #[test]
    fn materialize_recurring_fills_in_a_missing_occurrence() {
        let store = FakeRecurringStore::new(vec![RecurringSchedule {
            id: 1,
            channel_id: 7,
            weekday_mask: WeekdayMask::EVERYDAY,
            start_time_of_day: 0,
            duration_secs: 3_600,
            next_event_id: None,
        }]);

        let mut scheduler = Scheduler::new();
        scheduler.enabled = true;
        let now = chrono::Local.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        scheduler.materialize_recurring(&store, now);

        assert_eq!(scheduler.timeline.len(), 3);
        assert!(store.templates.lock().unwrap()[0].next_event_id.is_some());
    }

    #[test]
    fn materialize_recurring_fires_a_second_occurrence_once_the_first_has_ended() {
        let store = FakeRecurringStore::new(vec![RecurringSchedule {
            id: 1,
            channel_id: 7,
            weekday_mask: WeekdayMask::EVERYDAY,
            start_time_of_day: 0,
            duration_secs: 3_600,
            next_event_id: None,
        }]);

        let mut scheduler = Scheduler::new();
        scheduler.enabled = true;
        let now = chrono::Local.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        scheduler.materialize_recurring(&store, now);

        let first_event_id = store.templates.lock().unwrap()[0].next_event_id.expect("first occurrence materialized");
        let first_entry = store.scheduled_entry(first_event_id).expect("first entry persisted");

        // Nothing clears `next_event_id` on completion; a call before
        // `time_end` has passed must still treat it as pending.
        let before_end = chrono::Local.timestamp_opt(first_entry.time_end - 1, 0).unwrap();
        scheduler.materialize_recurring(&store, before_end);
        assert_eq!(store.templates.lock().unwrap()[0].next_event_id, Some(first_event_id));

        // Once its `time_end` has passed, the template is due for a fresh
        // occurrence even though `next_event_id` was never cleared.
        let after_end = chrono::Local.timestamp_opt(first_entry.time_end + 1, 0).unwrap();
        scheduler.materialize_recurring(&store, after_end);

        let second_event_id = store.templates.lock().unwrap()[0].next_event_id.expect("second occurrence materialized");
        assert_ne!(second_event_id, first_event_id);
    }
}
