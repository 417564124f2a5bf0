//! Channel/favourites/schedule database collaborator (spec §1, §6): a
//! narrow relational store behind `channel_lookup`/`upsert_channel`/
//! `for_each_in_list` plus the schedule CRUD the scheduler rebuilds its
//! timeline from.
//!
//! Grounded on
//! `examples/stuayu-recisdb-proxy-rs/recisdb-rs/src/database/{mod,channel}.rs`
//! for the `Database::open`/`open_in_memory` wrapper and the
//! prepare-a-statement/`query_map`/row-mapping-closure style; the schema
//! itself is adapted to the three tables spec.md §6 names instead of the
//! teacher's BonDriver-oriented one (see `schema.rs`).

mod schema;

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::channel::{ChannelRecord, DeliverySystem, ModulationCode, Polarisation, RollOffCode};
use crate::error::DbError;
use crate::scheduler::{ScheduleSource, ScheduledEntry, ScheduledEventStatus};

type Result<T> = std::result::Result<T, DbError>;

/// The "all channels" virtual favourites list (spec §6).
pub const ALL_CHANNELS_LIST_ID: u32 = 0;

/// SQLite-backed implementation of the channel/favourites/schedule store.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database { conn };
        db.conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database { conn };
        db.conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(db)
    }

    // ---- channels -------------------------------------------------------

    pub fn channel_lookup(&self, id: u32) -> Result<ChannelRecord> {
        self.conn
            .query_row(
                "SELECT chnl_id, chnl_name, chnl_freq, chnl_parameter, chnl_signalsource,
                        chnl_srate, chnl_vpid, chnl_apid, chnl_tpid, chnl_sid, chnl_nid, chnl_tid
                 FROM channels WHERE chnl_id = ?1",
                params![id as i64],
                Self::row_to_channel_record,
            )
            .optional()?
            .ok_or(DbError::ChannelNotFound(id))
    }

    /// Insert a new channel (`record.id == 0`, the id is assigned by
    /// autoincrement), or update one in place if `record.id` already
    /// exists.
    pub fn upsert_channel(&self, record: &ChannelRecord) -> Result<u32> {
        let parameter = encode_parameter(record);
        let row_params = params![
            record.raw_name,
            record.frequency as i64,
            parameter,
            record.signal_source,
            record.symbol_rate as i64,
            record.video_pid.map(|v| v as i32),
            record.audio_pid.map(|v| v as i32),
            record.teletext_pid.map(|v| v as i32),
            record.service_id as i32,
            record.network_id as i32,
            record.transport_id as i32,
        ];

        if record.id == 0 {
            self.conn.execute(
                "INSERT INTO channels (
                    chnl_name, chnl_freq, chnl_parameter, chnl_signalsource,
                    chnl_srate, chnl_vpid, chnl_apid, chnl_tpid, chnl_sid, chnl_nid, chnl_tid
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                row_params,
            )?;
            return Ok(self.conn.last_insert_rowid() as u32);
        }

        let updated = self.conn.execute(
            "UPDATE channels SET
                chnl_name = ?1, chnl_freq = ?2, chnl_parameter = ?3, chnl_signalsource = ?4,
                chnl_srate = ?5, chnl_vpid = ?6, chnl_apid = ?7, chnl_tpid = ?8,
                chnl_sid = ?9, chnl_nid = ?10, chnl_tid = ?11
             WHERE chnl_id = ?12",
            params![
                record.raw_name,
                record.frequency as i64,
                parameter,
                record.signal_source,
                record.symbol_rate as i64,
                record.video_pid.map(|v| v as i32),
                record.audio_pid.map(|v| v as i32),
                record.teletext_pid.map(|v| v as i32),
                record.service_id as i32,
                record.network_id as i32,
                record.transport_id as i32,
                record.id as i64,
            ],
        )?;
        if updated == 0 {
            return Err(DbError::ChannelNotFound(record.id));
        }
        Ok(record.id)
    }

    /// Iterates every channel in `list_id` (ordered by `position`), or
    /// every channel if `list_id == ALL_CHANNELS_LIST_ID`.
    pub fn for_each_in_list(&self, list_id: u32, mut visit: impl FnMut(&ChannelRecord)) -> Result<()> {
        if list_id == ALL_CHANNELS_LIST_ID {
            let mut stmt = self.conn.prepare(
                "SELECT chnl_id, chnl_name, chnl_freq, chnl_parameter, chnl_signalsource,
                        chnl_srate, chnl_vpid, chnl_apid, chnl_tpid, chnl_sid, chnl_nid, chnl_tid
                 FROM channels ORDER BY chnl_id",
            )?;
            let rows = stmt.query_map([], Self::row_to_channel_record)?;
            for row in rows {
                visit(&row?);
            }
            return Ok(());
        }

        let mut stmt = self.conn.prepare(
            "SELECT c.chnl_id, c.chnl_name, c.chnl_freq, c.chnl_parameter, c.chnl_signalsource,
                    c.chnl_srate, c.chnl_vpid, c.chnl_apid, c.chnl_tpid, c.chnl_sid, c.chnl_nid, c.chnl_tid
             FROM channels c
             JOIN favourites f ON f.chnl_id = c.chnl_id
             WHERE f.list_id = ?1
             ORDER BY f.position",
        )?;
        let rows = stmt.query_map(params![list_id as i64], Self::row_to_channel_record)?;
        for row in rows {
            visit(&row?);
        }
        Ok(())
    }

    fn row_to_channel_record(row: &rusqlite::Row) -> rusqlite::Result<ChannelRecord> {
        let parameter: String = row.get(3)?;
        let (delivery_system, polarisation, modulation, roll_off) = decode_parameter(&parameter);
        let raw_name: String = row.get(1)?;
        let (name, provider) = split_name_provider(&raw_name);
        Ok(ChannelRecord {
            id: row.get::<_, i64>(0)? as u32,
            raw_name: raw_name.clone(),
            name,
            provider,
            frequency: row.get::<_, i64>(2)? as u32,
            symbol_rate: row.get::<_, i64>(5)? as u32,
            polarisation,
            signal_source: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            delivery_system,
            modulation,
            roll_off,
            service_id: row.get::<_, i32>(9)? as u16,
            network_id: row.get::<_, i32>(10)? as u16,
            transport_id: row.get::<_, i32>(11)? as u16,
            video_pid: row.get::<_, Option<i32>>(6)?.map(|v| v as u16),
            audio_pid: row.get::<_, Option<i32>>(7)?.map(|v| v as u16),
            teletext_pid: row.get::<_, Option<i32>>(8)?.map(|v| v as u16),
        })
    }

    // ---- schedule ---------------------------------------------------------

    pub fn schedule_add(
        &self,
        channel_id: u32,
        time_start: i64,
        time_end: i64,
        recurring_parent: Option<u32>,
    ) -> Result<u32> {
        if time_start >= time_end {
            return Err(DbError::InvalidInterval(time_start as u64, time_end as u64));
        }
        self.conn.execute(
            "INSERT INTO schedule_events (event_start, event_end, chnl_id, status, recurring_parent)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![time_start, time_end, channel_id as i64, recurring_parent.map(|v| v as i64)],
        )?;
        Ok(self.conn.last_insert_rowid() as u32)
    }

    // ---- recurring schedules --------------------------------------------

    /// Inserts a new recurring template, `next_event_id` starting unset.
    pub fn recurring_add(
        &self,
        channel_id: u32,
        weekday_mask: crate::scheduler::WeekdayMask,
        start_time_of_day: u32,
        duration_secs: u32,
    ) -> Result<u32> {
        self.conn.execute(
            "INSERT INTO schedule_recurring (weekday, time_start, duration, chnl_id, next_event_id)
             VALUES (?1, ?2, ?3, ?4, NULL)",
            params![weekday_mask.bits() as i64, start_time_of_day as i64, duration_secs as i64, channel_id as i64],
        )?;
        Ok(self.conn.last_insert_rowid() as u32)
    }

    pub fn recurring_remove(&self, recurring_id: u32) -> Result<()> {
        self.conn.execute("DELETE FROM schedule_recurring WHERE recurrent_id = ?1", params![recurring_id as i64])?;
        Ok(())
    }

    fn row_to_recurring_schedule(row: &rusqlite::Row) -> rusqlite::Result<crate::scheduler::RecurringSchedule> {
        let weekday_bits: i64 = row.get(1)?;
        Ok(crate::scheduler::RecurringSchedule {
            id: row.get::<_, i64>(0)? as u32,
            channel_id: row.get::<_, i64>(4)? as u32,
            weekday_mask: crate::scheduler::WeekdayMask::from_bits_truncate(weekday_bits as u8),
            start_time_of_day: row.get::<_, i64>(2)? as u32,
            duration_secs: row.get::<_, i64>(3)? as u32,
            next_event_id: row.get::<_, Option<i64>>(5)?.map(|v| v as u32),
        })
    }

    pub fn schedule_remove(&self, event_id: u32) -> Result<()> {
        self.conn.execute("DELETE FROM schedule_events WHERE event_id = ?1", params![event_id as i64])?;
        Ok(())
    }

    pub fn schedule_set_status(&self, event_id: u32, status: ScheduledEventStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE schedule_events SET status = ?2 WHERE event_id = ?1",
            params![event_id as i64, status_to_code(status)],
        )?;
        Ok(())
    }

    /// All schedule entries whose interval intersects `[time_start, time_end)`.
    pub fn schedule_conflicts(&self, time_start: i64, time_end: i64) -> Result<usize> {
        let mut stmt = self.conn.prepare(
            "SELECT COUNT(*) FROM schedule_events WHERE event_start < ?2 AND ?1 < event_end",
        )?;
        let count: i64 = stmt.query_row(params![time_start, time_end], |r| r.get(0))?;
        Ok(count as usize)
    }

    fn row_to_scheduled_entry(row: &rusqlite::Row) -> rusqlite::Result<ScheduledEntry> {
        let status_code: i64 = row.get(3)?;
        Ok(ScheduledEntry {
            id: row.get::<_, i64>(0)? as u32,
            time_start: row.get(1)?,
            time_end: row.get(2)?,
            status: code_to_status(status_code),
            channel_id: row.get::<_, i64>(4)? as u32,
            recurring_parent: row.get::<_, Option<i64>>(5)?.map(|v| v as u32),
        })
    }
}

impl ScheduleSource for Database {
    fn upcoming(&self, now: i64) -> Vec<ScheduledEntry> {
        let mut stmt = match self.conn.prepare(
            "SELECT event_id, event_start, event_end, status, chnl_id, recurring_parent
             FROM schedule_events WHERE event_start > ?1 ORDER BY event_start",
        ) {
            Ok(stmt) => stmt,
            Err(_) => return Vec::new(),
        };
        stmt.query_map(params![now], Self::row_to_scheduled_entry)
            .map(|rows| rows.filter_map(std::result::Result::ok).collect())
            .unwrap_or_default()
    }
}

impl crate::scheduler::RecurringStore for Database {
    fn recurring_entries(&self) -> Vec<crate::scheduler::RecurringSchedule> {
        let mut stmt = match self.conn.prepare(
            "SELECT recurrent_id, weekday, time_start, duration, chnl_id, next_event_id FROM schedule_recurring",
        ) {
            Ok(stmt) => stmt,
            Err(_) => return Vec::new(),
        };
        stmt.query_map([], Self::row_to_recurring_schedule)
            .map(|rows| rows.filter_map(std::result::Result::ok).collect())
            .unwrap_or_default()
    }

    fn schedule_add(&self, channel_id: u32, time_start: i64, time_end: i64, recurring_parent: Option<u32>) -> std::result::Result<u32, DbError> {
        Database::schedule_add(self, channel_id, time_start, time_end, recurring_parent)
    }

    fn recurring_set_next_event_id(&self, recurring_id: u32, event_id: Option<u32>) -> std::result::Result<(), DbError> {
        self.conn.execute(
            "UPDATE schedule_recurring SET next_event_id = ?2 WHERE recurrent_id = ?1",
            params![recurring_id as i64, event_id.map(|v| v as i64)],
        )?;
        Ok(())
    }

    fn scheduled_entry(&self, id: u32) -> Option<ScheduledEntry> {
        self.conn
            .query_row(
                "SELECT event_id, event_start, event_end, status, chnl_id, recurring_parent
                 FROM schedule_events WHERE event_id = ?1",
                params![id as i64],
                Self::row_to_scheduled_entry,
            )
            .ok()
    }
}

fn status_to_code(status: ScheduledEventStatus) -> i64 {
    match status {
        ScheduledEventStatus::Unknown => 0,
        ScheduledEventStatus::InPreparation => 1,
        ScheduledEventStatus::Recording => 2,
        ScheduledEventStatus::Cancelled => 3,
        ScheduledEventStatus::Done => 4,
    }
}

fn code_to_status(code: i64) -> ScheduledEventStatus {
    match code {
        1 => ScheduledEventStatus::InPreparation,
        2 => ScheduledEventStatus::Recording,
        3 => ScheduledEventStatus::Cancelled,
        4 => ScheduledEventStatus::Done,
        _ => ScheduledEventStatus::Unknown,
    }
}

/// `chnl_parameter` packs delivery system, polarisation, modulation and
/// roll-off into one short string (`"<sys>:<pol>:<mod>:<rolloff>"`), the
/// same role the original's VDR-style parameter string plays, simplified
/// to this crate's own closed enum set rather than the full VDR grammar
/// (see DESIGN.md).
fn encode_parameter(record: &ChannelRecord) -> String {
    let sys = match record.delivery_system {
        DeliverySystem::DvbS => "S",
        DeliverySystem::DvbS2 => "S2",
    };
    let pol = match record.polarisation {
        Polarisation::Horizontal => "H",
        Polarisation::Vertical => "V",
        Polarisation::Left => "L",
        Polarisation::Right => "R",
    };
    let modulation = match record.modulation {
        ModulationCode::Qpsk => 2,
        ModulationCode::Psk8 => 5,
        ModulationCode::Apsk16 => 6,
        ModulationCode::Apsk32 => 7,
    };
    let rolloff = match record.roll_off {
        RollOffCode::R20 => 20,
        RollOffCode::R25 => 25,
        RollOffCode::R35 => 35,
        RollOffCode::Auto => 0,
    };
    format!("{sys}:{pol}:{modulation}:{rolloff}")
}

fn decode_parameter(raw: &str) -> (DeliverySystem, Polarisation, ModulationCode, RollOffCode) {
    let mut fields = raw.split(':');
    let sys = match fields.next() {
        Some("S2") => DeliverySystem::DvbS2,
        _ => DeliverySystem::DvbS,
    };
    let pol = match fields.next() {
        Some("V") => Polarisation::Vertical,
        Some("L") => Polarisation::Left,
        Some("R") => Polarisation::Right,
        _ => Polarisation::Horizontal,
    };
    let modulation = fields.next().and_then(|v| v.parse().ok()).map(ModulationCode::from_db_code).unwrap_or(ModulationCode::Qpsk);
    let rolloff = fields.next().and_then(|v| v.parse().ok()).map(RollOffCode::from_db_code).unwrap_or(RollOffCode::R35);
    (sys, pol, modulation, rolloff)
}

/// `raw_name` is the un-split service name as received in the SDT; this
/// crate's convention (matching `ChannelRecord`'s parsed `name`/`provider`
/// pair) splits on the first `;` if present, else leaves `provider` empty.
fn split_name_provider(raw_name: &str) -> (String, String) {
    match raw_name.split_once(';') {
        Some((name, provider)) => (name.to_string(), provider.to_string()),
        None => (raw_name.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::normalize_khz;

    fn sample_channel(id: u32) -> ChannelRecord {
        ChannelRecord {
            id,
            raw_name: "Example One;Example Provider".to_string(),
            name: "Example One".to_string(),
            provider: "Example Provider".to_string(),
            frequency: normalize_khz(12_500),
            symbol_rate: normalize_khz(27_500),
            polarisation: Polarisation::Horizontal,
            signal_source: "S19E2".to_string(),
            delivery_system: DeliverySystem::DvbS2,
            modulation: ModulationCode::Psk8,
            roll_off: RollOffCode::R20,
            service_id: 101,
            network_id: 1,
            transport_id: 7,
            video_pid: Some(256),
            audio_pid: Some(257),
            teletext_pid: None,
        }
    }

    #[test]
    fn upsert_then_lookup_round_trips_parameter_fields() {
        let db = Database::open_in_memory().unwrap();
        let id = db.upsert_channel(&sample_channel(0)).unwrap();
        let fetched = db.channel_lookup(id).unwrap();
        assert_eq!(fetched.name, "Example One");
        assert_eq!(fetched.provider, "Example Provider");
        assert_eq!(fetched.delivery_system, DeliverySystem::DvbS2);
        assert_eq!(fetched.modulation, ModulationCode::Psk8);
        assert_eq!(fetched.roll_off, RollOffCode::R20);
        assert_eq!(fetched.polarisation, Polarisation::Horizontal);
    }

    #[test]
    fn lookup_missing_channel_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.channel_lookup(999), Err(DbError::ChannelNotFound(999))));
    }

    #[test]
    fn for_each_in_list_zero_visits_every_channel() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_channel(&sample_channel(0)).unwrap();
        db.upsert_channel(&sample_channel(0)).unwrap();
        let mut seen = 0;
        db.for_each_in_list(ALL_CHANNELS_LIST_ID, |_| seen += 1).unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn schedule_add_rejects_inverted_interval() {
        let db = Database::open_in_memory().unwrap();
        let err = db.schedule_add(1, 2_000, 1_000, None).unwrap_err();
        assert!(matches!(err, DbError::InvalidInterval(2_000, 1_000)));
    }

    #[test]
    fn schedule_conflicts_counts_overlapping_intervals() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_channel(&sample_channel(0)).unwrap();
        db.schedule_add(1, 1_000, 2_000, None).unwrap();
        assert_eq!(db.schedule_conflicts(1_500, 2_500).unwrap(), 1);
        assert_eq!(db.schedule_conflicts(2_000, 3_000).unwrap(), 0);
    }

    #[test]
    fn upcoming_only_returns_future_entries() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_channel(&sample_channel(0)).unwrap();
        db.schedule_add(1, 1_000, 2_000, None).unwrap();
        db.schedule_add(1, 500, 900, None).unwrap();
        let upcoming = db.upcoming(600);
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].time_start, 1_000);
    }

    #[test]
    fn recurring_add_is_picked_up_by_materialize_recurring() {
        use crate::scheduler::{RecurringStore, Scheduler, WeekdayMask};
        use chrono::TimeZone;

        let db = Database::open_in_memory().unwrap();
        db.upsert_channel(&sample_channel(0)).unwrap();
        db.recurring_add(1, WeekdayMask::EVERYDAY, 0, 3_600).unwrap();

        let mut scheduler = Scheduler::new();
        let now = chrono::Local.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        scheduler.materialize_recurring(&db, now);

        let recurring = RecurringStore::recurring_entries(&db);
        assert_eq!(recurring.len(), 1);
        assert!(recurring[0].next_event_id.is_some());
    }
}
