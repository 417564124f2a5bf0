//! Database schema definitions.
//!
//! Column names are taken verbatim from spec.md §6; the table/trigger
//! structure (PRAGMA foreign_keys, `strftime('%s','now')` timestamps,
//! `IF NOT EXISTS`) follows
//! `examples/stuayu-recisdb-proxy-rs/recisdb-rs/src/database/schema.rs`.

/// SQL schema for the channel/favourites/schedule database.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS channels (
    chnl_id INTEGER PRIMARY KEY AUTOINCREMENT,
    chnl_name TEXT NOT NULL,
    chnl_freq INTEGER NOT NULL,
    chnl_parameter TEXT NOT NULL,
    chnl_signalsource TEXT,
    chnl_srate INTEGER NOT NULL,
    chnl_vpid INTEGER,
    chnl_apid INTEGER,
    chnl_tpid INTEGER,
    chnl_casid INTEGER,
    chnl_sid INTEGER NOT NULL,
    chnl_nid INTEGER NOT NULL,
    chnl_tid INTEGER NOT NULL,
    chnl_rid INTEGER,
    chnl_flags INTEGER DEFAULT 0
);

-- The "all channels" virtual list has id 0 and is never stored here.
CREATE TABLE IF NOT EXISTS favlists (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS favourites (
    chnl_id INTEGER NOT NULL,
    list_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (chnl_id, list_id),
    FOREIGN KEY (chnl_id) REFERENCES channels(chnl_id) ON DELETE CASCADE,
    FOREIGN KEY (list_id) REFERENCES favlists(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS schedule_events (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_start INTEGER NOT NULL,
    event_end INTEGER NOT NULL,
    chnl_id INTEGER NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    recurring_parent INTEGER,
    FOREIGN KEY (chnl_id) REFERENCES channels(chnl_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS schedule_recurring (
    recurrent_id INTEGER PRIMARY KEY AUTOINCREMENT,
    weekday INTEGER NOT NULL,
    time_start INTEGER NOT NULL,
    duration INTEGER NOT NULL,
    chnl_id INTEGER NOT NULL,
    next_event_id INTEGER,
    FOREIGN KEY (chnl_id) REFERENCES channels(chnl_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_favourites_list ON favourites(list_id, position);
CREATE INDEX IF NOT EXISTS idx_schedule_events_start ON schedule_events(event_start);
CREATE INDEX IF NOT EXISTS idx_schedule_events_recurring_parent ON schedule_events(recurring_parent);
"#;
