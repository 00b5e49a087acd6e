//! SQL schema for the gatehouse SQLite store.
//!
//! Executed once at connection startup. Timestamps are fixed-width RFC 3339
//! UTC strings (microsecond precision, `Z` suffix) so that SQL string
//! comparison orders them correctly.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id     INTEGER NOT NULL,
    full_name     TEXT NOT NULL,
    role          TEXT NOT NULL,     -- 'resident' | 'guard' | 'admin'
    house_address TEXT,
    push_token    TEXT,
    created_at    TEXT NOT NULL
);

-- Issued by the identity system; looked up by the SHA-256 of the token.
CREATE TABLE IF NOT EXISTS sessions (
    token_digest TEXT PRIMARY KEY,
    user_id      INTEGER NOT NULL REFERENCES users(id),
    tenant_id    INTEGER NOT NULL,
    role         TEXT NOT NULL,
    expires_at   TEXT
);

CREATE TABLE IF NOT EXISTS staff (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id    INTEGER NOT NULL,
    full_name    TEXT NOT NULL,
    phone_number TEXT NOT NULL,
    staff_type   TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'active',
    access_code  TEXT NOT NULL UNIQUE,
    employer_id  INTEGER REFERENCES users(id),
    created_at   TEXT NOT NULL
);

-- One row per visitor pass or staff shift. Visitor columns are NULL for
-- shifts; staff_id is NULL for visitor passes.
CREATE TABLE IF NOT EXISTS visits (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id         INTEGER NOT NULL,
    subject_kind      TEXT NOT NULL,     -- 'visitor' | 'staff'
    staff_id          INTEGER REFERENCES staff(id),
    status            TEXT NOT NULL,
    expected_arrival  TEXT,
    valid_until       TEXT,
    check_in_time     TEXT,
    check_out_time    TEXT,
    items_carried_in  TEXT,
    items_carried_out TEXT,
    allowed_items_out TEXT,
    full_name         TEXT,
    phone_number      TEXT,
    vehicle_number    TEXT,
    purpose           TEXT,
    visitor_type      TEXT,
    host_id           INTEGER REFERENCES users(id),
    access_code       TEXT UNIQUE,
    created_at        TEXT NOT NULL,
    CHECK (check_out_time IS NULL OR (check_in_time IS NOT NULL AND check_in_time <= check_out_time))
);

-- At most one open shift per staff member.
CREATE UNIQUE INDEX IF NOT EXISTS visits_open_shift_idx
    ON visits(staff_id) WHERE subject_kind = 'staff' AND status = 'checked_in';
CREATE INDEX IF NOT EXISTS visits_tenant_idx ON visits(tenant_id);

-- Strictly append-only. No UPDATE or DELETE is ever issued against it.
CREATE TABLE IF NOT EXISTS access_logs (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id INTEGER NOT NULL,
    user_id   INTEGER NOT NULL REFERENCES users(id),
    direction TEXT NOT NULL,       -- 'entry' | 'exit'
    method    TEXT NOT NULL,
    guard_id  INTEGER REFERENCES users(id),
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS access_logs_user_idx ON access_logs(user_id, timestamp);

CREATE TABLE IF NOT EXISTS alerts (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id     INTEGER NOT NULL,
    reporter_id   INTEGER NOT NULL REFERENCES users(id),
    reporter_name TEXT,
    title         TEXT NOT NULL,
    location      TEXT,
    description   TEXT NOT NULL,
    priority      TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'open',
    created_at    TEXT NOT NULL,
    updated_at    TEXT
);

CREATE INDEX IF NOT EXISTS alerts_tenant_status_idx ON alerts(tenant_id, status);

PRAGMA user_version = 1;
";
