//! [`SqliteStore`]: the SQLite implementation of [`GateStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore as _};
use rusqlite::{OptionalExtension as _, types::Value};
use tracing::debug;
use uuid::Uuid;

use gatehouse_core::{
  access_log::{AccessLogEntry, NewAccessLogEntry},
  alert::{AlertEvent, AlertId, AlertStatus, NewAlert},
  session::Session,
  store::{AlertQuery, GateStore, NewUser},
  subject::{NewStaffMember, ResidentAccessSubject, StaffId, StaffMember, TenantId, UserId},
  visit::{NewVisitor, Visit, VisitAction, VisitId, VisitKind, VisitStatus, VisitTransition},
};

use crate::{
  Error, Result,
  encode::{
    ACCESS_LOG_COLUMNS, ALERT_COLUMNS, RawAccessLog, RawAlert, RawSession, RawStaff, RawUser,
    RawVisit, STAFF_COLUMNS, USER_COLUMNS, VISIT_COLUMNS, encode_dt, sql_in_list,
  },
  schema::SCHEMA,
};

/// How many fresh codes to try before giving up on a registration.
const CODE_ATTEMPTS: usize = 8;

const DEFAULT_ALERT_LIMIT: usize = 100;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A gatehouse store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Eight uppercase hex characters. Never all-digit six characters, so it
/// cannot collide with a staff code.
fn visitor_code() -> String {
  Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

/// Six decimal digits.
fn staff_code() -> String { format!("{:06}", OsRng.next_u32() % 1_000_000) }

fn is_unique_violation(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(err, _)
      if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
  )
}

fn select_visit(conn: &rusqlite::Connection, id: VisitId) -> rusqlite::Result<Option<RawVisit>> {
  conn
    .query_row(
      &format!("SELECT {VISIT_COLUMNS} FROM visits WHERE id = ?1"),
      rusqlite::params![id],
      RawVisit::from_row,
    )
    .optional()
}

fn select_alert(conn: &rusqlite::Connection, id: AlertId) -> rusqlite::Result<Option<RawAlert>> {
  conn
    .query_row(
      &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"),
      rusqlite::params![id],
      RawAlert::from_row,
    )
    .optional()
}

fn decode_visit(raw: Option<RawVisit>) -> Result<Option<Visit>> {
  raw.map(RawVisit::into_visit).transpose()
}

/// Read back a row that was just written on the same connection.
fn written<T>((id, raw): (i64, Option<T>), table: &'static str) -> Result<T> {
  raw.ok_or(Error::MissingAfterWrite { table, id })
}

// ─── GateStore impl ──────────────────────────────────────────────────────────

impl GateStore for SqliteStore {
  type Error = Error;

  // ── Sessions and users ──────────────────────────────────────────────────

  async fn find_session(&self, token_digest: String) -> Result<Option<Session>> {
    let raw: Option<RawSession> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT user_id, tenant_id, role, expires_at FROM sessions WHERE token_digest = ?1",
              rusqlite::params![token_digest],
              |row| {
                Ok(RawSession {
                  user_id:    row.get(0)?,
                  tenant_id:  row.get(1)?,
                  role:       row.get(2)?,
                  expires_at: row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSession::into_session).transpose()
  }

  async fn insert_session(&self, token_digest: String, session: Session) -> Result<()> {
    let role = session.role.as_ref().to_owned();
    let expires_at = session.expires_at.map(encode_dt);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO sessions (token_digest, user_id, tenant_id, role, expires_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![token_digest, session.user_id, session.tenant_id, role, expires_at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn insert_user(&self, tenant_id: TenantId, user: NewUser) -> Result<ResidentAccessSubject> {
    let role = user.role.as_ref().to_owned();
    let now = encode_dt(Utc::now());
    let full_name = user.full_name.clone();
    let house_address = user.house_address.clone();

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (tenant_id, full_name, role, house_address, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![tenant_id, full_name, role, house_address, now],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(ResidentAccessSubject {
      id,
      full_name: user.full_name,
      role: user.role,
      house_address: user.house_address,
      tenant_id,
    })
  }

  async fn get_user(&self, id: UserId) -> Result<Option<ResidentAccessSubject>> {
    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
              rusqlite::params![id],
              RawUser::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawUser::into_user).transpose()
  }

  async fn set_push_token(&self, user_id: UserId, push_token: Option<String>) -> Result<bool> {
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE users SET push_token = ?1 WHERE id = ?2",
          rusqlite::params![push_token, user_id],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  // ── Visits ──────────────────────────────────────────────────────────────

  async fn register_visitor(
    &self,
    tenant_id: TenantId,
    host_id: UserId,
    visitor: NewVisitor,
  ) -> Result<Visit> {
    let now = encode_dt(Utc::now());
    let expected_arrival = visitor.expected_arrival.map(encode_dt);
    let valid_until = visitor.valid_until.map(encode_dt);
    let visitor_type = visitor.visitor_type.as_ref().to_owned();
    let kind = VisitKind::Visitor.as_ref().to_owned();
    // A pass announced ahead of time is awaited; a walk-up is not.
    let status = if visitor.expected_arrival.is_some() {
      VisitStatus::Expected
    } else {
      VisitStatus::Pending
    };
    let status = status.as_ref().to_owned();

    let raw = self
      .conn
      .call(move |conn| {
        for _ in 0..CODE_ATTEMPTS {
          let code = visitor_code();
          let inserted = conn.execute(
            "INSERT INTO visits (
               tenant_id, subject_kind, status, expected_arrival, valid_until,
               allowed_items_out, full_name, phone_number, vehicle_number, purpose,
               visitor_type, host_id, access_code, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            rusqlite::params![
              tenant_id,
              kind,
              status,
              expected_arrival,
              valid_until,
              visitor.allowed_items_out,
              visitor.full_name,
              visitor.phone_number,
              visitor.vehicle_number,
              visitor.purpose,
              visitor_type,
              host_id,
              code,
              now,
            ],
          );
          match inserted {
            Ok(_) => {
              let id = conn.last_insert_rowid();
              return Ok(Some((id, select_visit(conn, id)?)));
            }
            Err(e) if is_unique_violation(&e) => continue,
            Err(e) => return Err(e.into()),
          }
        }
        Ok(None)
      })
      .await?;

    let raw = raw.ok_or(Error::CodeSpaceExhausted(CODE_ATTEMPTS))?;
    let visit = written(raw, "visits")?.into_visit()?;
    debug!(tenant_id, visit_id = visit.id, "visitor registered");
    Ok(visit)
  }

  async fn get_visit(&self, id: VisitId) -> Result<Option<Visit>> {
    let raw = self.conn.call(move |conn| Ok(select_visit(conn, id)?)).await?;
    decode_visit(raw)
  }

  async fn find_visit_by_code(&self, code: String) -> Result<Option<Visit>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {VISIT_COLUMNS} FROM visits
                 WHERE subject_kind = 'visitor' AND access_code = upper(?1)"
              ),
              rusqlite::params![code],
              RawVisit::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    decode_visit(raw)
  }

  async fn transition_visit(
    &self,
    tenant_id: TenantId,
    id: VisitId,
    change: VisitTransition,
  ) -> Result<Option<Visit>> {
    let action = change.action;
    let (set_extra, takes_items) = match action {
      VisitAction::CheckIn => (", check_in_time = ?4, items_carried_in = ?5", true),
      VisitAction::CheckOut => (", check_out_time = ?4, items_carried_out = ?5", true),
      VisitAction::Deny => ("", false),
    };
    let deadline = if action.respects_deadline() {
      " AND (valid_until IS NULL OR valid_until > ?4)"
    } else {
      ""
    };
    let sql = format!(
      "UPDATE visits SET status = ?1{set_extra}
       WHERE id = ?2 AND tenant_id = ?3 AND subject_kind = '{kind}'
         AND status IN ({sources}){deadline}",
      kind = change.kind.as_ref(),
      sources = sql_in_list(action.sources()),
    );

    let mut params = vec![
      Value::Text(action.target().as_ref().to_owned()),
      Value::Integer(id),
      Value::Integer(tenant_id),
      Value::Text(encode_dt(change.at)),
    ];
    if takes_items {
      params.push(change.items.map_or(Value::Null, Value::Text));
    }

    let raw = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(&sql, rusqlite::params_from_iter(params))?;
        if changed == 0 {
          return Ok(None);
        }
        Ok(select_visit(conn, id)?)
      })
      .await?;

    decode_visit(raw)
  }

  async fn expire_visit(&self, id: VisitId, at: DateTime<Utc>) -> Result<bool> {
    let at = encode_dt(at);
    let sql = format!(
      "UPDATE visits SET status = 'expired'
       WHERE id = ?1 AND status IN ({}) AND valid_until IS NOT NULL AND valid_until <= ?2",
      sql_in_list(&[VisitStatus::Pending, VisitStatus::Expected]),
    );

    let changed = self
      .conn
      .call(move |conn| Ok(conn.execute(&sql, rusqlite::params![id, at])?))
      .await?;
    Ok(changed > 0)
  }

  // ── Staff ───────────────────────────────────────────────────────────────

  async fn insert_staff(&self, tenant_id: TenantId, staff: NewStaffMember) -> Result<StaffMember> {
    let now = encode_dt(Utc::now());
    let staff_type = staff.staff_type.as_ref().to_owned();
    let status = staff.status.as_ref().to_owned();

    let raw = self
      .conn
      .call(move |conn| {
        for _ in 0..CODE_ATTEMPTS {
          let inserted = conn.execute(
            "INSERT INTO staff (
               tenant_id, full_name, phone_number, staff_type, status,
               access_code, employer_id, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
              tenant_id,
              staff.full_name,
              staff.phone_number,
              staff_type,
              status,
              staff_code(),
              staff.employer_id,
              now,
            ],
          );
          match inserted {
            Ok(_) => {
              let raw = conn.query_row(
                &format!("SELECT {STAFF_COLUMNS} FROM staff WHERE id = ?1"),
                rusqlite::params![conn.last_insert_rowid()],
                RawStaff::from_row,
              )?;
              return Ok(Some(raw));
            }
            Err(e) if is_unique_violation(&e) => continue,
            Err(e) => return Err(e.into()),
          }
        }
        Ok(None)
      })
      .await?;

    raw.ok_or(Error::CodeSpaceExhausted(CODE_ATTEMPTS))?.into_staff()
  }

  async fn get_staff(&self, id: StaffId) -> Result<Option<StaffMember>> {
    let raw: Option<RawStaff> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {STAFF_COLUMNS} FROM staff WHERE id = ?1"),
              rusqlite::params![id],
              RawStaff::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawStaff::into_staff).transpose()
  }

  async fn find_staff_by_code(&self, code: String) -> Result<Option<StaffMember>> {
    let raw: Option<RawStaff> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {STAFF_COLUMNS} FROM staff WHERE access_code = ?1"),
              rusqlite::params![code],
              RawStaff::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawStaff::into_staff).transpose()
  }

  async fn begin_shift(
    &self,
    tenant_id: TenantId,
    staff_id: StaffId,
    at: DateTime<Utc>,
    items_in: Option<String>,
  ) -> Result<Option<Visit>> {
    let at = encode_dt(at);

    let raw = self
      .conn
      .call(move |conn| {
        let inserted = conn.execute(
          "INSERT INTO visits (
             tenant_id, subject_kind, staff_id, status, check_in_time, items_carried_in, created_at
           )
           SELECT ?1, 'staff', ?2, 'checked_in', ?3, ?4, ?3
           WHERE NOT EXISTS (
             SELECT 1 FROM visits
             WHERE subject_kind = 'staff' AND staff_id = ?2 AND status = 'checked_in'
           )",
          rusqlite::params![tenant_id, staff_id, at, items_in],
        );
        match inserted {
          Ok(0) => Ok(None),
          Ok(_) => Ok(select_visit(conn, conn.last_insert_rowid())?),
          Err(e) if is_unique_violation(&e) => Ok(None),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    decode_visit(raw)
  }

  async fn open_shift(&self, staff_id: StaffId) -> Result<Option<Visit>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {VISIT_COLUMNS} FROM visits
                 WHERE subject_kind = 'staff' AND staff_id = ?1 AND status = 'checked_in'"
              ),
              rusqlite::params![staff_id],
              RawVisit::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    decode_visit(raw)
  }

  // ── Access logs (append-only) ───────────────────────────────────────────

  async fn append_access_log(&self, entry: NewAccessLogEntry) -> Result<AccessLogEntry> {
    let direction = entry.direction.as_ref().to_owned();
    let method = entry.method.as_ref().to_owned();
    let now = encode_dt(Utc::now());

    let raw = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO access_logs (tenant_id, user_id, direction, method, guard_id, timestamp)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            entry.tenant_id,
            entry.subject_id,
            direction,
            method,
            entry.guard_id,
            now,
          ],
        )?;
        Ok(conn.query_row(
          &format!("SELECT {ACCESS_LOG_COLUMNS} FROM access_logs WHERE id = ?1"),
          rusqlite::params![conn.last_insert_rowid()],
          RawAccessLog::from_row,
        )?)
      })
      .await?;

    raw.into_entry()
  }

  async fn list_access_logs(
    &self,
    tenant_id: TenantId,
    user_id: UserId,
    limit: usize,
  ) -> Result<Vec<AccessLogEntry>> {
    let limit = limit as i64;

    let raws: Vec<RawAccessLog> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ACCESS_LOG_COLUMNS} FROM access_logs
           WHERE tenant_id = ?1 AND user_id = ?2
           ORDER BY timestamp DESC, id DESC
           LIMIT ?3"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![tenant_id, user_id, limit], RawAccessLog::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAccessLog::into_entry).collect()
  }

  // ── Alerts ──────────────────────────────────────────────────────────────

  async fn insert_alert(&self, alert: NewAlert) -> Result<AlertEvent> {
    let priority = alert.priority.as_ref().to_owned();
    let status = AlertStatus::Open.as_ref().to_owned();
    let now = encode_dt(Utc::now());

    let raw = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO alerts (
             tenant_id, reporter_id, reporter_name, title, location,
             description, priority, status, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            alert.tenant_id,
            alert.reporter_id,
            alert.reporter_name,
            alert.title,
            alert.location,
            alert.description,
            priority,
            status,
            now,
          ],
        )?;
        let id = conn.last_insert_rowid();
        Ok((id, select_alert(conn, id)?))
      })
      .await?;

    written(raw, "alerts")?.into_alert()
  }

  async fn get_alert(&self, id: AlertId) -> Result<Option<AlertEvent>> {
    let raw = self.conn.call(move |conn| Ok(select_alert(conn, id)?)).await?;
    raw.map(RawAlert::into_alert).transpose()
  }

  async fn latest_open_alert(
    &self,
    tenant_id: TenantId,
    reporter_id: UserId,
    since: DateTime<Utc>,
  ) -> Result<Option<AlertEvent>> {
    let since = encode_dt(since);

    let raw: Option<RawAlert> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {ALERT_COLUMNS} FROM alerts
                 WHERE tenant_id = ?1 AND reporter_id = ?2 AND status = 'open'
                   AND created_at >= ?3
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1"
              ),
              rusqlite::params![tenant_id, reporter_id, since],
              RawAlert::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAlert::into_alert).transpose()
  }

  async fn list_alerts(&self, query: AlertQuery) -> Result<Vec<AlertEvent>> {
    let mut conds = vec!["tenant_id = ?"];
    let mut params = vec![Value::Integer(query.tenant_id)];
    if let Some(status) = query.status {
      conds.push("status = ?");
      params.push(Value::Text(status.as_ref().to_owned()));
    }
    if let Some(reporter_id) = query.reporter_id {
      conds.push("reporter_id = ?");
      params.push(Value::Integer(reporter_id));
    }
    // The open list feeds the client poll, so it is never cut short unless
    // the caller asks. SQLite reads a negative LIMIT as no limit.
    let limit = match (query.limit, query.status) {
      (Some(limit), _) => limit as i64,
      (None, Some(AlertStatus::Open)) => -1,
      (None, _) => DEFAULT_ALERT_LIMIT as i64,
    };
    params.push(Value::Integer(limit));

    let sql = format!(
      "SELECT {ALERT_COLUMNS} FROM alerts
       WHERE {}
       ORDER BY created_at DESC, id DESC
       LIMIT ?",
      conds.join(" AND "),
    );

    let raws: Vec<RawAlert> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawAlert::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAlert::into_alert).collect()
  }

  async fn set_alert_status(
    &self,
    tenant_id: TenantId,
    id: AlertId,
    to: AlertStatus,
    at: DateTime<Utc>,
  ) -> Result<Option<AlertEvent>> {
    if to.sources().is_empty() {
      return Ok(None);
    }
    let sql = format!(
      "UPDATE alerts SET status = ?1, updated_at = ?2
       WHERE id = ?3 AND tenant_id = ?4 AND status IN ({})",
      sql_in_list(to.sources()),
    );
    let status = to.as_ref().to_owned();
    let at = encode_dt(at);

    let raw = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(&sql, rusqlite::params![status, at, id, tenant_id])?;
        if changed == 0 {
          return Ok(None);
        }
        Ok(select_alert(conn, id)?)
      })
      .await?;

    raw.map(RawAlert::into_alert).transpose()
  }
}
