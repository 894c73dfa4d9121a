use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use deskmate_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::info;

use crate::migrations::{self, format_timestamp, parse_timestamp};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaveType {
    pub id: i64,
    pub name: String,
    pub default_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaveBalance {
    pub leave_type: String,
    pub total_days: i64,
    pub used_days: i64,
    pub pending_days: i64,
}

impl LeaveBalance {
    pub fn remaining(&self) -> i64 {
        self.total_days - self.used_days - self.pending_days
    }
}

#[derive(Debug, Clone)]
pub struct NewLeaveRequest {
    pub user_id: String,
    pub leave_type_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_days: i64,
    pub reason: String,
    /// Balance year the pending days are reserved against.
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaveRequest {
    pub id: String,
    pub leave_type: String,
    pub start_date: String,
    pub end_date: String,
    pub total_days: i64,
    pub reason: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Room {
    pub id: i64,
    pub name: String,
    pub capacity: i64,
    pub location: String,
    pub amenities: Vec<String>,
}

/// A same-day time range on one date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookingSlot {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl BookingSlot {
    pub fn start_stamp(&self) -> String {
        format!("{}T{}:00", self.date.format("%Y-%m-%d"), self.start.format("%H:%M"))
    }

    pub fn end_stamp(&self) -> String {
        format!("{}T{}:00", self.date.format("%Y-%m-%d"), self.end.format("%H:%M"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomBooking {
    pub id: String,
    pub room: String,
    pub title: String,
    pub description: String,
    pub start_time: String,
    pub end_time: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimCategory {
    pub id: i64,
    pub name: String,
    pub max_amount: Option<f64>,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct NewClaim {
    pub user_id: String,
    pub category_id: i64,
    pub amount: f64,
    pub description: String,
    pub claim_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Claim {
    pub id: String,
    pub user_id: String,
    pub category: String,
    pub amount: f64,
    pub description: String,
    pub claim_date: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicySnippet {
    pub id: i64,
    pub title: String,
    pub content: String,
}

/// Leave, room booking, expense claim and handbook records.
pub struct WorkplaceStore {
    conn: Connection,
}

impl WorkplaceStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self {
            conn: migrations::open_connection(db_path)?,
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: migrations::open_in_memory()?,
        })
    }

    // Leave

    pub fn leave_types(&self) -> Result<Vec<LeaveType>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, default_days FROM leave_types
                 WHERE is_active = 1 ORDER BY id",
            )
            .map_err(|e| Error::Database(format!("failed to prepare leave type query: {e}")))?;
        let rows = stmt
            .query_map([], row_to_leave_type)
            .map_err(|e| Error::Database(format!("failed to list leave types: {e}")))?;
        collect_rows(rows, "leave type")
    }

    /// Case-insensitive substring lookup, first match by id.
    pub fn find_leave_type(&self, query: &str) -> Result<Option<LeaveType>> {
        self.conn
            .query_row(
                "SELECT id, name, default_days FROM leave_types
                 WHERE is_active = 1 AND name LIKE '%' || ?1 || '%'
                 ORDER BY id LIMIT 1",
                params![query.trim()],
                row_to_leave_type,
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to find leave type: {e}")))
    }

    /// Balance for one type and year, created from the type's default allowance if missing.
    pub fn leave_balance(&self, user_id: &str, leave_type: &LeaveType, year: i32) -> Result<LeaveBalance> {
        ensure_balance_row(&self.conn, user_id, leave_type.id, year)?;
        self.conn
            .query_row(
                "SELECT total_days, used_days, pending_days FROM leave_balances
                 WHERE user_id = ?1 AND leave_type_id = ?2 AND year = ?3",
                params![user_id, leave_type.id, year],
                |row| {
                    Ok(LeaveBalance {
                        leave_type: leave_type.name.clone(),
                        total_days: row.get(0)?,
                        used_days: row.get(1)?,
                        pending_days: row.get(2)?,
                    })
                },
            )
            .map_err(|e| Error::Database(format!("failed to load leave balance: {e}")))
    }

    /// Insert a pending request and reserve its days against the balance.
    pub fn create_leave_request(&self, request: &NewLeaveRequest) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

        ensure_balance_row(&tx, &request.user_id, request.leave_type_id, request.year)?;
        tx.execute(
            "UPDATE leave_balances SET pending_days = pending_days + ?4
             WHERE user_id = ?1 AND leave_type_id = ?2 AND year = ?3",
            params![
                request.user_id,
                request.leave_type_id,
                request.year,
                request.total_days
            ],
        )
        .map_err(|e| Error::Database(format!("failed to reserve leave days: {e}")))?;

        tx.execute(
            "INSERT INTO leave_requests
                (id, user_id, leave_type_id, start_date, end_date, total_days, reason, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)",
            params![
                id,
                request.user_id,
                request.leave_type_id,
                request.start_date.format("%Y-%m-%d").to_string(),
                request.end_date.format("%Y-%m-%d").to_string(),
                request.total_days,
                request.reason,
                format_timestamp(Utc::now())
            ],
        )
        .map_err(|e| Error::Database(format!("failed to insert leave request: {e}")))?;

        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit leave request: {e}")))?;
        Ok(id)
    }

    /// Most recent requests first, optionally filtered by status.
    pub fn leave_requests(
        &self,
        user_id: &str,
        status: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LeaveRequest>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT r.id, t.name, r.start_date, r.end_date, r.total_days, r.reason,
                        r.status, r.created_at
                 FROM leave_requests r
                 JOIN leave_types t ON t.id = r.leave_type_id
                 WHERE r.user_id = ?1 AND (?2 IS NULL OR r.status = ?2)
                 ORDER BY r.created_at DESC, r.rowid DESC
                 LIMIT ?3",
            )
            .map_err(|e| Error::Database(format!("failed to prepare leave query: {e}")))?;
        let rows = stmt
            .query_map(params![user_id, status, limit as i64], |row| {
                let created_raw: String = row.get(7)?;
                Ok(LeaveRequest {
                    id: row.get(0)?,
                    leave_type: row.get(1)?,
                    start_date: row.get(2)?,
                    end_date: row.get(3)?,
                    total_days: row.get(4)?,
                    reason: row.get(5)?,
                    status: row.get(6)?,
                    created_at: parse_timestamp(&created_raw),
                })
            })
            .map_err(|e| Error::Database(format!("failed to list leave requests: {e}")))?;
        collect_rows(rows, "leave request")
    }

    // Rooms

    pub fn rooms(&self) -> Result<Vec<Room>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, capacity, location, amenities FROM rooms
                 WHERE is_active = 1 ORDER BY id",
            )
            .map_err(|e| Error::Database(format!("failed to prepare room query: {e}")))?;
        let rows = stmt
            .query_map([], row_to_room)
            .map_err(|e| Error::Database(format!("failed to list rooms: {e}")))?;
        collect_rows(rows, "room")
    }

    pub fn find_room(&self, query: &str) -> Result<Option<Room>> {
        self.conn
            .query_row(
                "SELECT id, name, capacity, location, amenities FROM rooms
                 WHERE is_active = 1 AND name LIKE '%' || ?1 || '%'
                 ORDER BY id LIMIT 1",
                params![query.trim()],
                row_to_room,
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to find room: {e}")))
    }

    /// Confirmed bookings of a room that overlap the slot.
    pub fn conflicting_bookings(&self, room: &Room, slot: &BookingSlot) -> Result<Vec<RoomBooking>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT b.id, r.name, b.title, b.description, b.start_time, b.end_time, b.status
                 FROM room_bookings b
                 JOIN rooms r ON r.id = b.room_id
                 WHERE b.room_id = ?1 AND b.status = 'confirmed'
                   AND NOT (?3 <= b.start_time OR ?2 >= b.end_time)
                 ORDER BY b.start_time",
            )
            .map_err(|e| Error::Database(format!("failed to prepare booking query: {e}")))?;
        let rows = stmt
            .query_map(
                params![room.id, slot.start_stamp(), slot.end_stamp()],
                row_to_booking,
            )
            .map_err(|e| Error::Database(format!("failed to check bookings: {e}")))?;
        collect_rows(rows, "booking")
    }

    pub fn create_booking(
        &self,
        user_id: &str,
        room: &Room,
        title: &str,
        description: &str,
        slot: &BookingSlot,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO room_bookings
                    (id, room_id, user_id, title, description, start_time, end_time, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'confirmed', ?8)",
                params![
                    id,
                    room.id,
                    user_id,
                    title,
                    description,
                    slot.start_stamp(),
                    slot.end_stamp(),
                    format_timestamp(Utc::now())
                ],
            )
            .map_err(|e| Error::Database(format!("failed to create booking: {e}")))?;
        Ok(id)
    }

    /// Latest bookings by start time.
    pub fn bookings_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<RoomBooking>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT b.id, r.name, b.title, b.description, b.start_time, b.end_time, b.status
                 FROM room_bookings b
                 JOIN rooms r ON r.id = b.room_id
                 WHERE b.user_id = ?1
                 ORDER BY b.start_time DESC
                 LIMIT ?2",
            )
            .map_err(|e| Error::Database(format!("failed to prepare booking query: {e}")))?;
        let rows = stmt
            .query_map(params![user_id, limit as i64], row_to_booking)
            .map_err(|e| Error::Database(format!("failed to list bookings: {e}")))?;
        collect_rows(rows, "booking")
    }

    // Claims

    pub fn claim_categories(&self) -> Result<Vec<ClaimCategory>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, max_amount, description FROM claim_categories
                 WHERE is_active = 1 ORDER BY id",
            )
            .map_err(|e| Error::Database(format!("failed to prepare category query: {e}")))?;
        let rows = stmt
            .query_map([], row_to_category)
            .map_err(|e| Error::Database(format!("failed to list categories: {e}")))?;
        collect_rows(rows, "category")
    }

    pub fn find_claim_category(&self, query: &str) -> Result<Option<ClaimCategory>> {
        self.conn
            .query_row(
                "SELECT id, name, max_amount, description FROM claim_categories
                 WHERE is_active = 1 AND name LIKE '%' || ?1 || '%'
                 ORDER BY id LIMIT 1",
                params![query.trim()],
                row_to_category,
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to find category: {e}")))
    }

    pub fn create_claim(&self, claim: &NewClaim) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO claims
                    (id, user_id, category_id, amount, description, claim_date, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
                params![
                    id,
                    claim.user_id,
                    claim.category_id,
                    claim.amount,
                    claim.description,
                    claim.claim_date.format("%Y-%m-%d").to_string(),
                    format_timestamp(claim.created_at)
                ],
            )
            .map_err(|e| Error::Database(format!("failed to create claim: {e}")))?;
        Ok(id)
    }

    pub fn claims_for_user(
        &self,
        user_id: &str,
        status: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Claim>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT c.id, c.user_id, k.name, c.amount, c.description, c.claim_date,
                        c.status, c.created_at
                 FROM claims c
                 JOIN claim_categories k ON k.id = c.category_id
                 WHERE c.user_id = ?1 AND (?2 IS NULL OR c.status = ?2)
                 ORDER BY c.created_at DESC, c.rowid DESC
                 LIMIT ?3",
            )
            .map_err(|e| Error::Database(format!("failed to prepare claim query: {e}")))?;
        let rows = stmt
            .query_map(params![user_id, status, limit as i64], row_to_claim)
            .map_err(|e| Error::Database(format!("failed to list claims: {e}")))?;
        collect_rows(rows, "claim")
    }

    pub fn set_claim_status(&self, claim_id: &str, status: &str) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE claims SET status = ?2 WHERE id = ?1",
                params![claim_id, status],
            )
            .map_err(|e| Error::Database(format!("failed to update claim: {e}")))?;
        Ok(updated > 0)
    }

    // Handbook

    pub fn policy_snippets(&self) -> Result<Vec<PolicySnippet>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, title, content FROM policy_snippets ORDER BY id")
            .map_err(|e| Error::Database(format!("failed to prepare policy query: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PolicySnippet {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    content: row.get(2)?,
                })
            })
            .map_err(|e| Error::Database(format!("failed to list policies: {e}")))?;
        collect_rows(rows, "policy")
    }

    pub fn add_policy_snippet(&self, title: &str, content: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO policy_snippets (title, content) VALUES (?1, ?2)",
                params![title, content],
            )
            .map_err(|e| Error::Database(format!("failed to add policy: {e}")))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert the demo catalog. Returns false when reference data already exists.
    pub fn seed_defaults(&self) -> Result<bool> {
        let existing: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM leave_types", [], |row| row.get(0))
            .map_err(|e| Error::Database(format!("failed to inspect seed state: {e}")))?;
        if existing > 0 {
            return Ok(false);
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

        for (name, days) in SEED_LEAVE_TYPES {
            tx.execute(
                "INSERT INTO leave_types (name, default_days) VALUES (?1, ?2)",
                params![name, days],
            )
            .map_err(|e| Error::Database(format!("failed to seed leave types: {e}")))?;
        }
        for (name, capacity, location, amenities) in SEED_ROOMS {
            let amenities = serde_json::to_string(amenities)?;
            tx.execute(
                "INSERT INTO rooms (name, capacity, location, amenities) VALUES (?1, ?2, ?3, ?4)",
                params![name, capacity, location, amenities],
            )
            .map_err(|e| Error::Database(format!("failed to seed rooms: {e}")))?;
        }
        for (name, max_amount, description) in SEED_CLAIM_CATEGORIES {
            tx.execute(
                "INSERT INTO claim_categories (name, max_amount, description) VALUES (?1, ?2, ?3)",
                params![name, max_amount, description],
            )
            .map_err(|e| Error::Database(format!("failed to seed categories: {e}")))?;
        }
        for (title, content) in SEED_POLICIES {
            self.add_policy_snippet(title, content)?;
        }

        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit seed data: {e}")))?;
        info!("seeded demo workplace data");
        Ok(true)
    }
}

const SEED_LEAVE_TYPES: &[(&str, i64)] = &[
    ("Annual", 14),
    ("Medical", 14),
    ("Emergency", 3),
    ("Unpaid", 30),
];

const SEED_ROOMS: &[(&str, i64, &str, &[&str])] = &[
    ("Orchid Room", 6, "Level 3", &["TV", "Whiteboard"]),
    ("Hibiscus Room", 12, "Level 5", &["Projector", "Video conferencing", "Whiteboard"]),
    ("Rafflesia Hall", 40, "Level 1", &["Projector", "PA system", "Stage"]),
    ("Focus Pod", 2, "Level 3", &["Monitor"]),
];

const SEED_CLAIM_CATEGORIES: &[(&str, Option<f64>, &str)] = &[
    ("Transport", Some(500.0), "Mileage, tolls, e-hailing and public transport"),
    ("Meals", Some(100.0), "Client or overtime meals"),
    ("Parking", Some(200.0), "Parking fees during official duty"),
    ("Medical", Some(1000.0), "Outpatient treatment and medication"),
    ("Training", Some(2000.0), "Approved courses and certification fees"),
    ("Others", None, "Anything not covered above, subject to approval"),
];

const SEED_POLICIES: &[(&str, &str)] = &[
    (
        "Working hours",
        "Office hours are 9:00 to 18:00, Monday to Friday, with a one hour lunch break. Flexible start between 8:00 and 10:00 is allowed with manager approval.",
    ),
    (
        "Annual leave",
        "Employees are entitled to 14 days of annual leave per year. Leave must be applied at least 3 days in advance. Up to 5 unused days may be carried forward to the next year.",
    ),
    (
        "Medical leave",
        "Medical leave (MC) of 14 days per year is provided. A valid medical certificate must be submitted within 48 hours. Hospitalisation leave of up to 60 days is separate from MC.",
    ),
    (
        "Emergency leave",
        "Emergency leave of 3 days per year covers urgent family matters. Inform your manager as soon as possible on the day itself.",
    ),
    (
        "Expense claims",
        "Claims must be submitted within 30 days of the expense with the original receipt attached. Claims pending for more than 7 days without a receipt will trigger a reminder.",
    ),
    (
        "Meeting rooms",
        "Rooms are booked in 24-hour HH:MM slots. Please release bookings you no longer need and keep rooms tidy after use.",
    ),
    (
        "Remote work",
        "Employees may work remotely up to 2 days per week with prior approval from their manager. Core collaboration hours are 10:00 to 16:00.",
    ),
];

fn ensure_balance_row(conn: &Connection, user_id: &str, leave_type_id: i64, year: i32) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO leave_balances (user_id, leave_type_id, year, total_days)
         SELECT ?1, id, ?3, default_days FROM leave_types WHERE id = ?2",
        params![user_id, leave_type_id, year],
    )
    .map_err(|e| Error::Database(format!("failed to create leave balance: {e}")))?;
    Ok(())
}

fn collect_rows<T, I>(rows: I, what: &str) -> Result<Vec<T>>
where
    I: Iterator<Item = rusqlite::Result<T>>,
{
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| Error::Database(format!("failed to read {what} row: {e}")))?);
    }
    Ok(out)
}

fn row_to_leave_type(row: &rusqlite::Row<'_>) -> rusqlite::Result<LeaveType> {
    Ok(LeaveType {
        id: row.get(0)?,
        name: row.get(1)?,
        default_days: row.get(2)?,
    })
}

fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    let amenities_raw: String = row.get(4)?;
    Ok(Room {
        id: row.get(0)?,
        name: row.get(1)?,
        capacity: row.get(2)?,
        location: row.get(3)?,
        amenities: serde_json::from_str(&amenities_raw).unwrap_or_default(),
    })
}

fn row_to_booking(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoomBooking> {
    Ok(RoomBooking {
        id: row.get(0)?,
        room: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        status: row.get(6)?,
    })
}

fn row_to_category(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClaimCategory> {
    Ok(ClaimCategory {
        id: row.get(0)?,
        name: row.get(1)?,
        max_amount: row.get(2)?,
        description: row.get(3)?,
    })
}

pub(crate) fn row_to_claim(row: &rusqlite::Row<'_>) -> rusqlite::Result<Claim> {
    let created_raw: String = row.get(7)?;
    Ok(Claim {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category: row.get(2)?,
        amount: row.get(3)?,
        description: row.get(4)?,
        claim_date: row.get(5)?,
        status: row.get(6)?,
        created_at: parse_timestamp(&created_raw),
    })
}
