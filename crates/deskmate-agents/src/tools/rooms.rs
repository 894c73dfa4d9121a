use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use deskmate_common::Result;
use deskmate_db::{BookingSlot, WorkplaceStore};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::{Tool, ToolContext, ToolOutput, optional_str, required_str};

const HISTORY_LIMIT: usize = 10;

fn slot_schema(extra: Value) -> Value {
    let mut schema = json!({
        "type": "object",
        "properties": {
            "room_name": { "type": "string", "description": "Room name, partial names are fine" },
            "date": { "type": "string", "description": "Date, YYYY-MM-DD" },
            "start_time": { "type": "string", "description": "Start time, HH:MM (24h)" },
            "end_time": { "type": "string", "description": "End time, HH:MM (24h)" }
        },
        "required": ["room_name", "date", "start_time", "end_time"]
    });
    if let (Some(props), Value::Object(extra_props)) = (schema["properties"].as_object_mut(), extra) {
        props.extend(extra_props);
    }
    schema
}

/// Parse the slot arguments, or a failure payload explaining what is wrong.
fn parse_slot(args: &Value) -> Result<std::result::Result<BookingSlot, ToolOutput>> {
    let date_raw = required_str(args, "date")?;
    let start_raw = required_str(args, "start_time")?;
    let end_raw = required_str(args, "end_time")?;

    let Ok(date) = NaiveDate::parse_from_str(date_raw, "%Y-%m-%d") else {
        return Ok(Err(ToolOutput::error_with(
            "Invalid date format. Please use YYYY-MM-DD format",
            json!({ "suggestion": "Example: 2026-02-01" }),
        )));
    };
    let (Ok(start), Ok(end)) = (
        NaiveTime::parse_from_str(start_raw, "%H:%M"),
        NaiveTime::parse_from_str(end_raw, "%H:%M"),
    ) else {
        return Ok(Err(ToolOutput::error_with(
            "Invalid time format. Please use HH:MM (24h)",
            json!({ "suggestion": "Example: 14:30" }),
        )));
    };
    if start >= end {
        return Ok(Err(ToolOutput::error("End time must be after start time")));
    }
    Ok(Ok(BookingSlot { date, start, end }))
}

pub struct ListRooms {
    store: Arc<Mutex<WorkplaceStore>>,
}

impl ListRooms {
    pub fn new(store: Arc<Mutex<WorkplaceStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ListRooms {
    fn name(&self) -> &'static str {
        "list_rooms"
    }

    fn description(&self) -> &'static str {
        "List the meeting rooms with capacity, location and amenities. Call when the user \
         asks which rooms exist, bilik mesyuarat or meeting rooms."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _context: &ToolContext, _args: Value) -> Result<ToolOutput> {
        let rooms = self.store.lock().await.rooms()?;
        Ok(ToolOutput::success(json!({
            "count": rooms.len(),
            "rooms": rooms,
        })))
    }
}

pub struct CheckRoomAvailability {
    store: Arc<Mutex<WorkplaceStore>>,
}

impl CheckRoomAvailability {
    pub fn new(store: Arc<Mutex<WorkplaceStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CheckRoomAvailability {
    fn name(&self) -> &'static str {
        "check_room_availability"
    }

    fn description(&self) -> &'static str {
        "Check whether a room is free for a time slot. Call before booking."
    }

    fn input_schema(&self) -> Value {
        slot_schema(json!({}))
    }

    async fn execute(&self, _context: &ToolContext, args: Value) -> Result<ToolOutput> {
        let room_name = required_str(&args, "room_name")?;
        let slot = match parse_slot(&args)? {
            Ok(slot) => slot,
            Err(output) => return Ok(output),
        };

        let store = self.store.lock().await;
        let Some(room) = store.find_room(room_name)? else {
            return Ok(ToolOutput::error(format!("Room '{room_name}' not found")));
        };

        let conflicts = store.conflicting_bookings(&room, &slot)?;
        if conflicts.is_empty() {
            return Ok(ToolOutput::success(json!({
                "available": true,
                "room": room.name,
                "time_slot": format!("{} - {}", slot.start.format("%H:%M"), slot.end.format("%H:%M")),
            })));
        }

        let conflicts: Vec<Value> = conflicts
            .iter()
            .map(|b| json!({ "title": b.title, "time": format!("{} - {}", b.start_time, b.end_time) }))
            .collect();
        Ok(ToolOutput::success(json!({
            "available": false,
            "room": room.name,
            "conflicts": conflicts,
            "suggestion": "Try a different time slot",
        })))
    }
}

pub struct BookRoom {
    store: Arc<Mutex<WorkplaceStore>>,
}

impl BookRoom {
    pub fn new(store: Arc<Mutex<WorkplaceStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for BookRoom {
    fn name(&self) -> &'static str {
        "book_room"
    }

    fn description(&self) -> &'static str {
        "Book a meeting room for the user. Call when the user wants to book or reserve a room."
    }

    fn input_schema(&self) -> Value {
        let mut schema = slot_schema(json!({
            "title": { "type": "string", "description": "Meeting title or purpose" },
            "description": { "type": "string", "description": "Optional meeting description" }
        }));
        if let Some(required) = schema["required"].as_array_mut() {
            required.push(json!("title"));
        }
        schema
    }

    async fn execute(&self, context: &ToolContext, args: Value) -> Result<ToolOutput> {
        let room_name = required_str(&args, "room_name")?;
        let title = required_str(&args, "title")?;
        let description = optional_str(&args, "description").unwrap_or_default();
        let slot = match parse_slot(&args)? {
            Ok(slot) => slot,
            Err(output) => return Ok(output),
        };

        let store = self.store.lock().await;
        let Some(room) = store.find_room(room_name)? else {
            let names: Vec<String> = store.rooms()?.into_iter().map(|r| r.name).collect();
            return Ok(ToolOutput::error_with(
                format!("Room '{room_name}' not found"),
                json!({ "available_rooms": names }),
            ));
        };

        if let Some(booking) = store.conflicting_bookings(&room, &slot)?.first() {
            return Ok(ToolOutput::error(format!(
                "Room already booked: {} ({} - {})",
                booking.title, booking.start_time, booking.end_time
            )));
        }

        let booking_id = store.create_booking(&context.user_id, &room, title, description, &slot)?;
        Ok(ToolOutput::success(json!({
            "message": "✅ Room booked successfully!",
            "details": {
                "room": room.name,
                "title": title,
                "date": slot.date.format("%Y-%m-%d").to_string(),
                "time": format!("{} - {}", slot.start.format("%H:%M"), slot.end.format("%H:%M")),
                "booking_id": booking_id,
            }
        })))
    }
}

pub struct GetMyBookings {
    store: Arc<Mutex<WorkplaceStore>>,
}

impl GetMyBookings {
    pub fn new(store: Arc<Mutex<WorkplaceStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetMyBookings {
    fn name(&self) -> &'static str {
        "get_my_bookings"
    }

    fn description(&self) -> &'static str {
        "Get the user's room bookings. Call when the user asks about their bookings or meetings."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, context: &ToolContext, _args: Value) -> Result<ToolOutput> {
        let bookings: Vec<Value> = self
            .store
            .lock()
            .await
            .bookings_for_user(&context.user_id, HISTORY_LIMIT)?
            .into_iter()
            .map(|b| {
                json!({
                    "room": b.room,
                    "title": b.title,
                    "start": b.start_time,
                    "end": b.end_time,
                    "status": b.status,
                })
            })
            .collect();
        Ok(ToolOutput::success(json!({
            "count": bookings.len(),
            "bookings": bookings,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{context, seeded_workplace};

    fn booking_args(start: &str, end: &str) -> Value {
        json!({
            "room_name": "hibiscus",
            "title": "Sprint planning",
            "date": "2026-11-20",
            "start_time": start,
            "end_time": end
        })
    }

    #[tokio::test]
    async fn lists_seeded_rooms() {
        let out = ListRooms::new(seeded_workplace())
            .execute(&context("u-1"), json!({}))
            .await
            .unwrap();
        assert_eq!(out.payload["count"], 4);
        assert_eq!(out.payload["rooms"][0]["name"], "Orchid Room");
    }

    #[tokio::test]
    async fn booking_blocks_overlapping_slot() {
        let store = seeded_workplace();
        let book = BookRoom::new(Arc::clone(&store));

        let first = book
            .execute(&context("u-1"), booking_args("10:00", "11:00"))
            .await
            .unwrap();
        assert!(!first.is_error, "{}", first.payload);
        assert_eq!(first.payload["details"]["room"], "Hibiscus Room");

        let clash = book
            .execute(&context("u-2"), booking_args("10:30", "11:30"))
            .await
            .unwrap();
        assert!(clash.is_error);
        assert!(
            clash.payload["error"]
                .as_str()
                .unwrap()
                .starts_with("Room already booked: Sprint planning")
        );

        let check = CheckRoomAvailability::new(Arc::clone(&store))
            .execute(&context("u-2"), booking_args("10:45", "12:00"))
            .await
            .unwrap();
        assert_eq!(check.payload["success"], true);
        assert_eq!(check.payload["available"], false);
        assert_eq!(check.payload["conflicts"].as_array().unwrap().len(), 1);

        let free = CheckRoomAvailability::new(Arc::clone(&store))
            .execute(&context("u-2"), booking_args("11:00", "12:00"))
            .await
            .unwrap();
        assert_eq!(free.payload["available"], true);

        let mine = GetMyBookings::new(store)
            .execute(&context("u-1"), json!({}))
            .await
            .unwrap();
        assert_eq!(mine.payload["count"], 1);
    }

    #[tokio::test]
    async fn invalid_requests_fail_softly() {
        let book = BookRoom::new(seeded_workplace());

        let reversed = book
            .execute(&context("u-1"), booking_args("11:00", "10:00"))
            .await
            .unwrap();
        assert_eq!(reversed.payload["error"], "End time must be after start time");

        let mut unknown = booking_args("10:00", "11:00");
        unknown["room_name"] = json!("Ballroom");
        let missing = book.execute(&context("u-1"), unknown).await.unwrap();
        assert_eq!(missing.payload["available_rooms"].as_array().unwrap().len(), 4);

        let bad_time = book
            .execute(&context("u-1"), booking_args("10am", "11am"))
            .await
            .unwrap();
        assert!(bad_time.is_error);
    }

    #[tokio::test]
    async fn check_rejects_inverted_and_empty_slots() {
        let check = CheckRoomAvailability::new(seeded_workplace());

        for (start, end) in [("15:00", "14:00"), ("14:00", "14:00")] {
            let out = check
                .execute(&context("u-1"), booking_args(start, end))
                .await
                .unwrap();
            assert!(out.is_error, "{start}-{end}: {}", out.payload);
            assert_eq!(out.payload["success"], false);
            assert_eq!(out.payload["error"], "End time must be after start time");
            assert!(out.payload.get("available").is_none());
        }
    }

    #[test]
    fn book_room_schema_requires_title() {
        let schema = BookRoom::new(seeded_workplace()).input_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"title"));
        assert!(schema["properties"]["description"].is_object());
    }
}
