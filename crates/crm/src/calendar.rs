//! Calendar operations served by the REST API rather than the tool-execution endpoint.

use std::time::Instant;

use leadline_core::config::CrmConfig;
use leadline_core::validation::{is_present, Arguments};
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::http::{build_client, map_send_error, read_json};
use crate::CrmError;

const READ_API_VERSION: &str = "2021-07-28";
const BOOKING_API_VERSION: &str = "2021-04-15";
const MAX_SLOT_RANGE_MS: i64 = 31 * 24 * 60 * 60 * 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalendarOperation {
    ListCalendars,
    CalendarDetails,
    FreeSlots,
    CreateAppointment,
}

impl CalendarOperation {
    pub fn for_tool(tool_name: &str) -> Option<Self> {
        match tool_name {
            "calendars_get-calendars" => Some(Self::ListCalendars),
            "calendars_get-calendar-details" => Some(Self::CalendarDetails),
            "calendars_get-available-slots" => Some(Self::FreeSlots),
            "calendars_create-appointment" => Some(Self::CreateAppointment),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ListCalendars => "list_calendars",
            Self::CalendarDetails => "calendar_details",
            Self::FreeSlots => "free_slots",
            Self::CreateAppointment => "create_appointment",
        }
    }

    pub fn not_found_message(self) -> &'static str {
        match self {
            Self::ListCalendars => "Location not found. Please check the location ID.",
            Self::CalendarDetails | Self::FreeSlots => {
                "Calendar not found. Please check the calendar ID."
            }
            Self::CreateAppointment => {
                "Calendar or contact not found. Please check the calendar ID and contact ID."
            }
        }
    }

    pub fn forbidden_message(self) -> &'static str {
        match self {
            Self::ListCalendars => {
                "Access denied. Please check your permissions for this location."
            }
            Self::CalendarDetails | Self::FreeSlots => {
                "Access denied. You may not have permission to view this calendar."
            }
            Self::CreateAppointment => {
                "Access denied. You may not have permission to create appointments on this calendar."
            }
        }
    }

    pub fn bad_request_message(self, remote: Option<&str>) -> String {
        match (self, remote) {
            (_, Some(message)) => format!("Bad request: {message}"),
            (Self::FreeSlots, None) => {
                "Invalid request parameters. Please check the date range and calendar ID."
                    .to_string()
            }
            (_, None) => "Bad request: Invalid request parameters".to_string(),
        }
    }

    /// Only appointment creation distinguishes a booking conflict.
    pub fn reports_conflicts(self) -> bool {
        matches!(self, Self::CreateAppointment)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalendarListQuery {
    pub location_id: String,
    pub group_id: Option<String>,
    pub show_drafted: bool,
}

impl CalendarListQuery {
    pub fn from_arguments(args: &Arguments, home_location: &str) -> Result<Self, CrmError> {
        Ok(Self {
            location_id: optional_string(args, "query_locationId")
                .unwrap_or_else(|| home_location.to_string()),
            group_id: optional_string(args, "query_groupId"),
            show_drafted: optional_bool(args, "query_showDrafted")?.unwrap_or(false),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotQuery {
    pub calendar_id: String,
    pub start_date: i64,
    pub end_date: i64,
    pub timezone: String,
    pub user_id: Option<String>,
}

impl SlotQuery {
    pub fn from_arguments(args: &Arguments) -> Result<Self, CrmError> {
        Ok(Self {
            calendar_id: required_string(args, "query_calendarId")?,
            start_date: required_millis(args, "query_startDate")?,
            end_date: required_millis(args, "query_endDate")?,
            timezone: optional_string(args, "query_timezone").unwrap_or_else(|| "UTC".to_string()),
            user_id: optional_string(args, "query_userId"),
        })
    }

    pub fn check_range(&self) -> Result<(), CrmError> {
        if self.end_date < self.start_date {
            return Err(CrmError::InvalidArguments(
                "endDate must not be before startDate".to_string(),
            ));
        }
        if self.end_date - self.start_date > MAX_SLOT_RANGE_MS {
            return Err(CrmError::InvalidArguments(
                "Date range cannot exceed 1 month".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRequest {
    pub calendar_id: String,
    pub location_id: String,
    pub contact_id: String,
    pub start_time: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub appointment_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_user_id: Option<String>,
    pub meeting_location_type: String,
    pub meeting_location_id: String,
    pub override_location_config: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub ignore_date_range: bool,
    pub to_notify: bool,
    pub ignore_free_slot_validation: bool,
}

impl AppointmentRequest {
    pub fn from_arguments(args: &Arguments, home_location: &str) -> Result<Self, CrmError> {
        Ok(Self {
            calendar_id: required_string(args, "body_calendarId")?,
            location_id: optional_string(args, "body_locationId")
                .unwrap_or_else(|| home_location.to_string()),
            contact_id: required_string(args, "body_contactId")?,
            start_time: required_string(args, "body_startTime")?,
            title: optional_string(args, "body_title")
                .unwrap_or_else(|| "New Appointment".to_string()),
            end_time: optional_string(args, "body_endTime"),
            appointment_status: optional_string(args, "body_appointmentStatus")
                .unwrap_or_else(|| "new".to_string()),
            assigned_user_id: optional_string(args, "body_assignedUserId"),
            meeting_location_type: optional_string(args, "body_meetingLocationType")
                .unwrap_or_else(|| "custom".to_string()),
            meeting_location_id: optional_string(args, "body_meetingLocationId")
                .unwrap_or_else(|| "default".to_string()),
            override_location_config: optional_bool(args, "body_overrideLocationConfig")?
                .unwrap_or(false),
            address: optional_string(args, "body_address"),
            ignore_date_range: optional_bool(args, "body_ignoreDateRange")?.unwrap_or(false),
            to_notify: optional_bool(args, "body_toNotify")?.unwrap_or(true),
            ignore_free_slot_validation: optional_bool(args, "body_ignoreFreeSlotValidation")?
                .unwrap_or(false),
        })
    }
}

/// Calendar id for the details lookup; numeric ids are accepted as text.
pub fn calendar_id(args: &Arguments) -> Result<String, CrmError> {
    required_string(args, "path_calendarId")
}

fn optional_string(args: &Arguments, key: &str) -> Option<String> {
    let value = args.get(key).filter(|value| is_present(Some(value)))?;
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        other => Some(other.to_string()),
    }
}

fn required_string(args: &Arguments, key: &str) -> Result<String, CrmError> {
    optional_string(args, key)
        .ok_or_else(|| CrmError::InvalidArguments(format!("{key} is required")))
}

fn optional_bool(args: &Arguments, key: &str) -> Result<Option<bool>, CrmError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(*flag)),
        Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(CrmError::InvalidArguments(format!("{key} must be true or false"))),
        },
        Some(_) => Err(CrmError::InvalidArguments(format!("{key} must be true or false"))),
    }
}

/// Millisecond timestamps arrive as numbers or numeric strings.
fn required_millis(args: &Arguments, key: &str) -> Result<i64, CrmError> {
    let invalid = || CrmError::InvalidArguments(format!("{key} must be a millisecond timestamp"));
    match args.get(key) {
        Some(Value::Number(number)) => {
            number.as_i64().or_else(|| number.as_f64().map(|value| value as i64)).ok_or_else(invalid)
        }
        Some(Value::String(text)) if !text.trim().is_empty() => {
            text.trim().parse::<i64>().map_err(|_| invalid())
        }
        _ => Err(CrmError::InvalidArguments(format!("{key} is required"))),
    }
}

#[derive(Clone)]
pub struct CalendarClient {
    http: Client,
    base_url: String,
    api_token: SecretString,
    location_id: String,
    timeout_secs: u64,
}

impl std::fmt::Debug for CalendarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalendarClient")
            .field("base_url", &self.base_url)
            .field("location_id", &self.location_id)
            .finish_non_exhaustive()
    }
}

impl CalendarClient {
    pub fn new(
        base_url: impl Into<String>,
        api_token: SecretString,
        location_id: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, CrmError> {
        let base_url: String = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(Self {
            http: build_client(timeout_secs)?,
            base_url,
            api_token,
            location_id: location_id.into(),
            timeout_secs,
        })
    }

    pub fn from_config(config: &CrmConfig) -> Result<Self, CrmError> {
        Self::new(
            config.rest_base_url.clone(),
            config.api_token.clone(),
            config.location_id.clone(),
            config.timeout_secs,
        )
    }

    pub fn home_location(&self) -> &str {
        &self.location_id
    }

    pub async fn list_calendars(&self, query: &CalendarListQuery) -> Result<Value, CrmError> {
        let mut params = vec![
            ("locationId", query.location_id.clone()),
            ("showDrafted", query.show_drafted.to_string()),
        ];
        if let Some(group_id) = &query.group_id {
            params.push(("groupId", group_id.clone()));
        }

        let request = self.get("/calendars/").query(&params);
        self.send(CalendarOperation::ListCalendars, request).await
    }

    pub async fn calendar_details(&self, calendar_id: &str) -> Result<Value, CrmError> {
        if calendar_id.trim().is_empty() {
            return Err(CrmError::InvalidArguments("calendarId is required".to_string()));
        }
        let request = self.get(&format!("/calendars/{}", calendar_id.trim()));
        self.send(CalendarOperation::CalendarDetails, request).await
    }

    pub async fn free_slots(&self, query: &SlotQuery) -> Result<Value, CrmError> {
        query.check_range()?;

        let mut params = vec![
            ("calendarId", query.calendar_id.clone()),
            ("startDate", query.start_date.to_string()),
            ("endDate", query.end_date.to_string()),
            ("timezone", query.timezone.clone()),
        ];
        if let Some(user_id) = &query.user_id {
            params.push(("userId", user_id.clone()));
        }

        let request = self.get("/calendars/slots").query(&params);
        self.send(CalendarOperation::FreeSlots, request).await
    }

    pub async fn create_appointment(&self, appointment: &AppointmentRequest) -> Result<Value, CrmError> {
        let request = self
            .http
            .post(format!("{}/calendars/events/appointments", self.base_url))
            .bearer_auth(self.api_token.expose_secret())
            .header("Version", BOOKING_API_VERSION)
            .header(ACCEPT, "application/json")
            .json(appointment);
        self.send(CalendarOperation::CreateAppointment, request).await
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(self.api_token.expose_secret())
            .header("Version", READ_API_VERSION)
            .header(ACCEPT, "application/json")
    }

    async fn send(&self, operation: CalendarOperation, request: RequestBuilder) -> Result<Value, CrmError> {
        let started = Instant::now();
        let response =
            request.send().await.map_err(|error| map_send_error(error, self.timeout_secs))?;
        let status = response.status().as_u16();
        let result = read_json(response, self.timeout_secs).await;

        debug!(
            event_name = "crm.calendar.completed",
            operation = operation.as_str(),
            status,
            ok = result.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "calendar request finished"
        );
        result
    }
}
