use crate::error::ProviderError;
use crate::http_client;
use crate::models::{Booking, Room};
use crate::provider::BookingProvider;
use crate::session::{jar_has_cookie, HtmlForm};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use reqwest::cookie::Jar;
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::Arc;

pub const PROVIDER_NAME: &str = "Kårhuset";
const CAMPUS: &str = "Johanneberg";

const PORTAL_URL: &str = "http://aptus.chs.chalmers.se/AptusPortal/";
const LOGIN_URL: &str =
    "http://aptus.chs.chalmers.se/AptusPortal/login.aspx?ReturnUrl=%2FAptusPortal%2Findex.aspx";
const LIST_URL: &str = "http://aptus.chs.chalmers.se/AptusPortal/wwwashbookings.aspx?";
const COMMAND_URL: &str = "http://aptus.chs.chalmers.se/AptusPortal/wwwashcommand.aspx";

const PANEL_ID: u32 = 3655;
const SESSION_COOKIE: &str = ".ASPXAUTH";

const USERNAME_FIELD: &str = "LoginPortal$UserName";
const PASSWORD_FIELD: &str = "LoginPortal$Password";
const LOGIN_BUTTON_FIELD: &str = "LoginPortal$LoginButton";
/// ASP.NET round-trip tokens the login form must carry; their absence means
/// the portal page changed shape.
const REQUIRED_TOKENS: [&str; 3] = ["__VIEWSTATE", "__VIEWSTATEGENERATOR", "__EVENTVALIDATION"];

/// The portal books whole-hour slots on a small fixed set of union-house
/// group rooms, addressed by panel/type/group ids rather than a catalog
/// endpoint.
#[derive(Debug, Clone, Copy)]
struct UnionRoom {
    name: &'static str,
    group_id: u32,
    type_id: u32,
    seats: u32,
}

const ROOMS: [UnionRoom; 3] = [
    UnionRoom { name: "Group room 1", group_id: 40625, type_id: 18313, seats: 8 },
    UnionRoom { name: "Group room 2", group_id: 42943, type_id: 18313, seats: 8 },
    UnionRoom { name: "Group room 3", group_id: 42944, type_id: 18313, seats: 6 },
];

fn room_by_name(name: &str) -> Option<&'static UnionRoom> {
    ROOMS.iter().find(|room| room.name == name)
}

fn room_model(room: &UnionRoom) -> Room {
    let mut model = Room::new(PROVIDER_NAME, room.name);
    model.seats = room.seats;
    model.campus = CAMPUS.to_string();
    model
}

/// Adapter for the student-union Aptus portal: viewstate-token form login,
/// command URLs for book/cancel, one HTML table for the personal bookings.
pub struct UnionPortalProvider {
    client: Client,
}

impl UnionPortalProvider {
    pub async fn connect(
        username: &str,
        password: &str,
        user_agent: &str,
    ) -> Result<Self, ProviderError> {
        let jar = Arc::new(Jar::default());
        let client = http_client::create_http_client(user_agent, jar.clone())?;

        let response = client.get(PORTAL_URL).send().await?;
        let page_url = response.url().clone();
        let body = response.text().await?;

        let mut form = HtmlForm::parse(&body, "form", &page_url)?;
        for token in REQUIRED_TOKENS {
            if !form.has_field(token) {
                return Err(ProviderError::parse(format!(
                    "login form is missing {token}"
                )));
            }
        }
        form.push(USERNAME_FIELD, username);
        form.push(PASSWORD_FIELD, password);
        form.push(LOGIN_BUTTON_FIELD, "Enter");
        form.action = LOGIN_URL.to_string();

        let response = form.submit(&client).await?;
        let _ = response.text().await;

        if !jar_has_cookie(&jar, PORTAL_URL, SESSION_COOKIE)? {
            return Err(ProviderError::auth(
                "portal did not set a session cookie; wrong credentials?",
            ));
        }
        tracing::info!("logged in to the union portal");
        Ok(Self { client })
    }
}

/// Booking ids are synthesized as `group/date/hour` because the portal keys
/// cancellation on those command parameters, not on an id of its own.
fn booking_id(group_id: u32, date: NaiveDate, hour: u32) -> String {
    format!("{group_id}/{date}/{hour}")
}

fn parse_booking_id(id: &str) -> Result<(u32, NaiveDate, u32), ProviderError> {
    let mut parts = id.splitn(3, '/');
    let (Some(group), Some(date), Some(hour)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ProviderError::parse(format!("bad union booking id: {id}")));
    };
    let group_id: u32 = group
        .parse()
        .map_err(|_| ProviderError::parse(format!("bad group id in booking id: {id}")))?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| ProviderError::parse(format!("bad date in booking id: {id}")))?;
    let hour: u32 = hour
        .parse()
        .map_err(|_| ProviderError::parse(format!("bad hour in booking id: {id}")))?;
    Ok((group_id, date, hour))
}

/// The bookings listing is a deeply nested layout table whose payload rows
/// come in groups of six cells: two controls, date, "house - room", time
/// span, separator. A cell count that isn't a multiple of six means the
/// layout changed.
fn parse_bookings_table(html: &str) -> Result<Vec<Booking>, ProviderError> {
    const CELLS_PER_BOOKING: usize = 6;

    let document = Html::parse_document(html);
    let table_selector = Selector::parse("table.bookingTable td, table#bookings td")
        .map_err(|_| ProviderError::parse("bad bookings selector"))?;
    let cells: Vec<String> = document
        .select(&table_selector)
        .map(|cell| cell.text().collect::<String>().trim().to_string())
        .collect();

    if cells.is_empty() {
        return Ok(Vec::new());
    }
    if cells.len() % CELLS_PER_BOOKING != 0 {
        return Err(ProviderError::parse(format!(
            "bookings table has {} cells, expected groups of {CELLS_PER_BOOKING}",
            cells.len()
        )));
    }

    let mut bookings = Vec::with_capacity(cells.len() / CELLS_PER_BOOKING);
    for group in cells.chunks(CELLS_PER_BOOKING) {
        let date = NaiveDate::parse_from_str(&group[2], "%d/%m/%Y")
            .map_err(|_| ProviderError::parse(format!("bad booking date: {}", group[2])))?;
        let room_name = parse_room_cell(&group[3])?;
        let (start, end) = parse_interval_cell(&group[4], date)?;

        let room = match room_by_name(&room_name) {
            Some(known) => room_model(known),
            None => Room::new(PROVIDER_NAME, room_name.clone()),
        };
        let id = match room_by_name(&room_name) {
            Some(known) => booking_id(known.group_id, date, start.hour()),
            None => String::new(),
        };
        bookings.push(Booking {
            room,
            start,
            end,
            text: String::new(),
            id,
        });
    }
    Ok(bookings)
}

/// "Kårhuset - Group room 1" → "Group room 1"
fn parse_room_cell(text: &str) -> Result<String, ProviderError> {
    let parts: Vec<&str> = text.split(" - ").collect();
    if parts.len() != 2 {
        return Err(ProviderError::parse(format!("bad room cell: {text}")));
    }
    Ok(parts[1].trim().to_string())
}

/// "08:00-10:00" on a given date.
fn parse_interval_cell(
    text: &str,
    date: NaiveDate,
) -> Result<(NaiveDateTime, NaiveDateTime), ProviderError> {
    let mut parts = text.split('-');
    let (Some(start), Some(end)) = (parts.next(), parts.next()) else {
        return Err(ProviderError::parse(format!("bad interval cell: {text}")));
    };
    let at = |clock: &str| {
        chrono::NaiveTime::parse_from_str(clock.trim(), "%H:%M")
            .map(|time| date.and_time(time))
            .map_err(|_| ProviderError::parse(format!("bad interval time: {clock}")))
    };
    Ok((at(start)?, at(end)?))
}

fn overlaps(booking: &Booking, start: NaiveDateTime, end: NaiveDateTime) -> bool {
    booking.start < end && start < booking.end
}

#[async_trait]
impl BookingProvider for UnionPortalProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    /// The portal has no availability search; the room set is fixed, so the
    /// free rooms are the fixed trio minus the user's own clashing bookings.
    async fn available(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Room>, ProviderError> {
        let mine = self.my_bookings().await?;
        let rooms = ROOMS
            .iter()
            .filter(|room| {
                !mine
                    .iter()
                    .any(|b| b.room.id == room.name && overlaps(b, start, end))
            })
            .map(room_model)
            .collect();
        Ok(rooms)
    }

    async fn book(&self, booking: &Booking) -> Result<String, ProviderError> {
        let room = room_by_name(&booking.room.id)
            .ok_or_else(|| ProviderError::UnknownRoom(booking.room.id.clone()))?;
        let date = booking.start.date();
        let hour = booking.start.hour();

        let url = format!(
            "{COMMAND_URL}?command=book&PanelId={PANEL_ID}&TypeId={}&GroupId={}&Date={}&IntervalId={}&NextPage",
            room.type_id, room.group_id, date, hour,
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Rejected(format!(
                "booking command failed ({})",
                response.status()
            )));
        }
        let _ = response.text().await;
        Ok(booking_id(room.group_id, date, hour))
    }

    async fn unbook(&self, booking: &Booking) -> Result<(), ProviderError> {
        let (group_id, date, hour) = parse_booking_id(&booking.id)?;
        let room = ROOMS
            .iter()
            .find(|room| room.group_id == group_id)
            .ok_or_else(|| ProviderError::UnknownRoom(format!("group {group_id}")))?;

        let url = format!(
            "{COMMAND_URL}?command=cancel&PanelId={PANEL_ID}&TypeId={}&GroupId={group_id}&Date={date}&IntervalId={hour}&NextPage",
            room.type_id,
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Rejected(format!(
                "cancel command failed ({})",
                response.status()
            )));
        }
        Ok(())
    }

    async fn my_bookings(&self) -> Result<Vec<Booking>, ProviderError> {
        let body = self.client.get(LIST_URL).send().await?.text().await?;
        parse_bookings_table(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_id_round_trip() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let id = booking_id(40625, date, 12);
        assert_eq!(id, "40625/2026-03-02/12");
        assert_eq!(parse_booking_id(&id).unwrap(), (40625, date, 12));
    }

    #[test]
    fn test_parse_booking_id_rejects_garbage() {
        assert!(parse_booking_id("nonsense").is_err());
        assert!(parse_booking_id("abc/2026-03-02/12").is_err());
        assert!(parse_booking_id("40625/yesterday/12").is_err());
    }

    const BOOKINGS_TABLE: &str = r##"
        <html><body>
        <table class="bookingTable">
            <tr>
                <td><img src="icon.gif"/></td>
                <td><a href="#">Cancel</a></td>
                <td>02/03/2026</td>
                <td>Kårhuset - Group room 1</td>
                <td>08:00-10:00</td>
                <td></td>
            </tr>
            <tr>
                <td><img src="icon.gif"/></td>
                <td><a href="#">Cancel</a></td>
                <td>03/03/2026</td>
                <td>Kårhuset - Group room 3</td>
                <td>12:00-13:00</td>
                <td></td>
            </tr>
        </table>
        </body></html>
    "##;

    #[test]
    fn test_parse_bookings_table() {
        let bookings = parse_bookings_table(BOOKINGS_TABLE).unwrap();
        assert_eq!(bookings.len(), 2);

        assert_eq!(bookings[0].room.id, "Group room 1");
        assert_eq!(bookings[0].room.provider, PROVIDER_NAME);
        assert_eq!(bookings[0].start.to_string(), "2026-03-02 08:00:00");
        assert_eq!(bookings[0].end.to_string(), "2026-03-02 10:00:00");
        assert_eq!(bookings[0].id, "40625/2026-03-02/8");

        assert_eq!(bookings[1].room.id, "Group room 3");
        assert_eq!(bookings[1].id, "42944/2026-03-03/12");
    }

    #[test]
    fn test_parse_bookings_table_empty_page() {
        let bookings = parse_bookings_table("<html><body></body></html>").unwrap();
        assert!(bookings.is_empty());
    }

    #[test]
    fn test_parse_bookings_table_ragged_cells_is_parse_failure() {
        let html = r#"
            <table class="bookingTable">
                <tr><td>a</td><td>b</td><td>c</td><td>d</td></tr>
            </table>
        "#;
        assert!(matches!(
            parse_bookings_table(html),
            Err(ProviderError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_room_cell() {
        assert_eq!(parse_room_cell("Kårhuset - Group room 2").unwrap(), "Group room 2");
        assert!(parse_room_cell("Group room 2").is_err());
    }

    #[test]
    fn test_overlap_detection() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let booking = Booking {
            room: Room::new(PROVIDER_NAME, "Group room 1"),
            start: date.and_hms_opt(10, 0, 0).unwrap(),
            end: date.and_hms_opt(12, 0, 0).unwrap(),
            text: String::new(),
            id: String::new(),
        };
        // touching intervals don't overlap
        assert!(!overlaps(
            &booking,
            date.and_hms_opt(12, 0, 0).unwrap(),
            date.and_hms_opt(13, 0, 0).unwrap()
        ));
        assert!(overlaps(
            &booking,
            date.and_hms_opt(11, 0, 0).unwrap(),
            date.and_hms_opt(13, 0, 0).unwrap()
        ));
    }
}
