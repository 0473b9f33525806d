use crate::error::ProviderError;
use crate::http_client;
use crate::models::{Booking, Room};
use crate::provider::BookingProvider;
use crate::session::{saml_login, SamlLogin};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::cookie::Jar;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

const PAGE_SIZE: usize = 50;
/// The objects endpoint answers with this literal instead of an empty page
/// once pagination runs past the last room. The `hasMore` flag alone is not
/// reliable.
const NO_RESULTS_SENTINEL: &str = "\"Inga sökresultat\"";
/// Fixed "other" booking purpose object.
const OTHER_PURPOSE: &str = "203460.192";
const BOOKING_NOTE: &str = "Booked with roombook";
const USERNAME_DOMAIN: &str = "@net.chalmers.se";
const TEXT_LABEL: &str = "Egen text";
/// Search id that brings the student-union rooms into the objects listing.
/// The production instance books them; the test instance must not, so its
/// listing subtracts the rooms this filter matches.
const STUDENT_UNION_FILTER: &str = "sid=1010";

/// Which TimeEdit installation the adapter talks to. The test installation
/// uses its own SSO endpoint and its own session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instance {
    Chalmers,
    ChalmersTest,
}

impl Instance {
    pub fn slug(self) -> &'static str {
        match self {
            Instance::Chalmers => "chalmers",
            Instance::ChalmersTest => "chalmers_test",
        }
    }

    fn sso_segment(self) -> &'static str {
        match self {
            Instance::Chalmers => "saml2",
            Instance::ChalmersTest => "saml2_test",
        }
    }

    fn session_cookie(self) -> String {
        format!("TE{}web", self.slug())
    }

    pub fn provider_name(self) -> &'static str {
        match self {
            Instance::Chalmers => "TimeEdit",
            Instance::ChalmersTest => "TimeEditTest",
        }
    }
}

#[derive(Debug, Clone)]
struct CatalogRoom {
    name: String,
    object_id: String,
    seats: u32,
    campus: String,
}

/// Adapter for the TimeEdit timetable portal: SAML login at construction,
/// then scraped HTML and the objects JSON endpoint for everything else.
pub struct TimeEditProvider {
    client: Client,
    instance: Instance,
    catalog: Vec<CatalogRoom>,
}

impl TimeEditProvider {
    /// Logs in and bootstraps the room catalog. An adapter that fails here
    /// never becomes usable; nothing is retried.
    pub async fn connect(
        instance: Instance,
        username: &str,
        password: &str,
        user_agent: &str,
        room_info_url: Option<&str>,
    ) -> Result<Self, ProviderError> {
        let jar = Arc::new(Jar::default());
        let client = http_client::create_http_client(user_agent, jar.clone())?;

        let base = base_url(instance);
        let login = SamlLogin {
            entry_url: format!(
                "https://cloud.timeedit.net/{}/web/timeedit/sso/{}?back={}",
                instance.slug(),
                instance.sso_segment(),
                urlencoding::encode(&format!("{base}/")),
            ),
            form_selector: "#loginForm",
            username_field: "UserName",
            password_field: "Password",
            session_cookie: instance.session_cookie(),
        };
        saml_login(&client, &jar, &login, &to_username(username), password).await?;
        tracing::info!("logged in to TimeEdit instance {}", instance.slug());

        let mut provider = Self {
            client,
            instance,
            catalog: Vec::new(),
        };
        let catalog = provider.fetch_catalog(room_info_url).await?;
        provider.catalog = catalog;
        tracing::info!(
            "loaded {} rooms from TimeEdit instance {}",
            provider.catalog.len(),
            instance.slug()
        );
        Ok(provider)
    }

    fn base_url(&self) -> String {
        base_url(self.instance)
    }

    fn object_id(&self, room_name: &str) -> Result<&str, ProviderError> {
        self.catalog
            .iter()
            .find(|room| room.name == room_name)
            .map(|room| room.object_id.as_str())
            .ok_or_else(|| ProviderError::UnknownRoom(room_name.to_string()))
    }

    fn room_for(&self, room_name: &str) -> Room {
        let mut room = Room::new(self.instance.provider_name(), room_name);
        if let Some(entry) = self.catalog.iter().find(|r| r.name == room_name) {
            room.seats = entry.seats;
            room.campus = entry.campus.clone();
        }
        room
    }

    /// One bootstrap fetch of every bookable room, optionally enriched with
    /// seat counts and campus names from a hosted side-channel JSON (TimeEdit
    /// itself does not expose them).
    async fn fetch_catalog(
        &self,
        room_info_url: Option<&str>,
    ) -> Result<Vec<CatalogRoom>, ProviderError> {
        let mut catalog: Vec<CatalogRoom> = self
            .fetch_rooms("")
            .await?
            .into_iter()
            .map(|(name, object_id)| CatalogRoom {
                name,
                object_id,
                seats: 0,
                campus: String::new(),
            })
            .collect();

        if let Some(url) = room_info_url {
            let info = self.fetch_room_info(url).await?;
            for room in &mut catalog {
                if let Some(extra) = info.get(&room.name) {
                    room.seats = extra.seats;
                    room.campus = extra.campus.clone();
                }
            }
        }
        Ok(catalog)
    }

    /// Room listing with the per-instance student-union handling applied on
    /// top of the raw objects fetch.
    async fn fetch_rooms(&self, extra: &str) -> Result<Vec<(String, String)>, ProviderError> {
        match self.instance {
            Instance::Chalmers => {
                let extra = join_extra(extra, STUDENT_UNION_FILTER);
                self.fetch_objects(&extra).await
            }
            Instance::ChalmersTest => {
                let rooms = self.fetch_objects(extra).await?;
                let union_extra = join_extra(extra, STUDENT_UNION_FILTER);
                let union_rooms = self.fetch_objects(&union_extra).await?;
                Ok(exclude_rooms(rooms, &union_rooms))
            }
        }
    }

    /// Pages through the objects endpoint. Stops on the explicit no-results
    /// sentinel; `hasMore` only drives the next offset.
    async fn fetch_objects(&self, extra: &str) -> Result<Vec<(String, String)>, ProviderError> {
        let mut objects_url = format!("{}/objects.json?part=t&types=186&step=1", self.base_url());
        if !extra.is_empty() {
            objects_url = format!("{objects_url}&{extra}");
        }

        let mut start = 0;
        let mut rooms = Vec::new();
        loop {
            let page_url = format!("{objects_url}&max={PAGE_SIZE}&start={start}");
            let body = self.client.get(&page_url).send().await?.text().await?;
            let Some(page) = parse_objects_page(&body)? else {
                break;
            };
            for object in page.objects {
                rooms.push((object.fields.signature.trim().to_string(), object.id_and_type));
            }
            if page.has_more {
                start += PAGE_SIZE;
            } else {
                break;
            }
        }
        Ok(rooms)
    }

    async fn fetch_room_info(
        &self,
        url: &str,
    ) -> Result<HashMap<String, RoomInfo>, ProviderError> {
        let body = self.client.get(url).send().await?.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| ProviderError::parse(format!("room info json: {e}")))
    }

    async fn fetch_booking_text(&self, booking_id: &str) -> Result<String, ProviderError> {
        let url = format!("{}/my.html?step=3&id={}", self.base_url(), booking_id);
        let body = self.client.get(&url).send().await?.text().await?;
        Ok(parse_booking_text(&body).unwrap_or_default())
    }
}

fn base_url(instance: Instance) -> String {
    format!("https://cloud.timeedit.net/{}/web/b1", instance.slug())
}

fn join_extra(extra: &str, filter: &str) -> String {
    if extra.is_empty() {
        filter.to_string()
    } else {
        format!("{extra}&{filter}")
    }
}

fn exclude_rooms(
    rooms: Vec<(String, String)>,
    excluded: &[(String, String)],
) -> Vec<(String, String)> {
    let excluded: std::collections::HashSet<&str> =
        excluded.iter().map(|(name, _)| name.as_str()).collect();
    rooms
        .into_iter()
        .filter(|(name, _)| !excluded.contains(name.as_str()))
        .collect()
}

/// TimeEdit logins are the university account mail address; a bare account
/// name gets the domain appended.
fn to_username(account: &str) -> String {
    if account.contains(USERNAME_DOMAIN) {
        account.to_string()
    } else {
        format!("{account}{USERNAME_DOMAIN}")
    }
}

#[derive(Debug, Deserialize)]
struct ObjectsPage {
    #[serde(rename = "hasMore", default)]
    has_more: bool,
    #[serde(default)]
    objects: Vec<ObjectEntry>,
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    #[serde(rename = "idAndType")]
    id_and_type: String,
    fields: ObjectFields,
}

#[derive(Debug, Deserialize)]
struct ObjectFields {
    #[serde(rename = "Lokalsignatur")]
    signature: String,
}

#[derive(Debug, Deserialize)]
struct RoomInfo {
    #[serde(default)]
    seats: u32,
    #[serde(default)]
    campus: String,
}

/// `Ok(None)` when the page is the no-results sentinel.
fn parse_objects_page(body: &str) -> Result<Option<ObjectsPage>, ProviderError> {
    if body.trim() == NO_RESULTS_SENTINEL {
        return Ok(None);
    }
    serde_json::from_str(body)
        .map(Some)
        .map_err(|e| ProviderError::parse(format!("objects json: {e}")))
}

fn sel(selector: &str) -> Result<Selector, ProviderError> {
    Selector::parse(selector).map_err(|_| ProviderError::parse(format!("bad selector: {selector}")))
}

#[derive(Debug, PartialEq)]
struct BookingRow {
    id: String,
    room_name: String,
    start: NaiveDateTime,
    end: NaiveDateTime,
}

/// The personal-bookings page is one table: two header rows, then date
/// heading rows (`.headline.t`, date in the second token) alternating with
/// booking rows carrying `data-id`. A booking row before any heading means
/// the layout changed.
fn parse_bookings_page(html: &str) -> Result<Vec<BookingRow>, ProviderError> {
    let document = Html::parse_document(html);
    let row_selector = sel("#texttable table tr")?;
    let heading_selector = sel(".headline.t")?;
    let room_selector = sel(".column0")?;
    let time_selector = sel(".time")?;

    let mut rows = Vec::new();
    let mut selected_date: Option<NaiveDate> = None;
    for row in document.select(&row_selector).skip(2) {
        if let Some(heading) = row.select(&heading_selector).next() {
            let text: String = heading.text().collect();
            let token = text
                .split_whitespace()
                .nth(1)
                .ok_or_else(|| ProviderError::parse(format!("date heading too short: {text}")))?;
            let date = NaiveDate::parse_from_str(token, "%Y-%m-%d")
                .map_err(|_| ProviderError::parse(format!("bad heading date: {token}")))?;
            selected_date = Some(date);
            continue;
        }

        let date = selected_date
            .ok_or_else(|| ProviderError::parse("booking row before any date heading"))?;
        let id = row
            .value()
            .attr("data-id")
            .ok_or_else(|| ProviderError::parse("booking row without data-id"))?
            .to_string();

        let room_text: String = row
            .select(&room_selector)
            .next()
            .map(|cell| cell.text().collect())
            .unwrap_or_default();
        let room_name = room_text
            .split(", ")
            .next()
            .unwrap_or("")
            .trim()
            .to_string();

        let time_text: String = row
            .select(&time_selector)
            .next()
            .map(|cell| cell.text().collect())
            .unwrap_or_default();
        let (start, end) = parse_time_span(time_text.trim(), date)?;

        rows.push(BookingRow {
            id,
            room_name,
            start,
            end,
        });
    }
    Ok(rows)
}

/// "12:00 - 13:00" on a given date.
fn parse_time_span(
    text: &str,
    date: NaiveDate,
) -> Result<(NaiveDateTime, NaiveDateTime), ProviderError> {
    let mut parts = text.split(" - ");
    let (Some(start), Some(end)) = (parts.next(), parts.next()) else {
        return Err(ProviderError::parse(format!("bad time span: {text}")));
    };
    let at = |clock: &str| {
        NaiveDateTime::parse_from_str(
            &format!("{date}T{clock}", date = date.format("%Y-%m-%d")),
            "%Y-%m-%dT%H:%M",
        )
        .map_err(|_| ProviderError::parse(format!("bad time: {clock}")))
    };
    Ok((at(start.trim())?, at(end.trim())?))
}

/// The free-text purpose only exists on the per-booking detail page, in a
/// details table row whose label cell reads "Egen text".
fn parse_booking_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let row_selector = Selector::parse(".detailedResObjects tr").ok()?;
    let label_selector = Selector::parse(".columnname").ok()?;
    let value_selector = Selector::parse(".pr").ok()?;

    for row in document.select(&row_selector) {
        let label: String = row
            .select(&label_selector)
            .next()
            .map(|cell| cell.text().collect())
            .unwrap_or_default();
        if label.trim() == TEXT_LABEL {
            let value: String = row
                .select(&value_selector)
                .next()
                .map(|cell| cell.text().collect())
                .unwrap_or_default();
            return Some(value.trim().to_string());
        }
    }
    None
}

#[async_trait]
impl BookingProvider for TimeEditProvider {
    fn name(&self) -> &str {
        self.instance.provider_name()
    }

    async fn available(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Room>, ProviderError> {
        let date = start.format("%Y%m%d");
        let extra = format!(
            "dates={date}-{date}&starttime={}&endtime={}",
            start.format("%H:%M"),
            end.format("%H:%M"),
        );

        let rooms = self
            .fetch_rooms(&extra)
            .await?
            .into_iter()
            .map(|(name, _)| self.room_for(&name))
            .collect();
        Ok(rooms)
    }

    async fn book(&self, booking: &Booking) -> Result<String, ProviderError> {
        let book_url = format!("{}/ri1Q5008.html", self.base_url());
        let object_id = self.object_id(&booking.room.id)?.to_string();

        // Two values under one key: the room object and the fixed purpose.
        let form = vec![
            ("o".to_string(), object_id),
            ("o".to_string(), OTHER_PURPOSE.to_string()),
            ("dates".to_string(), booking.start.format("%Y%m%d").to_string()),
            ("starttime".to_string(), booking.start.format("%H:%M").to_string()),
            ("endtime".to_string(), booking.end.format("%H:%M").to_string()),
            ("fe2".to_string(), booking.text.clone()),
            ("fe8".to_string(), BOOKING_NOTE.to_string()),
            ("url".to_string(), book_url.clone()),
        ];

        let response = self.client.post(&book_url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let reason = if body.trim().is_empty() {
                format!("booking failed ({status})")
            } else {
                body.trim().to_string()
            };
            return Err(ProviderError::Rejected(reason));
        }
        // The portal echoes the reservation reference in the response body.
        Ok(body.trim().to_string())
    }

    async fn unbook(&self, booking: &Booking) -> Result<(), ProviderError> {
        let url = format!("{}/my.html?id={}", self.base_url(), booking.id);
        let response = self.client.delete(&url).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Rejected(format!(
                "couldn't cancel booking {} ({})",
                booking.id,
                response.status()
            )));
        }
        Ok(())
    }

    async fn my_bookings(&self) -> Result<Vec<Booking>, ProviderError> {
        let url = format!("{}/my.html", self.base_url());
        let body = self.client.get(&url).send().await?.text().await?;
        let rows = parse_bookings_page(&body)?;

        let mut bookings = Vec::with_capacity(rows.len());
        for row in rows {
            let text = self.fetch_booking_text(&row.id).await?;
            bookings.push(Booking {
                room: self.room_for(&row.room_name),
                start: row.start,
                end: row.end,
                text,
                id: row.id,
            });
        }
        Ok(bookings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_slugs_and_cookies() {
        assert_eq!(Instance::Chalmers.slug(), "chalmers");
        assert_eq!(Instance::Chalmers.session_cookie(), "TEchalmersweb");
        assert_eq!(Instance::Chalmers.sso_segment(), "saml2");
        assert_eq!(Instance::ChalmersTest.slug(), "chalmers_test");
        assert_eq!(Instance::ChalmersTest.session_cookie(), "TEchalmers_testweb");
        assert_eq!(Instance::ChalmersTest.sso_segment(), "saml2_test");
    }

    #[test]
    fn test_to_username_appends_domain() {
        assert_eq!(to_username("alice"), "alice@net.chalmers.se");
        assert_eq!(to_username("alice@net.chalmers.se"), "alice@net.chalmers.se");
    }

    #[test]
    fn test_join_extra_builds_query_suffix() {
        assert_eq!(join_extra("", STUDENT_UNION_FILTER), "sid=1010");
        assert_eq!(
            join_extra("dates=20260302-20260302", STUDENT_UNION_FILTER),
            "dates=20260302-20260302&sid=1010"
        );
    }

    #[test]
    fn test_exclude_rooms_removes_union_rooms_by_name() {
        let rooms = vec![
            ("EG-3506".to_string(), "192439.186".to_string()),
            ("Bulten".to_string(), "200001.186".to_string()),
            ("F4058".to_string(), "192440.186".to_string()),
        ];
        let union_rooms = vec![("Bulten".to_string(), "200001.186".to_string())];

        let kept = exclude_rooms(rooms, &union_rooms);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|(name, _)| name != "Bulten"));
    }

    #[test]
    fn test_parse_objects_page_normal() {
        let body = r#"{
            "hasMore": true,
            "objects": [
                {"idAndType": "192439.186", "fields": {"Lokalsignatur": " EG-3506 "}},
                {"idAndType": "192440.186", "fields": {"Lokalsignatur": "EG-3508"}}
            ]
        }"#;
        let page = parse_objects_page(body).unwrap().unwrap();
        assert!(page.has_more);
        assert_eq!(page.objects.len(), 2);
        assert_eq!(page.objects[0].id_and_type, "192439.186");
    }

    #[test]
    fn test_parse_objects_page_sentinel_ends_pagination() {
        let page = parse_objects_page("\"Inga sökresultat\"").unwrap();
        assert!(page.is_none());
        // surrounding whitespace still counts as the sentinel
        let page = parse_objects_page("  \"Inga sökresultat\"\n").unwrap();
        assert!(page.is_none());
    }

    #[test]
    fn test_parse_objects_page_garbage_is_parse_failure() {
        assert!(matches!(
            parse_objects_page("<html>maintenance</html>"),
            Err(ProviderError::Parse(_))
        ));
    }

    const BOOKINGS_PAGE: &str = r#"
        <html><body><div id="texttable"><table>
            <tr><td>Hjälp</td></tr>
            <tr><td>Datum Tid Lokal</td></tr>
            <tr><td class="headline t">Mån 2026-03-02 v.10</td></tr>
            <tr data-id="515580">
                <td class="time">12:00 - 13:00</td>
                <td class="column0">EG-3506, Johanneberg</td>
            </tr>
            <tr data-id="515581">
                <td class="time">15:00 - 17:00</td>
                <td class="column0">F4058, Johanneberg</td>
            </tr>
            <tr><td class="headline t">Tis 2026-03-03 v.10</td></tr>
            <tr data-id="515590">
                <td class="time">08:00 - 10:00</td>
                <td class="column0">SB-G065, Lindholmen</td>
            </tr>
        </table></div></body></html>
    "#;

    #[test]
    fn test_parse_bookings_page() {
        let rows = parse_bookings_page(BOOKINGS_PAGE).unwrap();
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].id, "515580");
        assert_eq!(rows[0].room_name, "EG-3506");
        assert_eq!(rows[0].start.to_string(), "2026-03-02 12:00:00");
        assert_eq!(rows[0].end.to_string(), "2026-03-02 13:00:00");

        // rows after the second heading pick up the new date
        assert_eq!(rows[2].id, "515590");
        assert_eq!(rows[2].start.to_string(), "2026-03-03 08:00:00");
    }

    #[test]
    fn test_parse_bookings_page_empty_table() {
        let html = r#"
            <div id="texttable"><table>
                <tr><td>Hjälp</td></tr>
                <tr><td>Datum Tid Lokal</td></tr>
            </table></div>
        "#;
        let rows = parse_bookings_page(html).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_parse_bookings_row_before_heading_is_parse_failure() {
        let html = r#"
            <div id="texttable"><table>
                <tr><td>Hjälp</td></tr>
                <tr><td>Datum Tid Lokal</td></tr>
                <tr data-id="515580">
                    <td class="time">12:00 - 13:00</td>
                    <td class="column0">EG-3506, Johanneberg</td>
                </tr>
            </table></div>
        "#;
        assert!(matches!(
            parse_bookings_page(html),
            Err(ProviderError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_bookings_row_without_data_id_is_parse_failure() {
        let html = r#"
            <div id="texttable"><table>
                <tr><td>Hjälp</td></tr>
                <tr><td>Datum Tid Lokal</td></tr>
                <tr><td class="headline t">Mån 2026-03-02 v.10</td></tr>
                <tr>
                    <td class="time">12:00 - 13:00</td>
                    <td class="column0">EG-3506, Johanneberg</td>
                </tr>
            </table></div>
        "#;
        assert!(matches!(
            parse_bookings_page(html),
            Err(ProviderError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_booking_text_matches_label() {
        let html = r#"
            <table class="detailedResObjects">
                <tr><td class="columnname">Lokal</td><td class="pr">EG-3506</td></tr>
                <tr><td class="columnname">Egen text</td><td class="pr"> group meeting </td></tr>
            </table>
        "#;
        assert_eq!(parse_booking_text(html), Some("group meeting".to_string()));
    }

    #[test]
    fn test_parse_booking_text_absent_label() {
        let html = r#"
            <table class="detailedResObjects">
                <tr><td class="columnname">Lokal</td><td class="pr">EG-3506</td></tr>
            </table>
        "#;
        assert_eq!(parse_booking_text(html), None);
    }

    #[test]
    fn test_parse_time_span_rejects_malformed() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert!(parse_time_span("12:00", date).is_err());
        assert!(parse_time_span("12:00 - notatime", date).is_err());
    }
}
