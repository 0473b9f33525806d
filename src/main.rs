mod config;
mod credentials;
mod directory;
mod error;
mod filter;
mod http_client;
mod models;
mod provider;
mod providers;
mod ranking;
mod server;
mod session;
mod timespec;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use config::Config;
use directory::Directory;
use filter::RoomFilter;
use models::{Booking, Room};
use provider::BookingProvider;
use providers::timeedit::{Instance, TimeEditProvider};
use providers::union_portal::UnionPortalProvider;
use ranking::{FileRankingStore, RankingStore};
use std::io::Write;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "roombook")]
#[command(about = "Book group rooms across campus booking portals", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available rooms for a day and time span
    Available {
        /// Day: today, tomorrow, a weekday, a day of month or mmdd
        day: String,
        /// Time span: 12-14, 1230-1400, 8:30-10 or lunch
        time: String,
        #[arg(long)]
        campus: Option<String>,
        #[arg(long)]
        min_seats: Option<u32>,
        #[arg(long)]
        json: bool,
    },
    /// Book a room, picked interactively from the ranked availability list
    Book {
        day: String,
        time: String,
        /// Text attached to the booking
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        campus: Option<String>,
        #[arg(long)]
        min_seats: Option<u32>,
    },
    /// List your bookings across every portal
    List {
        #[arg(long)]
        json: bool,
    },
    /// Cancel a booking by id
    Delete {
        id: String,
        /// Provider owning the booking; defaults to the configured TimeEdit
        /// instance
        #[arg(long)]
        provider: Option<String>,
    },
    /// Run the HTTP API server
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load or create config first (before logging is initialized)
    let config = Config::load()?;
    if !std::path::Path::new("data/config.yaml").exists() {
        eprintln!("No config file found, creating default data/config.yaml");
        Config::create_default()?;
        eprintln!("Please edit data/config.yaml with your portal login");
        return Ok(());
    }

    // Initialize logging - use RUST_LOG env var if set, otherwise use config
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    } else {
        let level = config.tracing_level.to_lowercase();
        let max_level = match level.as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => {
                eprintln!("Invalid tracing level '{}', using 'info'", level);
                tracing::Level::INFO
            }
        };
        tracing_subscriber::fmt().with_max_level(max_level).init();
    }

    match args.command {
        Command::Available {
            day,
            time,
            campus,
            min_seats,
            json,
        } => available(&config, &day, &time, campus, min_seats, json).await,
        Command::Book {
            day,
            time,
            message,
            campus,
            min_seats,
        } => book(&config, &day, &time, message, campus, min_seats).await,
        Command::List { json } => list(&config, json).await,
        Command::Delete { id, provider } => {
            let provider = provider.unwrap_or_else(|| default_provider(&config).to_string());
            delete(&config, &id, &provider).await
        }
        Command::Serve => server::serve(config).await,
    }
}

fn instance_for(config: &Config) -> Instance {
    if config.use_test_instance {
        Instance::ChalmersTest
    } else {
        Instance::Chalmers
    }
}

/// Registry key the configured TimeEdit instance registers under; the delete
/// command falls back to it when no provider is given.
fn default_provider(config: &Config) -> &'static str {
    instance_for(config).provider_name()
}

/// Logs in to every enabled portal and builds the provider registry.
async fn build_directory(config: &Config) -> Result<Directory> {
    config.require_login()?;

    let instance = instance_for(config);

    let mut providers: Vec<Box<dyn BookingProvider>> = Vec::new();
    let timeedit = TimeEditProvider::connect(
        instance,
        &config.username,
        &config.password,
        &config.user_agent,
        config.room_info_url.as_deref(),
    )
    .await
    .context("connecting to TimeEdit")?;
    providers.push(Box::new(timeedit));

    if config.union_portal {
        let union =
            UnionPortalProvider::connect(&config.username, &config.password, &config.user_agent)
                .await
                .context("connecting to the union portal")?;
        providers.push(Box::new(union));
    }

    let directory = Directory::new(providers)?
        .with_call_timeout(Duration::from_secs(config.call_timeout_seconds));
    tracing::info!("registered providers: {:?}", directory.provider_names());
    Ok(directory)
}

/// Resolves the day and time arguments into a concrete span.
fn parse_span(day: &str, time: &str) -> Result<(chrono::NaiveDateTime, chrono::NaiveDateTime)> {
    let today = Local::now().date_naive();
    let date = timespec::parse_day(day, today)?;
    let (start, end) = timespec::parse_time_span(time)?;
    Ok((date.and_time(start), date.and_time(end)))
}

/// Fetches, filters and ranks the rooms for a span. The returned list is the
/// candidate pool a booking decision is judged against.
async fn ranked_rooms(
    directory: &Directory,
    rankings: &ranking::Rankings,
    start: chrono::NaiveDateTime,
    end: chrono::NaiveDateTime,
    filter: &RoomFilter,
) -> Result<Vec<Room>> {
    let (rooms, errors) = directory.available(start, end).await?;
    for error in &errors {
        eprintln!("warning: {error}");
    }
    let mut rooms = filter.apply(rooms);
    rankings.sort(&mut rooms);
    Ok(rooms)
}

async fn available(
    config: &Config,
    day: &str,
    time: &str,
    campus: Option<String>,
    min_seats: Option<u32>,
    json: bool,
) -> Result<()> {
    let (start, end) = parse_span(day, time)?;
    let directory = build_directory(config).await?;
    let rankings = FileRankingStore::new(&config.rankings_path)?.load()?;
    let filter = RoomFilter { min_seats, campus };

    let rooms = ranked_rooms(&directory, &rankings, start, end, &filter).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rooms)?);
        return Ok(());
    }

    if rooms.is_empty() {
        println!("No rooms available {} {}", start.date(), time);
        return Ok(());
    }
    println!("Rooms available {} {}:", start.date(), time);
    print_rooms(&rooms);
    Ok(())
}

fn print_rooms(rooms: &[Room]) {
    println!("{:>3}  {:<12} {:<20} {:>5}  {}", "#", "PROVIDER", "ROOM", "SEATS", "CAMPUS");
    for (i, room) in rooms.iter().enumerate() {
        let seats = if room.seats == 0 {
            "?".to_string()
        } else {
            room.seats.to_string()
        };
        println!(
            "{:>3}  {:<12} {:<20} {:>5}  {}",
            i + 1,
            room.provider,
            room.id,
            seats,
            room.campus
        );
    }
}

async fn book(
    config: &Config,
    day: &str,
    time: &str,
    message: Option<String>,
    campus: Option<String>,
    min_seats: Option<u32>,
) -> Result<()> {
    let (start, end) = parse_span(day, time)?;
    let directory = build_directory(config).await?;
    let store = FileRankingStore::new(&config.rankings_path)?;
    let mut rankings = store.load()?;
    let filter = RoomFilter { min_seats, campus };

    let rooms = ranked_rooms(&directory, &rankings, start, end, &filter).await?;
    if rooms.is_empty() {
        println!("No rooms available {} {}", start.date(), time);
        return Ok(());
    }

    print_rooms(&rooms);
    let Some(selected) = prompt_for_room(&rooms)? else {
        println!("Aborted");
        return Ok(());
    };

    let booking = Booking {
        room: selected.clone(),
        start,
        end,
        text: message.unwrap_or_default(),
        id: String::new(),
    };
    let id = directory.book(&booking).await?;
    println!(
        "Booked {} {} {} (id {})",
        selected, start.date(), time, id
    );

    rankings.update(&selected, &rooms);
    store.save(&rankings)?;
    Ok(())
}

/// Reads a 1-based pick from stdin; empty input aborts.
fn prompt_for_room(rooms: &[Room]) -> Result<Option<Room>> {
    print!("Room number to book (empty to abort): ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let pick: usize = line
        .parse()
        .with_context(|| format!("not a number: {line}"))?;
    let room = rooms
        .get(pick.checked_sub(1).context("room numbers start at 1")?)
        .with_context(|| format!("no room numbered {pick}"))?;
    Ok(Some(room.clone()))
}

async fn list(config: &Config, json: bool) -> Result<()> {
    let directory = build_directory(config).await?;
    let (mut bookings, errors) = directory.my_bookings().await?;
    for error in &errors {
        eprintln!("warning: {error}");
    }
    bookings.sort_by_key(|booking| booking.start);

    if json {
        println!("{}", serde_json::to_string_pretty(&bookings)?);
        return Ok(());
    }

    if bookings.is_empty() {
        println!("No bookings");
        return Ok(());
    }
    println!(
        "{:<12} {:<13} {:<24} {:<20} {}",
        "DATE", "TIME", "ROOM", "TEXT", "ID"
    );
    for booking in &bookings {
        println!(
            "{:<12} {:<13} {:<24} {:<20} {}",
            booking.start.date().to_string(),
            format!(
                "{}-{}",
                booking.start.format("%H:%M"),
                booking.end.format("%H:%M")
            ),
            booking.room.to_string(),
            booking.text,
            booking.id
        );
    }
    Ok(())
}

async fn delete(config: &Config, id: &str, provider: &str) -> Result<()> {
    let directory = build_directory(config).await?;
    let booking = Booking {
        room: Room::new(provider, ""),
        start: chrono::NaiveDateTime::default(),
        end: chrono::NaiveDateTime::default(),
        text: String::new(),
        id: id.to_string(),
    };
    directory.unbook(&booking).await?;
    println!("Deleted booking {id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_provider_follows_configured_instance() {
        let mut config = Config::load().unwrap();
        config.use_test_instance = false;
        assert_eq!(default_provider(&config), "TimeEdit");
        config.use_test_instance = true;
        assert_eq!(default_provider(&config), "TimeEditTest");
    }
}
