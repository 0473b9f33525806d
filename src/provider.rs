use crate::error::ProviderError;
use crate::models::{Booking, Room};
use async_trait::async_trait;
use chrono::NaiveDateTime;

/// Capability contract every back-end adapter implements.
///
/// An adapter owns its HTTP client and cookie jar and authenticates once at
/// construction; every method here runs against an already-established session.
#[async_trait]
pub trait BookingProvider: Send + Sync {
    /// Registry key; `Room.provider` on everything this adapter returns must
    /// match it.
    fn name(&self) -> &str;

    /// Rooms free for the whole span.
    async fn available(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Room>, ProviderError>;

    /// Creates the reservation and returns the provider-assigned booking id.
    async fn book(&self, booking: &Booking) -> Result<String, ProviderError>;

    /// Cancels by `booking.id`.
    async fn unbook(&self, booking: &Booking) -> Result<(), ProviderError>;

    /// The user's current reservations on this back-end.
    async fn my_bookings(&self) -> Result<Vec<Booking>, ProviderError>;
}
