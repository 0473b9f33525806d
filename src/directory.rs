use crate::error::{DirectoryError, ProviderError, ServiceError};
use crate::models::{Booking, Room};
use crate::provider::BookingProvider;
use chrono::NaiveDateTime;
use futures::future::join_all;
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Routes single-provider calls and fans multi-provider calls out across every
/// registered adapter.
///
/// Fan-out joins all provider tasks before returning; a slow or failing
/// provider never hides the others' results. Each task is bounded by
/// `call_timeout`, so total fan-out latency is bounded as well.
pub struct Directory {
    providers: HashMap<String, Box<dyn BookingProvider>>,
    call_timeout: Duration,
}

impl Directory {
    /// Builds the registry keyed by each adapter's `name()`. Duplicate names
    /// are a wiring bug and rejected here rather than at call time.
    pub fn new(providers: Vec<Box<dyn BookingProvider>>) -> Result<Self, DirectoryError> {
        let mut map: HashMap<String, Box<dyn BookingProvider>> = HashMap::new();
        for provider in providers {
            let name = provider.name().to_string();
            if map.insert(name.clone(), provider).is_some() {
                return Err(DirectoryError::DuplicateProvider(name));
            }
        }
        Ok(Self {
            providers: map,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    fn route(&self, room: &Room) -> Result<&dyn BookingProvider, DirectoryError> {
        if self.providers.is_empty() {
            return Err(DirectoryError::NoProviders);
        }
        self.providers
            .get(&room.provider)
            .map(|p| p.as_ref())
            .ok_or_else(|| DirectoryError::ProviderNotFound(room.provider.clone()))
    }

    /// Routed call; no fan-out. Fails before touching any adapter when the
    /// booking is invalid or its provider is not registered.
    pub async fn book(&self, booking: &Booking) -> Result<String, DirectoryError> {
        booking
            .validate()
            .map_err(DirectoryError::InvalidBooking)?;
        let provider = self.route(&booking.room)?;
        Ok(provider.book(booking).await?)
    }

    /// Routed call; cancels by `booking.id` on the owning provider.
    pub async fn unbook(&self, booking: &Booking) -> Result<(), DirectoryError> {
        let provider = self.route(&booking.room)?;
        Ok(provider.unbook(booking).await?)
    }

    /// Concurrent fan-out. Succeeds with the unordered union plus a (possibly
    /// empty) per-provider error list as long as at least one provider
    /// answered; fails only when every provider failed.
    pub async fn available(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<(Vec<Room>, Vec<ServiceError>), DirectoryError> {
        if self.providers.is_empty() {
            return Err(DirectoryError::NoProviders);
        }

        let tasks = self.providers.iter().map(|(name, provider)| async move {
            let result =
                match tokio::time::timeout(self.call_timeout, provider.available(start, end)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::TimedOut),
                };
            (name.as_str(), result)
        });

        let mut rooms = Vec::new();
        let mut errors = Vec::new();
        for (name, result) in join_all(tasks).await {
            match result {
                Ok(mut found) => rooms.append(&mut found),
                Err(err) => {
                    tracing::error!("couldn't get available rooms from provider {}: {}", name, err);
                    errors.push(ServiceError::new(name, err));
                }
            }
        }

        if rooms.is_empty() && errors.len() == self.providers.len() {
            return Err(DirectoryError::AllProvidersFailed(errors));
        }
        Ok((rooms, errors))
    }

    /// Concurrent fan-out over every provider's personal bookings; same
    /// partial-failure policy as [`Directory::available`].
    pub async fn my_bookings(&self) -> Result<(Vec<Booking>, Vec<ServiceError>), DirectoryError> {
        if self.providers.is_empty() {
            return Err(DirectoryError::NoProviders);
        }

        let tasks = self.providers.iter().map(|(name, provider)| async move {
            let result = match tokio::time::timeout(self.call_timeout, provider.my_bookings()).await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::TimedOut),
            };
            (name.as_str(), result)
        });

        let mut bookings = Vec::new();
        let mut errors = Vec::new();
        for (name, result) in join_all(tasks).await {
            match result {
                Ok(mut found) => bookings.append(&mut found),
                Err(err) => {
                    tracing::error!("couldn't get bookings from provider {}: {}", name, err);
                    errors.push(ServiceError::new(name, err));
                }
            }
        }

        if bookings.is_empty() && errors.len() == self.providers.len() {
            return Err(DirectoryError::AllProvidersFailed(errors));
        }
        Ok((bookings, errors))
    }
}
