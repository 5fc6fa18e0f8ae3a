//! Definition of counters, used for retry attempts, escalation, and message IDs.

/// Counter error variants.
#[non_exhaustive]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The counter wrapped around its maximum allowed value and was reset.
    #[error("counter exceeded its maximum value")]
    Exceeded,
}

/// A counter structure, used for detecting overruns (e.g. retries).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Counter {
    value: u8,
    max_value: u8,
}

/// The type of counter that can be created.
#[derive(Debug, Clone, Copy)]
pub enum CounterType {
    /// Hard resets that were sent without reaching an explicit contract.
    HardReset,
    /// The rolling message ID.
    MessageId,
    /// Transmission retries after a discarded message.
    Retry,
    /// Consecutive timeouts while waiting for a reply.
    ReplyTimeout,
    /// Consecutive discarded or unparsable received messages.
    RxFailure,
}

impl Counter {
    /// Create a new counter of a provided type.
    pub fn new(counter_type: CounterType) -> Self {
        // See USB PD specification, [Table 6.70]
        let max_value = match counter_type {
            CounterType::HardReset => 2,
            CounterType::MessageId => 7,
            CounterType::Retry => 2,
            // The third consecutive timeout escalates.
            CounterType::ReplyTimeout => 2,
            CounterType::RxFailure => 4,
        };

        Self { value: 0, max_value }
    }

    /// Create a new counter of a provided type from an initial value.
    pub fn new_from_value(counter_type: CounterType, value: u8) -> Self {
        let mut counter = Self::new(counter_type);
        counter.set(value);
        counter
    }

    /// Set a new counter value, wrapped to the maximum counter value.
    pub fn set(&mut self, value: u8) {
        self.value = value % (self.max_value + 1);
    }

    /// The counter value.
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Increment a counter.
    ///
    /// If it wraps, this returns an error.
    pub fn increment(&mut self) -> Result<(), Error> {
        self.set(self.value + 1);

        if self.value == 0 {
            Err(Error::Exceeded)
        } else {
            Ok(())
        }
    }

    /// Reset a counter value to zero.
    pub fn reset(&mut self) {
        self.value = 0;
    }
}
