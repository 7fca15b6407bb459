//! Time-related types based on the DW1000's system time
//!
//! The DW1000 counts time in 40-bit timestamps with a nominal resolution of
//! 1/64 ns. Several places hand out truncated versions of those timestamps:
//! delayed transmission times are programmed with the upper 32 bits only, and
//! anchors report their send time the same way. This module widens all of
//! them into one clock domain, a 40-bit value stored in a `u64`, so they can
//! be compared with each other.


use serde::{Serialize, Deserialize};


/// The maximum value of 40-bit system time stamps.
pub const TIME_MAX: u64 = 0xffffffffff;

/// Number of low-order bits dropped by the 32-bit truncated timestamps
pub const TRUNCATED_SHIFT: u32 = 8;

/// Number of bytes of a raw timestamp as read from the DW1000
pub const RAW_TIMESTAMP_LEN: usize = 5;


/// Represents an instant in time
///
/// Internally uses the same 40-bit timestamps that the DW1000 uses.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
pub struct Instant(u64);

impl Instant {
    /// Creates a new instance of `Instant`
    ///
    /// The given value must fit in a 40-bit timestamp, so:
    /// 0 <= `value` <= 2^40 - 1
    ///
    /// Returns `Some(...)`, if `value` is within the valid range, `None` if it
    /// isn't.
    ///
    /// # Example
    ///
    /// ``` rust
    /// use dw1000_tag::time::{
    ///     TIME_MAX,
    ///     Instant,
    /// };
    ///
    /// let valid_instant   = Instant::new(TIME_MAX);
    /// let invalid_instant = Instant::new(TIME_MAX + 1);
    ///
    /// assert!(valid_instant.is_some());
    /// assert!(invalid_instant.is_none());
    /// ```
    pub fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Instant(value))
        }
        else {
            None
        }
    }

    /// Widens a truncated 32-bit timestamp
    ///
    /// The truncated form holds the upper 32 bits of a 40-bit timestamp. It is
    /// what the delayed send register takes, and what anchors put into their
    /// final messages. The low 8 bits of the result are zero.
    ///
    /// # Example
    ///
    /// ``` rust
    /// use dw1000_tag::time::{
    ///     TIME_MAX,
    ///     Instant,
    /// };
    ///
    /// assert_eq!(Instant::from_truncated(0x0000_0001).value(), 0x100);
    /// assert_eq!(Instant::from_truncated(u32::MAX).value(), TIME_MAX - 0xff);
    /// ```
    pub fn from_truncated(value: u32) -> Self {
        // A `u32` shifted by 8 bits takes up at most 40 bits.
        Instant((value as u64) << TRUNCATED_SHIFT)
    }

    /// Reads a raw 5-byte little-endian timestamp as delivered by the radio
    pub fn from_raw(bytes: [u8; RAW_TIMESTAMP_LEN]) -> Self {
        let value = bytes
            .iter()
            .rev()
            .fold(0u64, |value, &b| (value << 8) | b as u64);

        Instant(value)
    }

    /// Returns the raw 40-bit timestamp
    ///
    /// The returned value is guaranteed to be in the following range:
    /// 0 <= `value` <= 2^40 - 1
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the upper 32 bits of the timestamp
    ///
    /// This is the inverse of [`Instant::from_truncated`], minus the 8 bits of
    /// resolution that get lost.
    pub fn truncated(&self) -> u32 {
        (self.0 >> TRUNCATED_SHIFT) as u32
    }

    /// Returns the amount of time passed between the two `Instant`s
    ///
    /// Assumes that `&self` represents a later time than the argument
    /// `earlier`. Please make sure that this is the case, as this method has no
    /// way of knowing (DW1000 timestamps can overflow, so comparing the
    /// numerical value of the timestamp doesn't tell anything about order).
    ///
    /// # Example
    ///
    /// ``` rust
    /// use dw1000_tag::time::{
    ///     TIME_MAX,
    ///     Instant,
    /// };
    ///
    /// let instant_1 = Instant::new(TIME_MAX - 50).unwrap();
    /// let instant_2 = Instant::new(TIME_MAX).unwrap();
    /// let instant_3 = Instant::new(49).unwrap();
    ///
    /// let duration = instant_2.duration_since(instant_1);
    /// assert_eq!(duration.value(), 50);
    ///
    /// // Still works as expected, if the later timestamp is the numerically
    /// // smaller value.
    /// let duration = instant_3.duration_since(instant_2);
    /// assert_eq!(duration.value(), 50);
    /// ```
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        if self.value() >= earlier.value() {
            Duration(self.value() - earlier.value())
        }
        else {
            Duration(TIME_MAX - earlier.value() + self.value() + 1)
        }
    }
}


/// A duration between two instants in DW1000 system time
///
/// Internally uses the same 40-bit timestamps that the DW1000 uses.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
pub struct Duration(u64);

impl Duration {
    /// Creates an instance of `Duration` from a number of microseconds
    ///
    /// Saturates at `TIME_MAX`, which is about 17 seconds.
    pub fn from_micros(micros: u32) -> Self {
        Duration((micros as u64 * 64_000).min(TIME_MAX))
    }

    /// Returns the raw 40-bit timestamp
    ///
    /// The returned value is guaranteed to be in the following range:
    /// 0 <= `value` <= 2^40 - 1
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the duration in units of the truncated 32-bit timestamps
    ///
    /// Rounds down.
    pub fn truncated(&self) -> u32 {
        (self.0 >> TRUNCATED_SHIFT) as u32
    }
}
