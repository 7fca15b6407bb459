//! Tag-side ranging for DW1000 based time-of-arrival localization
//!
//! A tag finds out how far away the anchors around it are by running ranging
//! sessions. In each session it broadcasts a burst of polls, hopping through
//! antennas and channels, then listens while the anchors reply with the
//! arrival times they measured. The collected timestamps are handed to a
//! [`RangeComputation`], which turns them into distances.
//!
//! The entry point to the API is the [`Tag`] struct. It doesn't talk to the
//! DW1000 directly, but through the [`Radio`] trait, which applications
//! implement on top of their driver. Timing is done by an `embedded-hal`
//! periodic timer. The application feeds radio interrupts and timer ticks to
//! [`Tag::handle`] as [`Event`]s.
//!
//! All storage has a fixed capacity, so the crate works without an allocator.
//! Logging goes through the `log` facade, or through `defmt` with the `defmt`
//! feature enabled.

#![no_std]
#![deny(missing_docs)]

#[cfg(test)]
extern crate std;

// This must come first, so the logging macros are visible in all modules.
#[macro_use]
mod fmt;

pub mod codec;
pub mod configs;
pub mod radio;
pub mod ranging;
pub mod store;
pub mod tag;
pub mod time;

#[cfg(test)]
mod mock;

pub use ieee802154::mac;

pub use crate::{
    codec::{AnchorFinal, CodecError, MessageType, PollPacket},
    configs::{RadioSettings, TagConfig, UwbChannel},
    radio::{Radio, RxError},
    ranging::{compute_ranges, AnchorRange, RangeComputation, RangeLog},
    store::{AnchorResponseRecord, AnchorResponseStore, BroadcastSendTimeLog, SessionData},
    tag::{Error, Event, RxOutcome, SessionState, Tag},
    time::{Duration, Instant, TIME_MAX},
};
