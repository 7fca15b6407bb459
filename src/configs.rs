//! Configuration of the ranging session
//!
//! [`TagConfig`] holds everything that shapes a ranging session: how many
//! polls are broadcast and how far apart, how the listening phase is sliced,
//! and how many anchor responses are kept. [`RadioSettings`] describes the
//! channel and antenna the radio uses for a given poll or listening window.

use serde::{Deserialize, Serialize};

use crate::time::Duration;

/// Capacity of the broadcast send-time log and of the TOA array of each
/// anchor response
pub const MAX_BROADCASTS: usize = 32;

/// Capacity of the anchor response store
pub const MAX_ANCHOR_RESPONSES: usize = 16;

/// Number of antennas the tag switches between
pub const NUM_ANTENNAS: u8 = 3;

/// The channels a ranging session hops through, in order
pub const RANGING_CHANNELS: [UwbChannel; 3] = [
    UwbChannel::Channel1,
    UwbChannel::Channel3,
    UwbChannel::Channel5,
];

/// Preamble and PHY header air time assumed for every frame
pub const PREAMBLE_US: u32 = 90;

/// Time the firmware needs between reading the clock and the radio actually
/// being ready to transmit
pub const TX_PROCESSING_MARGIN_US: u32 = 150;

/// Length of the frame check sequence the radio appends to every frame
pub const FCS_LEN: usize = 2;

/// Configuration of a ranging tag
///
/// The defaults match the values the tag firmware ships with.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TagConfig {
    /// PAN ID shared by tags and anchors
    pub pan_id: u16,
    /// Number of poll packets broadcast per session (`N`)
    pub broadcast_count: u8,
    /// Time between two poll broadcasts, in microseconds
    pub broadcast_period_us: u32,
    /// Number of listening windows after the broadcasts
    pub listening_window_count: u8,
    /// Duration of one listening window, in microseconds
    pub listening_window_us: u32,
    /// Duration of one anchor slot within a listening window, in microseconds
    pub listening_slot_us: u16,
    /// Maximum number of anchor responses kept per session
    pub max_anchor_responses: u8,
    /// TX antenna delay, in device time units
    pub tx_antenna_delay: u16,
    /// RX antenna delay, in device time units
    pub rx_antenna_delay: u16,
    /// Auto-acknowledgement response time, in symbols
    pub ack_response_time: u8,
    /// Delay between the last poll and the receiver being turned on, in
    /// microseconds
    pub rx_after_tx_delay_us: u32,
}

impl Default for TagConfig {
    fn default() -> Self {
        TagConfig {
            pan_id: 0x6611,
            broadcast_count: 30,
            broadcast_period_us: 2_000,
            listening_window_count: 3,
            listening_window_us: 8_000,
            listening_slot_us: 1_000,
            max_anchor_responses: 10,
            tx_antenna_delay: 16_300,
            rx_antenna_delay: 16_456,
            ack_response_time: 5,
            rx_after_tx_delay_us: 1,
        }
    }
}

impl TagConfig {
    /// Checks that the configuration can be run with the crate's capacities
    ///
    /// Returns `false` for zero counts, counts that exceed [`MAX_BROADCASTS`]
    /// or [`MAX_ANCHOR_RESPONSES`], zero periods, and listening windows
    /// shorter than a single slot.
    pub fn is_valid(&self) -> bool {
        let broadcasts = self.broadcast_count as usize;
        let anchors = self.max_anchor_responses as usize;

        (1..=MAX_BROADCASTS).contains(&broadcasts)
            && (1..=MAX_ANCHOR_RESPONSES).contains(&anchors)
            && self.listening_window_count > 0
            && self.broadcast_period_us > 0
            && self.listening_slot_us > 0
            && self.listening_window_us >= self.listening_slot_us as u32
    }

    /// The number of broadcasts as used for indexing
    pub fn broadcasts(&self) -> usize {
        self.broadcast_count as usize
    }

    /// Time between reading the clock and the delayed transmission of a frame
    /// that is `frame_len` bytes long (without FCS)
    ///
    /// Covers the air time of the frame at 6.8 Mbps, its preamble and a fixed
    /// margin for the firmware.
    pub fn packet_delay(frame_len: usize) -> Duration {
        let bits = ((frame_len + FCS_LEN) * 8) as u32;
        // 6.8 Mbps is 6.8 bits per microsecond.
        let air_time_us = (bits * 10 + 67) / 68;

        Duration::from_micros(PREAMBLE_US + air_time_us + TX_PROCESSING_MARGIN_US)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The UWB channels used for ranging
///
/// Only the 499.2 MHz channels are used, so consecutive polls see comparable
/// range bias.
pub enum UwbChannel {
    /// Channel 1
    /// - Center frequency: 3494.4 Mhz
    /// - Bandwidth: 499.2 Mhz
    Channel1 = 1,
    /// Channel 3
    /// - Center frequency: 4492.8 Mhz
    /// - Bandwidth: 499.2 Mhz
    Channel3 = 3,
    /// Channel 5
    /// - Center frequency: 6489.6 Mhz
    /// - Bandwidth: 499.2 Mhz
    Channel5 = 5,
}

/// Radio settings for one poll broadcast or one listening window
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RadioSettings {
    /// The channel to transmit or receive on
    pub channel: UwbChannel,
    /// The antenna to use, `0..NUM_ANTENNAS`
    pub antenna: u8,
}

impl RadioSettings {
    /// Settings for the poll with the given subsequence index
    ///
    /// The antenna changes with every poll, the channel after every full round
    /// of antennas, so a burst covers every channel/antenna pair.
    pub fn for_subsequence(subsequence: u8) -> Self {
        let round = (subsequence / NUM_ANTENNAS) as usize;

        RadioSettings {
            channel: RANGING_CHANNELS[round % RANGING_CHANNELS.len()],
            antenna: subsequence % NUM_ANTENNAS,
        }
    }

    /// Settings for the listening window with the given index
    pub fn for_listening_window(window: u8) -> Self {
        RadioSettings {
            channel: RANGING_CHANNELS[window as usize % RANGING_CHANNELS.len()],
            antenna: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TagConfig::default().is_valid());
    }

    #[test]
    fn config_outside_capacity_is_invalid() {
        let too_many_polls = TagConfig {
            broadcast_count: MAX_BROADCASTS as u8 + 1,
            ..TagConfig::default()
        };
        let no_anchors = TagConfig {
            max_anchor_responses: 0,
            ..TagConfig::default()
        };
        let no_windows = TagConfig {
            listening_window_count: 0,
            ..TagConfig::default()
        };
        let short_window = TagConfig {
            listening_window_us: 10,
            listening_slot_us: 100,
            ..TagConfig::default()
        };

        assert!(!too_many_polls.is_valid());
        assert!(!no_anchors.is_valid());
        assert!(!no_windows.is_valid());
        assert!(!short_window.is_valid());
    }

    #[test]
    fn subsequences_cycle_antennas_then_channels() {
        let settings: [RadioSettings; 4] = [
            RadioSettings::for_subsequence(0),
            RadioSettings::for_subsequence(2),
            RadioSettings::for_subsequence(3),
            RadioSettings::for_subsequence(9),
        ];

        assert_eq!(settings[0], RadioSettings { channel: UwbChannel::Channel1, antenna: 0 });
        assert_eq!(settings[1], RadioSettings { channel: UwbChannel::Channel1, antenna: 2 });
        assert_eq!(settings[2], RadioSettings { channel: UwbChannel::Channel3, antenna: 0 });
        assert_eq!(settings[3], RadioSettings { channel: UwbChannel::Channel1, antenna: 0 });
    }

    #[test]
    fn listening_windows_hop_channels() {
        assert_eq!(RadioSettings::for_listening_window(0).channel, UwbChannel::Channel1);
        assert_eq!(RadioSettings::for_listening_window(1).channel, UwbChannel::Channel3);
        assert_eq!(RadioSettings::for_listening_window(2).channel, UwbChannel::Channel5);
        assert_eq!(RadioSettings::for_listening_window(3).channel, UwbChannel::Channel1);
    }

    #[test]
    fn packet_delay_grows_with_length() {
        let short = TagConfig::packet_delay(10);
        let long = TagConfig::packet_delay(100);

        assert!(long.value() > short.value());
        assert!(short.value() >= Duration::from_micros(PREAMBLE_US + TX_PROCESSING_MARGIN_US).value());
    }
}
