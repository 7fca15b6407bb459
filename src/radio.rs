//! Interface to the radio
//!
//! The tag logic doesn't talk to the DW1000 directly. It uses the [`Radio`]
//! trait, which the application implements on top of its driver. Every method
//! is expected to return promptly; they are called from interrupt context.

use core::fmt::Debug;

use crate::{configs::RadioSettings, mac, time::Instant};

/// Which frames the radio's frame filter lets through
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameFilter {
    /// Accept data frames
    pub data: bool,
    /// Accept acknowledgement frames
    pub ack: bool,
}

/// How the radio behaves while sleeping and waking up
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SleepConfig {
    /// Reload the LDO tune value from OTP on wake-up
    pub load_ldo_tune: bool,
    /// Wake up on chip select
    pub wake_on_chip_select: bool,
}

/// How a transmission is started
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StartTx {
    /// Wait for the delayed send time instead of sending right away
    pub delayed: bool,
    /// Turn on the receiver after the transmission
    pub response_expected: bool,
}

/// A reception error reported by the radio
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxError {
    /// PHY header error
    Phy,

    /// Frame check sequence error or another receiver error
    Fcs,

    /// Reed Solomon frame sync loss
    SyncLoss,

    /// SFD timeout
    SfdTimeout,

    /// Preamble detection timeout
    PreambleTimeout,
}

/// The radio as far as the tag is concerned
///
/// The first group of methods configures the radio once, see
/// [`Tag::init`](crate::tag::Tag::init). The rest is used while a ranging
/// session runs.
pub trait Radio {
    /// Error reported by the driver
    type Error: Debug;

    /// Configures which frames get through the frame filter
    fn enable_frame_filter(&mut self, filter: FrameFilter) -> Result<(), Self::Error>;

    /// Sets this node's extended address
    fn set_eui(&mut self, eui: mac::ExtendedAddress) -> Result<(), Self::Error>;

    /// Sets the PAN ID used for frame filtering
    fn set_pan_id(&mut self, pan_id: mac::PanId) -> Result<(), Self::Error>;

    /// Re-enables the receiver automatically after a bad frame
    fn set_auto_rx_reenable(&mut self, enable: bool) -> Result<(), Self::Error>;

    /// Receives into two alternating buffers
    fn set_double_buffered_rx(&mut self, enable: bool) -> Result<(), Self::Error>;

    /// Acknowledges frames automatically, after `response_time` symbols
    fn enable_auto_ack(&mut self, response_time: u8) -> Result<(), Self::Error>;

    /// Whether an LDO tune value is programmed into OTP
    fn has_ldo_tune(&mut self) -> Result<bool, Self::Error>;

    /// Configures sleep and wake-up behaviour
    fn configure_sleep(&mut self, config: SleepConfig) -> Result<(), Self::Error>;

    /// Sets the RX and TX antenna delays
    fn set_antenna_delay(&mut self, rx_delay: u16, tx_delay: u16) -> Result<(), Self::Error>;

    /// Sets the TX antenna delay only
    fn set_tx_antenna_delay(&mut self, tx_delay: u16) -> Result<(), Self::Error>;

    /// Selects channel and antenna for the next transmission or reception
    fn apply_settings(&mut self, settings: RadioSettings) -> Result<(), Self::Error>;

    /// Turns transmitter and receiver off
    fn force_idle(&mut self) -> Result<(), Self::Error>;

    /// Reads the current system time
    fn sys_time(&mut self) -> Result<Instant, Self::Error>;

    /// Programs the time of the next delayed transmission
    ///
    /// The argument is the upper 32 bits of the 40-bit timestamp. The radio
    /// ignores its lowest bit.
    fn set_delayed_time(&mut self, truncated: u32) -> Result<(), Self::Error>;

    /// Writes a frame into the TX buffer, including the frame length
    ///
    /// The radio appends the two-octet FCS.
    fn write_tx_data(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Sets how long after a transmission the receiver is turned on, if the
    /// transmission expects a response
    fn set_rx_after_tx_delay(&mut self, delay_us: u32) -> Result<(), Self::Error>;

    /// Starts the transmission of the frame in the TX buffer
    fn start_tx(&mut self, mode: StartTx) -> Result<(), Self::Error>;
}
