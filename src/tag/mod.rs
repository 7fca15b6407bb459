//! The ranging session state machine
//!
//! The entry point to this API is the [`Tag`] struct. It owns the radio, the
//! timer and everything a session collects, and is driven by [`Event`]s:
//! timer ticks, transmit confirmations and reception outcomes, usually fed
//! from interrupt handlers.
//!
//! A session runs through these states:
//!
//! 1. [`SessionState::Broadcasting`]: every timer tick sends one poll.
//! 2. [`SessionState::AwaitingFinalBroadcastTxDone`]: the last poll is on its
//!    way. The radio turns on its receiver right after it.
//! 3. [`SessionState::Listening`]: the timer slices time into listening
//!    windows. Anchor final messages are collected.
//! 4. [`SessionState::ComputingRange`]: the collected data is handed to the
//!    [`RangeComputation`], then the tag is [`SessionState::Idle`] again.
//!
//! Nothing here blocks. On a platform where interrupts can preempt each other,
//! the application has to make sure that only one event is handled at a time,
//! for example by keeping the `Tag` in a critical-section mutex.

use embedded_hal::timer::{Cancel, CountDown, Periodic};

use crate::{
    codec::PollPacket,
    configs::{RadioSettings, TagConfig},
    mac,
    radio::{FrameFilter, Radio, RxError, SleepConfig},
    ranging::RangeComputation,
    store::SessionData,
    time::Instant,
};

pub use error::*;

mod broadcast;
mod error;
mod listening;
mod receive;

/// The state of the ranging session
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// No session is running
    Idle,
    /// Polls are being broadcast
    Broadcasting,
    /// The last poll was handed to the radio, its transmission is not
    /// confirmed yet
    AwaitingFinalBroadcastTxDone,
    /// Listening for anchor final messages
    Listening,
    /// The session's data is being turned into ranges
    ComputingRange,
}

/// Something the tag has to react to
#[derive(Copy, Clone, Debug)]
pub enum Event<'a> {
    /// The radio finished a transmission
    TransmitComplete,
    /// The radio reported a failed transmission
    TransmitError,
    /// The radio received a frame, or failed to
    Receive(RxOutcome<'a>),
    /// The session timer's period elapsed
    TimerTick,
}

/// The outcome of a reception
#[derive(Copy, Clone, Debug)]
pub enum RxOutcome<'a> {
    /// A frame was received
    Frame {
        /// The frame, as read from the RX buffer
        data: &'a [u8],
        /// When the frame was received, in tag time
        rx_time: Instant,
    },
    /// The reception failed
    Error(RxError),
}

/// A ranging tag
///
/// `T` is the session timer. The tag uses a single periodic timer for both
/// phases of a session, counting in microseconds.
pub struct Tag<R, T, C> {
    radio: R,
    timer: T,
    ranging: C,
    config: TagConfig,
    state: SessionState,
    poll: PollPacket,
    subsequence: u8,
    window: u8,
    timer_armed: bool,
    session: SessionData,
}

impl<R, T, C> Tag<R, T, C>
where
    R: Radio,
    T: CountDown + Periodic + Cancel,
    T::Time: From<u32>,
    C: RangeComputation,
{
    /// Creates a new tag
    ///
    /// The tag is idle. Call [`Tag::init`] before starting the first session.
    pub fn new(
        radio: R,
        timer: T,
        ranging: C,
        config: TagConfig,
    ) -> Result<Self, Error<R::Error>> {
        if !config.is_valid() {
            return Err(Error::InvalidConfiguration);
        }

        let session = SessionData::new(
            config.broadcasts(),
            config.max_anchor_responses as usize,
        );

        Ok(Tag {
            radio,
            timer,
            ranging,
            poll: PollPacket::new(&config, mac::ExtendedAddress(0)),
            config,
            state: SessionState::Idle,
            subsequence: 0,
            window: 0,
            timer_armed: false,
            session,
        })
    }

    /// Configures the radio for ranging
    ///
    /// Sets up frame filtering, addressing, reception and sleep behaviour and
    /// the antenna delays, and uses `eui` as the source of all polls.
    pub fn init(&mut self, eui: mac::ExtendedAddress) -> Result<(), Error<R::Error>> {
        if self.state != SessionState::Idle {
            return Err(Error::SessionInProgress(self.state));
        }

        // Anchors reply with data frames. Acks are needed for auto-ack.
        self.radio
            .enable_frame_filter(FrameFilter {
                data: true,
                ack: true,
            })
            .map_err(Error::Radio)?;
        self.radio.set_eui(eui).map_err(Error::Radio)?;
        self.radio
            .set_pan_id(mac::PanId(self.config.pan_id))
            .map_err(Error::Radio)?;

        self.radio.set_auto_rx_reenable(true).map_err(Error::Radio)?;
        self.radio.set_double_buffered_rx(true).map_err(Error::Radio)?;
        self.radio
            .enable_auto_ack(self.config.ack_response_time)
            .map_err(Error::Radio)?;

        let load_ldo_tune = self.radio.has_ldo_tune().map_err(Error::Radio)?;
        self.radio
            .configure_sleep(SleepConfig {
                load_ldo_tune,
                wake_on_chip_select: true,
            })
            .map_err(Error::Radio)?;

        self.radio
            .set_antenna_delay(self.config.rx_antenna_delay, self.config.tx_antenna_delay)
            .map_err(Error::Radio)?;

        self.poll.header.source = eui;

        info!("tag {:x} initialized", eui.0);
        Ok(())
    }

    /// Starts a ranging session
    ///
    /// Only possible while the tag is idle. Otherwise returns
    /// [`Error::SessionInProgress`] and leaves the running session alone.
    pub fn start_session(&mut self) -> Result<(), Error<R::Error>> {
        if self.state != SessionState::Idle {
            warn!("session start requested in state {:?}", self.state);
            return Err(Error::SessionInProgress(self.state));
        }

        self.begin_session();
        Ok(())
    }

    /// Starts a ranging session, abandoning the one in progress, if any
    ///
    /// Whatever the previous session collected is dropped without computing
    /// ranges. The new session starts even if the radio can't be forced idle
    /// first. That error is returned afterwards.
    pub fn restart_session(&mut self) -> Result<(), Error<R::Error>> {
        let abandoned = if self.state != SessionState::Idle {
            warn!("abandoning session in state {:?}", self.state);
            self.abandon_session()
        } else {
            Ok(())
        };

        self.begin_session();
        abandoned
    }

    /// Handles an event
    ///
    /// Returns the first radio error that occurred while handling the event.
    /// A failed poll or window switch doesn't stall the session: the next
    /// tick carries on. Only a failed transmission while broadcasting
    /// abandons it.
    pub fn handle(&mut self, event: Event) -> Result<(), Error<R::Error>> {
        match event {
            Event::TransmitComplete => self.on_transmit_complete(),
            Event::TransmitError => self.on_transmit_error(),
            Event::Receive(outcome) => self.on_receive(outcome),
            Event::TimerTick => self.on_timer_tick(),
        }
    }

    /// Handles a transmit confirmation
    ///
    /// Only the confirmation of the last poll means anything. It starts the
    /// listening phase.
    pub fn on_transmit_complete(&mut self) -> Result<(), Error<R::Error>> {
        match self.state {
            SessionState::AwaitingFinalBroadcastTxDone => self.enter_listening(),
            state => {
                trace!("transmit complete in state {:?}", state);
                Ok(())
            }
        }
    }

    /// Handles a failed transmission
    ///
    /// Failed polls aren't retried. While broadcasting, the session is
    /// abandoned and the tag goes back to idle. While listening, the failed
    /// transmission can only be an acknowledgement, so the session carries on
    /// with the responses collected so far.
    pub fn on_transmit_error(&mut self) -> Result<(), Error<R::Error>> {
        match self.state {
            SessionState::Broadcasting | SessionState::AwaitingFinalBroadcastTxDone => {
                warn!("transmit error in state {:?}, abandoning session", self.state);
                self.abandon_session()
            }
            SessionState::Listening | SessionState::ComputingRange => {
                warn!("transmit error in state {:?}", self.state);
                Ok(())
            }
            SessionState::Idle => {
                trace!("transmit error while idle");
                Ok(())
            }
        }
    }

    /// Handles the outcome of a reception
    pub fn on_receive(&mut self, outcome: RxOutcome) -> Result<(), Error<R::Error>> {
        match self.state {
            SessionState::Listening => self.classify(outcome),
            state => {
                trace!("reception in state {:?} ignored", state);
                Ok(())
            }
        }
    }

    /// Handles an elapsed timer period
    pub fn on_timer_tick(&mut self) -> Result<(), Error<R::Error>> {
        if !self.timer_armed {
            trace!("stray timer tick");
            return Ok(());
        }

        match self.state {
            SessionState::Broadcasting => self.broadcast_tick(),
            SessionState::Listening => self.listening_tick(),
            state => {
                trace!("timer tick in state {:?} ignored", state);
                Ok(())
            }
        }
    }

    /// Checks the timer and handles a tick, if its period elapsed
    ///
    /// For applications that poll instead of using the timer's interrupt.
    /// Returns whether a tick was handled.
    pub fn poll_timer(&mut self) -> Result<bool, Error<R::Error>> {
        if !self.timer_armed {
            return Ok(false);
        }

        match self.timer.wait() {
            Ok(()) => {
                self.on_timer_tick()?;
                Ok(true)
            }
            Err(nb::Error::WouldBlock) => Ok(false),
            Err(nb::Error::Other(_)) => Ok(false),
        }
    }

    /// The current state of the session
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The data of the current or last session
    ///
    /// Only meaningful after a session completed. While a session runs, it
    /// holds partial data; after a new session starts, the old data is gone.
    pub fn session(&self) -> &SessionData {
        &self.session
    }

    /// The tag's configuration
    pub fn config(&self) -> &TagConfig {
        &self.config
    }

    /// Index of the current listening window
    pub fn listening_window(&self) -> u8 {
        self.window
    }

    /// Provides access to the radio
    pub fn radio(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Provides access to the range computation
    pub fn ranging(&mut self) -> &mut C {
        &mut self.ranging
    }

    /// Returns the radio, the timer and the range computation
    pub fn release(self) -> (R, T, C) {
        (self.radio, self.timer, self.ranging)
    }

    fn begin_session(&mut self) {
        self.session.send_times.clear();
        self.session.responses.clear();
        self.subsequence = 0;
        self.window = 0;
        self.state = SessionState::Broadcasting;

        self.start_timer(self.config.broadcast_period_us);
        debug!("ranging session started");
    }

    fn abandon_session(&mut self) -> Result<(), Error<R::Error>> {
        self.stop_timer();
        self.state = SessionState::Idle;
        self.radio.force_idle().map_err(Error::Radio)
    }

    fn start_timer(&mut self, period_us: u32) {
        self.timer.start(period_us);
        self.timer_armed = true;
    }

    fn stop_timer(&mut self) {
        self.timer_armed = false;
        if self.timer.cancel().is_err() {
            trace!("timer already stopped");
        }
    }

    fn apply_window_settings(&mut self) -> Result<(), Error<R::Error>> {
        self.radio
            .apply_settings(RadioSettings::for_listening_window(self.window))
            .map_err(Error::Radio)
    }
}
