use embedded_hal::timer::{Cancel, CountDown, Periodic};

use crate::{radio::Radio, ranging::RangeComputation};

use super::{Error, SessionState, Tag};

impl<R, T, C> Tag<R, T, C>
where
    R: Radio,
    T: CountDown + Periodic + Cancel,
    T::Time: From<u32>,
    C: RangeComputation,
{
    /// Starts the listening phase, in window 0
    pub(super) fn enter_listening(&mut self) -> Result<(), Error<R::Error>> {
        self.state = SessionState::Listening;
        self.window = 0;
        self.session.responses.clear();

        self.start_timer(self.config.listening_window_us);
        debug!(
            "listening for {} windows",
            self.config.listening_window_count
        );

        self.apply_window_settings()
    }

    /// Moves on to the next listening window, or ends the session after the
    /// last one
    pub(super) fn listening_tick(&mut self) -> Result<(), Error<R::Error>> {
        self.window = self.window.saturating_add(1);

        if self.window < self.config.listening_window_count {
            return self.apply_window_settings();
        }

        self.stop_timer();
        let result = self.radio.force_idle().map_err(Error::Radio);
        self.finish_session();
        result
    }

    fn finish_session(&mut self) {
        self.state = SessionState::ComputingRange;
        debug!(
            "session done, {} anchors responded",
            self.session.responses.len()
        );

        self.ranging.compute(&self.session);
        self.state = SessionState::Idle;
    }
}
