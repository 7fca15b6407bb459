use embedded_hal::timer::{Cancel, CountDown, Periodic};

use crate::{
    codec::{AnchorFinal, MessageType},
    radio::Radio,
    ranging::RangeComputation,
    store::AnchorResponseRecord,
};

use super::{Error, RxOutcome, Tag};

impl<R, T, C> Tag<R, T, C>
where
    R: Radio,
    T: CountDown + Periodic + Cancel,
    T::Time: From<u32>,
    C: RangeComputation,
{
    /// Sorts a reception during the listening phase
    ///
    /// Anchor final messages are stored, anything else is dropped. A failed
    /// reception resets the radio's settings, so the current window's
    /// settings are applied again.
    pub(super) fn classify(&mut self, outcome: RxOutcome) -> Result<(), Error<R::Error>> {
        let (data, rx_time) = match outcome {
            RxOutcome::Frame { data, rx_time } => (data, rx_time),
            RxOutcome::Error(error) => {
                debug!("reception failed in window {}: {:?}", self.window, error);
                return self.apply_window_settings();
            }
        };

        match MessageType::of_anchor_frame(data) {
            Some(MessageType::AnchorFinal) => {}
            _ => {
                trace!("dropping frame that is no anchor final");
                return Ok(());
            }
        }

        if self.session.responses.is_full() {
            debug!("response store full, dropping anchor final");
            return Ok(());
        }

        let message = match AnchorFinal::decode(data, self.config.broadcasts()) {
            Ok(message) => message,
            Err(_) => {
                debug!("dropping malformed anchor final");
                return Ok(());
            }
        };

        let record = AnchorResponseRecord::from_final(&message, rx_time);
        if self.session.responses.push(record).is_ok() {
            trace!("anchor {:x} responded", message.header.source.0);
        }

        Ok(())
    }
}
