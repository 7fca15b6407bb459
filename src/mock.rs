//! Test doubles for the radio and the session timer

use std::{cell::RefCell, rc::Rc, vec::Vec};

use embedded_hal::timer::{Cancel, CountDown, Periodic};

use crate::{
    configs::RadioSettings,
    mac,
    radio::{FrameFilter, Radio, SleepConfig, StartTx},
    time::Instant,
};

/// A call made to [`MockRadio`]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    EnableFrameFilter(FrameFilter),
    SetEui(mac::ExtendedAddress),
    SetPanId(mac::PanId),
    SetAutoRxReenable(bool),
    SetDoubleBufferedRx(bool),
    EnableAutoAck(u8),
    ConfigureSleep(SleepConfig),
    SetAntennaDelay { rx: u16, tx: u16 },
    SetTxAntennaDelay(u16),
    ApplySettings(RadioSettings),
    ForceIdle,
    SetDelayedTime(u32),
    WriteTxData(Vec<u8>),
    SetRxAfterTxDelay(u32),
    StartTx(StartTx),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MockError;

/// Records every call, and runs a clock that advances with every read
pub struct MockRadio {
    pub calls: Vec<Call>,
    pub now: u64,
    pub clock_step: u64,
    pub fail_start_tx: bool,
    pub fail_force_idle: bool,
}

impl MockRadio {
    pub fn new() -> Self {
        MockRadio {
            calls: Vec::new(),
            now: 0x10_0000_0000,
            clock_step: 0x100_0000,
            fail_start_tx: false,
            fail_force_idle: false,
        }
    }

    /// Every frame written to the TX buffer
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::WriteTxData(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every delayed time that was programmed
    pub fn delayed_times(&self) -> Vec<u32> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::SetDelayedTime(time) => Some(*time),
                _ => None,
            })
            .collect()
    }

    /// Every settings change
    pub fn settings(&self) -> Vec<RadioSettings> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::ApplySettings(settings) => Some(*settings),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }
}

impl Radio for MockRadio {
    type Error = MockError;

    fn enable_frame_filter(&mut self, filter: FrameFilter) -> Result<(), Self::Error> {
        self.calls.push(Call::EnableFrameFilter(filter));
        Ok(())
    }

    fn set_eui(&mut self, eui: mac::ExtendedAddress) -> Result<(), Self::Error> {
        self.calls.push(Call::SetEui(eui));
        Ok(())
    }

    fn set_pan_id(&mut self, pan_id: mac::PanId) -> Result<(), Self::Error> {
        self.calls.push(Call::SetPanId(pan_id));
        Ok(())
    }

    fn set_auto_rx_reenable(&mut self, enable: bool) -> Result<(), Self::Error> {
        self.calls.push(Call::SetAutoRxReenable(enable));
        Ok(())
    }

    fn set_double_buffered_rx(&mut self, enable: bool) -> Result<(), Self::Error> {
        self.calls.push(Call::SetDoubleBufferedRx(enable));
        Ok(())
    }

    fn enable_auto_ack(&mut self, response_time: u8) -> Result<(), Self::Error> {
        self.calls.push(Call::EnableAutoAck(response_time));
        Ok(())
    }

    fn has_ldo_tune(&mut self) -> Result<bool, Self::Error> {
        Ok(true)
    }

    fn configure_sleep(&mut self, config: SleepConfig) -> Result<(), Self::Error> {
        self.calls.push(Call::ConfigureSleep(config));
        Ok(())
    }

    fn set_antenna_delay(&mut self, rx: u16, tx: u16) -> Result<(), Self::Error> {
        self.calls.push(Call::SetAntennaDelay { rx, tx });
        Ok(())
    }

    fn set_tx_antenna_delay(&mut self, tx_delay: u16) -> Result<(), Self::Error> {
        self.calls.push(Call::SetTxAntennaDelay(tx_delay));
        Ok(())
    }

    fn apply_settings(&mut self, settings: RadioSettings) -> Result<(), Self::Error> {
        self.calls.push(Call::ApplySettings(settings));
        Ok(())
    }

    fn force_idle(&mut self) -> Result<(), Self::Error> {
        if self.fail_force_idle {
            return Err(MockError);
        }
        self.calls.push(Call::ForceIdle);
        Ok(())
    }

    fn sys_time(&mut self) -> Result<Instant, Self::Error> {
        let now = self.now;
        self.now += self.clock_step;
        Instant::new(now).ok_or(MockError)
    }

    fn set_delayed_time(&mut self, truncated: u32) -> Result<(), Self::Error> {
        self.calls.push(Call::SetDelayedTime(truncated));
        Ok(())
    }

    fn write_tx_data(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        self.calls.push(Call::WriteTxData(frame.to_vec()));
        Ok(())
    }

    fn set_rx_after_tx_delay(&mut self, delay_us: u32) -> Result<(), Self::Error> {
        self.calls.push(Call::SetRxAfterTxDelay(delay_us));
        Ok(())
    }

    fn start_tx(&mut self, mode: StartTx) -> Result<(), Self::Error> {
        if self.fail_start_tx {
            return Err(MockError);
        }
        self.calls.push(Call::StartTx(mode));
        Ok(())
    }
}

/// What happened to a [`MockTimer`], shared with the test
#[derive(Debug, Default)]
pub struct TimerState {
    pub starts: Vec<u32>,
    pub cancels: usize,
    pub running: bool,
    pub elapsed: bool,
}

/// A periodic timer in microseconds that only elapses when told to
pub struct MockTimer(pub Rc<RefCell<TimerState>>);

impl MockTimer {
    pub fn new() -> (Self, Rc<RefCell<TimerState>>) {
        let state = Rc::new(RefCell::new(TimerState::default()));
        (MockTimer(state.clone()), state)
    }
}

impl CountDown for MockTimer {
    type Time = u32;

    fn start<T>(&mut self, count: T)
    where
        T: Into<Self::Time>,
    {
        let mut state = self.0.borrow_mut();
        state.starts.push(count.into());
        state.running = true;
        state.elapsed = false;
    }

    fn wait(&mut self) -> nb::Result<(), void::Void> {
        let mut state = self.0.borrow_mut();
        if state.running && state.elapsed {
            state.elapsed = false;
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}

impl Periodic for MockTimer {}

impl Cancel for MockTimer {
    type Error = ();

    fn cancel(&mut self) -> Result<(), Self::Error> {
        let mut state = self.0.borrow_mut();
        state.cancels += 1;
        if !state.running {
            return Err(());
        }
        state.running = false;
        Ok(())
    }
}
