//! Connection supervisor state machine.
//!
//! The machine is purely synchronous: transport callbacks, timer fires and
//! decoded payloads arrive as [`Event`]s, and the machine answers with the
//! [`Action`]s the driver must perform. All cache side effects happen here,
//! so every transition can be exercised in tests without a radio.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, info, warn};

use crate::bluetooth::decode::decode_value;
use crate::bluetooth::transport::CharInfo;
use crate::cache::SensorCache;
use crate::config::AcquisitionMode;
use crate::models::{SensorKind, ESS_SERVICE_UUID};

/// Delay before a connection attempt is retried
pub const RETRY_DELAY: Duration = Duration::from_millis(2000);
/// Interval between reads in polling mode
pub const POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Kick off the first connection attempt
    Start,
    /// The transport opened a channel to the peripheral
    ConnectEstablished,
    /// The transport could not open a channel
    ConnectFailed,
    /// Attribute discovery completed with the enumerated characteristics
    DiscoveryReady { characteristics: Vec<CharInfo> },
    /// Attribute discovery was rejected or timed out
    DiscoveryFailed,
    /// A read completion or a notification for a value handle
    ValueReceived { handle: u16, data: Vec<u8> },
    /// The session ended; fires exactly once per established session
    LinkLost { reason: String },
    /// A retry timer armed in epoch `epoch` fired
    RetryElapsed { epoch: u64 },
    /// A poll timer armed in epoch `epoch` fired
    PollElapsed { epoch: u64 },
}

/// Work the driver performs on behalf of the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open a channel to the configured peripheral
    Connect,
    /// Start attribute discovery on the live session
    Discover,
    /// Register a standing subscription for a value handle
    Subscribe { handle: u16 },
    /// Issue a one-shot read of a value handle
    Read { handle: u16 },
    /// Tear down the live session; always precedes the next retry
    Release,
    /// Arm a one-shot retry timer
    ScheduleRetry { after: Duration, epoch: u64 },
    /// Arm a one-shot poll timer
    SchedulePoll { after: Duration, epoch: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Connecting,
    Discovering,
    Acquiring,
}

pub struct Machine {
    state: State,
    mode: AcquisitionMode,
    cache: SensorCache,
    /// value handle -> sensor kind, valid for the current session only
    handles: HashMap<u16, SensorKind>,
    /// Session generation; bumped on every disconnect so timers armed for a
    /// torn-down session are ignored when they fire late.
    epoch: u64,
}

impl Machine {
    pub fn new(mode: AcquisitionMode, cache: SensorCache) -> Self {
        Machine {
            state: State::Idle,
            mode,
            cache,
            handles: HashMap::new(),
            epoch: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Advance the machine by one event.
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::Start => match self.state {
                State::Idle => {
                    self.state = State::Connecting;
                    info!("Connecting to device...");
                    vec![Action::Connect]
                }
                _ => vec![],
            },

            Event::ConnectFailed => match self.state {
                State::Connecting => {
                    warn!(
                        "Connect failed, retrying in {}s",
                        RETRY_DELAY.as_secs()
                    );
                    vec![Action::ScheduleRetry {
                        after: RETRY_DELAY,
                        epoch: self.epoch,
                    }]
                }
                _ => vec![],
            },

            Event::RetryElapsed { epoch } => match self.state {
                State::Connecting if epoch == self.epoch => {
                    info!("Reconnecting...");
                    vec![Action::Connect]
                }
                _ => {
                    debug!("Ignoring stale retry timer (epoch {})", epoch);
                    vec![]
                }
            },

            Event::ConnectEstablished => match self.state {
                State::Connecting => {
                    self.state = State::Discovering;
                    self.cache.mark_connected();
                    vec![Action::Discover]
                }
                _ => vec![],
            },

            Event::DiscoveryReady { characteristics } => match self.state {
                State::Discovering => {
                    info!("GATT discovery complete");
                    self.resolve_handles(&characteristics);
                    self.state = State::Acquiring;
                    self.start_acquisition()
                }
                _ => vec![],
            },

            Event::DiscoveryFailed => match self.state {
                State::Discovering => self.on_disconnected("discovery failed"),
                _ => vec![],
            },

            Event::ValueReceived { handle, data } => {
                if self.state == State::Acquiring {
                    self.on_value(handle, &data);
                }
                vec![]
            }

            Event::PollElapsed { epoch } => match self.state {
                State::Acquiring
                    if self.mode == AcquisitionMode::Poll && epoch == self.epoch =>
                {
                    let mut actions: Vec<Action> = self
                        .sorted_handles()
                        .into_iter()
                        .map(|handle| Action::Read { handle })
                        .collect();
                    actions.push(Action::SchedulePoll {
                        after: POLL_INTERVAL,
                        epoch: self.epoch,
                    });
                    actions
                }
                _ => {
                    debug!("Ignoring stale poll timer (epoch {})", epoch);
                    vec![]
                }
            },

            Event::LinkLost { reason } => match self.state {
                State::Discovering | State::Acquiring => self.on_disconnected(&reason),
                _ => vec![],
            },
        }
    }

    /// Scan the discovered characteristics for the three target UUIDs inside
    /// the Environmental Sensing Service. Absent characteristics are not an
    /// error; that sensor simply stays unavailable for this session.
    fn resolve_handles(&mut self, characteristics: &[CharInfo]) {
        let mut ess_seen = false;
        for info in characteristics {
            if info.service_uuid != ESS_SERVICE_UUID {
                continue;
            }
            if !ess_seen {
                info!("ESS service found");
                ess_seen = true;
            }
            for kind in SensorKind::ALL {
                if info.uuid == kind.uuid() {
                    self.handles.insert(info.value_handle, kind);
                }
            }
        }

        if !ess_seen {
            warn!("Peripheral does not expose the Environmental Sensing Service");
        }
        for kind in SensorKind::ALL {
            if !self.handles.values().any(|&k| k == kind) {
                info!("{} characteristic not present on peripheral", kind.label());
            }
        }
    }

    fn start_acquisition(&mut self) -> Vec<Action> {
        let handles = self.sorted_handles();
        match self.mode {
            AcquisitionMode::Notify => handles
                .into_iter()
                .map(|handle| {
                    info!("Registering notify for handle 0x{:04x}", handle);
                    Action::Subscribe { handle }
                })
                .collect(),
            AcquisitionMode::Poll => {
                let mut actions: Vec<Action> = handles
                    .into_iter()
                    .map(|handle| Action::Read { handle })
                    .collect();
                actions.push(Action::SchedulePoll {
                    after: POLL_INTERVAL,
                    epoch: self.epoch,
                });
                actions
            }
        }
    }

    fn on_value(&mut self, handle: u16, data: &[u8]) {
        // Unknown handles and short buffers are dropped without touching
        // the cache.
        let Some(&kind) = self.handles.get(&handle) else {
            debug!("Value for unknown handle 0x{:04x} dropped", handle);
            return;
        };
        let Some(value) = decode_value(kind, data) else {
            debug!(
                "Short {} payload ({} bytes) dropped",
                kind.label(),
                data.len()
            );
            return;
        };
        debug!("{}: {:.2} {}", kind.label(), value, kind.unit());
        self.cache.update(kind, value);
    }

    /// Common teardown for link loss and discovery failure. The session is
    /// released before the retry is armed, so a new connect attempt never
    /// overlaps a live handle.
    fn on_disconnected(&mut self, reason: &str) -> Vec<Action> {
        info!("Disconnected ({})", reason);
        self.handles.clear();
        self.cache.mark_disconnected();
        self.epoch += 1;
        self.state = State::Connecting;
        vec![
            Action::Release,
            Action::ScheduleRetry {
                after: RETRY_DELAY,
                epoch: self.epoch,
            },
        ]
    }

    fn sorted_handles(&self) -> Vec<u16> {
        let mut handles: Vec<u16> = self.handles.keys().copied().collect();
        handles.sort_unstable();
        handles
    }
}
