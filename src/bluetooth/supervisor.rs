//! Async driver for the connection state machine.
//!
//! Executes the machine's actions against a [`Transport`] and feeds the
//! results back in as events. Timers are spawned tasks that post their
//! event to the channel when they fire, the Rust counterpart of the
//! original event loop's one-shot timeouts.

use std::collections::VecDeque;
use std::time::Duration;

use log::{debug, error, warn};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::bluetooth::machine::{Action, Event, Machine};
use crate::bluetooth::transport::{EventSender, Transport};
use crate::cache::SensorCache;
use crate::config::{AcquisitionMode, DeviceTarget};

pub struct Supervisor<T: Transport> {
    transport: T,
    target: DeviceTarget,
    machine: Machine,
    tx: EventSender,
    rx: mpsc::UnboundedReceiver<Event>,
    /// The one live session, if any. Set on connect, taken on release.
    session: Option<T::Session>,
}

impl<T: Transport> Supervisor<T> {
    pub fn new(
        transport: T,
        target: DeviceTarget,
        mode: AcquisitionMode,
        cache: SensorCache,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Supervisor {
            transport,
            target,
            machine: Machine::new(mode, cache),
            tx,
            rx,
            session: None,
        }
    }

    /// Run the supervisor event loop. Never returns while the process
    /// lives; there is no terminal state and reconnects retry forever.
    pub async fn run(mut self) {
        let mut pending = VecDeque::from([Event::Start]);
        loop {
            let event = match pending.pop_front() {
                Some(event) => event,
                None => match self.rx.recv().await {
                    Some(event) => event,
                    // Unreachable while self.tx is held, but recv's contract
                    // requires handling channel closure
                    None => return,
                },
            };
            for action in self.machine.handle(event) {
                self.perform(action, &mut pending).await;
            }
        }
    }

    async fn perform(&mut self, action: Action, pending: &mut VecDeque<Event>) {
        match action {
            Action::Connect => {
                debug_assert!(self.session.is_none(), "connect with a live session");
                match self.transport.connect(&self.target, self.tx.clone()).await {
                    Ok(session) => {
                        self.session = Some(session);
                        pending.push_back(Event::ConnectEstablished);
                    }
                    Err(e) => {
                        error!("Failed to connect: {}", e);
                        pending.push_back(Event::ConnectFailed);
                    }
                }
            }

            Action::Discover => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                match self.transport.discover(session).await {
                    Ok(characteristics) => {
                        pending.push_back(Event::DiscoveryReady { characteristics });
                    }
                    Err(e) => {
                        error!("GATT discovery failed: {}", e);
                        pending.push_back(Event::DiscoveryFailed);
                    }
                }
            }

            Action::Subscribe { handle } => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if let Err(e) = self.transport.subscribe(session, handle).await {
                    // The session stays usable; this sensor just never
                    // delivers until the next reconnect
                    warn!(
                        "Failed to register notify handler for 0x{:04x}: {}",
                        handle, e
                    );
                }
            }

            Action::Read { handle } => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                match self.transport.read_value(session, handle).await {
                    Ok(data) => pending.push_back(Event::ValueReceived { handle, data }),
                    Err(e) => debug!("Read of 0x{:04x} failed: {}", handle, e),
                }
            }

            Action::Release => {
                if let Some(session) = self.session.take() {
                    self.transport.release(session).await;
                }
            }

            Action::ScheduleRetry { after, epoch } => {
                self.schedule(after, Event::RetryElapsed { epoch });
            }

            Action::SchedulePoll { after, epoch } => {
                self.schedule(after, Event::PollElapsed { epoch });
            }
        }
    }

    fn schedule(&self, after: Duration, event: Event) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            sleep(after).await;
            let _ = tx.send(event);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::transport::{CharInfo, TransportError};
    use crate::models::{SensorKind, ESS_SERVICE_UUID};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::timeout;

    const TEMP_HANDLE: u16 = 0x0021;

    #[derive(Default)]
    struct FakeState {
        /// Guards the at-most-one-session invariant
        live: AtomicBool,
        connect_attempts: AtomicUsize,
        releases: AtomicUsize,
        /// Connect attempts that should fail before one succeeds
        failures_left: AtomicUsize,
        /// Whether a subscription should emit a value and then drop the link
        emit_then_drop: AtomicBool,
    }

    #[derive(Clone)]
    struct FakeTransport {
        state: Arc<FakeState>,
    }

    struct FakeSession {
        events: EventSender,
    }

    impl Transport for FakeTransport {
        type Session = FakeSession;

        async fn connect(
            &self,
            _target: &DeviceTarget,
            events: EventSender,
        ) -> Result<FakeSession, TransportError> {
            self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
            if self.state.failures_left.load(Ordering::SeqCst) > 0 {
                self.state.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(TransportError::Discovery("no route to device".into()));
            }
            let was_live = self.state.live.swap(true, Ordering::SeqCst);
            assert!(!was_live, "second session opened while one was live");
            Ok(FakeSession { events })
        }

        async fn discover(
            &self,
            _session: &mut FakeSession,
        ) -> Result<Vec<CharInfo>, TransportError> {
            Ok(vec![CharInfo {
                service_uuid: ESS_SERVICE_UUID,
                uuid: SensorKind::Temperature.uuid(),
                value_handle: TEMP_HANDLE,
            }])
        }

        async fn read_value(
            &self,
            _session: &mut FakeSession,
            _handle: u16,
        ) -> Result<Vec<u8>, TransportError> {
            Ok(2100i16.to_le_bytes().to_vec())
        }

        async fn subscribe(
            &self,
            session: &mut FakeSession,
            handle: u16,
        ) -> Result<(), TransportError> {
            if self.state.emit_then_drop.swap(false, Ordering::SeqCst) {
                let tx = session.events.clone();
                tokio::spawn(async move {
                    let _ = tx.send(Event::ValueReceived {
                        handle,
                        data: 2100i16.to_le_bytes().to_vec(),
                    });
                    sleep(Duration::from_millis(100)).await;
                    let _ = tx.send(Event::LinkLost {
                        reason: "peer went away".into(),
                    });
                });
            }
            Ok(())
        }

        async fn release(&self, _session: FakeSession) {
            self.state.releases.fetch_add(1, Ordering::SeqCst);
            self.state.live.store(false, Ordering::SeqCst);
        }
    }

    fn target() -> DeviceTarget {
        use crate::config::SecurityLevel;
        DeviceTarget {
            address: bluer::Address::new([0xC0, 0x00, 0x00, 0x00, 0x00, 0x01]),
            address_type: bluer::AddressType::LeRandom,
            security: SecurityLevel::Low,
            preferred_mtu: 0,
        }
    }

    async fn run_for(supervisor: Supervisor<FakeTransport>, virtual_secs: u64) {
        // The loop never exits on its own; let virtual time run out
        let _ = timeout(Duration::from_secs(virtual_secs), supervisor.run()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_connected_and_delivers_to_cache() {
        let state = Arc::new(FakeState::default());
        state.failures_left.store(2, Ordering::SeqCst);
        let cache = SensorCache::new();
        let supervisor = Supervisor::new(
            FakeTransport {
                state: state.clone(),
            },
            target(),
            AcquisitionMode::Poll,
            cache.clone(),
        );

        run_for(supervisor, 10).await;

        // Two failed attempts, then a session that polled temperature
        assert!(state.connect_attempts.load(Ordering::SeqCst) >= 3);
        assert_eq!(state.releases.load(Ordering::SeqCst), 0);
        let snap = cache.snapshot();
        assert!(snap.connected);
        assert_eq!(snap.temperature, Some(21.0));
        assert_eq!(snap.pressure, None);
    }

    #[tokio::test(start_paused = true)]
    async fn link_loss_releases_session_and_reconnects() {
        let state = Arc::new(FakeState::default());
        state.emit_then_drop.store(true, Ordering::SeqCst);
        let cache = SensorCache::new();
        let supervisor = Supervisor::new(
            FakeTransport {
                state: state.clone(),
            },
            target(),
            AcquisitionMode::Notify,
            cache.clone(),
        );

        run_for(supervisor, 10).await;

        // First session was torn down exactly once, a second one came up
        assert_eq!(state.releases.load(Ordering::SeqCst), 1);
        assert_eq!(state.connect_attempts.load(Ordering::SeqCst), 2);

        // Reconnected, but the pre-disconnect reading stays hidden
        let snap = cache.snapshot();
        assert!(snap.connected);
        assert_eq!(snap.temperature, None);
    }
}
