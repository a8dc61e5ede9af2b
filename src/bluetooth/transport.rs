//! Transport boundary between the supervisor and the BLE stack.
//!
//! The supervisor only sees the [`Transport`] trait; the production
//! implementation drives BlueZ through `bluer`. Discovery, MTU exchange and
//! link security all happen inside the stack, this layer just hands results
//! and asynchronous events (notifications, link loss) back to the
//! supervisor's event channel.

use std::collections::HashMap;

use bluer::gatt::remote::Characteristic;
use bluer::{Device, DeviceEvent, DeviceProperty, Uuid};
use futures_util::StreamExt;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use crate::bluetooth::machine::Event;
use crate::config::DeviceTarget;

/// How long service resolution may take before discovery counts as failed
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

pub type EventSender = mpsc::UnboundedSender<Event>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),
    #[error("discovery failed: {0}")]
    Discovery(String),
    #[error("no characteristic with value handle 0x{0:04x}")]
    UnknownHandle(u16),
}

/// One discovered characteristic, reduced to what handle resolution needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharInfo {
    pub service_uuid: Uuid,
    pub uuid: Uuid,
    pub value_handle: u16,
}

/// Abstract channel to one peripheral.
///
/// Asynchronous occurrences (notifications, link loss) are posted to the
/// event channel handed to [`Transport::connect`]; everything else is a
/// plain request/response call.
pub trait Transport {
    type Session;

    /// Open a channel to the target. The returned session owns whatever
    /// background machinery watches the link; dropping it via
    /// [`Transport::release`] is the only correct teardown.
    async fn connect(
        &self,
        target: &DeviceTarget,
        events: EventSender,
    ) -> Result<Self::Session, TransportError>;

    /// Run attribute discovery and enumerate all characteristics.
    async fn discover(
        &self,
        session: &mut Self::Session,
    ) -> Result<Vec<CharInfo>, TransportError>;

    /// One-shot read of a characteristic value.
    async fn read_value(
        &self,
        session: &mut Self::Session,
        handle: u16,
    ) -> Result<Vec<u8>, TransportError>;

    /// Register a standing subscription; values arrive as
    /// [`Event::ValueReceived`] on the event channel.
    async fn subscribe(
        &self,
        session: &mut Self::Session,
        handle: u16,
    ) -> Result<(), TransportError>;

    /// Idempotent session teardown.
    async fn release(&self, session: Self::Session);
}

/// Production transport backed by BlueZ via `bluer`.
pub struct BluerTransport;

impl BluerTransport {
    pub fn new() -> Self {
        BluerTransport
    }
}

pub struct BluerSession {
    device: Device,
    /// value handle -> remote characteristic, filled by discovery
    characteristics: HashMap<u16, Characteristic>,
    events: EventSender,
    /// Link watch plus one forwarding task per subscription
    tasks: Vec<JoinHandle<()>>,
}

impl Transport for BluerTransport {
    type Session = BluerSession;

    async fn connect(
        &self,
        target: &DeviceTarget,
        events: EventSender,
    ) -> Result<Self::Session, TransportError> {
        // Initialize Bluetooth session and power on the default adapter
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;

        debug!(
            "Opening LE connection to {} (type {:?}, security {:?}, mtu {})",
            target.address, target.address_type, target.security, target.preferred_mtu
        );

        let device = adapter.device(target.address)?;
        device.connect().await?;
        info!("Connected to {}", target.address);

        // Watch the link; BlueZ flips the Connected property exactly once
        // per session, whoever closes the channel.
        let mut device_events = device.events().await?;
        let tx = events.clone();
        let watch = tokio::spawn(async move {
            while let Some(event) = device_events.next().await {
                if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                    let _ = tx.send(Event::LinkLost {
                        reason: "link closed by peer or stack".into(),
                    });
                    break;
                }
            }
        });

        Ok(BluerSession {
            device,
            characteristics: HashMap::new(),
            events,
            tasks: vec![watch],
        })
    }

    async fn discover(
        &self,
        session: &mut Self::Session,
    ) -> Result<Vec<CharInfo>, TransportError> {
        wait_services_resolved(&session.device).await?;

        let mut found = Vec::new();
        for service in session.device.services().await? {
            let service_uuid = service.uuid().await?;
            debug!("service - uuid: {}", service_uuid);
            for characteristic in service.characteristics().await? {
                let uuid = characteristic.uuid().await?;
                let value_handle = characteristic.id();
                debug!(
                    "  charac - value: 0x{:04x}, uuid: {}",
                    value_handle, uuid
                );
                session.characteristics.insert(value_handle, characteristic);
                found.push(CharInfo {
                    service_uuid,
                    uuid,
                    value_handle,
                });
            }
        }
        Ok(found)
    }

    async fn read_value(
        &self,
        session: &mut Self::Session,
        handle: u16,
    ) -> Result<Vec<u8>, TransportError> {
        let characteristic = session
            .characteristics
            .get(&handle)
            .ok_or(TransportError::UnknownHandle(handle))?;
        Ok(characteristic.read().await?)
    }

    async fn subscribe(
        &self,
        session: &mut Self::Session,
        handle: u16,
    ) -> Result<(), TransportError> {
        let characteristic = session
            .characteristics
            .get(&handle)
            .ok_or(TransportError::UnknownHandle(handle))?;

        let mut notifications = Box::pin(characteristic.notify().await?);
        let tx = session.events.clone();
        let forward = tokio::spawn(async move {
            while let Some(data) = notifications.next().await {
                let _ = tx.send(Event::ValueReceived { handle, data });
            }
            // Stream end is covered by the link watch task
        });
        session.tasks.push(forward);
        Ok(())
    }

    async fn release(&self, session: Self::Session) {
        for task in &session.tasks {
            task.abort();
        }
        // Best effort: the link is usually already down when we get here
        if let Err(e) = session.device.disconnect().await {
            debug!("Disconnect during release failed: {}", e);
        }
    }
}

/// Wait for BlueZ to finish walking the attribute tree.
async fn wait_services_resolved(device: &Device) -> Result<(), TransportError> {
    if device.is_services_resolved().await? {
        return Ok(());
    }

    let mut events = device.events().await?;
    let resolved = timeout(DISCOVERY_TIMEOUT, async {
        while let Some(event) = events.next().await {
            match event {
                DeviceEvent::PropertyChanged(DeviceProperty::ServicesResolved(true)) => {
                    return Ok(());
                }
                DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) => {
                    return Err(TransportError::Discovery(
                        "link lost during discovery".into(),
                    ));
                }
                _ => {}
            }
        }
        Err(TransportError::Discovery(
            "device event stream ended".into(),
        ))
    })
    .await;

    match resolved {
        Ok(result) => result,
        Err(_) => {
            warn!(
                "Service resolution did not complete within {}s",
                DISCOVERY_TIMEOUT.as_secs()
            );
            Err(TransportError::Discovery(
                "timed out waiting for service resolution".into(),
            ))
        }
    }
}
