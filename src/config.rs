use std::env;

use bluer::{Address, AddressType};

/// Link security level requested for the peripheral connection.
///
/// BlueZ owns pairing and link encryption behind the D-Bus API, so this
/// value is informational at the transport layer; it is carried so the
/// deployment records what the peripheral expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    Low,
    Medium,
    High,
}

/// How sensor values are acquired once the handles are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// Issue a read per characteristic on a fixed interval
    Poll,
    /// Subscribe once and let the peripheral push value changes
    Notify,
}

/// The single peripheral this process talks to. Read-only after startup.
#[derive(Debug, Clone)]
pub struct DeviceTarget {
    pub address: Address,
    pub address_type: AddressType,
    pub security: SecurityLevel,
    /// Preferred ATT MTU, 0 = let the stack negotiate
    pub preferred_mtu: u16,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub device: DeviceTarget,
    pub http_port: u16,
    pub acquisition: AcquisitionMode,
}

impl GatewayConfig {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Load environment variables
        dotenv::dotenv().ok();

        let address: Address = env::var("BLE_ADDRESS")
            .map_err(|_| "BLE_ADDRESS environment variable not set")?
            .parse()
            .map_err(|e| format!("Invalid BLE_ADDRESS: {}", e))?;

        let address_type = match env::var("BLE_ADDRESS_TYPE").as_deref() {
            Ok("public") => AddressType::LePublic,
            Ok("random") | Err(_) => AddressType::LeRandom,
            Ok(other) => {
                return Err(format!(
                    "Invalid BLE_ADDRESS_TYPE '{}', expected 'public' or 'random'",
                    other
                )
                .into())
            }
        };

        let security = match env::var("BLE_SECURITY_LEVEL").as_deref() {
            Ok("low") | Err(_) => SecurityLevel::Low,
            Ok("medium") => SecurityLevel::Medium,
            Ok("high") => SecurityLevel::High,
            Ok(other) => {
                return Err(format!(
                    "Invalid BLE_SECURITY_LEVEL '{}', expected 'low', 'medium' or 'high'",
                    other
                )
                .into())
            }
        };

        let preferred_mtu = match env::var("BLE_MTU") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|e| format!("Invalid BLE_MTU: {}", e))?,
            Err(_) => 0,
        };

        let http_port = match env::var("HTTP_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|e| format!("Invalid HTTP_PORT: {}", e))?,
            Err(_) => 8080,
        };

        let acquisition = match env::var("ACQUISITION_MODE").as_deref() {
            Ok("poll") => AcquisitionMode::Poll,
            Ok("notify") | Err(_) => AcquisitionMode::Notify,
            Ok(other) => {
                return Err(format!(
                    "Invalid ACQUISITION_MODE '{}', expected 'poll' or 'notify'",
                    other
                )
                .into())
            }
        };

        Ok(GatewayConfig {
            device: DeviceTarget {
                address,
                address_type,
                security,
                preferred_mtu,
            },
            http_port,
            acquisition,
        })
    }
}
