use bluer::Uuid;

/// Bluetooth SIG base UUID used to widen 16-bit assigned numbers.
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Environmental Sensing Service, assigned number 0x181A
pub const ESS_SERVICE_UUID: Uuid = uuid16(0x181A);

/// The three ESS characteristics this gateway cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Temperature,
    Pressure,
    Humidity,
}

impl SensorKind {
    pub const ALL: [SensorKind; 3] = [
        SensorKind::Temperature,
        SensorKind::Pressure,
        SensorKind::Humidity,
    ];

    /// Characteristic UUID within the Environmental Sensing Service
    pub fn uuid(self) -> Uuid {
        match self {
            SensorKind::Temperature => uuid16(0x2A6E),
            SensorKind::Pressure => uuid16(0x2A6D),
            SensorKind::Humidity => uuid16(0x2A6F),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SensorKind::Temperature => "Temperature",
            SensorKind::Pressure => "Pressure",
            SensorKind::Humidity => "Humidity",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Pressure => "hPa",
            SensorKind::Humidity => "%RH",
        }
    }
}

/// Widen a 16-bit assigned number into a full 128-bit UUID
const fn uuid16(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | BASE_UUID)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid16_matches_sig_form() {
        assert_eq!(
            ESS_SERVICE_UUID.to_string(),
            "0000181a-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            SensorKind::Temperature.uuid().to_string(),
            "00002a6e-0000-1000-8000-00805f9b34fb"
        );
    }
}
