//! Decoding of Environmental Sensing Service characteristic payloads.
//!
//! All three characteristics carry little-endian fixed-point integers with
//! a 0.01 resolution:
//! - Temperature: signed 16-bit, hundredths of °C
//! - Pressure: unsigned 32-bit, hundredths of hPa
//! - Humidity: unsigned 16-bit, hundredths of %RH

use crate::models::SensorKind;

/// Decode a raw characteristic value into the scaled reading.
///
/// Returns None when the buffer is shorter than the expected width for the
/// kind; trailing bytes beyond the expected width are ignored.
pub fn decode_value(kind: SensorKind, data: &[u8]) -> Option<f32> {
    match kind {
        SensorKind::Temperature => {
            let raw = i16::from_le_bytes(data.get(..2)?.try_into().ok()?);
            Some(raw as f32 / 100.0)
        }
        SensorKind::Pressure => {
            let raw = u32::from_le_bytes(data.get(..4)?.try_into().ok()?);
            Some(raw as f32 / 100.0)
        }
        SensorKind::Humidity => {
            let raw = u16::from_le_bytes(data.get(..2)?.try_into().ok()?);
            Some(raw as f32 / 100.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_scales_to_celsius() {
        // raw 2345 -> 23.45 °C
        assert_eq!(
            decode_value(SensorKind::Temperature, &2345i16.to_le_bytes()),
            Some(23.45)
        );
    }

    #[test]
    fn temperature_is_signed() {
        assert_eq!(
            decode_value(SensorKind::Temperature, &(-512i16).to_le_bytes()),
            Some(-5.12)
        );
    }

    #[test]
    fn pressure_scales_to_hectopascal() {
        // raw 100325 -> 1003.25 hPa
        assert_eq!(
            decode_value(SensorKind::Pressure, &100325u32.to_le_bytes()),
            Some(1003.25)
        );
    }

    #[test]
    fn humidity_scales_to_relative_percent() {
        // raw 4550 -> 45.50 %RH
        assert_eq!(
            decode_value(SensorKind::Humidity, &4550u16.to_le_bytes()),
            Some(45.5)
        );
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert_eq!(decode_value(SensorKind::Temperature, &[0x12]), None);
        assert_eq!(decode_value(SensorKind::Pressure, &[0x12, 0x34, 0x56]), None);
        assert_eq!(decode_value(SensorKind::Humidity, &[]), None);
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut data = 2345i16.to_le_bytes().to_vec();
        data.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(decode_value(SensorKind::Temperature, &data), Some(23.45));
    }
}
