//! Device directory provisioned from the `[[devices]]` config table.

use std::collections::HashMap;

use async_trait::async_trait;
use jt808_core::protocol::{PhoneNumber, ProtocolError};

use crate::application::ports::{DeviceDirectory, DeviceRecord};
use crate::infrastructure::storage::config::DeviceEntry;

#[derive(Debug, Default, Clone)]
pub struct StaticDeviceDirectory {
    devices: HashMap<PhoneNumber, DeviceRecord>,
}

impl StaticDeviceDirectory {
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPhone`] for an entry whose phone is not
    /// up to 20 BCD digits.
    pub fn from_entries(entries: &[DeviceEntry]) -> Result<Self, ProtocolError> {
        let mut devices = HashMap::with_capacity(entries.len());
        for entry in entries {
            let phone = PhoneNumber::from_digits(&entry.phone)?;
            devices.insert(
                phone,
                DeviceRecord {
                    auth_key: entry.auth_key.clone(),
                    imei: entry.imei.clone(),
                    vin: entry.vin.clone(),
                    iccid: entry.iccid.clone(),
                },
            );
        }
        Ok(Self { devices })
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[async_trait]
impl DeviceDirectory for StaticDeviceDirectory {
    async fn lookup_by_phone(&self, phone: &PhoneNumber) -> Option<DeviceRecord> {
        self.devices.get(phone).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(phone: &str, key: &str) -> DeviceEntry {
        DeviceEntry {
            phone: phone.to_string(),
            auth_key: key.to_string(),
            imei: None,
            vin: Some("VIN1".to_string()),
            iccid: None,
        }
    }

    #[tokio::test]
    async fn test_lookup_matches_padded_phone_bytes() {
        // Arrange
        let dir = StaticDeviceDirectory::from_entries(&[entry("17255111111", "K1")]).unwrap();
        let wire = PhoneNumber::from_bytes([0, 0, 0, 0, 0x01, 0x72, 0x55, 0x11, 0x11, 0x11]);

        // Act
        let record = dir.lookup_by_phone(&wire).await;

        // Assert
        assert_eq!(record.map(|r| r.auth_key), Some("K1".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_phone_returns_none() {
        let dir = StaticDeviceDirectory::from_entries(&[entry("1", "K")]).unwrap();
        let other = PhoneNumber::from_digits("2").unwrap();
        assert!(dir.lookup_by_phone(&other).await.is_none());
    }

    #[test]
    fn test_invalid_phone_is_rejected() {
        let result = StaticDeviceDirectory::from_entries(&[entry("phone-1", "K")]);
        assert!(matches!(result, Err(ProtocolError::InvalidPhone(_))));
    }
}
