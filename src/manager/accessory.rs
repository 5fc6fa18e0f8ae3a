//! Identity of the attached accessory, and its classification.
use core::ops::RangeInclusive;

use crate::protocol_layer::message::data::vendor_defined::SAMSUNG_VID;

/// Classes of accessories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessoryType {
    /// Vendor not recognised.
    Unknown,
    /// Recognised vendor, unknown product.
    Generic,
    /// Head mounted VR display.
    GearVr,
    /// Desktop dock.
    Dex,
    /// Tablet-style desktop dock.
    DexPad,
    /// HDMI adapter.
    HdmiAdapter,
}

/// What Discover Identity and Discover SVIDs revealed about the partner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AccessoryIdentity {
    /// USB vendor ID.
    pub vendor_id: u16,
    /// USB product ID.
    pub product_id: u16,
    /// Device release number.
    pub device_version: u16,
    /// First SVID.
    pub svid_0: u16,
    /// Second SVID.
    pub svid_1: u16,
}

struct Entry {
    vendor_id: u16,
    products: RangeInclusive<u16>,
    accessory: AccessoryType,
}

const ACCESSORIES: &[Entry] = &[
    Entry {
        vendor_id: SAMSUNG_VID,
        products: 0xA500..=0xA504,
        accessory: AccessoryType::GearVr,
    },
    Entry {
        vendor_id: SAMSUNG_VID,
        products: 0xA020..=0xA020,
        accessory: AccessoryType::Dex,
    },
    Entry {
        vendor_id: SAMSUNG_VID,
        products: 0xA029..=0xA029,
        accessory: AccessoryType::DexPad,
    },
    Entry {
        vendor_id: SAMSUNG_VID,
        products: 0xA025..=0xA025,
        accessory: AccessoryType::HdmiAdapter,
    },
];

/// Whether accessories of this vendor are recognised.
pub fn is_known_vendor(vendor_id: u16) -> bool {
    ACCESSORIES.iter().any(|entry| entry.vendor_id == vendor_id)
}

/// Classify an accessory by its vendor and product ID.
pub fn classify_accessory(identity: &AccessoryIdentity) -> AccessoryType {
    ACCESSORIES
        .iter()
        .find(|entry| entry.vendor_id == identity.vendor_id && entry.products.contains(&identity.product_id))
        .map(|entry| entry.accessory)
        .unwrap_or(if is_known_vendor(identity.vendor_id) {
            AccessoryType::Generic
        } else {
            AccessoryType::Unknown
        })
}

#[cfg(test)]
mod tests {
    use super::{AccessoryIdentity, AccessoryType, classify_accessory};
    use crate::protocol_layer::message::data::vendor_defined::SAMSUNG_VID;

    fn identity(vendor_id: u16, product_id: u16) -> AccessoryIdentity {
        AccessoryIdentity {
            vendor_id,
            product_id,
            ..Default::default()
        }
    }

    #[test]
    fn test_known_products() {
        assert_eq!(classify_accessory(&identity(SAMSUNG_VID, 0xA500)), AccessoryType::GearVr);
        assert_eq!(classify_accessory(&identity(SAMSUNG_VID, 0xA504)), AccessoryType::GearVr);
        assert_eq!(classify_accessory(&identity(SAMSUNG_VID, 0xA020)), AccessoryType::Dex);
        assert_eq!(classify_accessory(&identity(SAMSUNG_VID, 0xA029)), AccessoryType::DexPad);
        assert_eq!(classify_accessory(&identity(SAMSUNG_VID, 0xA025)), AccessoryType::HdmiAdapter);
    }

    #[test]
    fn test_unknown_products() {
        assert_eq!(classify_accessory(&identity(SAMSUNG_VID, 0xA505)), AccessoryType::Generic);
        assert_eq!(classify_accessory(&identity(0x1234, 0xA020)), AccessoryType::Unknown);
    }
}
