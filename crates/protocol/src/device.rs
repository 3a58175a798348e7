//! Device identification tables and driver-family classification
//!
//! The vendor/product ID tables below are a fixed compatibility database:
//! they decide whether a device is handled at all, which driver family
//! handles it, and which protocol quirks apply. Keep them as data, not
//! logic - every supported (vid, pid) pair is listed explicitly.

use serde::{Deserialize, Serialize};

/// Sub-variant of the HF-security reader family
///
/// The variant decides the wire framing: the HF4000 chips wrap bulk data in
/// CBW/CSW pairs, the early vendor-request variant frames bulk data with a
/// preceding control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HfVariant {
    /// HF4000 first revision (Micro-USB); echoes the command block in the
    /// status wrapper
    Hf4000V1,
    /// HF4000 second revision (USB-C)
    Hf4000V2,
    /// Early vendor-request variant
    Vendor,
}

impl HfVariant {
    /// Classify an HF-security device into its protocol sub-variant
    ///
    /// Returns `None` for any pair outside the table - callers must fail
    /// closed rather than assume a default framing.
    pub fn classify(vendor_id: u16, product_id: u16) -> Option<Self> {
        match (vendor_id, product_id) {
            (1107, 36869) => Some(Self::Vendor),
            (8201 | 8457, 30264) => Some(Self::Hf4000V1),
            (1155, 22304) => Some(Self::Hf4000V2),
            _ => None,
        }
    }
}

/// Driver family handling a recognized device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceModel {
    /// Direct vendor-protocol reader
    HfSecurity(HfVariant),
    /// Reader driven through the vendor capture library
    Futronic,
}

impl DeviceModel {
    /// Classify a device into the driver family that owns it
    ///
    /// Total over all (vid, pid) pairs and exclusive: a pair maps to at most
    /// one family. Unknown pairs return `None`, never a default.
    pub fn classify(vendor_id: u16, product_id: u16) -> Option<Self> {
        if let Some(variant) = HfVariant::classify(vendor_id, product_id) {
            return Some(Self::HfSecurity(variant));
        }
        if is_futronic_device(vendor_id, product_id) {
            return Some(Self::Futronic);
        }
        None
    }
}

/// HF-security compatibility table
///
/// Note: (1155, 22240) is accepted here but has no [`HfVariant`] - the
/// shipped firmware database carries the same asymmetry, so connecting to
/// that revision fails at classification time.
pub fn is_hf_security_device(vendor_id: u16, product_id: u16) -> bool {
    match vendor_id {
        1107 => product_id == 36869,
        8201 => product_id == 30264, // HF4000 V1 (Micro-USB)
        8457 => product_id == 30264,
        1155 => matches!(product_id, 22304 | 22240), // HF4000 V2 (USB-C)
        _ => false,
    }
}

/// Futronic compatibility table
pub fn is_futronic_device(vendor_id: u16, product_id: u16) -> bool {
    match vendor_id {
        2100 => product_id == 32,
        2392 => product_id == 775,
        8122 => matches!(product_id, 18 | 19 | 39),
        5265 => matches!(
            product_id,
            32 | 37 | 136 | 144 | 80 | 96 | 152 | 32920 | 39008
        ),
        _ => false,
    }
}

/// Any device either driver family can handle
pub fn is_supported_device(vendor_id: u16, product_id: u16) -> bool {
    is_hf_security_device(vendor_id, product_id) || is_futronic_device(vendor_id, product_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hf_variant_classification() {
        assert_eq!(HfVariant::classify(1107, 36869), Some(HfVariant::Vendor));
        assert_eq!(HfVariant::classify(8201, 30264), Some(HfVariant::Hf4000V1));
        assert_eq!(HfVariant::classify(8457, 30264), Some(HfVariant::Hf4000V1));
        assert_eq!(HfVariant::classify(1155, 22304), Some(HfVariant::Hf4000V2));
    }

    #[test]
    fn test_hf_variant_fails_closed() {
        assert_eq!(HfVariant::classify(1107, 30264), None);
        assert_eq!(HfVariant::classify(8201, 36869), None);
        assert_eq!(HfVariant::classify(0, 0), None);
        // Supported for permission purposes but deliberately unclassified
        assert!(is_hf_security_device(1155, 22240));
        assert_eq!(HfVariant::classify(1155, 22240), None);
    }

    #[test]
    fn test_futronic_table() {
        for (vid, pid) in [
            (2100u16, 32u16),
            (2392, 775),
            (8122, 18),
            (8122, 19),
            (8122, 39),
            (5265, 32),
            (5265, 37),
            (5265, 136),
            (5265, 144),
            (5265, 80),
            (5265, 96),
            (5265, 152),
            (5265, 32920),
            (5265, 39008),
        ] {
            assert!(is_futronic_device(vid, pid), "{}:{} missing", vid, pid);
            assert_eq!(DeviceModel::classify(vid, pid), Some(DeviceModel::Futronic));
        }
        assert!(!is_futronic_device(2100, 33));
        assert!(!is_futronic_device(5265, 0));
    }

    #[test]
    fn test_families_are_exclusive() {
        // No pair may be claimed by both tables
        for (vid, pid) in [
            (1107u16, 36869u16),
            (8201, 30264),
            (8457, 30264),
            (1155, 22304),
            (1155, 22240),
            (2100, 32),
            (2392, 775),
            (8122, 18),
            (5265, 39008),
        ] {
            let hf = is_hf_security_device(vid, pid);
            let futronic = is_futronic_device(vid, pid);
            assert!(!(hf && futronic), "{}:{} claimed by both families", vid, pid);
        }
    }

    #[test]
    fn test_unknown_pairs_rejected() {
        // Deterministic sweep across the ID space; none of these may classify
        let mut seed = 0x2545_F491u32;
        for _ in 0..512 {
            seed = seed.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
            let vid = (seed >> 16) as u16;
            let pid = seed as u16;
            if is_supported_device(vid, pid) {
                continue;
            }
            assert_eq!(DeviceModel::classify(vid, pid), None);
        }
    }
}
