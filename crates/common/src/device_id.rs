//! USB device identifier given on the command line
//!
//! Two forms are accepted:
//! - `BUS-ADDRESS`, both decimal (`1-4`)
//! - `VENDOR:PRODUCT`, both hexadecimal (`1234:abcd`, `0x1234:0xabcd`)

use crate::Error;
use std::fmt;
use std::str::FromStr;

/// Which device to bind, resolved again on every (re)connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceIdentity {
    BusAddress { bus: u8, address: u8 },
    VendorProduct { vendor_id: u16, product_id: u16 },
}

impl FromStr for DeviceIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidDeviceId(s.to_string());

        // A dash followed by something selects the bus-address form
        if let Some((bus, address)) = s.split_once('-')
            && !address.is_empty()
        {
            let bus = bus.parse::<u8>().map_err(|_| invalid())?;
            let address = address.parse::<u8>().map_err(|_| invalid())?;
            return Ok(DeviceIdentity::BusAddress { bus, address });
        }

        let (vendor, product) = s.split_once(':').ok_or_else(invalid)?;
        if vendor.is_empty() || product.is_empty() {
            return Err(invalid());
        }
        let vendor_id = parse_hex_u16(vendor).ok_or_else(invalid)?;
        let product_id = parse_hex_u16(product).ok_or_else(invalid)?;
        Ok(DeviceIdentity::VendorProduct {
            vendor_id,
            product_id,
        })
    }
}

fn parse_hex_u16(s: &str) -> Option<u16> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.is_empty() {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceIdentity::BusAddress { bus, address } => write!(f, "{}-{}", bus, address),
            DeviceIdentity::VendorProduct {
                vendor_id,
                product_id,
            } => write!(f, "{:04x}:{:04x}", vendor_id, product_id),
        }
    }
}
