//! SETUP packet encoding and decoding
//!
//! Packet format (8 bytes, multi-byte fields little-endian):
//! - bmRequestType (1 byte): direction bit 7, kind bits 6..5, recipient bits 4..0
//! - bRequest (1 byte): request code
//! - wValue (2 bytes)
//! - wIndex (2 bytes)
//! - wLength (2 bytes): data stage length, 0 for no data stage

use core::fmt;

/// Size of a SETUP packet
pub const SETUP_LEN: usize = 8;

/// Standard request codes
pub mod request {
    pub const GET_STATUS: u8 = 0x00;
    pub const CLEAR_FEATURE: u8 = 0x01;
    pub const SET_FEATURE: u8 = 0x03;
    pub const SET_ADDRESS: u8 = 0x05;
    pub const GET_DESCRIPTOR: u8 = 0x06;
    pub const SET_DESCRIPTOR: u8 = 0x07;
    pub const GET_CONFIGURATION: u8 = 0x08;
    pub const SET_CONFIGURATION: u8 = 0x09;
    pub const GET_INTERFACE: u8 = 0x0A;
    pub const SET_INTERFACE: u8 = 0x0B;
    pub const SYNCH_FRAME: u8 = 0x0C;
}

/// Standard feature selectors
pub mod feature {
    pub const ENDPOINT_HALT: u16 = 0;
    pub const DEVICE_REMOTE_WAKEUP: u16 = 1;
}

/// Errors that can occur while decoding or encoding a SETUP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SetupError {
    /// Fewer than 8 bytes
    Incomplete,
    /// Request kind 3 is reserved
    ReservedKind,
    /// Recipient values above 3 are reserved
    ReservedRecipient,
    /// Buffer too small for encoding
    BufferTooSmall,
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Incomplete => write!(f, "setup packet shorter than 8 bytes"),
            SetupError::ReservedKind => write!(f, "reserved request kind"),
            SetupError::ReservedRecipient => write!(f, "reserved recipient"),
            SetupError::BufferTooSmall => write!(f, "buffer too small"),
        }
    }
}

/// Data stage direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataDirection {
    /// Host to device
    Out,
    /// Device to host
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

/// Decoded bmRequestType
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestType {
    pub direction: DataDirection,
    pub kind: RequestKind,
    pub recipient: Recipient,
}

impl RequestType {
    pub const fn new(direction: DataDirection, kind: RequestKind, recipient: Recipient) -> Self {
        Self {
            direction,
            kind,
            recipient,
        }
    }

    /// Decode a bmRequestType byte
    pub fn parse(byte: u8) -> Result<Self, SetupError> {
        let direction = if byte & 0x80 != 0 {
            DataDirection::In
        } else {
            DataDirection::Out
        };
        let kind = match (byte >> 5) & 0x03 {
            0 => RequestKind::Standard,
            1 => RequestKind::Class,
            2 => RequestKind::Vendor,
            _ => return Err(SetupError::ReservedKind),
        };
        let recipient = match byte & 0x1F {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => return Err(SetupError::ReservedRecipient),
        };
        Ok(Self {
            direction,
            kind,
            recipient,
        })
    }

    /// Encode as a bmRequestType byte
    pub fn to_byte(self) -> u8 {
        let direction = match self.direction {
            DataDirection::Out => 0x00,
            DataDirection::In => 0x80,
        };
        let kind = match self.kind {
            RequestKind::Standard => 0,
            RequestKind::Class => 1,
            RequestKind::Vendor => 2,
        };
        let recipient = match self.recipient {
            Recipient::Device => 0,
            Recipient::Interface => 1,
            Recipient::Endpoint => 2,
            Recipient::Other => 3,
        };
        direction | (kind << 5) | recipient
    }
}

/// A decoded SETUP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SetupPacket {
    pub request_type: RequestType,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Decode the first 8 bytes of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self, SetupError> {
        let bytes: &[u8; SETUP_LEN] = bytes
            .get(..SETUP_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(SetupError::Incomplete)?;

        Ok(Self {
            request_type: RequestType::parse(bytes[0])?,
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }

    /// Encode this packet into a byte buffer
    ///
    /// Returns the number of bytes written
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, SetupError> {
        let out = buffer
            .get_mut(..SETUP_LEN)
            .ok_or(SetupError::BufferTooSmall)?;
        out.copy_from_slice(&self.to_bytes());
        Ok(SETUP_LEN)
    }

    pub fn to_bytes(&self) -> [u8; SETUP_LEN] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type.to_byte(),
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }

    pub fn direction(&self) -> DataDirection {
        self.request_type.direction
    }

    pub fn kind(&self) -> RequestKind {
        self.request_type.kind
    }

    pub fn recipient(&self) -> Recipient {
        self.request_type.recipient
    }

    /// The request moves data in a data stage
    pub fn has_data_stage(&self) -> bool {
        self.length > 0
    }

    /// Standard request aimed at `recipient`
    pub fn is_standard(&self, recipient: Recipient, request: u8) -> bool {
        self.kind() == RequestKind::Standard
            && self.recipient() == recipient
            && self.request == request
    }
}
