//! CDC-ACM class requests
//!
//! Line coding format (7 bytes, little-endian):
//! - dwDTERate (4 bytes): data rate in bits per second
//! - bCharFormat (1 byte): 0 = 1 stop bit, 1 = 1.5, 2 = 2
//! - bParityType (1 byte): 0 = none, 1 = odd, 2 = even, 3 = mark, 4 = space
//! - bDataBits (1 byte): 5, 6, 7, 8 or 16

use core::fmt;

use hierodule_hal::uart::{DataBits, Parity, StopBits, UartConfig};
use spin::Mutex;

use crate::control::{Rejected, Request, RequestHandler};
use crate::setup::{DataDirection, Recipient, RequestKind, SetupPacket};

pub const SET_LINE_CODING: u8 = 0x20;
pub const GET_LINE_CODING: u8 = 0x21;
pub const SET_CONTROL_LINE_STATE: u8 = 0x22;

/// Size of an encoded line coding
pub const LINE_CODING_LEN: usize = 7;

/// Errors that can occur while decoding a line coding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CdcError {
    /// Fewer than 7 bytes
    Incomplete,
    InvalidCharFormat,
    InvalidParity,
    InvalidDataBits,
}

impl fmt::Display for CdcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CdcError::Incomplete => write!(f, "line coding shorter than 7 bytes"),
            CdcError::InvalidCharFormat => write!(f, "invalid stop bit format"),
            CdcError::InvalidParity => write!(f, "invalid parity type"),
            CdcError::InvalidDataBits => write!(f, "invalid data bit count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CharFormat {
    One,
    OneAndHalf,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParityType {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Serial parameters the host selected for the virtual port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LineCoding {
    pub data_rate: u32,
    pub char_format: CharFormat,
    pub parity: ParityType,
    pub data_bits: u8,
}

impl Default for LineCoding {
    fn default() -> Self {
        Self {
            data_rate: 115_200,
            char_format: CharFormat::One,
            parity: ParityType::None,
            data_bits: 8,
        }
    }
}

impl LineCoding {
    pub fn parse(bytes: &[u8]) -> Result<Self, CdcError> {
        let bytes: &[u8; LINE_CODING_LEN] = bytes
            .get(..LINE_CODING_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(CdcError::Incomplete)?;

        let char_format = match bytes[4] {
            0 => CharFormat::One,
            1 => CharFormat::OneAndHalf,
            2 => CharFormat::Two,
            _ => return Err(CdcError::InvalidCharFormat),
        };
        let parity = match bytes[5] {
            0 => ParityType::None,
            1 => ParityType::Odd,
            2 => ParityType::Even,
            3 => ParityType::Mark,
            4 => ParityType::Space,
            _ => return Err(CdcError::InvalidParity),
        };
        if !matches!(bytes[6], 5..=8 | 16) {
            return Err(CdcError::InvalidDataBits);
        }

        Ok(Self {
            data_rate: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            char_format,
            parity,
            data_bits: bytes[6],
        })
    }

    pub fn to_bytes(&self) -> [u8; LINE_CODING_LEN] {
        let rate = self.data_rate.to_le_bytes();
        let char_format = match self.char_format {
            CharFormat::One => 0,
            CharFormat::OneAndHalf => 1,
            CharFormat::Two => 2,
        };
        let parity = match self.parity {
            ParityType::None => 0,
            ParityType::Odd => 1,
            ParityType::Even => 2,
            ParityType::Mark => 3,
            ParityType::Space => 4,
        };
        [
            rate[0],
            rate[1],
            rate[2],
            rate[3],
            char_format,
            parity,
            self.data_bits,
        ]
    }

    /// Equivalent USART settings, if the hardware can express them
    pub fn to_uart_config(&self) -> Option<UartConfig> {
        let data_bits = match self.data_bits {
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            _ => return None,
        };
        let parity = match self.parity {
            ParityType::None => Parity::None,
            ParityType::Even => Parity::Even,
            ParityType::Odd => Parity::Odd,
            ParityType::Mark | ParityType::Space => return None,
        };
        let stop_bits = match self.char_format {
            CharFormat::One => StopBits::One,
            CharFormat::Two => StopBits::Two,
            CharFormat::OneAndHalf => return None,
        };
        Some(UartConfig {
            baudrate: self.data_rate,
            data_bits,
            parity,
            stop_bits,
            ..UartConfig::default()
        })
    }
}

/// DTR and RTS as set by SET_CONTROL_LINE_STATE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlLineState {
    pub dtr: bool,
    pub rts: bool,
}

impl ControlLineState {
    pub fn from_value(value: u16) -> Self {
        Self {
            dtr: value & 0x01 != 0,
            rts: value & 0x02 != 0,
        }
    }
}

struct AcmState {
    line_coding: LineCoding,
    control_line: ControlLineState,
}

/// Class request handler for one CDC-ACM interface
///
/// Register it for the three class codes with [`CdcAcm::KEYS`].
pub struct CdcAcm {
    state: Mutex<AcmState>,
}

impl Default for CdcAcm {
    fn default() -> Self {
        Self::new()
    }
}

impl CdcAcm {
    /// (kind, recipient, request) keys this handler answers
    pub const KEYS: [(RequestKind, Recipient, u8); 3] = [
        (RequestKind::Class, Recipient::Interface, SET_LINE_CODING),
        (RequestKind::Class, Recipient::Interface, GET_LINE_CODING),
        (RequestKind::Class, Recipient::Interface, SET_CONTROL_LINE_STATE),
    ];

    pub const fn new() -> Self {
        Self {
            state: Mutex::new(AcmState {
                line_coding: LineCoding {
                    data_rate: 115_200,
                    char_format: CharFormat::One,
                    parity: ParityType::None,
                    data_bits: 8,
                },
                control_line: ControlLineState {
                    dtr: false,
                    rts: false,
                },
            }),
        }
    }

    pub fn line_coding(&self) -> LineCoding {
        self.state.lock().line_coding
    }

    pub fn control_line_state(&self) -> ControlLineState {
        self.state.lock().control_line
    }

    /// Host has the port open (DTR asserted)
    pub fn is_open(&self) -> bool {
        self.state.lock().control_line.dtr
    }
}

impl RequestHandler for CdcAcm {
    fn handle(&self, setup: &SetupPacket, request: Request<'_>) -> Result<usize, Rejected> {
        match (setup.request, setup.direction(), request) {
            (SET_LINE_CODING, DataDirection::Out, Request::Out(data)) => {
                let coding = LineCoding::parse(data).map_err(|err| {
                    warn!("rejected line coding: {}", err);
                    Rejected
                })?;
                debug!("line coding {=u32} baud", coding.data_rate);
                self.state.lock().line_coding = coding;
                Ok(0)
            }
            (GET_LINE_CODING, DataDirection::In, Request::In(buf)) => {
                let bytes = self.line_coding().to_bytes();
                let out = buf.get_mut(..LINE_CODING_LEN).ok_or(Rejected)?;
                out.copy_from_slice(&bytes);
                Ok(LINE_CODING_LEN)
            }
            (SET_CONTROL_LINE_STATE, _, Request::NoData) => {
                self.state.lock().control_line = ControlLineState::from_value(setup.value);
                Ok(0)
            }
            _ => Err(Rejected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(request_type: u8, request: u8, value: u16, length: u16) -> SetupPacket {
        let value = value.to_le_bytes();
        let length = length.to_le_bytes();
        SetupPacket::parse(&[request_type, request, value[0], value[1], 0, 0, length[0], length[1]])
            .unwrap()
    }

    #[test]
    fn test_line_coding_wire_format() {
        let bytes = [0x80, 0x25, 0x00, 0x00, 0x00, 0x02, 0x08];
        let coding = LineCoding::parse(&bytes).unwrap();
        assert_eq!(coding.data_rate, 9600);
        assert_eq!(coding.parity, ParityType::Even);
        assert_eq!(coding.to_bytes(), bytes);
    }

    #[test]
    fn test_invalid_line_coding() {
        assert_eq!(LineCoding::parse(&[0; 6]), Err(CdcError::Incomplete));
        assert_eq!(
            LineCoding::parse(&[0, 0, 0, 0, 3, 0, 8]),
            Err(CdcError::InvalidCharFormat)
        );
        assert_eq!(
            LineCoding::parse(&[0, 0, 0, 0, 0, 0, 9]),
            Err(CdcError::InvalidDataBits)
        );
    }

    #[test]
    fn test_uart_mapping() {
        let coding = LineCoding {
            data_rate: 57_600,
            parity: ParityType::Odd,
            ..Default::default()
        };
        let config = coding.to_uart_config().unwrap();
        assert_eq!(config.baudrate, 57_600);
        assert_eq!(config.parity, Parity::Odd);

        let mark = LineCoding {
            parity: ParityType::Mark,
            ..Default::default()
        };
        assert_eq!(mark.to_uart_config(), None);
    }

    #[test]
    fn test_set_then_get_line_coding() {
        let acm = CdcAcm::new();
        let coding = [0x00, 0xC2, 0x01, 0x00, 0x00, 0x00, 0x08];

        let set = setup(0x21, SET_LINE_CODING, 0, 7);
        assert_eq!(acm.handle(&set, Request::Out(&coding)), Ok(0));
        assert_eq!(acm.line_coding().data_rate, 115_200);

        let get = setup(0xA1, GET_LINE_CODING, 0, 7);
        let mut buf = [0u8; 16];
        assert_eq!(acm.handle(&get, Request::In(&mut buf)), Ok(7));
        assert_eq!(&buf[..7], &coding);
    }

    #[test]
    fn test_control_line_state() {
        let acm = CdcAcm::new();
        assert!(!acm.is_open());

        let set = setup(0x21, SET_CONTROL_LINE_STATE, 0x0003, 0);
        assert_eq!(acm.handle(&set, Request::NoData), Ok(0));
        assert_eq!(
            acm.control_line_state(),
            ControlLineState {
                dtr: true,
                rts: true
            }
        );
    }

    #[test]
    fn test_unknown_class_request_rejected() {
        let acm = CdcAcm::new();
        let send_break = setup(0x21, 0x23, 0, 0);
        assert_eq!(acm.handle(&send_break, Request::NoData), Err(Rejected));
    }
}
