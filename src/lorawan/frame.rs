//! Envelope codec for data frames
//!
//! Layout: `MHDR | DevAddr (LE) | FCtrl | FCnt (LE) | FOpts | [FPort | FRMPayload]`.
//! Frames carry no MIC; the MAC treats everything after the frame header as
//! opaque payload.

use heapless::Vec;

use crate::config::device::DevAddr;

/// Largest frame the radio can carry
pub const MAX_FRAME_SIZE: usize = 255;

/// Largest FOpts field
pub const MAX_FOPTS_SIZE: usize = 15;

/// Size of MHDR + frame header without FOpts
const MIN_HEADER_SIZE: usize = 1 + 4 + 1 + 2;

/// LoRaWAN major version R1
const MAJOR_R1: u8 = 0x00;

/// Owned frame buffer
pub type Frame = Vec<u8, MAX_FRAME_SIZE>;

/// MAC header types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MType {
    /// Join request
    JoinRequest = 0x00,
    /// Join accept
    JoinAccept = 0x20,
    /// Unconfirmed uplink
    UnconfirmedDataUp = 0x40,
    /// Unconfirmed downlink
    UnconfirmedDataDown = 0x60,
    /// Confirmed uplink
    ConfirmedDataUp = 0x80,
    /// Confirmed downlink
    ConfirmedDataDown = 0xA0,
    /// Rejoin request
    RejoinRequest = 0xC0,
    /// Proprietary frame
    Proprietary = 0xE0,
}

impl MType {
    fn from_mhdr(byte: u8) -> Self {
        match byte & 0xE0 {
            0x00 => MType::JoinRequest,
            0x20 => MType::JoinAccept,
            0x40 => MType::UnconfirmedDataUp,
            0x60 => MType::UnconfirmedDataDown,
            0x80 => MType::ConfirmedDataUp,
            0xA0 => MType::ConfirmedDataDown,
            0xC0 => MType::RejoinRequest,
            _ => MType::Proprietary,
        }
    }

    /// Whether frames of this type travel from device to network
    pub fn is_uplink(self) -> bool {
        matches!(
            self,
            MType::JoinRequest
                | MType::UnconfirmedDataUp
                | MType::ConfirmedDataUp
                | MType::RejoinRequest
        )
    }

    /// Whether this is a data frame carrying a frame header
    pub fn is_data(self) -> bool {
        matches!(
            self,
            MType::UnconfirmedDataUp
                | MType::UnconfirmedDataDown
                | MType::ConfirmedDataUp
                | MType::ConfirmedDataDown
        )
    }
}

/// Frame header flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FCtrl {
    /// Adaptive data rate
    pub adr: bool,
    /// ADR acknowledgement request
    pub adr_ack_req: bool,
    /// Acknowledges the last confirmed frame
    pub ack: bool,
    /// More downlink data pending
    pub f_pending: bool,
    /// Length of FOpts, recomputed on encode
    pub f_opts_len: u8,
}

impl FCtrl {
    fn to_byte(self) -> u8 {
        let mut byte = self.f_opts_len & 0x0F;
        if self.adr {
            byte |= 0x80;
        }
        if self.adr_ack_req {
            byte |= 0x40;
        }
        if self.ack {
            byte |= 0x20;
        }
        if self.f_pending {
            byte |= 0x10;
        }
        byte
    }

    fn from_byte(byte: u8) -> Self {
        Self {
            adr: (byte & 0x80) != 0,
            adr_ack_req: (byte & 0x40) != 0,
            ack: (byte & 0x20) != 0,
            f_pending: (byte & 0x10) != 0,
            f_opts_len: byte & 0x0F,
        }
    }
}

/// Frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Device address
    pub dev_addr: DevAddr,
    /// Frame control flags
    pub f_ctrl: FCtrl,
    /// Lower 16 bits of the frame counter
    pub f_cnt: u16,
    /// Piggy-backed MAC commands
    pub f_opts: Vec<u8, MAX_FOPTS_SIZE>,
}

impl FrameHeader {
    /// Header with empty FOpts and cleared flags
    pub fn new(dev_addr: DevAddr, f_cnt: u16) -> Self {
        Self {
            dev_addr,
            f_ctrl: FCtrl::default(),
            f_cnt,
            f_opts: Vec::new(),
        }
    }
}

/// Codec error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Frame shorter than its headers claim
    TooShort,
    /// Encoded frame does not fit into [`MAX_FRAME_SIZE`]
    BufferTooSmall,
    /// Not a data frame
    NotDataFrame(MType),
}

/// Decoded data frame borrowing its payload from the received bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame<'a> {
    /// Message type
    pub mtype: MType,
    /// Frame header
    pub header: FrameHeader,
    /// Port, absent for header-only frames
    pub f_port: Option<u8>,
    /// FRMPayload
    pub payload: &'a [u8],
}

/// Read only the message type of a frame
pub fn peek_mtype(bytes: &[u8]) -> Result<MType, FrameError> {
    bytes
        .first()
        .map(|mhdr| MType::from_mhdr(*mhdr))
        .ok_or(FrameError::TooShort)
}

/// Prepend MAC and frame headers to a payload
pub fn encode(
    mtype: MType,
    header: &FrameHeader,
    f_port: Option<u8>,
    payload: &[u8],
) -> Result<Frame, FrameError> {
    let mut frame = Frame::new();
    let mut f_ctrl = header.f_ctrl;
    f_ctrl.f_opts_len = header.f_opts.len() as u8;

    frame
        .push(mtype as u8 | MAJOR_R1)
        .map_err(|_| FrameError::BufferTooSmall)?;
    frame
        .extend_from_slice(&header.dev_addr.to_le_bytes())
        .map_err(|_| FrameError::BufferTooSmall)?;
    frame
        .push(f_ctrl.to_byte())
        .map_err(|_| FrameError::BufferTooSmall)?;
    frame
        .extend_from_slice(&header.f_cnt.to_le_bytes())
        .map_err(|_| FrameError::BufferTooSmall)?;
    frame
        .extend_from_slice(&header.f_opts)
        .map_err(|_| FrameError::BufferTooSmall)?;

    if let Some(port) = f_port {
        frame.push(port).map_err(|_| FrameError::BufferTooSmall)?;
        frame
            .extend_from_slice(payload)
            .map_err(|_| FrameError::BufferTooSmall)?;
    }

    Ok(frame)
}

/// Strip MAC and frame headers from a data frame
pub fn decode(bytes: &[u8]) -> Result<DataFrame<'_>, FrameError> {
    let mtype = peek_mtype(bytes)?;
    if !mtype.is_data() {
        return Err(FrameError::NotDataFrame(mtype));
    }
    if bytes.len() < MIN_HEADER_SIZE {
        return Err(FrameError::TooShort);
    }

    let dev_addr = DevAddr::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let f_ctrl = FCtrl::from_byte(bytes[5]);
    let f_cnt = u16::from_le_bytes([bytes[6], bytes[7]]);

    let opts_end = MIN_HEADER_SIZE + f_ctrl.f_opts_len as usize;
    let f_opts = bytes
        .get(MIN_HEADER_SIZE..opts_end)
        .ok_or(FrameError::TooShort)?;

    let (f_port, payload) = match bytes.get(opts_end) {
        Some(port) => (Some(*port), &bytes[opts_end + 1..]),
        None => (None, &bytes[opts_end..]),
    };

    Ok(DataFrame {
        mtype,
        header: FrameHeader {
            dev_addr,
            f_ctrl,
            f_cnt,
            // f_opts_len is a 4-bit field, always fits
            f_opts: Vec::from_slice(f_opts).map_err(|_| FrameError::TooShort)?,
        },
        f_port,
        payload,
    })
}
