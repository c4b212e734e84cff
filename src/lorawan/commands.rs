use heapless::Vec;

/// MAC command identifiers
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandIdentifier {
    LinkCheck = 0x02,
    LinkADR = 0x03,
    DutyCycle = 0x04,
    RXParamSetup = 0x05,
    DevStatus = 0x06,
    NewChannel = 0x07,
    RXTimingSetup = 0x08,
    TxParamSetup = 0x09,
    DlChannel = 0x0A,
}

impl CommandIdentifier {
    fn from_cid(cid: u8) -> Option<Self> {
        match cid {
            0x02 => Some(Self::LinkCheck),
            0x03 => Some(Self::LinkADR),
            0x04 => Some(Self::DutyCycle),
            0x05 => Some(Self::RXParamSetup),
            0x06 => Some(Self::DevStatus),
            0x07 => Some(Self::NewChannel),
            0x08 => Some(Self::RXTimingSetup),
            0x09 => Some(Self::TxParamSetup),
            0x0A => Some(Self::DlChannel),
            _ => None,
        }
    }

    /// Payload length of the network-to-device form of the command
    fn downlink_len(self) -> usize {
        match self {
            Self::LinkCheck => 2,
            Self::LinkADR => 4,
            Self::DutyCycle => 1,
            Self::RXParamSetup => 4,
            Self::DevStatus => 0,
            Self::NewChannel => 5,
            Self::RXTimingSetup => 1,
            Self::TxParamSetup => 1,
            Self::DlChannel => 4,
        }
    }
}

/// Command sent by the network to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DownlinkCommand {
    /// Link check answer
    LinkCheckAns {
        /// Link margin in dB
        margin: u8,
        /// Number of gateways that received the request
        gateway_count: u8,
    },
    /// RX parameter setup request
    RxParamSetupReq {
        /// RX1 data rate offset
        rx1_dr_offset: u8,
        /// RX2 data rate
        rx2_data_rate: u8,
        /// RX2 frequency in Hz
        frequency: u32,
    },
    /// Device status request
    DevStatusReq,
    /// Well-formed command this device does not act on
    Unsupported {
        /// Command identifier
        cid: u8,
    },
}

impl DownlinkCommand {
    /// Append the wire form of the command to a buffer
    pub fn write_to<const N: usize>(&self, buffer: &mut Vec<u8, N>) -> Result<(), ()> {
        match *self {
            DownlinkCommand::LinkCheckAns {
                margin,
                gateway_count,
            } => buffer.extend_from_slice(&[CommandIdentifier::LinkCheck as u8, margin, gateway_count]),
            DownlinkCommand::RxParamSetupReq {
                rx1_dr_offset,
                rx2_data_rate,
                frequency,
            } => {
                let dl_settings = ((rx1_dr_offset & 0x07) << 4) | (rx2_data_rate & 0x0F);
                let freq = (frequency / 100).to_le_bytes();
                buffer.extend_from_slice(&[
                    CommandIdentifier::RXParamSetup as u8,
                    dl_settings,
                    freq[0],
                    freq[1],
                    freq[2],
                ])
            }
            DownlinkCommand::DevStatusReq => buffer
                .push(CommandIdentifier::DevStatus as u8)
                .map_err(|_| ()),
            DownlinkCommand::Unsupported { cid } => buffer.push(cid).map_err(|_| ()),
        }
    }
}

/// Iterator over the commands in an FOpts field or a port 0 payload
///
/// Iteration stops at the first unknown identifier or truncated command,
/// since the length of anything after it cannot be known.
pub struct DownlinkCommands<'a> {
    bytes: &'a [u8],
}

impl<'a> DownlinkCommands<'a> {
    /// Parse commands from raw bytes
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}

impl<'a> Iterator for DownlinkCommands<'a> {
    type Item = DownlinkCommand;

    fn next(&mut self) -> Option<Self::Item> {
        let (&cid, rest) = self.bytes.split_first()?;
        let Some(identifier) = CommandIdentifier::from_cid(cid) else {
            self.bytes = &[];
            return None;
        };
        let len = identifier.downlink_len();
        if rest.len() < len {
            self.bytes = &[];
            return None;
        }
        let (payload, rest) = rest.split_at(len);
        self.bytes = rest;

        let command = match identifier {
            CommandIdentifier::LinkCheck => DownlinkCommand::LinkCheckAns {
                margin: payload[0],
                gateway_count: payload[1],
            },
            CommandIdentifier::RXParamSetup => DownlinkCommand::RxParamSetupReq {
                rx1_dr_offset: (payload[0] >> 4) & 0x07,
                rx2_data_rate: payload[0] & 0x0F,
                frequency: u32::from_le_bytes([payload[1], payload[2], payload[3], 0]) * 100,
            },
            CommandIdentifier::DevStatus => DownlinkCommand::DevStatusReq,
            _ => DownlinkCommand::Unsupported { cid },
        };
        Some(command)
    }
}

/// Command sent by the device to the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UplinkCommand {
    /// Link check request
    LinkCheckReq,
    /// RX parameter setup answer
    RxParamSetupAns {
        /// RX1 data rate offset ACK
        rx1_dr_offset_ack: bool,
        /// RX2 data rate ACK
        rx2_data_rate_ack: bool,
        /// Channel ACK
        channel_ack: bool,
    },
    /// Device status answer
    DevStatusAns {
        /// Battery level (0 = external power, 1-254 = level, 255 = unknown)
        battery: u8,
        /// Demodulation margin in dB (-32..31)
        margin: i8,
    },
}

impl UplinkCommand {
    /// Encoded length including the identifier
    pub fn len(&self) -> usize {
        match self {
            UplinkCommand::LinkCheckReq => 1,
            UplinkCommand::RxParamSetupAns { .. } => 2,
            UplinkCommand::DevStatusAns { .. } => 3,
        }
    }

    /// Append the wire form of the command to a buffer
    pub fn write_to<const N: usize>(&self, buffer: &mut Vec<u8, N>) -> Result<(), ()> {
        match *self {
            UplinkCommand::LinkCheckReq => buffer
                .push(CommandIdentifier::LinkCheck as u8)
                .map_err(|_| ()),
            UplinkCommand::RxParamSetupAns {
                rx1_dr_offset_ack,
                rx2_data_rate_ack,
                channel_ack,
            } => {
                let status = (rx1_dr_offset_ack as u8) << 2
                    | (rx2_data_rate_ack as u8) << 1
                    | channel_ack as u8;
                buffer.extend_from_slice(&[CommandIdentifier::RXParamSetup as u8, status])
            }
            UplinkCommand::DevStatusAns { battery, margin } => buffer.extend_from_slice(&[
                CommandIdentifier::DevStatus as u8,
                battery,
                (margin.clamp(-32, 31) as u8) & 0x3F,
            ]),
        }
    }
}
