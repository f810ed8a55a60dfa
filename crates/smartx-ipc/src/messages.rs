//! The handshake vocabulary between the plugin and the router.
//!
//! Message IDs are fixed at build time and must stay stable across both
//! processes; they are part of the shared-memory protocol.

use smartx_common::{SampleFormat, SetParameters};

use crate::container::{IpcMessage, PAYLOAD_CAPACITY};

/// Control verbs of the plugin protocol. Values are the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ControlCommand {
    Nak = 0,
    Ack = 1,
    GetLatency = 2,
    Start = 3,
    Pause = 4,
    Resume = 5,
    Stop = 6,
    Drain = 7,
    Parameters = 8,
}

impl ControlCommand {
    pub fn from_wire(value: i32) -> Option<ControlCommand> {
        Some(match value {
            0 => ControlCommand::Nak,
            1 => ControlCommand::Ack,
            2 => ControlCommand::GetLatency,
            3 => ControlCommand::Start,
            4 => ControlCommand::Pause,
            5 => ControlCommand::Resume,
            6 => ControlCommand::Stop,
            7 => ControlCommand::Drain,
            8 => ControlCommand::Parameters,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ControlCommand::Nak => "NAK",
            ControlCommand::Ack => "ACK",
            ControlCommand::GetLatency => "GetLatency",
            ControlCommand::Start => "Start",
            ControlCommand::Pause => "Pause",
            ControlCommand::Resume => "Resume",
            ControlCommand::Stop => "Stop",
            ControlCommand::Drain => "Drain",
            ControlCommand::Parameters => "Parameters",
        };
        f.write_str(name)
    }
}

/// Bare control request.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CtrlMessage {
    control: i32,
}

impl CtrlMessage {
    pub fn new(control: ControlCommand) -> Self {
        CtrlMessage {
            control: control as i32,
        }
    }

    pub fn control(&self) -> Option<ControlCommand> {
        ControlCommand::from_wire(self.control)
    }
}

unsafe impl IpcMessage for CtrlMessage {
    const ID: u32 = 1;
}

/// Control tag plus one float; reserved for tuning parameters.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct FloatMessage {
    control: i32,
    pub value: f32,
}

impl FloatMessage {
    pub fn new(control: ControlCommand, value: f32) -> Self {
        FloatMessage {
            control: control as i32,
            value,
        }
    }

    pub fn control(&self) -> Option<ControlCommand> {
        ControlCommand::from_wire(self.control)
    }
}

unsafe impl IpcMessage for FloatMessage {
    const ID: u32 = 2;
}

/// Control tag plus one int32; used for latency replies.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Int32Message {
    control: i32,
    pub value: i32,
}

impl Int32Message {
    pub fn new(control: ControlCommand, value: i32) -> Self {
        Int32Message {
            control: control as i32,
            value,
        }
    }

    pub fn control(&self) -> Option<ControlCommand> {
        ControlCommand::from_wire(self.control)
    }
}

unsafe impl IpcMessage for Int32Message {
    const ID: u32 = 3;
}

/// Control tag plus the negotiated hardware parameters.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ParamMessage {
    control: i32,
    num_channels: u32,
    sample_rate: u32,
    period_size: u32,
    num_periods: u32,
    data_format: i32,
}

impl ParamMessage {
    pub fn new(control: ControlCommand, params: &SetParameters) -> Self {
        ParamMessage {
            control: control as i32,
            num_channels: params.num_channels,
            sample_rate: params.sample_rate,
            period_size: params.period_size,
            num_periods: params.num_periods,
            data_format: params.data_format as i32,
        }
    }

    pub fn control(&self) -> Option<ControlCommand> {
        ControlCommand::from_wire(self.control)
    }

    pub fn params(&self) -> Option<SetParameters> {
        Some(SetParameters {
            num_channels: self.num_channels,
            sample_rate: self.sample_rate,
            period_size: self.period_size,
            num_periods: self.num_periods,
            data_format: SampleFormat::from_wire(self.data_format)?,
        })
    }
}

unsafe impl IpcMessage for ParamMessage {
    const ID: u32 = 4;
}

/// Response to a control request: the request's tag plus ACK or NAK.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ResponseMessage {
    control: i32,
    response: i32,
}

impl ResponseMessage {
    pub fn new(control: ControlCommand, response: ControlCommand) -> Self {
        ResponseMessage {
            control: control as i32,
            response: response as i32,
        }
    }

    pub fn control(&self) -> Option<ControlCommand> {
        ControlCommand::from_wire(self.control)
    }

    pub fn response(&self) -> Option<ControlCommand> {
        ControlCommand::from_wire(self.response)
    }

    pub fn is_ack(&self) -> bool {
        self.response == ControlCommand::Ack as i32
    }
}

unsafe impl IpcMessage for ResponseMessage {
    const ID: u32 = 5;
}

// Every protocol record must fit one container payload.
const _: () = assert!(std::mem::size_of::<CtrlMessage>() <= PAYLOAD_CAPACITY);
const _: () = assert!(std::mem::size_of::<FloatMessage>() <= PAYLOAD_CAPACITY);
const _: () = assert!(std::mem::size_of::<Int32Message>() <= PAYLOAD_CAPACITY);
const _: () = assert!(std::mem::size_of::<ParamMessage>() <= PAYLOAD_CAPACITY);
const _: () = assert!(std::mem::size_of::<ResponseMessage>() <= PAYLOAD_CAPACITY);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_round_trip() {
        for cmd in [
            ControlCommand::Nak,
            ControlCommand::Ack,
            ControlCommand::GetLatency,
            ControlCommand::Start,
            ControlCommand::Pause,
            ControlCommand::Resume,
            ControlCommand::Stop,
            ControlCommand::Drain,
            ControlCommand::Parameters,
        ] {
            assert_eq!(ControlCommand::from_wire(cmd as i32), Some(cmd));
        }
        assert_eq!(ControlCommand::from_wire(-1), None);
        assert_eq!(ControlCommand::from_wire(42), None);
    }

    #[test]
    fn param_message_round_trip() {
        let params = SetParameters {
            num_channels: 2,
            sample_rate: 48_000,
            period_size: 1024,
            num_periods: 4,
            data_format: SampleFormat::Float32,
        };
        let msg = ParamMessage::new(ControlCommand::Parameters, &params);
        assert_eq!(msg.control(), Some(ControlCommand::Parameters));
        assert_eq!(msg.params(), Some(params));
    }

    #[test]
    fn response_ack() {
        let r = ResponseMessage::new(ControlCommand::Start, ControlCommand::Ack);
        assert!(r.is_ack());
        assert_eq!(r.control(), Some(ControlCommand::Start));
        let n = ResponseMessage::new(ControlCommand::Start, ControlCommand::Nak);
        assert!(!n.is_ack());
    }
}
