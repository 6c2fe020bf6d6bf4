use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize, WeightUpdate};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_H: Header = 0;
const CONTROL_H: Header = 1;
const PARTIAL_H: Header = 2;
const UPDATE_H: Header = 3;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    /// A host's partial gradient sum for an index owned by the receiver.
    Partial(WeightUpdate),
    /// The owner's new value for one of its indices.
    Update(WeightUpdate),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Connect { host_id: usize },
    PartialsDone { iteration: usize },
    UpdatesDone { iteration: usize },
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short name for the message's kind, useful for logging protocol violations.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Connect { .. }) => "control/connect",
            Msg::Control(Command::PartialsDone { .. }) => "control/partials_done",
            Msg::Control(Command::UpdatesDone { .. }) => "control/updates_done",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(Payload::Partial(_)) => "data/partial",
            Msg::Data(Payload::Update(_)) => "data/update",
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_H.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_H.to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, &cmd).unwrap();
                None
            }
            Msg::Data(payload) => {
                let (kind, update) = match payload {
                    Payload::Partial(update) => (PARTIAL_H, update),
                    Payload::Update(update) => (UPDATE_H, update),
                };

                buf.extend_from_slice(&kind.to_be_bytes());
                update.write_to(buf);
                None
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);

        // SAFETY: We splitted the buffer to be of size `HEADER_SIZE` just above.
        let kind = Header::from_be_bytes(kind_buf.try_into().unwrap());

        match kind {
            ERR_H => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_H => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            PARTIAL_H => Ok(Self::Data(Payload::Partial(WeightUpdate::read_from(rest)?))),
            UPDATE_H => Ok(Self::Data(Payload::Update(WeightUpdate::read_from(rest)?))),
            kind => Self::invalid_kind_byte(kind),
        }
    }
}
