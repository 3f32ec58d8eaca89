//! Sequencer events carried by `event` requests

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SequencerEvent {
    NoteOn { channel: u8, key: u8, vel: u8 },
    NoteOff { channel: u8, key: u8 },
    /// Note with an explicit duration in milliseconds
    Note {
        channel: u8,
        key: u8,
        vel: u8,
        duration: u32,
    },
    AllNotesOff { channel: u8 },
    AllSoundsOff { channel: u8 },
    BankSelect { channel: u8, bank: u16 },
    ProgramChange { channel: u8, preset: u8 },
    ControlChange { channel: u8, control: u8, value: u8 },
    /// 14-bit value, 8192 is centre
    PitchBend { channel: u8, value: u16 },
    ChannelPressure { channel: u8, value: u8 },
    KeyPressure { channel: u8, key: u8, value: u8 },
    SystemReset,
    #[serde(other)]
    Unknown,
}

impl SequencerEvent {
    pub fn channel(&self) -> Option<u8> {
        match self {
            SequencerEvent::NoteOn { channel, .. }
            | SequencerEvent::NoteOff { channel, .. }
            | SequencerEvent::Note { channel, .. }
            | SequencerEvent::AllNotesOff { channel }
            | SequencerEvent::AllSoundsOff { channel }
            | SequencerEvent::BankSelect { channel, .. }
            | SequencerEvent::ProgramChange { channel, .. }
            | SequencerEvent::ControlChange { channel, .. }
            | SequencerEvent::PitchBend { channel, .. }
            | SequencerEvent::ChannelPressure { channel, .. }
            | SequencerEvent::KeyPressure { channel, .. } => Some(*channel),
            SequencerEvent::SystemReset | SequencerEvent::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let ev = SequencerEvent::NoteOn {
            channel: 9,
            key: 36,
            vel: 100,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "noteon");
        assert_eq!(json["key"], 36);
        assert_eq!(ev.channel(), Some(9));
    }

    #[test]
    fn test_unknown_event_tolerated() {
        let ev: SequencerEvent = serde_json::from_str(r#"{"type":"timer","data":1}"#).unwrap();
        assert_eq!(ev, SequencerEvent::Unknown);
        assert_eq!(ev.channel(), None);
    }
}
