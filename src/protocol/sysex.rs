//! System-exclusive payload tagged with a rational beat position

use serde::{Deserialize, Serialize};

use crate::audio::buffer::Transfer;
use crate::protocol::control::Request;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "objType", rename = "SysExControl", rename_all = "camelCase")]
pub struct SysExControl {
    pub note_pos_numerator: u32,
    pub note_pos_denominator: u32,
    pub raw_data: Vec<u8>,
}

impl SysExControl {
    /// Copy `data` at position `numerator / denominator`
    pub fn new(numerator: u32, denominator: u32, data: &[u8]) -> Self {
        Self {
            note_pos_numerator: numerator,
            note_pos_denominator: denominator,
            raw_data: data.to_vec(),
        }
    }

    /// Copy `len` bytes of `buffer` starting at `offset`; `len` defaults to the rest
    pub fn from_range(
        numerator: u32,
        denominator: u32,
        buffer: &[u8],
        offset: usize,
        len: Option<usize>,
    ) -> Self {
        let start = offset.min(buffer.len());
        let end = len.map_or(buffer.len(), |l| (start + l).min(buffer.len()));
        Self::new(numerator, denominator, &buffer[start..end])
    }

    /// Build a `sysex` request from a copy of the payload
    pub fn to_request(&self, time: Option<f64>) -> Request {
        Request::SysEx {
            data: Transfer::copy_of(&self.raw_data),
            time,
        }
    }

    fn same_position(&self, other: &Self) -> bool {
        u64::from(self.note_pos_numerator) * u64::from(other.note_pos_denominator)
            == u64::from(self.note_pos_denominator) * u64::from(other.note_pos_numerator)
    }
}

impl PartialEq for SysExControl {
    fn eq(&self, other: &Self) -> bool {
        self.same_position(other) && self.raw_data == other.raw_data
    }
}

impl Eq for SysExControl {}
