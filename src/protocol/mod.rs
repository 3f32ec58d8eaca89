//! Message schema for the control and render channels

pub mod control;
pub mod event;
pub mod render;
pub mod sysex;
pub mod wire;

pub use control::{
    ConfigBase, Configure, ControlPort, Initialize, RemotePort, ReplyKind, ReplyPayload, Request,
    RequestKind, Response, INITIALIZE_ID,
};
pub use event::SequencerEvent;
pub use render::{RenderMessage, RenderPort, StatusData};
pub use sysex::SysExControl;
