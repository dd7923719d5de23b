//! Line-oriented wire protocol.
//!
//! Commands sent to the robot: `ha`, `mt`, `sc`, `qs`, `ck`.
//! Robot-originated lines begin with a two character tag: `st` (motion
//! status), `px` (proxy echo), `ct` (contacts), `sv` (supply voltage),
//! `ck` (clock reply). Every line has a fixed positional parameter count;
//! a mismatch is a protocol format error that is reported and dropped.

pub mod clock;
pub mod messages;

pub use clock::{ClockConverter, ClockSyncEvent};
pub use messages::{
    ContactsMessage, MotionMessage, MoveDirection, ProxyMessage, RobotCommand, SupplyMessage,
    TimedLine,
};
