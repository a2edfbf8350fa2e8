//! Clock alignment between independently clocked devices

mod clock;

pub use clock::ClockOffset;
