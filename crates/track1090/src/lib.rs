#![doc = include_str!("../readme.md")]

pub mod decode;
pub mod demod;
pub mod engine;
pub mod filter;
pub mod geomag;
pub mod output;
pub mod stats;
pub mod track;

pub mod prelude {
    /// This re-export is necessary to decode messages
    pub use deku::prelude::*;

    pub use crate::decode::adsb::{ADSB, ME};
    pub use crate::decode::bds::bds05::AirbornePosition;
    pub use crate::decode::bds::bds06::SurfacePosition;
    pub use crate::decode::bds::bds08::AircraftIdentification;
    pub use crate::decode::bds::bds09::AirborneVelocity;
    pub use crate::decode::bds::bds61::AircraftStatus;
    pub use crate::decode::bds::bds62::TargetStateAndStatus;
    pub use crate::decode::bds::bds65::OperationStatus;
    pub use crate::decode::commb::CommB;
    pub use crate::decode::cpr::Position;
    /// The root structure to decode messages
    pub use crate::decode::Message;
    pub use crate::decode::DF::*;
    pub use crate::decode::{
        AddrType, DataSource, Decoded, Settings, TimedMessage, ICAO,
    };
    pub use crate::engine::Engine;
    pub use crate::filter::IcaoFilter;
    pub use crate::track::{Aircraft, Tracker};
}
