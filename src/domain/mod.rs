// Domain layer: records, store wire types and the ports the core drives.

pub mod document;
pub mod model;
pub mod ports;
