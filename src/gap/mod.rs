//! GAP data formats carried as payloads by the other layers.
pub mod ad_structure;
pub mod ltv;

pub use ad_structure::AdStructure;
pub use ltv::LtvMap;
