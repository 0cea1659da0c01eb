// DIS PDU wire format
pub mod entity_state;
pub mod frame;
pub mod header;

pub use entity_state::*;
pub use header::*;
