//! Fragmenter / Defragmenter (§4.3): splits oversize frames into N
//! equal-size fragments and reassembles them regardless of arrival order.

mod defragmenter;
mod fragmenter;

pub use defragmenter::{Defragmenter, DefragmenterError};
pub use fragmenter::split_frame;
