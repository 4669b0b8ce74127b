pub mod address;
pub mod bookmark;
pub mod emoji;
pub mod mute_list;
pub mod reaction;
pub mod reference;
pub mod relay_list;
pub mod tag_utils;

pub use address::Address;
pub use mute_list::{MuteEntry, MuteList};
pub use reaction::{reactions_to, ReactionTarget};
pub use reference::{Pointer, RecordRef, References};
pub use relay_list::{RelayList, RelayUsage};
