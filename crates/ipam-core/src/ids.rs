use serde::{Deserialize, Serialize};

/// Arena index types used instead of owning pointers, so the Group/Host tree and the Block
/// arena can hold back-references (Group -> parent, Host -> Group, owner record -> Block)
/// without forming ownership cycles and while staying trivially serializable.
macro_rules! arena_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

arena_id!(GroupId);
arena_id!(HostId);
arena_id!(BlockId);
