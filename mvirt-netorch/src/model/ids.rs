//! Row identities.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($($(#[$meta:meta])* $name:ident => $prefix:literal),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(
                Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
                Deserialize,
            )]
            #[serde(transparent)]
            pub struct $name(pub u64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, concat!($prefix, "-{}"), self.0)
                }
            }

            impl From<u64> for $name {
                fn from(id: u64) -> Self {
                    Self(id)
                }
            }
        )*
    };
}

id_type! {
    NetworkId => "net",
    NicId => "nic",
    VmId => "vm",
    AccountId => "acct",
    DomainId => "dom",
    ZoneId => "zone",
    PhysicalNetworkId => "pnet",
    OfferingId => "off",
    VpcId => "vpc",
    HostId => "host",
}

impl AccountId {
    /// Account used by background work such as the network GC.
    pub const SYSTEM: AccountId = AccountId(1);
}
