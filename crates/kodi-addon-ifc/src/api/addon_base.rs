//! Host to add-on lifecycle calls.

use crate::protocol::{AddonStatus, InstanceInfo};

crate::api_schema! {
    group AddonBase;
    /// Add-on level create, sent on the first instance attach.
    0 => Create(InstanceInfo) -> AddonStatus;
    /// Add-on level destroy, sent when the last instance detaches.
    1 => Destroy(()) -> ();
    /// Returns the status and the add-on side instance handle.
    2 => CreateInstance(InstanceInfo) -> (AddonStatus, u64);
    3 => DestroyInstance((InstanceInfo, u64)) -> ();
}
