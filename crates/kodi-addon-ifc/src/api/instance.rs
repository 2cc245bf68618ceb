//! Add-on to host callbacks scoped to one instance.
//!
//! The first element of every input is the instance token the host handed
//! out in [`InstanceInfo::backend`](crate::protocol::InstanceInfo).

use crate::arena::InstanceToken;

crate::api_schema! {
    group AddonInstance;
    0 => GetUserPath(InstanceToken) -> Option<String>;
    1 => IsSettingUsingDefault((InstanceToken, String)) -> bool;
    2 => GetSettingBool((InstanceToken, String)) -> Option<bool>;
    3 => GetSettingInt((InstanceToken, String)) -> Option<i32>;
    4 => GetSettingFloat((InstanceToken, String)) -> Option<f32>;
    5 => GetSettingString((InstanceToken, String)) -> Option<String>;
    6 => SetSettingBool((InstanceToken, String, bool)) -> bool;
    7 => SetSettingInt((InstanceToken, String, i32)) -> bool;
    8 => SetSettingFloat((InstanceToken, String, f32)) -> bool;
    9 => SetSettingString((InstanceToken, String, String)) -> bool;
}
