//! Typed function schema for every API surface crossing the add-on boundary.
//!
//! Each function is a unit type implementing [`ApiFunction`], generated by
//! [`api_schema!`] from one table per [`FuncGroup`]. The `(GROUP, ID)` pair
//! selects the handler and `Input`/`Output` fix the tuple shapes; nothing
//! about the shape is negotiated at runtime.

use crate::error::{InterfaceError, Result};
use crate::protocol::{FuncGroup, Frame};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod addon_base;
pub mod general;
pub mod instance;
pub mod main;

pub trait ApiFunction {
    const GROUP: FuncGroup;
    const ID: u32;
    const NAME: &'static str;
    type Input: Serialize + DeserializeOwned;
    type Output: Serialize + DeserializeOwned;
}

/// Declares the functions of one group.
///
/// ```ignore
/// api_schema! {
///     group General;
///     0 => Log((LogLevel, String)) -> ();
/// }
/// ```
#[macro_export]
macro_rules! api_schema {
    (
        group $group:ident;
        $(
            $(#[$meta:meta])*
            $id:literal => $name:ident ( $input:ty ) -> $output:ty;
        )*
    ) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct $name;

            impl $crate::api::ApiFunction for $name {
                const GROUP: $crate::protocol::FuncGroup = $crate::protocol::FuncGroup::$group;
                const ID: u32 = $id;
                const NAME: &'static str = stringify!($name);
                type Input = $input;
                type Output = $output;
            }
        )*

        /// `(id, name)` of every function in this group.
        pub const SCHEMA: &[(u32, &str)] = &[$(($id, stringify!($name))),*];
    };
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Builds the call frame for `F`.
pub fn frame<F: ApiFunction>(input: &F::Input) -> Result<Frame> {
    Ok(Frame::new(F::GROUP, F::ID, encode(input)?))
}

/// Name of a function for log output.
pub fn function_name(group: FuncGroup, func: u32) -> Option<&'static str> {
    let schema = match group {
        FuncGroup::Main => main::SCHEMA,
        FuncGroup::AddonBase => addon_base::SCHEMA,
        FuncGroup::General => general::SCHEMA,
        FuncGroup::AddonInstance => instance::SCHEMA,
        FuncGroup::Filesystem | FuncGroup::Network => return None,
    };
    schema
        .iter()
        .find(|(id, _)| *id == func)
        .map(|(_, name)| *name)
}

pub(crate) fn unknown_function(frame: &Frame) -> InterfaceError {
    InterfaceError::UnknownFunction {
        group: frame.group,
        func: frame.func,
    }
}
