use crate::protocol::LogLevel;

crate::api_schema! {
    group General;
    0 => Log((LogLevel, String)) -> ();
}
