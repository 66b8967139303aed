mod connection;
mod events;
pub(crate) mod utils;
