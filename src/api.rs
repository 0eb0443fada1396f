pub mod command;
pub mod forecast;
pub mod heartbeat;
pub mod prices;
pub mod source;
pub mod telemetry;
pub mod weather;
