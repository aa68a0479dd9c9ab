pub mod channels;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod frame;
pub mod freshness;
pub mod location;
pub mod parsers;
pub mod sniffer;
pub mod store;
pub mod supervisor;
pub mod telemetry;
pub mod worker;

pub use config::Config;
pub use supervisor::Supervisor;
