pub mod dbus_proxies;
pub mod observer;
pub mod profile;
pub mod store;
pub mod types;

pub use store::NmStation;
