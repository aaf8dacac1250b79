pub mod logging;
pub mod proxy;
