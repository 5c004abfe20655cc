mod pool;

pub use pool::{install_drivers, Database};
