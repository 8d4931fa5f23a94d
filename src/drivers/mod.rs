pub mod clock;
pub mod nvstore;
pub mod servo;

pub use clock::Clock;
pub use nvstore::StoreWindow;
pub use servo::{ServoBus, ServoDriver};
