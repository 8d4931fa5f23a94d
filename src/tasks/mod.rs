pub mod servo;

pub use servo::{servo_task, ServoController};
