pub mod bus;
pub mod driver;
pub mod interpolate;
pub mod protocol;
pub mod speed;

pub use bus::{BusRx, NoDirection, ServoBus, TxRxError};
#[cfg(feature = "firmware")]
pub use bus::TimedRx;
pub use driver::{DriverState, OutputMode, ServoDriver};
pub use interpolate::{Interpolator, LinearInterpolator};
pub use speed::SpeedEngine;
