//! Millisecond time source for the control loop.

#[allow(async_fn_in_trait)]
pub trait Clock {
    fn now_ms(&self) -> u64;

    async fn delay_ms(&mut self, ms: u32);

    async fn delay_until(&mut self, at_ms: u64) {
        let now = self.now_ms();
        if at_ms > now {
            self.delay_ms((at_ms - now).min(u32::MAX as u64) as u32).await;
        }
    }
}

#[cfg(feature = "firmware")]
pub use embassy::EmbassyClock;

#[cfg(feature = "firmware")]
mod embassy {
    use embassy_time::{Instant, Timer};

    /// Clock backed by the embassy time driver.
    #[derive(Clone, Copy, Default)]
    pub struct EmbassyClock;

    impl super::Clock for EmbassyClock {
        fn now_ms(&self) -> u64 {
            Instant::now().as_millis()
        }

        async fn delay_ms(&mut self, ms: u32) {
            Timer::after_millis(ms as u64).await;
        }
    }
}
