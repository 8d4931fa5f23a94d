use defmt::{info, warn};
use embassy_executor::task;
use embassy_futures::select::{select3, Either3};
use embassy_stm32::flash::{Blocking, Flash};
use embassy_stm32::gpio::Output;
use embassy_stm32::mode::Async;
use embassy_stm32::usart::{BufferedUart, UartTx};
use embassy_time::{Duration, Ticker};
use embedded_io_async::Read;
use embedded_storage::nor_flash::RmwNorFlashStorage;

use crate::board::HeaderPins;
use crate::config::BACKGROUND_TICK_MS;
use crate::control::MotionController;
use crate::drivers::clock::EmbassyClock;
use crate::drivers::servo::{LinearInterpolator, TimedRx};
use crate::drivers::StoreWindow;
use crate::ipc::COMMAND_CH;

pub type SequenceFlash = StoreWindow<RmwNorFlashStorage<'static, Flash<'static, Blocking>>>;

pub type ServoController = MotionController<
    UartTx<'static, Async>,
    TimedRx,
    Output<'static>,
    EmbassyClock,
    LinearInterpolator,
    SequenceFlash,
>;

/// Owns the servo bus. Operator commands, PC link bytes and the background
/// tick are served one at a time so nothing else ever touches the bus.
#[task]
pub async fn servo_task(mut ctl: ServoController, mut host: BufferedUart<'static>, mut header: HeaderPins) {
    info!("starting servo task");
    ctl.init().await;

    let mut ticker = Ticker::every(Duration::from_millis(BACKGROUND_TICK_MS));
    let mut buf = [0u8; 64];
    loop {
        match select3(COMMAND_CH.receive(), host.read(&mut buf), ticker.next()).await {
            Either3::First(cmd) => {
                if let Err(e) = ctl.apply(cmd).await {
                    warn!("command {:?} failed: {:?}", cmd, e);
                }
            }
            Either3::Second(Ok(n)) => {
                if let Err(e) = ctl.host_input(&buf[..n], &mut host, &mut header).await {
                    warn!("host link: {:?}", e);
                }
            }
            Either3::Second(Err(e)) => warn!("host uart: {:?}", e),
            Either3::Third(()) => {
                if let Err(e) = ctl.tick().await {
                    warn!("servo tick: {:?}", e);
                }
            }
        }
    }
}
