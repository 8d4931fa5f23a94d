#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::Spawner;
use embedded_storage::nor_flash::RmwNorFlashStorage;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use kos_hexapod::{
    config::{SEQ_FLASH_OFFSET, SEQ_FLASH_PAGE, SEQ_STORE_SIZE},
    drivers::{clock::EmbassyClock, StoreWindow},
    sequence::{RomSet, SequenceLibrary, SequenceStore, StoreLayout},
    tasks::servo_task,
    Board, MotionController, RobotConfig, ServoBus, ServoDriver,
};

static MERGE_BUF: StaticCell<[u8; SEQ_FLASH_PAGE]> = StaticCell::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Starting kos-hexapod servo controller");
    let board = Board::init();

    let config = RobotConfig::phoenix_hexapod();
    let channels = config.channel_count() as u8;
    let bus = ServoBus::new(board.servo_tx, board.servo_rx, board.servo_dir);
    let driver = ServoDriver::with_linear(bus, EmbassyClock, config);

    let flash = RmwNorFlashStorage::new(board.flash, MERGE_BUF.init([0; SEQ_FLASH_PAGE]));
    let window = StoreWindow::new(flash, SEQ_FLASH_OFFSET, SEQ_STORE_SIZE as usize);
    let store = SequenceStore::new(window, StoreLayout::default(), channels);
    let library = SequenceLibrary::new(RomSet::EMPTY, store);

    let ctl = MotionController::new(driver, library);
    spawner.spawn(servo_task(ctl, board.host, board.header)).unwrap();
    info!("Servo task spawned on main executor");

    core::future::pending::<()>().await;
}
