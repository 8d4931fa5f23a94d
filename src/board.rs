use embassy_stm32::flash::{Blocking, Flash};
use embassy_stm32::mode::Async;
use embassy_stm32::usart::{BufferedUart, Config as UsartConfig, Uart, UartTx};
use embassy_stm32::{
    bind_interrupts,
    gpio::{Level, Output, Pull, Speed},
    peripherals, rcc, usart, Config,
};
use static_cell::StaticCell;

use crate::config::{HOST_BAUDRATE, UART_BAUDRATE};
use crate::drivers::servo::TimedRx;
use crate::host::SelfTestIo;

// ── IRQ table ─────────────────────────────────────────────
bind_interrupts!(pub struct Irqs {
    USART1 => usart::InterruptHandler<peripherals::USART1>;
    USART2 => usart::BufferedInterruptHandler<peripherals::USART2>;
});

static SERVO_DMA_BUF: StaticCell<[u8; 256]> = StaticCell::new();
static HOST_TX_BUF: StaticCell<[u8; 128]> = StaticCell::new();
static HOST_RX_BUF: StaticCell<[u8; 256]> = StaticCell::new();

/// Expansion header driven by the host self test: eight digital pins
/// (0..=7) and eight analog-capable pins addressed as 31..=24.
pub struct HeaderPins {
    digital: [Output<'static>; 8],
    analog: [Output<'static>; 8],
}

impl SelfTestIo for HeaderPins {
    fn set_pin(&mut self, pin: u8, high: bool) {
        let out = match pin {
            0..=7 => &mut self.digital[pin as usize],
            24..=31 => &mut self.analog[(31 - pin) as usize],
            _ => return,
        };
        out.set_level(if high { Level::High } else { Level::Low });
    }
}

// ── Board struct ──────────────────────────────────────────
pub struct Board {
    pub servo_tx: UartTx<'static, Async>,
    pub servo_rx: TimedRx,
    /// Transceiver direction, high while transmitting.
    pub servo_dir: Output<'static>,
    pub host: BufferedUart<'static>,
    pub flash: Flash<'static, Blocking>,
    pub header: HeaderPins,
}

impl Board {
    pub fn init() -> Self {
        let mut config = Config::default();

        // HSI 16MHz -> PLL 64MHz
        config.rcc.hsi = Some(rcc::Hsi {
            sys_div: rcc::HsiSysDiv::DIV1,
        });
        config.rcc.pll = Some(rcc::Pll {
            source: rcc::PllSource::HSI,
            prediv: rcc::PllPreDiv::DIV2,   // 16MHz / 2 = 8MHz
            mul: rcc::PllMul::MUL16,        // 8MHz * 16 = 128MHz
            divp: None,
            divq: None,
            divr: Some(rcc::PllRDiv::DIV2), // 128MHz / 2 = 64MHz
        });
        config.rcc.sys = rcc::Sysclk::PLL1_R;
        let p = embassy_stm32::init(config);

        // AX-12 bus on USART1, DMA-circular RX
        let mut bus_cfg = UsartConfig::default();
        bus_cfg.baudrate = UART_BAUDRATE;
        bus_cfg.rx_pull = Pull::Up;
        let uart = Uart::new(p.USART1, p.PC5, p.PC4, Irqs, p.DMA1_CH2, p.DMA1_CH3, bus_cfg).unwrap();
        let (servo_tx, rx) = uart.split();
        let rx = rx.into_ring_buffered(SERVO_DMA_BUF.init([0; 256]));
        let servo_dir = Output::new(p.PA8, Level::Low, Speed::High);

        // PC link on USART2
        let mut host_cfg = UsartConfig::default();
        host_cfg.baudrate = HOST_BAUDRATE;
        let host = BufferedUart::new(
            p.USART2,
            Irqs,
            p.PA3,
            p.PA2,
            HOST_TX_BUF.init([0; 128]),
            HOST_RX_BUF.init([0; 256]),
            host_cfg,
        )
        .unwrap();

        let flash = Flash::new_blocking(p.FLASH);

        let header = HeaderPins {
            digital: [
                Output::new(p.PB0, Level::Low, Speed::Low),
                Output::new(p.PB1, Level::Low, Speed::Low),
                Output::new(p.PB2, Level::Low, Speed::Low),
                Output::new(p.PB3, Level::Low, Speed::Low),
                Output::new(p.PB4, Level::Low, Speed::Low),
                Output::new(p.PB5, Level::Low, Speed::Low),
                Output::new(p.PB6, Level::Low, Speed::Low),
                Output::new(p.PB7, Level::Low, Speed::Low),
            ],
            analog: [
                Output::new(p.PA0, Level::Low, Speed::Low),
                Output::new(p.PA1, Level::Low, Speed::Low),
                Output::new(p.PA4, Level::Low, Speed::Low),
                Output::new(p.PA5, Level::Low, Speed::Low),
                Output::new(p.PA6, Level::Low, Speed::Low),
                Output::new(p.PA7, Level::Low, Speed::Low),
                Output::new(p.PB10, Level::Low, Speed::Low),
                Output::new(p.PB11, Level::Low, Speed::Low),
            ],
        };

        Self {
            servo_tx,
            servo_rx: TimedRx::new(rx),
            servo_dir,
            host,
            flash,
            header,
        }
    }
}
