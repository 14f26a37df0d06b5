#![no_std]
#![no_main]

use esp_hal::clock::CpuClock;
use esp_hal::gpio::Io;
use esp_hal::handler;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;

// WiFi imports
use esp_wifi::wifi;

// Embassy-net imports
use embassy_net::{Config, Stack, StackResources};
use esp_hal_embassy::Executor;
use static_cell::StaticCell;

// Import our library modules
use remote_switch::board::{ButtonLines, EspButtons};
use remote_switch::button::ButtonId;
use remote_switch::tcp_client::TcpGateway;
use remote_switch::wifi::WiFiManager;
use remote_switch::{RemoteSwitch, SwitchConfig, config, log_result};

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

/// The one switch context of the firmware
static SWITCH: RemoteSwitch = RemoteSwitch::new(SwitchConfig::from_build_env());

/// Button inputs, shared with the GPIO interrupt handler
static BUTTON_LINES: ButtonLines = ButtonLines::new();

// Static cells for embassy components
static WIFI_INIT_CELL: StaticCell<esp_wifi::EspWifiController<'static>> = StaticCell::new();
static WIFI_MANAGER_CELL: StaticCell<WiFiManager<'static>> = StaticCell::new();
static STACK_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();

// Static executor for embassy tasks
static EXECUTOR: StaticCell<Executor> = StaticCell::new();

/// Socket buffers for the 3-byte command records
const TCP_BUFFER_SIZE: usize = 256;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    esp_println::println!("[MAIN] Panic: {}", info);
    loop {}
}

#[handler]
fn gpio_handler() {
    BUTTON_LINES.handle_interrupt(&SWITCH);
}

// Embassy task to run the network stack
#[embassy_executor::task]
async fn net_task(
    mut runner: embassy_net::Runner<'static, esp_wifi::wifi::WifiDevice<'static>>,
) -> ! {
    runner.run().await
}

/// Connection lifecycle supervisor
#[embassy_executor::task]
async fn lifecycle_task(wifi_manager: &'static mut WiFiManager<'static>) {
    SWITCH.run_lifecycle(wifi_manager).await;
}

/// Session worker delivering queued commands
#[embassy_executor::task]
async fn session_task(stack: Stack<'static>) {
    let mut rx_buffer = [0u8; TCP_BUFFER_SIZE];
    let mut tx_buffer = [0u8; TCP_BUFFER_SIZE];
    let mut gateway = TcpGateway::new(stack, &mut rx_buffer, &mut tx_buffer);

    SWITCH.run_session(&mut gateway).await;
}

/// One dispatch task per button
#[embassy_executor::task(pool_size = 2)]
async fn dispatch_task(id: ButtonId) {
    SWITCH.run_dispatch(id).await;
}

/// Bring up buttons and client, then leave the rest to the other tasks
#[embassy_executor::task]
async fn startup_task(mut buttons: EspButtons) {
    for id in ButtonId::ALL {
        // Continue degraded if a button fails
        let _ = log_result("[BUTTON] init", SWITCH.init_button(&mut buttons, id));
    }

    log::info!("[MAIN] Starting client...");
    let _ = log_result("[SWITCH] start_client", SWITCH.start_client().await);
}

#[esp_hal::main]
fn main() -> ! {
    esp_println::println!("[MAIN] Remote switch {} booting", remote_switch::VERSION);
    esp_println::logger::init_logger(log::LevelFilter::Info);

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    // Initialize heap allocator for WiFi (72KB)
    esp_alloc::heap_allocator!(size: 72 * 1024);

    // Initialize embassy time system
    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timer_group0.timer0);

    // Initialize WiFi driver
    let timer_group1 = TimerGroup::new(peripherals.TIMG1);
    let mut rng = Rng::new(peripherals.RNG);
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let wifi_init = match esp_wifi::init(timer_group1.timer0, rng, peripherals.RADIO_CLK) {
        Ok(wifi_init) => wifi_init,
        Err(e) => panic!("[WIFI] Driver initialization failed: {:?}", e),
    };
    let wifi_init_ref = WIFI_INIT_CELL.init(wifi_init);

    let (wifi_controller, wifi_interfaces) = match wifi::new(wifi_init_ref, peripherals.WIFI) {
        Ok(parts) => parts,
        Err(e) => panic!("[WIFI] Controller creation failed: {:?}", e),
    };
    log::info!("[WIFI] WiFi controller and device created successfully");

    // Create embassy-net stack with DHCP configuration
    let stack_resources = STACK_RESOURCES.init(StackResources::new());
    let net_config = Config::dhcpv4(Default::default());
    let (stack, runner) =
        embassy_net::new(wifi_interfaces.sta, net_config, stack_resources, seed);

    let wifi_manager = WIFI_MANAGER_CELL.init(WiFiManager::new(wifi_controller, stack));

    // Button lines and their shared interrupt
    let mut io = Io::new(peripherals.IO_MUX);
    io.set_interrupt_handler(gpio_handler);
    let buttons = EspButtons::new(&BUTTON_LINES, peripherals.GPIO4, peripherals.GPIO5);
    log::info!(
        "[BUTTON] Buttons on GPIO{} and GPIO{}",
        config::BUTTON_0_GPIO,
        config::BUTTON_1_GPIO
    );

    // Initialize embassy executor and run tasks
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        log::info!("[MAIN] Spawning tasks...");
        spawner.spawn(net_task(runner)).ok();
        spawner.spawn(lifecycle_task(wifi_manager)).ok();
        spawner.spawn(session_task(stack)).ok();

        for id in ButtonId::ALL {
            if let Err(e) = spawner.spawn(dispatch_task(id)) {
                log::error!("[MAIN] Failed to spawn dispatch task for {:?}: {:?}", id, e);
            }
        }

        match spawner.spawn(startup_task(buttons)) {
            Ok(_) => log::info!("[MAIN] Startup task spawned"),
            Err(e) => log::error!("[MAIN] Failed to spawn startup task: {:?}", e),
        }
    });
}
