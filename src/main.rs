//! macwatch: passive WiFi device census
//!
//! Listens to 2.4 GHz traffic in promiscuous mode while hopping channels,
//! keeps a table of recently seen transmitters, and streams periodic
//! snapshots of it as NDJSON over serial and BLE GATT notifications.
//! Hosts can clear the table, change the hop speed and query status by
//! writing command lines to the RX characteristic or, on the ESP32, to the
//! serial console.

#![no_std]
#![no_main]

use esp_backtrace as _;

esp_bootloader_esp_idf::esp_app_desc!();

use macwatch::{aggregator, board, comm, defaults, export, hop, protocol, scanner};

use core::sync::atomic::{AtomicU8, Ordering};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Ticker, Timer};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::timer::timg::TimerGroup;
use static_cell::{ConstStaticCell, StaticCell};

use trouble_host::prelude::*;

use comm::{LineReader, BLE_MAX_NOTIFY, MAX_LINE_LEN};
use hop::{ChannelHopper, HopPeriod};
use macwatch::config::CensusConfig;
use macwatch::ingest::IngestChannel;
use macwatch::table::SharedTable;
use protocol::{Heartbeat, MsgBuffer, StatusMessage, MAX_MSG_LEN, SNAPSHOT_MAX_LEN, VERSION};

// ── BLE GATT server definition ──────────────────────────────────────
//
// The UUID constants in comm::ble_uuids are the canonical source; proc
// macros require string literals.

#[gatt_service(uuid = "6d770001-3f1e-4c8a-9b2d-5e0c7a41d2b6")]
struct CensusGattService {
    /// TX: snapshots, heartbeats and acks, notify-only.
    /// One message per notification, cut at BLE_MAX_NOTIFY bytes.
    #[characteristic(uuid = "6d770002-3f1e-4c8a-9b2d-5e0c7a41d2b6", notify)]
    tx: [u8; BLE_MAX_NOTIFY],

    /// RX: command lines, write-only.
    #[characteristic(uuid = "6d770003-3f1e-4c8a-9b2d-5e0c7a41d2b6", write)]
    rx: [u8; MAX_LINE_LEN],
}

#[gatt_server]
struct CensusServer {
    census_service: CensusGattService,
}

// ── Channel type aliases ──────────────────────────────────────────────

type NotifyBuffer = heapless::Vec<u8, BLE_MAX_NOTIFY>;
type CommandLine = heapless::Vec<u8, MAX_LINE_LEN>;

type BleOutputChannel = Channel<CriticalSectionRawMutex, NotifyBuffer, 4>;
type CommandChannel = Channel<CriticalSectionRawMutex, CommandLine, 4>;

// ── Static channels and shared state ─────────────────────────────────

/// Observations from the sniffer callback to the aggregator
static INGEST: IngestChannel<{ defaults::INGEST_CAPACITY }> = IngestChannel::new();

/// The device table
static TABLE: SharedTable<{ board::TABLE_CAPACITY }> = SharedTable::new();

const CONFIG: CensusConfig = CensusConfig::new();

/// Channel dwell time, changed by HOP_SPEED
static HOP_PERIOD: HopPeriod = HopPeriod::new(CONFIG.hop);

/// Command lines received over BLE and serial
static CMD_CHANNEL: CommandChannel = Channel::new();

/// Outgoing notifications for the GATT server
static BLE_OUTPUT_CHANNEL: BleOutputChannel = Channel::new();

/// Number of connected BLE clients
static BLE_CLIENTS: AtomicU8 = AtomicU8::new(0);

fn now_ms() -> u64 {
    Instant::now().as_millis()
}

/// Emit one NDJSON line on serial and, when a client is connected, queue
/// it for notification.
fn publish(line: &[u8]) {
    if let Ok(s) = core::str::from_utf8(line) {
        esp_println::print!("{}", s);
    }

    if BLE_CLIENTS.load(Ordering::Relaxed) > 0 {
        if let Ok(payload) = NotifyBuffer::from_slice(comm::notify_payload(line)) {
            // Dropped if the GATT server is behind
            let _ = BLE_OUTPUT_CHANNEL.try_send(payload);
        }
    }
}

fn status_report() -> StatusMessage {
    StatusMessage {
        msg: "status",
        uptime: (now_ms() / 1000) as u32,
        tracked: TABLE.lock(|t| t.len()) as u16,
        dropped: INGEST.dropped(),
        hop_ms: HOP_PERIOD.get(),
        board: board::BOARD_NAME,
        version: VERSION,
    }
}

// ── WiFi sniffer ──────────────────────────────────────────────────────

/// Called from the radio driver for every received frame. Must not block.
fn wifi_sniffer_callback(pkt: esp_radio::wifi::sniffer::PromiscuousPkt<'_>) {
    scanner::capture_frame(&INGEST, pkt.data, pkt.rx_cntl.rssi as i8);
}

// FFI binding for WiFi channel control.
// The symbol is linked via esp-radio's WiFi driver.
unsafe extern "C" {
    fn esp_wifi_set_channel(primary: u8, second: u32) -> i32;
}

/// WiFi channel hop task. The dwell time is re-read on every hop so a
/// HOP_SPEED command takes effect from the next channel.
#[embassy_executor::task]
async fn wifi_channel_hop_task() {
    let mut hopper = ChannelHopper::new(scanner::WIFI_CHANNELS);
    while let Some(ch) = hopper.advance() {
        let rc = unsafe { esp_wifi_set_channel(ch, 0) };
        if rc != 0 {
            log::warn!("Failed to set channel {}: {}", ch, rc);
        }
        Timer::after(Duration::from_millis(HOP_PERIOD.get() as u64)).await;
    }
}

// ── Entry point ──────────────────────────────────────────────────────

#[esp_rtos::main]
async fn main(spawner: embassy_executor::Spawner) {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // Heap for the BLE + WiFi coex stacks
    esp_alloc::heap_allocator!(size: board::HEAP_SIZE);

    // Start the RTOS: requires timer + software interrupt
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    log::info!("macwatch v{} starting on {}", VERSION, board::BOARD_NAME);
    log::info!(
        "Table capacity {}, export every {} ms, purge after {} ms, hop {} ms",
        board::TABLE_CAPACITY,
        CONFIG.export_period_ms,
        CONFIG.purge_after_ms,
        HOP_PERIOD.get(),
    );

    spawner.spawn(aggregator_task()).unwrap();
    spawner.spawn(export_task()).unwrap();
    spawner.spawn(heartbeat_task()).unwrap();
    spawner.spawn(command_task()).unwrap();

    // Hold power on (M5StickC Plus2 needs GPIO4 HIGH to stay powered)
    #[cfg(feature = "m5stickc")]
    let _power_hold = esp_hal::gpio::Output::new(
        peripherals.GPIO4,
        esp_hal::gpio::Level::High,
        esp_hal::gpio::OutputConfig::default(),
    );

    // ── Serial console (ESP32 UART0) ───────────────────────────────────
    // Raise the console to the host tools' baud rate and accept commands
    // on it. The S3 console is USB-Serial-JTAG, which has no baud rate.
    #[cfg(feature = "esp32")]
    let _serial_tx = {
        let uart = esp_hal::uart::Uart::new(
            peripherals.UART0,
            esp_hal::uart::Config::default().with_baudrate(comm::SERIAL_BAUD),
        )
        .expect("UART0 init failed")
        .with_rx(peripherals.GPIO3)
        .with_tx(peripherals.GPIO1)
        .into_async();
        let (rx, tx) = uart.split();
        spawner.spawn(serial_command_task(rx)).unwrap();
        log::info!("Serial console at {} baud", comm::SERIAL_BAUD);
        tx
    };

    // ── BLE radio initialization ───────────────────────────────────────
    // BLE must be initialized BEFORE WiFi for coexistence to work
    // (especially on ESP32-S3).

    let connector =
        esp_radio::ble::controller::BleConnector::new(peripherals.BT, Default::default())
            .expect("BLE connector init failed");

    log::info!("BLE connector initialized");

    // ── WiFi sniffer initialization ─────────────────────────────────────

    let (_wifi_controller, wifi_interfaces) =
        esp_radio::wifi::new(peripherals.WIFI, Default::default()).expect("WiFi init failed");

    let mut sniffer = wifi_interfaces.sniffer;
    sniffer.set_receive_cb(wifi_sniffer_callback);
    sniffer
        .set_promiscuous_mode(true)
        .expect("Promiscuous mode failed");

    spawner.spawn(wifi_channel_hop_task()).unwrap();

    log::info!(
        "WiFi sniffer initialized in promiscuous mode, hopping {} channels",
        scanner::WIFI_CHANNELS.len()
    );

    let controller: ExternalController<_, 20> = ExternalController::new(connector);

    static HOST_RESOURCES: StaticCell<HostResources<DefaultPacketPool, 1, 2>> = StaticCell::new();
    let resources = HOST_RESOURCES.init(HostResources::new());

    let address = Address::random([0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xab]);

    let stack = trouble_host::new(controller, resources).set_random_address(address);
    let Host {
        mut peripheral,
        mut runner,
        ..
    } = stack.build();

    let server = CensusServer::new_with_config(GapConfig::Peripheral(PeripheralConfig {
        name: comm::BLE_ADV_NAME,
        appearance: &appearance::UNKNOWN,
    }))
    .expect("GATT server init failed");

    log::info!("BLE radio initialized");

    // ── BLE orchestration ──────────────────────────────────────────────
    //
    // Two concurrent futures: the stack runner (drives HCI) and the GATT
    // server (advertise, accept, notify).

    let _ = embassy_futures::join::join(
        async {
            loop {
                if let Err(e) = runner.run().await {
                    log::error!("BLE runner error: {:?}", e);
                    Timer::after(Duration::from_secs(1)).await;
                }
            }
        },
        async {
            loop {
                let mut adv_data = [0u8; 31];
                let adv_len = match AdStructure::encode_slice(
                    &[
                        AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
                        AdStructure::CompleteLocalName(comm::BLE_ADV_NAME.as_bytes()),
                    ],
                    &mut adv_data[..],
                ) {
                    Ok(len) => len,
                    Err(e) => {
                        log::error!("Ad encode error: {:?}", e);
                        Timer::after(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let advertiser = match peripheral
                    .advertise(
                        &Default::default(),
                        Advertisement::ConnectableScannableUndirected {
                            adv_data: &adv_data[..adv_len],
                            scan_data: &[],
                        },
                    )
                    .await
                {
                    Ok(adv) => adv,
                    Err(e) => {
                        log::error!("BLE advertise error: {:?}", e);
                        Timer::after(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                log::info!("BLE advertising as '{}'", comm::BLE_ADV_NAME);

                let conn = match advertiser.accept().await {
                    Ok(c) => c,
                    Err(e) => {
                        log::error!("BLE accept error: {:?}", e);
                        continue;
                    }
                };

                let gatt_conn = match conn.with_attribute_server(&server) {
                    Ok(gc) => gc,
                    Err(e) => {
                        log::error!("GATT setup error: {:?}", e);
                        continue;
                    }
                };

                log::info!("BLE client connected");
                BLE_CLIENTS.fetch_add(1, Ordering::Relaxed);

                handle_gatt_connection(&gatt_conn, &server).await;

                BLE_CLIENTS.fetch_sub(1, Ordering::Relaxed);
                // Stale notifications are not replayed to the next client
                BLE_OUTPUT_CHANNEL.clear();
                log::info!("BLE client disconnected, re-advertising");
            }
        },
    )
    .await;
}

/// Forward queued output as notifications and feed RX writes to the
/// command task.
async fn handle_gatt_connection<'s, P: PacketPool>(
    conn: &GattConnection<'_, 's, P>,
    server: &'s CensusServer<'_>,
) {
    let ble_rx = BLE_OUTPUT_CHANNEL.receiver();
    let mut line_reader = LineReader::new();

    loop {
        match embassy_futures::select::select(ble_rx.receive(), conn.next()).await {
            embassy_futures::select::Either::First(msg) => {
                // Pad with newlines so the host's NDJSON parser sees
                // harmless empty lines instead of null bytes.
                let mut padded = [b'\n'; BLE_MAX_NOTIFY];
                padded[..msg.len()].copy_from_slice(&msg);
                if server
                    .census_service
                    .tx
                    .notify(conn, &padded)
                    .await
                    .is_err()
                {
                    return;
                }
            }
            embassy_futures::select::Either::Second(event) => match event {
                GattConnectionEvent::Disconnected { .. } => return,
                GattConnectionEvent::Gatt { event } => {
                    if let GattEvent::Write(ref write_event) = event {
                        if write_event.handle() == server.census_service.rx.handle {
                            for &byte in write_event.data() {
                                if let Some(line) = line_reader.feed(byte) {
                                    if let Ok(line) = CommandLine::from_slice(line) {
                                        let _ = CMD_CHANNEL.try_send(line);
                                    }
                                }
                            }
                        }
                    }
                    // Must accept/reply to all GATT events
                    if let Ok(reply) = event.accept() {
                        reply.send().await;
                    }
                }
                _ => {}
            },
        }
    }
}

/// Aggregator task: drains the ingestion channel into the device table.
#[embassy_executor::task]
async fn aggregator_task() {
    aggregator::run(&INGEST, &TABLE, now_ms).await;
}

/// Export task: snapshots and purges the table on a fixed period and
/// publishes the snapshot as one NDJSON line.
#[embassy_executor::task]
async fn export_task() {
    // Both buffers scale with the table, so keep them out of the task stack
    static SNAPSHOT: ConstStaticCell<export::Snapshot<{ board::TABLE_CAPACITY }>> =
        ConstStaticCell::new(heapless::Vec::new());
    static LINE: ConstStaticCell<[u8; SNAPSHOT_MAX_LEN]> =
        ConstStaticCell::new([0; SNAPSHOT_MAX_LEN]);
    let snapshot = SNAPSHOT.take();
    let line = LINE.take();

    log::info!("Export task started");
    let mut ticker = Ticker::every(Duration::from_millis(CONFIG.export_period_ms as u64));

    loop {
        ticker.next().await;

        export::export_pass(&TABLE, now_ms, CONFIG.purge_after_ms, snapshot);
        match export::serialize_snapshot(snapshot, line) {
            Some(len) => publish(&line[..len]),
            None => log::warn!("Snapshot of {} devices did not fit", snapshot.len()),
        }
    }
}

/// Heartbeat task: liveness marker, independent of the table.
#[embassy_executor::task]
async fn heartbeat_task() {
    let mut ticker = Ticker::every(Duration::from_millis(CONFIG.heartbeat_period_ms as u64));
    let mut buf = [0u8; 32];

    loop {
        ticker.next().await;
        if let Some(len) = comm::serialize_message(&Heartbeat::new(), &mut buf) {
            publish(&buf[..len]);
        }
    }
}

/// Serial command reader: feeds console bytes through a line reader into
/// the command channel.
#[cfg(feature = "esp32")]
#[embassy_executor::task]
async fn serial_command_task(mut rx: esp_hal::uart::UartRx<'static, esp_hal::Async>) {
    let mut reader = LineReader::new();
    let mut buf = [0u8; 16];

    loop {
        match rx.read_async(&mut buf).await {
            Ok(n) => {
                for &byte in &buf[..n] {
                    if let Some(line) = reader.feed(byte) {
                        if let Ok(line) = CommandLine::from_slice(line) {
                            let _ = CMD_CHANNEL.try_send(line);
                        }
                    }
                }
            }
            Err(e) => log::warn!("Serial read error: {:?}", e),
        }
    }
}

/// Command task: applies host command lines and answers each one.
#[embassy_executor::task]
async fn command_task() {
    let cmd_rx = CMD_CHANNEL.receiver();

    loop {
        let line = cmd_rx.receive().await;

        let mut buf = MsgBuffer::new();
        buf.resize_default(MAX_MSG_LEN).ok();
        if let Some(len) = comm::respond(&line, &TABLE, &HOP_PERIOD, status_report, &mut buf) {
            buf.truncate(len);
            publish(&buf);
        }
    }
}
