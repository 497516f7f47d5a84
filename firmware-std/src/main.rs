//! macwatch: ESP-IDF std firmware
//!
//! Thread-based implementation on FreeRTOS threads. Shares the census
//! engine (ingestion channel, device table, exporter, command handling)
//! with the Embassy firmware and swaps in ESP-IDF services for the radio:
//! NimBLE via esp32-nimble, WiFi promiscuous mode via esp-idf-svc.
//! Commands are accepted on both the serial console and BLE.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use macwatch::{aggregator, board, comm, defaults, export, protocol, scanner};

use comm::{LineReader, BLE_MAX_NOTIFY, MAX_LINE_LEN};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::task::block_on;
use esp_idf_svc::sys::{
    esp, esp_wifi_set_channel, esp_wifi_set_promiscuous, esp_wifi_set_promiscuous_rx_cb,
    uart_set_baudrate, wifi_promiscuous_pkt_t, wifi_promiscuous_pkt_type_t,
    wifi_second_chan_t_WIFI_SECOND_CHAN_NONE,
};
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};
use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs::EspDefaultNvsPartition};
use macwatch::config::CensusConfig;
use macwatch::hop::{ChannelHopper, HopPeriod};
use macwatch::ingest::IngestChannel;
use macwatch::table::SharedTable;
use protocol::{Heartbeat, MsgBuffer, StatusMessage, MAX_MSG_LEN, SNAPSHOT_MAX_LEN, VERSION};

use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{BLEAdvertisementData, BLEDevice, NimbleProperties};

type NotifyBuffer = heapless::Vec<u8, BLE_MAX_NOTIFY>;
type CommandLine = heapless::Vec<u8, MAX_LINE_LEN>;

// ── Shared state (same primitives as no_std) ─────────────────────────

static INGEST: IngestChannel<{ defaults::INGEST_CAPACITY }> = IngestChannel::new();
static TABLE: SharedTable<{ board::TABLE_CAPACITY }> = SharedTable::new();
const CONFIG: CensusConfig = CensusConfig::new();
static HOP_PERIOD: HopPeriod = HopPeriod::new(CONFIG.hop);
static BLE_CLIENTS: AtomicU8 = AtomicU8::new(0);

/// Boot time: captured once in main, used for timestamps and uptime.
static BOOT_INSTANT: Mutex<Option<Instant>> = Mutex::new(None);

fn uptime_millis() -> u64 {
    BOOT_INSTANT
        .lock()
        .ok()
        .and_then(|i| i.map(|boot| boot.elapsed().as_millis() as u64))
        .unwrap_or(0)
}

fn status_report() -> StatusMessage {
    StatusMessage {
        msg: "status",
        uptime: (uptime_millis() / 1000) as u32,
        tracked: TABLE.lock(|t| t.len()) as u16,
        dropped: INGEST.dropped(),
        hop_ms: HOP_PERIOD.get(),
        board: board::BOARD_NAME,
        version: VERSION,
    }
}

// ── Output ───────────────────────────────────────────────────────────

/// NDJSON sink: stdout (the serial console) plus BLE notifications.
#[derive(Clone)]
struct Output {
    ble_tx: SyncSender<NotifyBuffer>,
}

impl Output {
    fn publish(&self, line: &[u8]) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(line);
        let _ = stdout.flush();

        if BLE_CLIENTS.load(Ordering::Relaxed) > 0 {
            if let Ok(payload) = NotifyBuffer::from_slice(comm::notify_payload(line)) {
                let _ = self.ble_tx.try_send(payload);
            }
        }
    }

    /// Answer one command line.
    fn respond(&self, line: &[u8]) {
        let mut buf = MsgBuffer::new();
        buf.resize_default(MAX_MSG_LEN).ok();
        if let Some(len) = comm::respond(line, &TABLE, &HOP_PERIOD, status_report, &mut buf) {
            buf.truncate(len);
            self.publish(&buf);
        }
    }
}

// ── WiFi promiscuous callback ────────────────────────────────────────

/// WiFi promiscuous mode callback.
///
/// Runs in the WiFi driver task context (not ISR on ESP-IDF, but still
/// must be non-blocking).
unsafe extern "C" fn promisc_rx_cb(
    buf: *mut std::ffi::c_void,
    _pkt_type: wifi_promiscuous_pkt_type_t,
) {
    let pkt = unsafe { &*(buf as *const wifi_promiscuous_pkt_t) };
    let rssi = pkt.rx_ctrl.rssi() as i8;
    let sig_len = pkt.rx_ctrl.sig_len() as usize;

    if sig_len == 0 {
        return;
    }

    // Safety: payload is `sig_len` bytes starting at pkt.payload
    let payload = unsafe { std::slice::from_raw_parts(pkt.payload.as_ptr(), sig_len) };

    scanner::capture_frame(&INGEST, payload, rssi);
}

fn main() -> anyhow::Result<()> {
    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::log::EspLogger::initialize_default();

    // Console UART runs at the host tools' rate
    unsafe {
        esp!(uart_set_baudrate(0, comm::SERIAL_BAUD))?;
    }

    *BOOT_INSTANT.lock().unwrap() = Some(Instant::now());

    log::info!("macwatch v{} starting on {} (std)", VERSION, board::BOARD_NAME);
    log::info!(
        "Table capacity {}, export every {} ms, purge after {} ms, hop {} ms",
        board::TABLE_CAPACITY,
        CONFIG.export_period_ms,
        CONFIG.purge_after_ms,
        HOP_PERIOD.get(),
    );

    // ── Peripherals ──────────────────────────────────────────────────

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // Hold power on (M5StickC Plus2)
    #[cfg(feature = "m5stickc")]
    let _power_hold = {
        use esp_idf_svc::hal::gpio::PinDriver;
        let mut p = PinDriver::output(peripherals.pins.gpio4)?;
        p.set_high()?;
        p
    };

    // ── Channels ─────────────────────────────────────────────────────

    let (ble_output_tx, ble_output_rx) = mpsc::sync_channel::<NotifyBuffer>(4);
    let (cmd_tx, cmd_rx) = mpsc::sync_channel::<CommandLine>(4);
    let output = Output {
        ble_tx: ble_output_tx,
    };

    // ── Aggregator thread ────────────────────────────────────────────

    thread::Builder::new()
        .name("aggregator".into())
        .stack_size(4096)
        .spawn(|| block_on(aggregator::run(&INGEST, &TABLE, uptime_millis)))?;

    // ── Export thread ────────────────────────────────────────────────

    let export_output = output.clone();
    thread::Builder::new()
        .name("export".into())
        .stack_size(8192)
        .spawn(move || export_thread(export_output))?;
    log::info!("Export thread spawned");

    // ── Heartbeat thread ─────────────────────────────────────────────

    let heartbeat_output = output.clone();
    thread::Builder::new()
        .name("heartbeat".into())
        .stack_size(2048)
        .spawn(move || heartbeat_thread(heartbeat_output))?;

    // ── Command threads (BLE writes + serial console) ────────────────

    let cmd_output = output.clone();
    thread::Builder::new()
        .name("command".into())
        .stack_size(4096)
        .spawn(move || {
            while let Ok(line) = cmd_rx.recv() {
                cmd_output.respond(&line);
            }
        })?;

    let console_output = output.clone();
    thread::Builder::new()
        .name("console".into())
        .stack_size(4096)
        .spawn(move || console_thread(console_output))?;
    log::info!("Command threads spawned");

    // ── WiFi sniffer ─────────────────────────────────────────────────

    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sys_loop.clone(), Some(nvs))?,
        sys_loop,
    )?;
    wifi.set_configuration(&esp_idf_svc::wifi::Configuration::Client(Default::default()))?;
    wifi.start()?;

    unsafe {
        esp!(esp_wifi_set_promiscuous(true))?;
        esp!(esp_wifi_set_promiscuous_rx_cb(Some(promisc_rx_cb)))?;
    }
    log::info!("WiFi sniffer initialized in promiscuous mode");

    // ── Channel hop thread ───────────────────────────────────────────

    thread::Builder::new()
        .name("chanhop".into())
        .stack_size(2048)
        .spawn(channel_hop_thread)?;
    log::info!("Channel hop thread spawned");

    // ── BLE (NimBLE): runs on main thread ───────────────────────────

    ble_main(cmd_tx, ble_output_rx);
}

// ── Channel hopping ──────────────────────────────────────────────────

fn channel_hop_thread() {
    let mut hopper = ChannelHopper::new(scanner::WIFI_CHANNELS);
    while let Some(ch) = hopper.advance() {
        let rc = unsafe { esp_wifi_set_channel(ch, wifi_second_chan_t_WIFI_SECOND_CHAN_NONE) };
        if let Err(e) = esp!(rc) {
            log::warn!("Failed to set channel {}: {}", ch, e);
        }
        thread::sleep(Duration::from_millis(HOP_PERIOD.get() as u64));
    }
}

// ── Export + heartbeat ───────────────────────────────────────────────

fn export_thread(output: Output) {
    log::info!("Export thread started");

    // Sized by the table, so kept off the thread stack
    let mut snapshot = Box::new(export::Snapshot::<{ board::TABLE_CAPACITY }>::new());
    let mut line = vec![0u8; SNAPSHOT_MAX_LEN];
    let period = Duration::from_millis(CONFIG.export_period_ms as u64);

    loop {
        thread::sleep(period);

        export::export_pass(&TABLE, uptime_millis, CONFIG.purge_after_ms, &mut snapshot);
        match export::serialize_snapshot(&snapshot, &mut line) {
            Some(len) => output.publish(&line[..len]),
            None => log::warn!("Snapshot of {} devices did not fit", snapshot.len()),
        }
    }
}

fn heartbeat_thread(output: Output) {
    let period = Duration::from_millis(CONFIG.heartbeat_period_ms as u64);
    let mut buf = [0u8; 32];

    loop {
        thread::sleep(period);
        if let Some(len) = comm::serialize_message(&Heartbeat::new(), &mut buf) {
            output.publish(&buf[..len]);
        }
    }
}

// ── Serial console commands ──────────────────────────────────────────

fn console_thread(output: Output) {
    let mut reader = LineReader::new();
    let mut stdin = std::io::stdin();
    let mut byte = [0u8; 1];

    loop {
        match stdin.read(&mut byte) {
            Ok(1) => {
                if let Some(line) = reader.feed(byte[0]) {
                    output.respond(line);
                }
            }
            // The console is non-blocking; poll again shortly
            _ => thread::sleep(Duration::from_millis(20)),
        }
    }
}

// ── BLE (NimBLE) main loop ───────────────────────────────────────────

fn ble_main(cmd_tx: SyncSender<CommandLine>, ble_output_rx: mpsc::Receiver<NotifyBuffer>) -> ! {
    let ble_device = BLEDevice::take();
    let server = ble_device.get_server();

    // Track connections: NimBLE auto-restarts advertising on disconnect
    server.on_connect(|_server, desc| {
        log::info!("BLE client connected: {}", desc.address());
        BLE_CLIENTS.fetch_add(1, Ordering::Relaxed);
    });
    server.on_disconnect(|desc, _reason| {
        log::info!("BLE client disconnected: {}", desc.address());
        BLE_CLIENTS.fetch_sub(1, Ordering::Relaxed);
    });

    // Create GATT service with same UUIDs as no_std version
    let service_uuid = BleUuid::from_uuid128_string(comm::ble_uuids::SERVICE)
        .expect("invalid service UUID");
    let tx_uuid = BleUuid::from_uuid128_string(comm::ble_uuids::TX_CHAR)
        .expect("invalid TX UUID");
    let rx_uuid = BleUuid::from_uuid128_string(comm::ble_uuids::RX_CHAR)
        .expect("invalid RX UUID");

    let service = server.create_service(service_uuid);

    let tx_char = service.lock().create_characteristic(tx_uuid, NimbleProperties::NOTIFY);

    let rx_char = service.lock().create_characteristic(rx_uuid, NimbleProperties::WRITE);

    // RX write handler: accumulate command lines for the command thread
    rx_char.lock().on_write(move |args| {
        thread_local! {
            static LINE_READER: std::cell::RefCell<LineReader> =
                std::cell::RefCell::new(LineReader::new());
        }
        LINE_READER.with(|lr| {
            let mut lr = lr.borrow_mut();
            for &byte in args.recv_data() {
                if let Some(line) = lr.feed(byte) {
                    if let Ok(line) = CommandLine::from_slice(line) {
                        let _ = cmd_tx.try_send(line);
                    }
                }
            }
        });
    });

    let mut adv_data = BLEAdvertisementData::new();
    adv_data.name(comm::BLE_ADV_NAME).add_service_uuid(service_uuid);
    ble_device
        .get_advertising()
        .lock()
        .set_data(&mut adv_data)
        .expect("BLE advertising data failed");
    ble_device
        .get_advertising()
        .lock()
        .start()
        .expect("BLE advertising start failed");
    log::info!("BLE advertising as '{}'", comm::BLE_ADV_NAME);

    // TX notify loop: one message per notification
    loop {
        match ble_output_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(msg) => {
                if BLE_CLIENTS.load(Ordering::Relaxed) == 0 {
                    continue;
                }
                let mut padded = [b'\n'; BLE_MAX_NOTIFY];
                padded[..msg.len()].copy_from_slice(&msg);
                tx_char.lock().set_value(&padded).notify();
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    unreachable!("BLE output channel disconnected");
}
