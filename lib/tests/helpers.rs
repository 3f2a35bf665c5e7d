#![allow(unused)]

use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use encdec::Encode;
use log::{debug, LevelFilter};
use simplelog::SimpleLogger;

use ledger_dmk::{
    apdu::{
        app_info::{AppAndVersionResp, AppFlags, DASHBOARD_APP_NAME},
        frame::{FrameConfig, FrameDecoder, FrameEncoder},
        os_version::OsVersionResp,
        status::StatusWord,
        Apdu, ApduError, ApduResponse, Command, CommandError,
    },
    dmk_core::TransportError,
    transport::{FrameLink, LinkEvents},
    PhysicalConnection,
};

/// Setup logging for tests
pub fn setup() {
    let log_level = match std::env::var("LOG_LEVEL").map(|v| LevelFilter::from_str(&v)) {
        Ok(Ok(l)) => l,
        _ => LevelFilter::Debug,
    };

    let _ = SimpleLogger::init(log_level, simplelog::Config::default());
}

/// Simulated device reply to a request
pub enum Reply {
    /// Respond normally
    Respond(ApduResponse),
    /// Respond, then drop and re-enumerate the link (application switch)
    Reboot(ApduResponse),
    /// Respond, then drop the link without reconnecting
    Unplug(ApduResponse),
    /// Do not respond
    Ignore,
}

pub type Handler = Box<dyn FnMut(&Apdu) -> Reply + Send>;

/// In-memory simulated device implementing [FrameLink]
pub struct SimDevice {
    me: Weak<SimDevice>,
    cfg: FrameConfig,
    decoder: Mutex<FrameDecoder>,
    events: Mutex<Option<Arc<dyn LinkEvents>>>,
    handler: Mutex<Handler>,
    received: Mutex<Vec<Apdu>>,
    delay: Duration,
    reboot_delay: Duration,
    fail_writes: AtomicBool,
    closed: AtomicBool,
}

impl SimDevice {
    pub fn new(handler: impl FnMut(&Apdu) -> Reply + Send + 'static) -> Arc<Self> {
        Self::with_timing(
            handler,
            Duration::from_millis(10),
            Duration::from_millis(100),
        )
    }

    pub fn with_timing(
        handler: impl FnMut(&Apdu) -> Reply + Send + 'static,
        delay: Duration,
        reboot_delay: Duration,
    ) -> Arc<Self> {
        let cfg = FrameConfig::hid();

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            cfg,
            decoder: Mutex::new(FrameDecoder::new(cfg)),
            events: Mutex::new(None),
            handler: Mutex::new(Box::new(handler)),
            received: Mutex::new(vec![]),
            delay,
            reboot_delay,
            fail_writes: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Bind device events to a connection
    pub fn attach(&self, events: Arc<dyn LinkEvents>) {
        *self.events.lock().unwrap() = Some(events);
    }

    fn events(&self) -> Option<Arc<dyn LinkEvents>> {
        self.events.lock().unwrap().clone()
    }

    /// APDUs received by the device
    pub fn received(&self) -> Vec<Apdu> {
        self.received.lock().unwrap().clone()
    }

    /// Fail subsequent frame writes
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deliver raw frames to the connection
    pub fn deliver(&self, frames: &[Vec<u8>]) {
        if let Some(e) = self.events() {
            for f in frames {
                e.on_frame(f);
            }
        }
    }

    /// Encode and deliver a response to the connection
    pub fn respond(&self, resp: &ApduResponse) {
        let frames = FrameEncoder::new(self.cfg)
            .encode_bytes(&resp.to_bytes())
            .unwrap();
        self.deliver(&frames);
    }

    /// Report link loss
    pub fn lose(&self) {
        if let Some(e) = self.events() {
            e.on_lost();
        }
    }

    /// Report link recovery with this device as the new link
    pub fn reconnect(&self) {
        self.decoder.lock().unwrap().reset();

        if let (Some(e), Some(me)) = (self.events(), self.me.upgrade()) {
            e.on_reconnected(me);
        }
    }
}

#[async_trait]
impl FrameLink for SimDevice {
    fn frame_config(&self) -> FrameConfig {
        self.cfg
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        if self.fail_writes.load(Ordering::SeqCst) || self.is_closed() {
            return Err(TransportError::WriteFailed("simulated write failure".to_string()));
        }

        let m = match self.decoder.lock().unwrap().decode(frame) {
            Ok(Some(m)) => m,
            Ok(None) => return Ok(()),
            Err(e) => return Err(TransportError::WriteFailed(e.to_string())),
        };

        let apdu = Apdu::parse(&m).expect("invalid request apdu");
        debug!("sim rx: {}", apdu);

        self.received.lock().unwrap().push(apdu.clone());

        let reply = {
            let mut h = self.handler.lock().unwrap();
            let f = &mut *h;
            f(&apdu)
        };

        let me = match self.me.upgrade() {
            Some(v) => v,
            None => return Ok(()),
        };
        let (delay, reboot_delay) = (self.delay, self.reboot_delay);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            match reply {
                Reply::Respond(r) => me.respond(&r),
                Reply::Reboot(r) => {
                    me.respond(&r);
                    me.lose();

                    tokio::time::sleep(reboot_delay).await;
                    me.reconnect();
                }
                Reply::Unplug(r) => {
                    me.respond(&r);
                    me.lose();
                }
                Reply::Ignore => (),
            }
        });

        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Create a connection over a simulated device
pub fn connect(dev: &Arc<SimDevice>, reconnect_timeout: Duration) -> PhysicalConnection {
    let c = PhysicalConnection::new(dev.clone(), reconnect_timeout);
    dev.attach(Arc::new(c.clone()));
    c
}

pub fn ok(data: impl Into<Vec<u8>>) -> ApduResponse {
    ApduResponse::new(data, StatusWord::SUCCESS)
}

pub fn sw(sw: u16) -> ApduResponse {
    ApduResponse::new(vec![], StatusWord(sw))
}

/// Encode a get app and version response
pub fn app_info(name: &str) -> ApduResponse {
    let r = AppAndVersionResp::new(name, "1.0.0", AppFlags::PIN_VALIDATED);

    let mut b = vec![0u8; 256];
    let n = r.encode(&mut b).unwrap();

    ok(&b[..n])
}

/// Simulated OS version
pub const SIM_OS_VERSION: &str = "2.2.3";

/// Encode a get OS version response
pub fn os_version() -> ApduResponse {
    let r = OsVersionResp {
        target_id: 0x33000004,
        se_version: SIM_OS_VERSION,
        se_flags: &[0x00, 0x00, 0x00, 0x00],
        mcu_seph_version: "2.30",
        mcu_bootloader_version: "0.11",
    };

    let mut b = vec![0u8; 256];
    let n = r.encode(&mut b).unwrap();

    ok(&b[..n])
}

/// Simulated device OS state
#[derive(Clone, PartialEq, Debug)]
pub struct SimOs {
    pub current: String,
    pub apps: Vec<String>,
    pub locked: bool,
}

impl SimOs {
    pub fn new(apps: &[&str]) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            current: DASHBOARD_APP_NAME.to_string(),
            apps: apps.iter().map(|a| a.to_string()).collect(),
            locked: false,
        }))
    }
}

/// Device handler emulating dashboard and application switching
pub fn sim_os(os: Arc<Mutex<SimOs>>) -> impl FnMut(&Apdu) -> Reply + Send + 'static {
    move |a: &Apdu| {
        let mut os = os.lock().unwrap();

        if os.locked {
            return Reply::Respond(sw(0x5515));
        }

        match (a.cla, a.ins) {
            // Get app and version
            (0xb0, 0x01) => Reply::Respond(app_info(&os.current)),
            // Get OS version, dashboard only
            (0xe0, 0x01) if os.current == DASHBOARD_APP_NAME => Reply::Respond(os_version()),
            // Open app
            (0xe0, 0xd8) => {
                let name = String::from_utf8(a.data.clone()).unwrap();

                if os.current != DASHBOARD_APP_NAME {
                    return Reply::Respond(sw(0x6e00));
                }
                if !os.apps.contains(&name) {
                    return Reply::Respond(sw(0x6807));
                }

                os.current = name;
                Reply::Reboot(ok(vec![]))
            }
            // Close app
            (0xb0, 0xa7) => {
                os.current = DASHBOARD_APP_NAME.to_string();
                Reply::Reboot(ok(vec![]))
            }
            // Application echo command
            (0x80, 0x02) if os.current != DASHBOARD_APP_NAME => Reply::Respond(ok(a.data.clone())),
            _ => Reply::Respond(sw(0x6e00)),
        }
    }
}

/// Application echo command, returning the request payload
#[derive(Clone, PartialEq, Debug)]
pub struct Echo(pub Vec<u8>);

impl Command for Echo {
    type Response = Vec<u8>;

    fn name(&self) -> &'static str {
        "echo"
    }

    fn apdu(&self) -> Result<Apdu, ApduError> {
        Ok(Apdu::new(0x80, 0x02, 0x00, 0x00).with_data(self.0.clone()))
    }

    fn parse_response(&self, resp: &ApduResponse) -> Result<Vec<u8>, CommandError> {
        resp.check()?;
        Ok(resp.data.clone())
    }
}
