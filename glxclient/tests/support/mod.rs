#![allow(dead_code)]

use std::io::{self, IoSlice};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use glxclient::config::{ConfigRecord, RenderType};
use glxclient::connection::{Connection, Drawable, ExtensionInfo, Xid};
use glxclient::context::{Context, ContextAttributesBuilder};
use glxclient::display::{Display, DisplayBuilder};
use glxclient::prelude::*;

pub const MAJOR_OPCODE: u8 = 140;
pub const FIRST_ERROR: u8 = 160;

pub const X_GLX_RENDER: u8 = 1;
pub const X_GLX_RENDER_LARGE: u8 = 2;
pub const X_GLX_CREATE_CONTEXT: u8 = 3;
pub const X_GLX_DESTROY_CONTEXT: u8 = 4;
pub const X_GLX_MAKE_CURRENT: u8 = 5;
pub const X_GLX_IS_DIRECT: u8 = 6;
pub const X_GLX_QUERY_VERSION: u8 = 7;
pub const X_GLX_WAIT_GL: u8 = 8;
pub const X_GLX_WAIT_X: u8 = 9;
pub const X_GLX_COPY_CONTEXT: u8 = 10;
pub const X_GLX_VENDOR_PRIVATE_WITH_REPLY: u8 = 17;
pub const X_GLX_CREATE_NEW_CONTEXT: u8 = 24;
pub const X_GLX_QUERY_CONTEXT: u8 = 25;
pub const X_GLX_MAKE_CONTEXT_CURRENT: u8 = 26;

pub const GLX_BAD_CONTEXT_TAG: u8 = 4;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn word(bytes: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

pub fn half(bytes: &[u8], offset: usize) -> u16 {
    u16::from_ne_bytes(bytes[offset..offset + 2].try_into().unwrap())
}

pub fn drawable(xid: Xid) -> Drawable {
    Drawable::new(xid).unwrap()
}

/// A request the connection received.
#[derive(Debug, Clone)]
pub struct Sent {
    pub bytes: Vec<u8>,

    /// Requests sent in the same `send_requests` call share the batch.
    pub batch: usize,
}

impl Sent {
    pub fn glx_code(&self) -> u8 {
        self.bytes[1]
    }

    /// The drawable, read drawable, context and old tag of a bind request.
    pub fn bind(&self) -> Bind {
        let bytes = &self.bytes;
        match self.glx_code() {
            X_GLX_MAKE_CONTEXT_CURRENT => Bind {
                old_tag: word(bytes, 4),
                draw: word(bytes, 8),
                read: word(bytes, 12),
                context: word(bytes, 16),
            },
            X_GLX_MAKE_CURRENT => Bind {
                old_tag: word(bytes, 12),
                draw: word(bytes, 4),
                read: word(bytes, 4),
                context: word(bytes, 8),
            },
            X_GLX_VENDOR_PRIVATE_WITH_REPLY => Bind {
                old_tag: word(bytes, 8),
                draw: word(bytes, 12),
                read: word(bytes, 16),
                context: word(bytes, 20),
            },
            code => panic!("request {code} is not a bind"),
        }
    }

    pub fn is_bind(&self) -> bool {
        matches!(self.glx_code(), X_GLX_MAKE_CONTEXT_CURRENT | X_GLX_MAKE_CURRENT)
            || (self.glx_code() == X_GLX_VENDOR_PRIVATE_WITH_REPLY && word(&self.bytes, 4) == 65537)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bind {
    pub old_tag: u32,
    pub draw: u32,
    pub read: u32,
    pub context: u32,
}

/// A connection recording what's sent and answering like a GLX server.
pub struct MockConnection {
    pub max_request_bytes: usize,
    pub version: (u32, u32),
    pub extensions: Vec<String>,
    pub query_context_attributes: Vec<(u32, u32)>,
    next_id: AtomicU32,
    next_tag: AtomicU32,
    next_batch: AtomicUsize,
    sent: Mutex<Vec<Sent>>,

    /// The next send fails at the transport level.
    pub fail_next_send: AtomicBool,

    /// Unbind requests get an error reply.
    pub fail_unbinds: AtomicBool,

    /// Bind requests get an error reply.
    pub fail_binds: AtomicBool,
}

impl Default for MockConnection {
    fn default() -> Self {
        Self {
            max_request_bytes: 262140,
            version: (1, 4),
            extensions: Vec::new(),
            query_context_attributes: Vec::new(),
            next_id: AtomicU32::new(0x600001),
            next_tag: AtomicU32::new(1),
            next_batch: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            fail_next_send: AtomicBool::new(false),
            fail_unbinds: AtomicBool::new(false),
            fail_binds: AtomicBool::new(false),
        }
    }
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_version(major: u32, minor: u32) -> Self {
        Self { version: (major, minor), ..Default::default() }
    }

    pub fn with_max_request_bytes(mut self, max_request_bytes: usize) -> Self {
        self.max_request_bytes = max_request_bytes;
        self
    }

    pub fn with_context_attributes(mut self, attributes: &[(u32, u32)]) -> Self {
        self.query_context_attributes = attributes.to_vec();
        self
    }

    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|extension| extension.to_string()).collect();
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_with_code(&self, code: u8) -> Vec<Sent> {
        self.sent().into_iter().filter(|sent| sent.glx_code() == code).collect()
    }

    pub fn binds(&self) -> Vec<Bind> {
        self.sent().into_iter().filter(Sent::is_bind).map(|sent| sent.bind()).collect()
    }

    /// The GLX opcodes sent since the last clear, in order.
    pub fn codes(&self) -> Vec<u8> {
        self.sent().iter().map(Sent::glx_code).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    fn record(&self, requests: &[&[IoSlice<'_>]]) -> io::Result<Vec<Vec<u8>>> {
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection reset"));
        }

        let batch = self.next_batch.fetch_add(1, Ordering::SeqCst);
        let mut sent = self.sent.lock().unwrap();
        let mut flat = Vec::new();
        for request in requests {
            let bytes: Vec<u8> = request.iter().flat_map(|part| part.iter().copied()).collect();
            assert_eq!(bytes[0], MAJOR_OPCODE);
            assert_eq!(bytes.len() % 4, 0, "requests are padded");
            assert_eq!(half(&bytes, 2) as usize * 4, bytes.len(), "length field");
            assert!(bytes.len() <= self.max_request_bytes);
            sent.push(Sent { bytes: bytes.clone(), batch });
            flat.push(bytes);
        }

        Ok(flat)
    }

    fn reply(&self, request: &[u8]) -> Vec<u8> {
        let mut reply = vec![0u8; 32];
        reply[0] = 1;

        let sent = Sent { bytes: request.to_vec(), batch: 0 };
        match request[1] {
            X_GLX_QUERY_VERSION => {
                reply[8..12].copy_from_slice(&self.version.0.to_ne_bytes());
                reply[12..16].copy_from_slice(&self.version.1.to_ne_bytes());
            },
            _ if sent.is_bind() => {
                let bind = sent.bind();
                let fail = if bind.context == 0 {
                    self.fail_unbinds.load(Ordering::SeqCst)
                } else {
                    self.fail_binds.load(Ordering::SeqCst)
                };
                if fail {
                    reply[0] = 0;
                    reply[1] = FIRST_ERROR + GLX_BAD_CONTEXT_TAG;
                } else if bind.context != 0 {
                    let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
                    reply[8..12].copy_from_slice(&tag.to_ne_bytes());
                }
            },
            X_GLX_IS_DIRECT => (),
            X_GLX_QUERY_CONTEXT | X_GLX_VENDOR_PRIVATE_WITH_REPLY => {
                let pairs = &self.query_context_attributes;
                reply[8..12].copy_from_slice(&(pairs.len() as u32).to_ne_bytes());
                reply[4..8].copy_from_slice(&(pairs.len() as u32 * 2).to_ne_bytes());
                for (attribute, value) in pairs {
                    reply.extend_from_slice(&attribute.to_ne_bytes());
                    reply.extend_from_slice(&value.to_ne_bytes());
                }
            },
            code => panic!("request {code} has no reply"),
        }

        reply
    }
}

impl Connection for MockConnection {
    fn glx_extension(&self) -> Option<ExtensionInfo> {
        Some(ExtensionInfo { major_opcode: MAJOR_OPCODE, first_error: FIRST_ERROR })
    }

    fn maximum_request_bytes(&self) -> usize {
        self.max_request_bytes
    }

    fn generate_id(&self) -> Xid {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn screen_count(&self) -> usize {
        1
    }

    fn server_extensions(&self, _screen: i32) -> Vec<String> {
        self.extensions.clone()
    }

    fn send_requests(&self, requests: &[&[IoSlice<'_>]]) -> io::Result<()> {
        self.record(requests).map(drop)
    }

    fn request_reply(&self, request: &[IoSlice<'_>]) -> io::Result<Vec<u8>> {
        let mut sent = self.record(&[request])?;
        Ok(self.reply(&sent.remove(0)))
    }
}

/// Counts what the driver was asked to do.
#[derive(Debug, Default)]
pub struct DriverCounters {
    pub loads: AtomicUsize,
    pub contexts_created: AtomicUsize,
    pub contexts_dropped: AtomicUsize,
    pub drawables_created: AtomicUsize,
    pub binds: AtomicUsize,
    pub unbinds: AtomicUsize,
    pub flushes: AtomicUsize,
    pub waits: AtomicUsize,
    pub refuse_contexts: AtomicBool,
    pub refuse_binds: AtomicBool,
    pub refuse_unbinds: AtomicBool,
    pub executed: Mutex<Vec<(u32, Vec<u8>)>>,
}

impl DriverCounters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// A driver available on every screen.
#[derive(Debug, Default, Clone)]
pub struct MockDriver {
    pub counters: Arc<DriverCounters>,
}

impl DriverLoader for MockDriver {
    fn driver_for_screen(&self, _screen: i32) -> Option<Arc<dyn DriverScreen>> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        Some(Arc::new(self.clone()))
    }
}

impl DriverScreen for MockDriver {
    fn create_context(
        &self,
        _config: &ConfigRecord,
        _shared: Option<&dyn DriverContext>,
    ) -> Option<Box<dyn DriverContext>> {
        if self.counters.refuse_contexts.load(Ordering::SeqCst) {
            return None;
        }

        self.counters.contexts_created.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(MockDriverContext { counters: self.counters.clone() }))
    }

    fn create_drawable(
        &self,
        drawable: Drawable,
        _config: &ConfigRecord,
    ) -> Option<Arc<dyn DriverDrawable>> {
        self.counters.drawables_created.fetch_add(1, Ordering::SeqCst);
        Some(Arc::new(MockDrawable(drawable)))
    }
}

pub struct MockDriverContext {
    counters: Arc<DriverCounters>,
}

impl DriverContext for MockDriverContext {
    fn bind(&mut self, _draw: &dyn DriverDrawable, _read: &dyn DriverDrawable) -> bool {
        if self.counters.refuse_binds.load(Ordering::SeqCst) {
            return false;
        }

        self.counters.binds.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn unbind(&mut self) -> bool {
        if self.counters.refuse_unbinds.load(Ordering::SeqCst) {
            return false;
        }

        self.counters.unbinds.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn execute(&mut self, opcode: u32, payload: &[u8]) {
        self.counters.executed.lock().unwrap().push((opcode, payload.to_vec()));
    }

    fn flush(&mut self) {
        self.counters.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn wait_gl(&mut self, _draw: &dyn DriverDrawable) {
        self.counters.waits.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MockDriverContext {
    fn drop(&mut self) {
        self.counters.contexts_dropped.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockDrawable(Drawable);

impl DriverDrawable for MockDrawable {
    fn drawable(&self) -> Drawable {
        self.0
    }
}

pub fn visual_config() -> ConfigRecord {
    ConfigRecord::visual(0, 0x21)
}

pub fn fbconfig() -> ConfigRecord {
    ConfigRecord::fbconfig(0, 0x77, RenderType::Rgba)
}

pub fn display(connection: &Arc<MockConnection>) -> Display {
    DisplayBuilder::new().build(connection.clone()).unwrap()
}

pub fn display_with_driver(connection: &Arc<MockConnection>, driver: &MockDriver) -> Display {
    DisplayBuilder::new()
        .with_driver_loader(Arc::new(driver.clone()))
        .build(connection.clone())
        .unwrap()
}

pub fn indirect_context(display: &Display) -> Context {
    let attributes = ContextAttributesBuilder::new().with_direct(false).build();
    display.create_context(&visual_config(), &attributes).unwrap()
}

pub fn direct_context(display: &Display) -> Context {
    let context =
        display.create_context(&fbconfig(), &ContextAttributesBuilder::new().build()).unwrap();
    assert!(context.is_direct());
    context
}
