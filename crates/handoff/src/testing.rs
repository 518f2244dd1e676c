//! Recording stand-ins for GPU devices and the browser.
//!
//! These run the whole pipeline on the CPU. Every device call is appended to
//! a shared log so tests can assert ordering (fence waits before draws,
//! signals after copies) and every resource reports its own release so tests
//! can check that nothing is released twice or leaked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::color::{ColorSpace, DrawPass};
use crate::device::{
    DeviceCapabilities, DeviceError, HostDevice, ProducerDevice, ShareFlags,
    SharedHandle, SharedResource, TextureDesc,
};
use crate::fence::{FenceValue, SourceFence};
use crate::frame::{PixelFormat, RasterFrame};
use crate::quirks::{OpenApi, RuntimeVersion};
use crate::size::BrowserHost;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

const FULL_CAPABILITIES: DeviceCapabilities = DeviceCapabilities {
    shared_resources: true,
    shared_fences: true,
    versioned_open: true,
};

#[derive(Debug, Default)]
struct LedgerState {
    created: u64,
    disposals: HashMap<u64, usize>,
}

/// Counts creations and releases of [`MockResource`]s by id.
#[derive(Debug, Clone, Default)]
pub struct DisposeLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl DisposeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_created(&self) {
        lock(&self.state).created += 1;
    }

    fn record_disposed(&self, id: u64) {
        *lock(&self.state).disposals.entry(id).or_default() += 1;
    }

    pub fn created(&self) -> u64 {
        lock(&self.state).created
    }

    pub fn disposals(&self, id: u64) -> usize {
        lock(&self.state).disposals.get(&id).copied().unwrap_or(0)
    }

    /// Resources created but not yet released.
    pub fn live(&self) -> u64 {
        let state = lock(&self.state);
        let released: usize = state.disposals.values().sum();
        state.created.saturating_sub(released as u64)
    }

    pub fn assert_all_disposed_once(&self) {
        let state = lock(&self.state);
        for (id, count) in &state.disposals {
            assert_eq!(*count, 1, "resource {id:#x} released {count} times");
        }
        assert_eq!(
            state.disposals.len() as u64,
            state.created,
            "{} resources created, {} released",
            state.created,
            state.disposals.len()
        );
    }
}

/// Shared resource that reports its release to a [`DisposeLedger`].
#[derive(Debug)]
pub struct MockResource {
    id: u64,
    desc: TextureDesc,
    ledger: DisposeLedger,
}

impl MockResource {
    pub fn new(id: u64, width: u32, height: u32, ledger: &DisposeLedger) -> Self {
        Self::with_desc(
            id,
            TextureDesc {
                width,
                height,
                format: PixelFormat::Bgra8Unorm,
            },
            ledger,
        )
    }

    pub fn with_desc(id: u64, desc: TextureDesc, ledger: &DisposeLedger) -> Self {
        ledger.record_created();
        Self {
            id,
            desc,
            ledger: ledger.clone(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl SharedResource for MockResource {
    fn shared_handle(&self) -> SharedHandle {
        SharedHandle::from_raw(self.id)
    }

    fn desc(&self) -> TextureDesc {
        self.desc
    }
}

impl Drop for MockResource {
    fn drop(&mut self) {
        self.ledger.record_disposed(self.id);
    }
}

/// Append-only command log shared between a mock device and the test.
#[derive(Debug)]
pub struct CommandLog<C> {
    commands: Arc<Mutex<Vec<C>>>,
}

impl<C> Clone for CommandLog<C> {
    fn clone(&self) -> Self {
        Self {
            commands: Arc::clone(&self.commands),
        }
    }
}

impl<C> Default for CommandLog<C> {
    fn default() -> Self {
        Self {
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<C: Clone> CommandLog<C> {
    fn push(&self, command: C) {
        lock(&self.commands).push(command);
    }

    pub fn commands(&self) -> Vec<C> {
        lock(&self.commands).clone()
    }

    pub fn clear(&self) {
        lock(&self.commands).clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerCommand {
    OpenSource(SharedHandle),
    WaitSource(FenceValue),
    CreateShared { id: u64, desc: TextureDesc },
    Copy { source: SharedHandle, target: u64 },
    Signal(FenceValue),
    Flush,
}

/// Fault injection shared with a [`MockProducer`] after it has been moved
/// into the pipeline.
#[derive(Debug, Clone, Default)]
pub struct ProducerControls {
    fail_next_open: Arc<AtomicBool>,
    lost: Arc<AtomicBool>,
    panic_next_open: Arc<AtomicBool>,
}

impl ProducerControls {
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    pub fn lose_device(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }

    pub fn panic_next_open(&self) {
        self.panic_next_open.store(true, Ordering::SeqCst);
    }
}

pub const MOCK_PRODUCER_FENCE: SharedHandle = SharedHandle::from_raw(0xFE);

/// First id handed to textures created by a [`MockProducer`].
pub const MOCK_RESOURCE_BASE: u64 = 0x1000;

#[derive(Debug)]
pub struct MockSource {
    handle: SharedHandle,
}

pub struct MockProducer {
    ledger: DisposeLedger,
    log: CommandLog<ProducerCommand>,
    controls: ProducerControls,
    capabilities: DeviceCapabilities,
    source_desc: TextureDesc,
    next_id: u64,
}

impl MockProducer {
    pub fn new(ledger: &DisposeLedger) -> Self {
        Self {
            ledger: ledger.clone(),
            log: CommandLog::default(),
            controls: ProducerControls::default(),
            capabilities: FULL_CAPABILITIES,
            source_desc: TextureDesc {
                width: 16,
                height: 8,
                format: PixelFormat::Bgra8Unorm,
            },
            next_id: MOCK_RESOURCE_BASE,
        }
    }

    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Description every opened engine texture reports.
    pub fn with_source_desc(mut self, desc: TextureDesc) -> Self {
        self.source_desc = desc;
        self
    }

    pub fn log(&self) -> CommandLog<ProducerCommand> {
        self.log.clone()
    }

    pub fn controls(&self) -> ProducerControls {
        self.controls.clone()
    }

    pub fn fail_next_open(&self) {
        self.controls.fail_next_open();
    }

    fn check_lost(&self) -> Result<(), DeviceError> {
        if self.controls.lost.load(Ordering::SeqCst) {
            Err(DeviceError::Lost("mock producer removed".into()))
        } else {
            Ok(())
        }
    }
}

impl ProducerDevice for MockProducer {
    type Source = MockSource;
    type Resource = MockResource;

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn fence_handle(&self) -> Option<SharedHandle> {
        self.capabilities.shared_fences.then_some(MOCK_PRODUCER_FENCE)
    }

    fn open_source(&mut self, handle: SharedHandle) -> Result<MockSource, DeviceError> {
        self.check_lost()?;
        if self.controls.panic_next_open.swap(false, Ordering::SeqCst) {
            panic!("mock producer panicked opening {handle:?}");
        }
        if self.controls.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(DeviceError::InvalidHandle(handle));
        }
        self.log.push(ProducerCommand::OpenSource(handle));
        Ok(MockSource { handle })
    }

    fn describe(&self, _source: &MockSource) -> TextureDesc {
        self.source_desc
    }

    fn wait_source(&mut self, fence: SourceFence) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.log.push(ProducerCommand::WaitSource(fence.value));
        Ok(())
    }

    fn create_shared(&mut self, desc: &TextureDesc, flags: ShareFlags) -> Result<MockResource, DeviceError> {
        self.check_lost()?;
        if !flags.shared {
            return Err(DeviceError::Unsupported("texture must be shareable".into()));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.log.push(ProducerCommand::CreateShared { id, desc: *desc });
        Ok(MockResource::with_desc(id, *desc, &self.ledger))
    }

    fn copy(&mut self, source: &MockSource, target: &MockResource) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.log.push(ProducerCommand::Copy {
            source: source.handle,
            target: target.id(),
        });
        Ok(())
    }

    fn signal(&mut self, value: FenceValue) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.log.push(ProducerCommand::Signal(value));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.log.push(ProducerCommand::Flush);
        Ok(())
    }
}

/// Render target handed to [`MockHost::draw`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MockTarget;

/// Identifies what a [`MockSurface`] wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceContent {
    Shared(SharedHandle),
    Raster { width: u32, height: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    OpenFence(SharedHandle),
    Open { surface: u64, handle: SharedHandle, api: OpenApi },
    ReleaseReference { surface: u64 },
    WaitFence(FenceValue),
    Upload { surface: u64, width: u32, height: u32, format: PixelFormat },
    Draw { surface: u64, wraps: SurfaceContent, pass: DrawPass },
    DropSurface { surface: u64 },
}

#[derive(Debug)]
pub struct MockSurface {
    id: u64,
    wraps: SurfaceContent,
    format: PixelFormat,
    log: CommandLog<HostCommand>,
}

impl MockSurface {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn wraps(&self) -> SurfaceContent {
        self.wraps
    }
}

impl Drop for MockSurface {
    fn drop(&mut self) {
        self.log.push(HostCommand::DropSurface { surface: self.id });
    }
}

pub struct MockHost {
    log: CommandLog<HostCommand>,
    capabilities: DeviceCapabilities,
    version: RuntimeVersion,
    color_space: ColorSpace,
    next_surface: u64,
    fail_opens: usize,
    fail_fence_open: bool,
    lost: bool,
}

impl MockHost {
    pub fn new(color_space: ColorSpace) -> Self {
        Self {
            log: CommandLog::default(),
            capabilities: FULL_CAPABILITIES,
            version: RuntimeVersion::new(4, 1, 0),
            color_space,
            next_surface: 1,
            fail_opens: 0,
            fail_fence_open: false,
            lost: false,
        }
    }

    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_runtime_version(mut self, version: RuntimeVersion) -> Self {
        self.version = version;
        self
    }

    /// Makes opening the fence fail, as on drivers without shared fences.
    pub fn with_failing_fence_open(mut self) -> Self {
        self.fail_fence_open = true;
        self
    }

    pub fn log(&self) -> CommandLog<HostCommand> {
        self.log.clone()
    }

    pub fn fail_next_opens(&mut self, count: usize) {
        self.fail_opens = count;
    }

    pub fn lose_device(&mut self) {
        self.lost = true;
    }

    fn check_lost(&self) -> Result<(), DeviceError> {
        if self.lost {
            Err(DeviceError::Lost("mock host removed".into()))
        } else {
            Ok(())
        }
    }

    fn surface(&mut self, wraps: SurfaceContent, format: PixelFormat) -> MockSurface {
        let id = self.next_surface;
        self.next_surface += 1;
        MockSurface {
            id,
            wraps,
            format,
            log: self.log.clone(),
        }
    }
}

impl HostDevice for MockHost {
    type Surface = MockSurface;
    type Target = MockTarget;

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn runtime_version(&self) -> RuntimeVersion {
        self.version
    }

    fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    fn open_fence(&mut self, handle: SharedHandle) -> Result<(), DeviceError> {
        self.check_lost()?;
        if self.fail_fence_open {
            return Err(DeviceError::Unsupported("shared fences unavailable".into()));
        }
        self.log.push(HostCommand::OpenFence(handle));
        Ok(())
    }

    fn open_shared(
        &mut self,
        handle: SharedHandle,
        desc: &TextureDesc,
        api: OpenApi,
    ) -> Result<MockSurface, DeviceError> {
        self.check_lost()?;
        if self.fail_opens > 0 {
            self.fail_opens -= 1;
            return Err(DeviceError::InvalidHandle(handle));
        }
        let surface = self.surface(SurfaceContent::Shared(handle), desc.format);
        self.log.push(HostCommand::Open {
            surface: surface.id,
            handle,
            api,
        });
        Ok(surface)
    }

    fn release_reference(&mut self, surface: &MockSurface) {
        self.log.push(HostCommand::ReleaseReference { surface: surface.id });
    }

    fn wait_fence(&mut self, value: FenceValue) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.log.push(HostCommand::WaitFence(value));
        Ok(())
    }

    fn upload_raster(&mut self, frame: &RasterFrame, format: PixelFormat) -> Result<MockSurface, DeviceError> {
        self.check_lost()?;
        let surface = self.surface(
            SurfaceContent::Raster {
                width: frame.width(),
                height: frame.height(),
            },
            format,
        );
        self.log.push(HostCommand::Upload {
            surface: surface.id,
            width: frame.width(),
            height: frame.height(),
            format,
        });
        Ok(surface)
    }

    fn surface_format(&self, surface: &MockSurface) -> PixelFormat {
        surface.format
    }

    fn draw(&mut self, surface: &MockSurface, _target: &MockTarget, pass: &DrawPass) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.log.push(HostCommand::Draw {
            surface: surface.id,
            wraps: surface.wraps,
            pass: *pass,
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
struct BrowserState {
    resizes: Vec<(u32, u32)>,
    screen_info_changes: usize,
}

/// Browser stand-in recording size notifications. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockBrowser {
    state: Arc<Mutex<BrowserState>>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resizes(&self) -> Vec<(u32, u32)> {
        lock(&self.state).resizes.clone()
    }

    pub fn screen_info_changes(&self) -> usize {
        lock(&self.state).screen_info_changes
    }
}

impl BrowserHost for MockBrowser {
    fn request_resize(&mut self, width: u32, height: u32) {
        lock(&self.state).resizes.push((width, height));
    }

    fn notify_screen_info_changed(&mut self) {
        lock(&self.state).screen_info_changes += 1;
    }
}

/// Handle allocator for tests that fabricate engine paints.
#[derive(Debug)]
pub struct HandleSource {
    next: AtomicU64,
}

impl HandleSource {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0x100),
        }
    }

    pub fn next(&self) -> SharedHandle {
        SharedHandle::from_raw(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for HandleSource {
    fn default() -> Self {
        Self::new()
    }
}
