use std::fmt;

/// Draw-time viewport in device pixels, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceSize {
    pub width: u32,
    pub height: u32,
}

impl DeviceSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Device size covering `viewport`, at least one pixel in each axis.
    pub fn from_viewport(viewport: Viewport) -> Self {
        let axis = |value: f32| {
            if value.is_finite() && value > 1.0 {
                value.round().min(u32::MAX as f32) as u32
            } else {
                1
            }
        };
        Self::new(axis(viewport.width), axis(viewport.height))
    }
}

impl fmt::Display for DeviceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What drives the size the browser renders at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeMode {
    /// Follow the viewport of each draw call.
    #[default]
    RenderView,
    /// Render at a fixed device size regardless of the viewport.
    Custom(DeviceSize),
}

/// Notifications pushed to the browser engine.
pub trait BrowserHost: Send {
    /// The view rectangle changed; `width`/`height` are logical pixels.
    fn request_resize(&mut self, width: u32, height: u32);
    /// Scale factor or screen metrics changed.
    fn notify_screen_info_changed(&mut self);
}

/// What a call to [`SizeCoordinator::update`] pushed to the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SizeChange {
    pub resized: bool,
    pub screen_info_changed: bool,
}

/// Keeps the browser's view size in step with the host viewport.
#[derive(Debug, Clone)]
pub struct SizeCoordinator {
    mode: SizeMode,
    scale_factor: f32,
    committed: Option<DeviceSize>,
    scale_dirty: bool,
}

impl SizeCoordinator {
    pub fn new(mode: SizeMode, scale_factor: f32) -> Self {
        Self {
            mode,
            scale_factor: sanitize_scale(scale_factor),
            committed: None,
            scale_dirty: false,
        }
    }

    pub fn mode(&self) -> SizeMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SizeMode) {
        self.mode = mode;
    }

    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    /// Changes the scale factor; the browser is told on the next `update`.
    pub fn set_scale_factor(&mut self, scale_factor: f32) {
        let scale_factor = sanitize_scale(scale_factor);
        if scale_factor != self.scale_factor {
            self.scale_factor = scale_factor;
            self.scale_dirty = true;
        }
    }

    pub fn committed(&self) -> Option<DeviceSize> {
        self.committed
    }

    pub fn requested(&self, viewport: Viewport) -> DeviceSize {
        match self.mode {
            SizeMode::RenderView => DeviceSize::from_viewport(viewport),
            SizeMode::Custom(size) => DeviceSize::new(size.width.max(1), size.height.max(1)),
        }
    }

    /// Called on every draw. Notifies the browser only when something it
    /// cares about changed since the last notification.
    pub fn update(&mut self, viewport: Viewport, browser: &mut dyn BrowserHost) -> SizeChange {
        let requested = self.requested(viewport);
        let mut change = SizeChange::default();

        if self.scale_dirty {
            self.scale_dirty = false;
            browser.notify_screen_info_changed();
            change.screen_info_changed = true;
            // Screen info changes always need a resize so the browser
            // re-queries its view rect.
            self.committed = None;
        }

        if self.committed != Some(requested) {
            self.committed = Some(requested);
            let logical = self.view_rect();
            tracing::debug!(
                device = %requested,
                logical = %logical,
                scale = self.scale_factor,
                "browser view resized"
            );
            browser.request_resize(logical.width, logical.height);
            change.resized = true;
        }
        change
    }

    /// The browser's view rectangle in logical pixels.
    pub fn view_rect(&self) -> DeviceSize {
        let committed = self.committed.unwrap_or(DeviceSize::new(1, 1));
        let axis = |device: u32| ((device as f32 / self.scale_factor).ceil() as u32).max(1);
        DeviceSize::new(axis(committed.width), axis(committed.height))
    }

    pub fn logical_to_device(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale_factor, y * self.scale_factor)
    }

    pub fn device_to_logical(&self, x: f32, y: f32) -> (f32, f32) {
        (x / self.scale_factor, y / self.scale_factor)
    }
}

impl Default for SizeCoordinator {
    fn default() -> Self {
        Self::new(SizeMode::RenderView, 1.0)
    }
}

fn sanitize_scale(scale_factor: f32) -> f32 {
    if scale_factor.is_finite() && scale_factor > 0.0 {
        scale_factor
    } else {
        tracing::warn!(scale_factor, "ignoring invalid scale factor; using 1.0");
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBrowser;

    #[test]
    fn unchanged_viewport_resizes_once() {
        let mut coordinator = SizeCoordinator::default();
        let mut browser = MockBrowser::new();
        for _ in 0..10 {
            coordinator.update(Viewport::new(800.0, 600.0), &mut browser);
        }
        assert_eq!(browser.resizes(), vec![(800, 600)]);
        assert_eq!(browser.screen_info_changes(), 0);
    }

    #[test]
    fn viewport_change_resizes_again() {
        let mut coordinator = SizeCoordinator::default();
        let mut browser = MockBrowser::new();
        coordinator.update(Viewport::new(800.0, 600.0), &mut browser);
        let change = coordinator.update(Viewport::new(1024.0, 600.0), &mut browser);
        assert!(change.resized);
        assert_eq!(browser.resizes().len(), 2);
    }

    #[test]
    fn scale_change_notifies_then_resizes() {
        let mut coordinator = SizeCoordinator::default();
        let mut browser = MockBrowser::new();
        coordinator.update(Viewport::new(1000.0, 500.0), &mut browser);
        coordinator.set_scale_factor(2.0);
        let change = coordinator.update(Viewport::new(1000.0, 500.0), &mut browser);
        assert_eq!(
            change,
            SizeChange {
                resized: true,
                screen_info_changed: true
            }
        );
        assert_eq!(browser.resizes(), vec![(1000, 500), (500, 250)]);

        coordinator.set_scale_factor(2.0);
        assert_eq!(coordinator.update(Viewport::new(1000.0, 500.0), &mut browser), SizeChange::default());
    }

    #[test]
    fn view_rect_rounds_up_and_clamps() {
        let mut coordinator = SizeCoordinator::new(SizeMode::RenderView, 1.5);
        let mut browser = MockBrowser::new();
        coordinator.update(Viewport::new(101.0, 0.0), &mut browser);
        assert_eq!(coordinator.view_rect(), DeviceSize::new(68, 1));
    }

    #[test]
    fn custom_mode_ignores_viewport() {
        let mut coordinator = SizeCoordinator::new(SizeMode::Custom(DeviceSize::new(640, 480)), 1.0);
        let mut browser = MockBrowser::new();
        coordinator.update(Viewport::new(10.0, 10.0), &mut browser);
        coordinator.update(Viewport::new(20.0, 20.0), &mut browser);
        assert_eq!(browser.resizes(), vec![(640, 480)]);
    }

    #[test]
    fn point_conversions_use_scale() {
        let coordinator = SizeCoordinator::new(SizeMode::RenderView, 2.0);
        assert_eq!(coordinator.logical_to_device(10.0, 4.0), (20.0, 8.0));
        assert_eq!(coordinator.device_to_logical(10.0, 4.0), (5.0, 2.0));
    }

    #[test]
    fn invalid_scale_falls_back_to_one() {
        let coordinator = SizeCoordinator::new(SizeMode::RenderView, f32::NAN);
        assert_eq!(coordinator.scale_factor(), 1.0);
    }
}
