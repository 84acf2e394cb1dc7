//! Wayland session
//!
//! Binds the compositor globals, creates a click-through layer-shell overlay
//! surface and implements the [`Surface`]/[`Transport`] seams on top of it.

use crate::config::{Anchor, SurfaceConfig};
use crate::damage::Rect;
use crate::shm::{FramePool, Slot};
use crate::surface::{
    FlushError, Interest, LayerSurfaceHandler, Surface, SurfaceEvent, SurfaceLifecycle, Transport,
    wait_for_fd,
};
use anyhow::{Context, Result, bail};
use std::io;
use tracing::{debug, info, trace, warn};
use wayland_client::globals::{GlobalList, GlobalListContents, registry_queue_init};
use wayland_client::protocol::{
    wl_buffer, wl_compositor, wl_output, wl_region, wl_registry, wl_shm, wl_shm_pool, wl_surface,
};
use wayland_client::backend::WaylandError;
use wayland_client::{Connection, Dispatch, EventQueue, QueueHandle, delegate_noop};
use wayland_protocols_wlr::layer_shell::v1::client::{zwlr_layer_shell_v1, zwlr_layer_surface_v1};

/// Globals the overlay cannot run without
struct Capabilities {
    compositor: wl_compositor::WlCompositor,
    shm: wl_shm::WlShm,
    output: wl_output::WlOutput,
    layer_shell: zwlr_layer_shell_v1::ZwlrLayerShellV1,
}

impl Capabilities {
    /// Bind every required global by its typed interface
    fn bind(globals: &GlobalList, qh: &QueueHandle<SessionState>) -> Result<Self> {
        globals.contents().with_list(|list| {
            for global in list {
                debug!("registry::global {} {} v{}", global.name, global.interface, global.version);
            }
        });

        // damage_buffer needs wl_surface v4
        let compositor: wl_compositor::WlCompositor = globals
            .bind(qh, 4..=4, ())
            .context("Compositor does not offer wl_compositor v4")?;
        let shm: wl_shm::WlShm = globals
            .bind(qh, 1..=1, ())
            .context("Compositor does not offer wl_shm")?;
        let output: wl_output::WlOutput = globals
            .bind(qh, 1..=3, ())
            .context("Compositor does not advertise any wl_output")?;
        let layer_shell: zwlr_layer_shell_v1::ZwlrLayerShellV1 = globals
            .bind(qh, 1..=2, ())
            .context("Compositor does not support zwlr_layer_shell_v1")?;

        Ok(Self {
            compositor,
            shm,
            output,
            layer_shell,
        })
    }
}

/// Dispatch target for compositor events
struct SessionState {
    lifecycle: SurfaceLifecycle,
}

/// Connection plus the overlay surface and its buffers
pub struct WaylandSession {
    conn: Connection,
    queue: EventQueue<SessionState>,
    qh: QueueHandle<SessionState>,
    state: SessionState,
    caps: Capabilities,
    surface: wl_surface::WlSurface,
    layer_surface: zwlr_layer_surface_v1::ZwlrLayerSurfaceV1,
    shm_pool: Option<wl_shm_pool::WlShmPool>,
    buffers: Vec<wl_buffer::WlBuffer>,
}

impl WaylandSession {
    /// Connect to `$WAYLAND_DISPLAY`, create the overlay and wait for its
    /// first configure.
    pub fn connect(config: &SurfaceConfig) -> Result<Self> {
        let conn = Connection::connect_to_env().context("Failed to connect to Wayland display")?;
        let (globals, mut queue) =
            registry_queue_init::<SessionState>(&conn).context("Failed to read compositor globals")?;
        let qh = queue.handle();
        let caps = Capabilities::bind(&globals, &qh)?;

        let surface = caps.compositor.create_surface(&qh, ());

        // Empty input region: pointer events fall through to whatever is below
        let region = caps.compositor.create_region(&qh, ());
        surface.set_input_region(Some(&region));
        region.destroy();

        let layer_surface = caps.layer_shell.get_layer_surface(
            &surface,
            Some(&caps.output),
            zwlr_layer_shell_v1::Layer::Overlay,
            config.namespace.clone(),
            &qh,
            (),
        );
        layer_surface.set_anchor(anchor_flags(config.anchor));
        layer_surface.set_size(config.width, config.height);
        surface.commit();

        let mut state = SessionState {
            lifecycle: SurfaceLifecycle::new(config.width, config.height, config.configure_policy),
        };
        queue
            .roundtrip(&mut state)
            .context("Failed to receive initial surface configure")?;

        if state.lifecycle.is_closed() {
            bail!("Overlay surface was closed before it was configured");
        }
        if !state.lifecycle.is_configured() {
            warn!("Overlay surface has not been acknowledged; commits may be rejected");
        }

        let (width, height) = state.lifecycle.size();
        info!("Overlay surface ready ({}x{}, {:?})", width, height, config.anchor);

        Ok(Self {
            conn,
            queue,
            qh,
            state,
            caps,
            surface,
            layer_surface,
            shm_pool: None,
            buffers: Vec::new(),
        })
    }

    /// Surface size the compositor settled on
    pub fn size(&self) -> (u32, u32) {
        self.state.lifecycle.size()
    }

    /// Pull whatever the socket holds into the queue and dispatch it
    fn read_events(&mut self) -> io::Result<()> {
        if let Some(guard) = self.queue.prepare_read() {
            match guard.read() {
                Ok(n) => trace!("Read {} compositor events", n),
                Err(WaylandError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(wayland_io_error(e)),
            }
        }
        self.queue
            .dispatch_pending(&mut self.state)
            .map_err(|e| io::Error::other(e.to_string()))?;
        Ok(())
    }

    fn release_buffers(&mut self) {
        for buffer in self.buffers.drain(..) {
            buffer.destroy();
        }
        if let Some(pool) = self.shm_pool.take() {
            pool.destroy();
        }
    }
}

impl Surface for WaylandSession {
    fn bind_pool(&mut self, pool: &FramePool) -> Result<()> {
        self.release_buffers();

        let size = i32::try_from(pool.len()).context("Frame pool too large for wl_shm")?;
        let width = i32::try_from(pool.width()).context("Surface width out of range")?;
        let height = i32::try_from(pool.height()).context("Surface height out of range")?;
        let stride = i32::try_from(pool.stride()).context("Surface stride out of range")?;

        let shm_pool = self.caps.shm.create_pool(pool.fd(), size, &self.qh, ());
        for slot in Slot::ALL {
            let offset = pool.slot_range(slot).start as i32;
            let buffer = shm_pool.create_buffer(
                offset,
                width,
                height,
                stride,
                wl_shm::Format::Argb8888,
                &self.qh,
                slot,
            );
            self.buffers.push(buffer);
        }
        self.shm_pool = Some(shm_pool);

        debug!("Registered {}x{} frame pool with compositor", width, height);
        Ok(())
    }

    fn attach(&mut self, slot: Slot) {
        self.surface.attach(Some(&self.buffers[slot.index()]), 0, 0);
    }

    fn damage(&mut self, rect: Rect) {
        self.surface
            .damage_buffer(rect.x, rect.y, rect.width, rect.height);
    }

    fn commit(&mut self) {
        self.surface.commit();
    }
}

impl Transport for WaylandSession {
    fn flush(&mut self) -> Result<(), FlushError> {
        match self.conn.flush() {
            Ok(()) => Ok(()),
            Err(WaylandError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                Err(FlushError::WouldBlock)
            }
            Err(e) => Err(FlushError::Fatal(wayland_io_error(e))),
        }
    }

    fn wait(&mut self, interest: Interest) -> io::Result<()> {
        let ready = wait_for_fd(self.conn.backend().poll_fd(), interest)?;
        if ready.writable {
            trace!("Compositor connection writable");
        }
        if ready.readable {
            self.read_events()?;
        }
        Ok(())
    }

    fn dispatch_pending(&mut self) -> Result<Vec<SurfaceEvent>> {
        // The socket is non-blocking, so this only picks up what already arrived
        self.read_events()
            .context("Failed to dispatch compositor events")?;
        Ok(self.state.lifecycle.take_events())
    }
}

impl Drop for WaylandSession {
    fn drop(&mut self) {
        self.release_buffers();
        if !self.state.lifecycle.is_closed() {
            self.layer_surface.destroy();
        }
        self.surface.destroy();
        if let Err(e) = self.conn.flush() {
            debug!("Final flush failed: {}", e);
        }
    }
}

fn wayland_io_error(e: WaylandError) -> io::Error {
    match e {
        WaylandError::Io(e) => e,
        WaylandError::Protocol(p) => io::Error::other(format!("protocol error: {}", p)),
    }
}

fn anchor_flags(anchor: Anchor) -> zwlr_layer_surface_v1::Anchor {
    use zwlr_layer_surface_v1::Anchor as Edge;
    match anchor {
        Anchor::TopLeft => Edge::Top | Edge::Left,
        Anchor::TopRight => Edge::Top | Edge::Right,
        Anchor::BottomLeft => Edge::Bottom | Edge::Left,
        Anchor::BottomRight => Edge::Bottom | Edge::Right,
    }
}

impl Dispatch<wl_registry::WlRegistry, GlobalListContents> for SessionState {
    fn event(
        _state: &mut Self,
        _registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_registry::Event::GlobalRemove { name } = event {
            debug!("registry::global_remove {}", name);
        }
    }
}

impl Dispatch<wl_buffer::WlBuffer, Slot> for SessionState {
    fn event(
        state: &mut Self,
        _buffer: &wl_buffer::WlBuffer,
        event: wl_buffer::Event,
        slot: &Slot,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            trace!("wl_buffer::release slot {}", slot.index());
            state.lifecycle.push(SurfaceEvent::Released(*slot));
        }
    }
}

impl Dispatch<zwlr_layer_surface_v1::ZwlrLayerSurfaceV1, ()> for SessionState {
    fn event(
        state: &mut Self,
        layer_surface: &zwlr_layer_surface_v1::ZwlrLayerSurfaceV1,
        event: zwlr_layer_surface_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_layer_surface_v1::Event::Configure {
                serial,
                width,
                height,
            } => {
                if state.lifecycle.on_configure(serial, width, height) {
                    layer_surface.ack_configure(serial);
                }
            }
            zwlr_layer_surface_v1::Event::Closed => {
                state.lifecycle.on_closed();
                layer_surface.destroy();
            }
            _ => {}
        }
    }
}

delegate_noop!(SessionState: wl_compositor::WlCompositor);
delegate_noop!(SessionState: wl_region::WlRegion);
delegate_noop!(SessionState: wl_shm_pool::WlShmPool);
delegate_noop!(SessionState: zwlr_layer_shell_v1::ZwlrLayerShellV1);
delegate_noop!(SessionState: ignore wl_shm::WlShm);
delegate_noop!(SessionState: ignore wl_output::WlOutput);
delegate_noop!(SessionState: ignore wl_surface::WlSurface);
