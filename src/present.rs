//! Present loop
//!
//! One input line becomes one committed frame: pick the back slot, wipe it,
//! draw the line at the new cursor, damage, commit, then flush until the
//! compositor connection accepts everything.

use crate::blit::draw_line;
use crate::config::TextConfig;
use crate::damage::{FrameDamage, ScrollState};
use crate::glyph::GlyphSource;
use crate::input::{InputError, LineSource};
use crate::shm::{FramePool, PoolError, Slot};
use crate::slots::SlotTracker;
use crate::surface::{FlushError, Interest, Surface, SurfaceEvent, Transport};
use std::io::BufRead;
use thiserror::Error;
use tracing::{debug, info, trace};

#[derive(Debug, Error)]
pub enum PresentError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("failed to allocate frame pool")]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Flush(FlushError),

    #[error("failed waiting on compositor connection")]
    Wait(#[source] std::io::Error),

    #[error("compositor proposed unsupported surface size {width}x{height}")]
    Rejected { width: u32, height: u32 },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Drives frames from text lines into the compositor
pub struct Presenter<B, G> {
    backend: B,
    glyphs: G,
    pool: FramePool,
    scroll: ScrollState,
    slots: SlotTracker,
    text: TextConfig,
    track_release: bool,
    closed: bool,
    frames: u64,
}

impl<B, G> Presenter<B, G>
where
    B: Surface + Transport,
    G: GlyphSource,
{
    /// Register `pool` with the surface and start at the top margin in slot 0.
    pub fn new(
        mut backend: B,
        glyphs: G,
        pool: FramePool,
        text: TextConfig,
        track_release: bool,
    ) -> Result<Self, PresentError> {
        backend.bind_pool(&pool)?;
        let scroll = ScrollState::new(pool.width(), pool.height(), text.scroll_metrics());

        Ok(Self {
            backend,
            glyphs,
            pool,
            scroll,
            slots: SlotTracker::new(),
            text,
            track_release,
            closed: false,
            frames: 0,
        })
    }

    /// Present lines until the surface closes.
    ///
    /// End of input and read errors come back as [`PresentError::Input`].
    pub fn run<R: BufRead>(&mut self, source: &mut LineSource<R>) -> Result<(), PresentError> {
        debug!(
            "Present loop starting at cursor {} in slot {}",
            self.scroll.cursor_y(),
            self.scroll.active_slot().index()
        );
        loop {
            let line = source.next_line()?;
            if self.present_line(&line)?.is_none() {
                info!("Overlay closed after {} frames", self.frames);
                return Ok(());
            }
        }
    }

    /// Tear down, handing back the glyph source for shutdown
    pub fn into_glyphs(self) -> G {
        self.glyphs
    }

    /// Render and submit one frame. Returns `None` once the surface is closed.
    ///
    /// The frame is drawn into the slot after the compositor has released it
    /// and any pending resize has been applied.
    pub fn present_line(&mut self, line: &str) -> Result<Option<FrameDamage>, PresentError> {
        self.process_events()?;
        if self.closed {
            return Ok(None);
        }

        // A resize can land while waiting; geometry is fixed only afterwards
        if !self.wait_for_slot(self.scroll.active_slot())? {
            return Ok(None);
        }
        let frame = self.scroll.advance();

        self.pool.clear(frame.slot);
        let stats = {
            let mut view = self.pool.slot_view(frame.slot);
            draw_line(
                &mut view,
                &mut self.glyphs,
                line,
                frame.cursor_y,
                self.text.alpha,
                self.text.advance,
            )
        };

        self.backend.attach(frame.slot);
        for rect in frame.rects() {
            self.backend.damage(rect);
        }
        self.backend.commit();
        if self.track_release {
            self.slots.presented(frame.slot);
        }

        let waits = self.flush()?;
        self.scroll.swap();
        self.frames += 1;

        debug!(
            "Frame {} slot {} cursor {} drawn {} skipped {} full_repaint {} flush_waits {}",
            self.frames,
            frame.slot.index(),
            frame.cursor_y,
            stats.drawn,
            stats.skipped,
            frame.full_repaint(),
            waits
        );

        Ok(Some(frame))
    }

    /// Flush, waiting on the connection whenever its buffer is full.
    /// Returns the number of waits it took.
    fn flush(&mut self) -> Result<usize, PresentError> {
        let mut waits = 0;
        loop {
            match self.backend.flush() {
                Ok(()) => return Ok(waits),
                Err(FlushError::WouldBlock) => {
                    waits += 1;
                    trace!("Flush would block, waiting on connection ({})", waits);
                    self.backend
                        .wait(Interest::ReadWrite)
                        .map_err(PresentError::Wait)?;
                }
                Err(e) => return Err(PresentError::Flush(e)),
            }
        }
    }

    /// Block until the compositor gives `slot` back. Returns false if the
    /// surface closed meanwhile.
    fn wait_for_slot(&mut self, slot: Slot) -> Result<bool, PresentError> {
        while self.track_release && self.slots.is_in_flight(slot) {
            debug!("Slot {} still in flight, waiting for release", slot.index());
            self.backend
                .wait(Interest::Readable)
                .map_err(PresentError::Wait)?;
            self.process_events()?;
            if self.closed {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn process_events(&mut self) -> Result<(), PresentError> {
        for event in self.backend.dispatch_pending()? {
            match event {
                SurfaceEvent::Released(slot) => self.slots.released(slot),
                SurfaceEvent::Resized { width, height } => self.resize(width, height)?,
                SurfaceEvent::Rejected { width, height } => {
                    return Err(PresentError::Rejected { width, height });
                }
                SurfaceEvent::Closed => self.closed = true,
            }
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), PresentError> {
        if (width, height) == (self.pool.width(), self.pool.height()) {
            return Ok(());
        }

        let pool = FramePool::allocate(width, height)?;
        self.backend.bind_pool(&pool)?;
        self.pool = pool;
        self.slots.reset();
        self.scroll.resize(width, height);
        info!("Frame pool reallocated for {}x{}", width, height);
        Ok(())
    }
}
