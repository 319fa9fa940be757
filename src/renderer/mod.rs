//! Renderer
//!
//! - [`core`]: the [`Driver`] seam, render targets and backends
//! - [`pipeline`]: shader capabilities, generation, caching and binding
//! - [`graph`]: frame context, passes and the [`Choreographer`]
//! - [`settings`]: serializable configuration
//!
//! [`Renderer`] runs the per-frame sequence:
//!
//! 1. begin frame and collect deferred GPU deletions
//! 2. frame listeners (`will render`)
//! 3. preprocess tasks: shadows, then image-based lighting
//! 4. the choreographer
//! 5. frame listeners (`did render`)
//! 6. evict stale lighting blocks and end the frame

pub mod core;
pub mod graph;
pub mod pipeline;
pub mod settings;

use std::cell::RefCell;
use std::rc::Rc;

use log::{error, trace};

use self::core::Driver;
use self::graph::{Choreographer, RenderContext};
use self::settings::RendererSettings;
use crate::errors::Result;
use crate::preprocess::{FrameListener, IblPreprocess, Preprocess, ShadowPreprocess};
use crate::scene::{Camera, Scene};

pub struct Renderer {
    frame: u64,
    context: RenderContext,
    shadows: ShadowPreprocess,
    ibl: IblPreprocess,
    choreographer: Choreographer,
    listeners: Vec<Rc<RefCell<dyn FrameListener>>>,
}

impl Renderer {
    /// A renderer for a viewport of the driver's display size.
    pub fn new(settings: &RendererSettings, driver: &dyn Driver) -> Result<Self> {
        let display = driver.display();
        Ok(Self {
            frame: 0,
            context: RenderContext::new(),
            shadows: ShadowPreprocess::new(settings.shadows),
            ibl: IblPreprocess::new(settings.ibl),
            choreographer: Choreographer::new(settings, display.width(), display.height())?,
            listeners: Vec::new(),
        })
    }

    #[inline]
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    #[must_use]
    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut RenderContext {
        &mut self.context
    }

    #[must_use]
    pub fn choreographer(&self) -> &Choreographer {
        &self.choreographer
    }

    pub fn choreographer_mut(&mut self) -> &mut Choreographer {
        &mut self.choreographer
    }

    #[must_use]
    pub fn shadows(&self) -> &ShadowPreprocess {
        &self.shadows
    }

    #[must_use]
    pub fn ibl(&self) -> &IblPreprocess {
        &self.ibl
    }

    pub fn add_listener(&mut self, listener: Rc<RefCell<dyn FrameListener>>) {
        self.listeners.push(listener);
    }

    pub fn remove_listener(&mut self, listener: &Rc<RefCell<dyn FrameListener>>) {
        self.listeners.retain(|l| !Rc::ptr_eq(l, listener));
    }

    pub fn set_viewport_size(&mut self, width: u32, height: u32) -> bool {
        self.choreographer.set_viewport_size(width, height)
    }

    /// Renders one frame. Invariant violations abort the frame and are
    /// returned; recoverable failures are logged and degrade the frame.
    /// The driver's frame is closed either way.
    pub fn render_frame(
        &mut self,
        scene: &dyn Scene,
        outgoing: Option<&dyn Scene>,
        camera: Camera,
        driver: &mut dyn Driver,
    ) -> Result<()> {
        self.frame += 1;
        trace!("frame {}", self.frame);
        driver.begin_frame(self.frame);
        driver.collect_garbage();

        let result = self.run_frame(scene, outgoing, camera, driver);
        if let Err(err) = &result {
            error!("Frame {} aborted: {err}", self.frame);
        }

        self.context.lighting_cache().borrow_mut().evict_unused(self.frame);
        driver.end_frame();
        result
    }

    fn run_frame(
        &mut self,
        scene: &dyn Scene,
        outgoing: Option<&dyn Scene>,
        camera: Camera,
        driver: &mut dyn Driver,
    ) -> Result<()> {
        self.context.begin_frame(self.frame, camera);
        self.choreographer.configure_context(&mut self.context, driver);

        for listener in &self.listeners {
            listener.borrow_mut().on_frame_will_render(&self.context);
        }

        self.shadows.execute(scene, &mut self.context, driver)?;
        self.ibl.execute(scene, &mut self.context, driver)?;
        self.choreographer.render(scene, outgoing, &self.context, driver)?;

        for listener in &self.listeners {
            listener.borrow_mut().on_frame_did_render(&self.context);
        }
        Ok(())
    }
}
