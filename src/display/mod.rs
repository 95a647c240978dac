//! Output displays: the per-session sink and the secondary surface kept in
//! step with it.

mod html_file;
mod sink;
mod surface;

pub use html_file::{HtmlFileSurface, HtmlFileSurfaceFactory};
pub use sink::{OutputSink, OutputSnapshot};
pub use surface::{CloseSignal, Surface, SurfaceContent, SurfaceFactory, Synchronizer};
