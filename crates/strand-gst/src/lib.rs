//! Strand GStreamer - Native engine for the Strand orchestration core
//!
//! Provides:
//! - [`GstEngine`], the [`strand_core::Engine`] implementation over a
//!   GStreamer pipeline
//! - Native window surfaces for the video overlay
//! - An installation check for the element factories the graph needs
//!
//! # Example
//!
//! ```rust,no_run
//! use strand_core::{MediaSource, PlaybackSession, PlayerConfig};
//! use strand_gst::GstEngine;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let engine = GstEngine::shared()?;
//! let session = PlaybackSession::new(engine, &MediaSource::new("/media/movie.mp4"), PlayerConfig::from_env())?;
//! let handle = session.spawn();
//! handle.play().await?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod window;
pub mod check;

pub use engine::{init_gstreamer, GstEngine};
pub use window::{native_handle_of, WindowSurface};
pub use check::{check_gstreamer_installation, GStreamerInfo};
