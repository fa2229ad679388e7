//! Profiling support via Tracy.
//!
//! This module re-exports the CPU profiling macros of
//! [`vista_core::profiling`] and adds a few renderer-level plots.
//!
//! # Enabling Profiling
//!
//! ```toml
//! [dependencies]
//! vista-graphics = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! Without the feature every macro compiles to nothing.

pub use vista_core::profiling::*;

use crate::renderer::RendererStats;

/// Start the Tracy client. Does nothing without the `profiling` feature.
pub fn start() {
    #[cfg(feature = "profiling")]
    {
        let _ = vista_core::profiling::Client::start();
        log::debug!("Tracy client started");
    }
}

/// Plot the renderer counters.
pub fn plot_stats(stats: &RendererStats) {
    crate::profile_plot!("batches_submitted", stats.batches_submitted);
    crate::profile_plot!("batches_failed", stats.batches_failed);
    crate::profile_plot!("views_rendered", stats.views_rendered);
    crate::profile_plot!("bytes_uploaded", stats.bytes_uploaded);
}
