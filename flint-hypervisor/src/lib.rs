//! # Flint Hypervisor Control Layer
//!
//! The stateful orchestration core of Flint: it translates high-level
//! requests into hypervisor operations, composes domain definitions from
//! image libraries and cloud-init seeds, bridges serial consoles, samples
//! per-domain performance, and reconciles storage usage across overlapping
//! filesystems.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            HypervisorClient             │
//! │  (summaries, create flow, attach, ...)  │
//! └───────┬──────────┬──────────┬───────────┘
//!         │          │          │
//!    composer    sampler    resources ...
//!         │          │          │
//! ┌───────┴──────────┴──────────┴───────────┐
//! │            Hypervisor trait             │
//! └───────────┬────────────────┬────────────┘
//!             ▼                ▼
//!   ┌──────────────────┐  ┌──────────────────┐
//!   │ LibvirtHypervisor│  │  MockHypervisor  │
//!   │ (feature libvirt)│  │  (dev and tests) │
//!   └──────────────────┘  └──────────────────┘
//! ```

pub mod client;
pub mod cloudinit;
pub mod composer;
pub mod console;
pub mod disk;
pub mod domain_xml;
pub mod error;
pub mod events;
pub mod guest_agent;
pub mod images;
pub mod mock;
pub mod network;
pub mod resources;
pub mod sampler;
pub mod snapshots;
pub mod traits;
pub mod types;

#[cfg(feature = "libvirt")]
pub mod libvirt;

pub use client::HypervisorClient;
pub use console::{bridge, ConsoleChannel, ConsoleTransport};
pub use error::{HypervisorError, Result};
pub use events::{ActivitySink, ActivityStatus, NoopSink};
pub use images::ImageLibrary;
pub use mock::MockHypervisor;
pub use traits::Hypervisor;
pub use types::*;

#[cfg(feature = "libvirt")]
pub use libvirt::LibvirtHypervisor;
