pub mod cpu;
pub mod replay;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use cpu::CpuBackend;
pub use replay::ReplayBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
