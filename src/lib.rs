//! uceforge library.
//!
//! Builds and edits UCE cartridge containers. The binary is a thin CLI over
//! these modules; integration tests drive them directly with a fake
//! [`backend::FilesystemImageBackend`].

pub mod assemble;
pub mod backend;
pub mod config;
pub mod container;
pub mod edit;
pub mod framer;
pub mod layout;
pub mod preflight;
pub mod process;
pub mod save;
pub mod squashfs;
pub mod staging;
pub mod timing;
pub mod workdir;
