#![no_std]
//! A queue-like and random-access object store built directly atop a raw NAND flash device,
//! injected through [`nand_driver::NandDriver`].
//!
//! The engine maintains free/bad block lists, a per-block page-use bitmap, and one linked
//! chain of blocks per logical store. Objects are framed with a sync-marker header so a
//! dequeue can resynchronize past corruption instead of failing the whole store.

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

mod fmt;

mod block;
mod clock;
mod engine;
mod error;
mod lock;
mod object;
mod stream;
mod store;

pub use clock::{Clock, TestClock};
#[cfg(feature = "std")]
pub use clock::WallClock;
pub use engine::{Descriptor, Engine, Mode, Stats};
pub use error::Error;
pub use lock::{DeviceLock, LockError, SingleThreadLock};
#[cfg(feature = "std")]
pub use lock::StdMutexLock;
pub use object::Sid;
pub use store::Attributes;
