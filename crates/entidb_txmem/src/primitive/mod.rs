//! Transactional primitives used as building blocks by the collections.

mod bitmap;
mod flag;

pub use bitmap::{Bitmap, BitmapChanges, TransactionalBitmap};
pub use flag::{FlagChange, TransactionalFlag};
