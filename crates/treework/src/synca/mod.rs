mod rwlock;
mod spinlock;

pub use rwlock::*;
pub use spinlock::*;
