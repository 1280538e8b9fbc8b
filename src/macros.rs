#![allow(unused_macros)]

/// Helper macro for locking items
///
/// ```rust, ignore
///  let mut slot = lock!(self.in_flight);
///  *slot = Some(context);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let predicates = read_lock!(self.predicates);
///  println!("{}", predicates.len());
/// ```
macro_rules! read_lock {
    ($rwlock:expr) => {
        $rwlock.read().expect("Failed to acquire read lock")
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  let mut denylist = write_lock!(self.denylist);
///  denylist.insert(key);
/// ```
macro_rules! write_lock {
    ($rwlock:expr) => {
        $rwlock.write().expect("Failed to acquire write lock")
    };
}
