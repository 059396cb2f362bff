/// Runs a closure when dropped.
///
/// Used to tie bookkeeping cleanup (in-flight sets, fetch registrations) to
/// the completion of a future, whether it finished or was dropped mid-flight.
/// The closure must not panic, since it runs during drop.
pub(crate) struct DropGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for DropGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

/// Defers a closure until the returned guard is dropped.
pub(crate) fn on_drop<F: FnOnce()>(f: F) -> DropGuard<F> {
    DropGuard(Some(f))
}
