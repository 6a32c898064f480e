//! A safety net against a buggy service hanging a test indefinitely.

use std::thread;
use std::time::Duration;

use runtime_service::BaseService;

/// Spawns a background thread that force-stops `service` if it hasn't
/// stopped on its own within `timeout`. Wrap a test's `service.start()`
/// call with this so a stuck cancellation path fails the test instead of
/// hanging the whole suite.
pub fn stop_after<S: BaseService>(service: &S, timeout: Duration) {
    let token = service.core().token_arc();
    thread::spawn(move || {
        thread::sleep(timeout);
        token.set();
    });
}
