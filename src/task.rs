use std::{future::Future, thread};
use tokio::runtime::{Builder, Handle};

/// Spawns the provided future on the current Tokio runtime if one exists,
/// otherwise spins up a dedicated current-thread runtime inside a named thread.
pub fn spawn_detached<F>(name: &str, future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
        return;
    }

    let label = name.to_string();
    let thread_name = format!("ingest-{name}");
    if let Err(err) = thread::Builder::new().name(thread_name).spawn(move || {
        match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime.block_on(future),
            Err(err) => log::error!("ingest.event=task_runtime_build_failed name={label} reason={err}"),
        }
    }) {
        log::error!("ingest.event=task_thread_spawn_failed reason={err}");
    }
}
