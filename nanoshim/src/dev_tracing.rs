/// Development helper: initialize a tracing subscriber when `RUST_LOG` is set.
///
/// Tests and host harnesses can call `nanoshim::dev_tracing::init_tracing()`
/// to see socket lifecycle, cancellation and receive-loop events. This is a
/// no-op when `RUST_LOG` is not set or a global subscriber already exists.
pub fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_thread_names(true)
            .with_test_writer()
            .try_init();
    }
}
