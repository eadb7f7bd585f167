//! Logging setup.
//!
//! All petal crates log through `tracing`. Applications call [`init`] once at
//! startup (or install their own subscriber).

/// Filter used by [`init`]: verbose for petal, quiet for the GPU stack.
pub const DEFAULT_FILTER: &str = "petal_render=debug,petal_core=info,wgpu_core=warn,wgpu_hal=warn,naga=warn";

pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}

/// Install a fmt subscriber. `RUST_LOG` takes precedence over `filter`.
pub fn init_with_filter(filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    // A second call (e.g. from several tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}
